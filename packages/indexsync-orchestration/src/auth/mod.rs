//! Content-service authentication
//!
//! [`AuthTokenBroker`] hands out bearer tokens per repository, registering a
//! new one through a [`TokenRegistrar`] only when the cached token is missing
//! or about to expire.

mod broker;
mod registrar;

pub use broker::AuthTokenBroker;
pub use registrar::{HttpTokenRegistrar, RegistrationResponse, TokenRegistrar, TokenValue};
