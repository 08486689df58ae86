//! Query-string helpers for the search index

mod sanitizer;

pub use sanitizer::*;
