//! Content objects as served by the content service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Base type of a content object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Document,
    Folder,
    Relationship,
    Policy,
    Item,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Document => "document",
            BaseType::Folder => "folder",
            BaseType::Relationship => "relationship",
            BaseType::Policy => "policy",
            BaseType::Item => "item",
        }
    }

    /// Only documents and folders are searchable.
    pub fn is_indexable(&self) -> bool {
        matches!(self, BaseType::Document | BaseType::Folder)
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a custom (type-specific) property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Multi(Vec<String>),
}

/// Current state of one object in the document store.
///
/// Serialized as camelCase JSON on the wire and as bincode in the cache, so
/// no field may be skipped conditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentObject {
    pub id: String,
    pub repository_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_type: BaseType,
    /// Concrete type id, e.g. `cmis:document` or a custom type
    pub object_type: String,
    #[serde(default)]
    pub secondary_types: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,

    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    /// Extracted plain text, used for full-text indexing
    #[serde(default)]
    pub text_content: Option<String>,

    #[serde(default)]
    pub version_label: Option<String>,
    #[serde(default)]
    pub latest_version: bool,
    #[serde(default)]
    pub major_version: bool,

    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ContentObject {
    /// A bare document owned by `user`, timestamps set to now.
    pub fn document(
        repository_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let user = user.into();
        Self {
            id: id.into(),
            repository_id: repository_id.into(),
            name: name.into(),
            description: None,
            base_type: BaseType::Document,
            object_type: "cmis:document".to_string(),
            secondary_types: Vec::new(),
            parent_id: None,
            path: None,
            created_by: user.clone(),
            created_at: now,
            modified_by: user,
            modified_at: now,
            mime_type: None,
            content_name: None,
            content_length: None,
            text_content: None,
            version_label: None,
            latest_version: true,
            major_version: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn folder(
        repository_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            base_type: BaseType::Folder,
            object_type: "cmis:folder".to_string(),
            ..Self::document(repository_id, id, name, user)
        }
    }

    pub fn with_content(mut self, mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        self.content_name = Some(self.name.clone());
        self.content_length = Some(text.len() as u64);
        self.mime_type = Some(mime_type.into());
        self.text_content = Some(text);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_property(mut self, id: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(id.into(), value);
        self
    }
}
