//! Projection of content objects onto index documents

use indexsync_storage::{ContentObject, FieldValue, IndexDocument, PropertyValue};

pub const FIELD_CONTENT: &str = "content";
pub const DYNAMIC_PROPERTY_PREFIX: &str = "dynamic.property.";

/// Build the index document of `object`.
///
/// `with_content` adds the extracted text as the `content` field.
pub fn build_document(object: &ContentObject, with_content: bool) -> IndexDocument {
    let mut doc = IndexDocument::new(&object.repository_id, &object.id);
    doc.mime_type = object.mime_type.clone();

    doc.push_field("name", FieldValue::Text(object.name.clone()));
    doc.push_field("base_type", FieldValue::Text(object.base_type.as_str().to_string()));
    doc.push_field("object_type", FieldValue::Text(object.object_type.clone()));
    doc.push_field("created_by", FieldValue::Text(object.created_by.clone()));
    doc.push_field("created_at", FieldValue::DateTime(object.created_at));
    doc.push_field("modified_by", FieldValue::Text(object.modified_by.clone()));
    doc.push_field("modified_at", FieldValue::DateTime(object.modified_at));

    let optional_text = [
        ("description", &object.description),
        ("parent_id", &object.parent_id),
        ("path", &object.path),
        ("version_label", &object.version_label),
        ("content_name", &object.content_name),
        ("mime_type", &object.mime_type),
    ];
    for (name, value) in optional_text {
        if let Some(value) = value {
            doc.push_field(name, FieldValue::Text(value.clone()));
        }
    }
    if let Some(length) = object.content_length {
        doc.push_field(
            "content_length",
            FieldValue::Integer(i64::try_from(length).unwrap_or(i64::MAX)),
        );
    }
    if !object.secondary_types.is_empty() {
        doc.push_field(
            "secondary_types",
            FieldValue::TextList(object.secondary_types.clone()),
        );
    }
    doc.push_field("latest_version", FieldValue::Boolean(object.latest_version));

    for (id, value) in &object.properties {
        doc.push_field(
            format!("{}{}", DYNAMIC_PROPERTY_PREFIX, id),
            property_field(value),
        );
    }

    if with_content {
        if let Some(text) = &object.text_content {
            doc.push_field(FIELD_CONTENT, FieldValue::Text(text.clone()));
        }
    }
    doc
}

fn property_field(value: &PropertyValue) -> FieldValue {
    match value {
        PropertyValue::String(s) => FieldValue::Text(s.clone()),
        PropertyValue::Integer(i) => FieldValue::Integer(*i),
        PropertyValue::Decimal(d) => FieldValue::Decimal(*d),
        PropertyValue::Boolean(b) => FieldValue::Boolean(*b),
        PropertyValue::DateTime(dt) => FieldValue::DateTime(*dt),
        PropertyValue::Multi(items) => FieldValue::TextList(items.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_fields_and_dynamic_properties() {
        let object = ContentObject::document("bedroom", "a", "plan.txt", "admin")
            .with_content("text/plain", "quarterly plan")
            .with_parent("root")
            .with_property("ext:rating", PropertyValue::Integer(4))
            .with_property("ext:tags", PropertyValue::Multi(vec!["x".into(), "y".into()]));

        let doc = build_document(&object, true);
        assert_eq!(doc.unique_id(), "bedroom_a");
        assert_eq!(doc.text_field("name"), Some("plan.txt"));
        assert_eq!(doc.text_field("parent_id"), Some("root"));
        assert_eq!(doc.text_field("base_type"), Some("document"));
        assert_eq!(doc.text_field(FIELD_CONTENT), Some("quarterly plan"));
        assert_eq!(doc.field("content_length"), Some(&FieldValue::Integer(14)));
        assert_eq!(
            doc.field("dynamic.property.ext:rating"),
            Some(&FieldValue::Integer(4))
        );
        assert_eq!(
            doc.field("dynamic.property.ext:tags"),
            Some(&FieldValue::TextList(vec!["x".into(), "y".into()]))
        );
        assert_eq!(doc.mime_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_content_only_when_requested() {
        let object =
            ContentObject::document("r", "a", "a.txt", "admin").with_content("text/plain", "body");
        assert!(build_document(&object, false).field(FIELD_CONTENT).is_none());

        let folder = ContentObject::folder("r", "f", "docs", "admin");
        let doc = build_document(&folder, true);
        assert!(doc.field(FIELD_CONTENT).is_none());
        assert!(doc.field("description").is_none());
    }
}
