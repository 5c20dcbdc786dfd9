//! Logic shared by every engine: id generation, attribute patching and filtering.

use uuid::Uuid;

use crate::{
    attribute::{Attributes, Documents},
    filter::Filters,
};

/// Stateless helper embedded in every engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineHelper;

impl EngineHelper {
    pub fn new() -> Self {
        Self
    }

    /// Returns the caller-provided id, or a fresh UUID v4 string.
    ///
    /// Uniqueness of caller-provided ids is not checked here; engines verify it
    /// against their storage on `create`.
    pub fn obtain_document_id(&self, id: Option<String>) -> String {
        id.unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Shallow-merges `updated` into `attributes`, then removes every name in `removed`.
    ///
    /// A name present in both ends up removed.
    pub fn apply_update(&self, attributes: &mut Attributes, updated: Attributes, removed: &[String]) {
        attributes.extend(updated);

        for name in removed {
            attributes.shift_remove(name);
        }
    }

    /// Narrows `documents` to those matching `filters`, keeping their order.
    pub fn filter_documents(&self, documents: Documents, filters: Option<&Filters>) -> Documents {
        match filters {
            Some(filters) if !filters.is_empty() => documents
                .into_iter()
                .filter(|(id, attributes)| filters.matches(id, attributes))
                .collect(),
            _ => documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{attribute::AttributeValue, attributes};

    #[test]
    fn test_obtain_document_id() {
        let helper = EngineHelper::new();

        assert_eq!(helper.obtain_document_id(Some("custom".into())), "custom");

        let generated = helper.obtain_document_id(None);
        assert!(Uuid::parse_str(&generated).is_ok());
        assert_ne!(generated, helper.obtain_document_id(None));
    }

    #[test]
    fn test_apply_update_merges_then_removes() {
        let mut attributes = attributes! { "name" => "A", "surname" => "X", "age" => 3 };

        EngineHelper.apply_update(
            &mut attributes,
            attributes! { "name" => "B", "age" => 4 },
            &["surname".to_string(), "age".to_string()],
        );

        assert_eq!(attributes, attributes! { "name" => "B" });
    }

    #[test]
    fn test_filter_documents_keeps_order() {
        let mut documents = Documents::new();
        documents.insert("b".into(), attributes! { "kind" => "x" });
        documents.insert("a".into(), attributes! { "kind" => "y" });
        documents.insert("c".into(), attributes! { "kind" => "x" });

        let filtered = EngineHelper.filter_documents(documents.clone(), Some(&Filters::new().eq("kind", "x")));

        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(filtered["c"]["kind"], AttributeValue::from("x"));
        assert_eq!(EngineHelper.filter_documents(documents.clone(), None), documents);
    }
}
