//! Persisted session state.

use serde::{Deserialize, Serialize};

/// The only state a session keeps across front-end restarts.
///
/// Serialized as `{"workloadId": "<id>"}`; the field is omitted when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
}

impl SessionStateRecord {
    pub fn with_workload(id: impl Into<String>) -> Self {
        Self {
            workload_id: Some(id.into()),
        }
    }

    pub fn workload_id(&self) -> Option<&str> {
        self.workload_id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.workload_id.is_none()
    }

    pub fn clear(&mut self) {
        self.workload_id = None;
    }

    /// Treat a blank id as no id.
    pub(crate) fn normalized(mut self) -> Self {
        if self.workload_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            self.workload_id = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_key() {
        let record = SessionStateRecord::with_workload("svc123");
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"workloadId":"svc123"}"#
        );
        assert_eq!(serde_json::to_string(&SessionStateRecord::default()).unwrap(), "{}");
    }

    #[test]
    fn deserializes_missing_field_as_empty() {
        let record: SessionStateRecord = serde_json::from_str("{}").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn blank_id_normalizes_to_empty() {
        let record = SessionStateRecord::with_workload("  ").normalized();
        assert!(record.is_empty());
    }
}
