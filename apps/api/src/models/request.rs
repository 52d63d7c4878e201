use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// User-supplied job parameters, keyed by caller-facing field name
/// (`topic`, `company`, `role`, ...). Which keys are required depends on the job type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisRequest {
    fields: BTreeMap<String, String>,
}

impl AnalysisRequest {
    pub fn new(fields: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Returns the trimmed value for `key`, treating blank values as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnalysisRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())))
    }
}

/// Identifies exactly one remote execution. Produced once by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
}

impl ExecutionHandle {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_treats_blank_as_absent() {
        let request: AnalysisRequest = [("company", "  Acme "), ("role", "   ")]
            .into_iter()
            .collect();
        assert_eq!(request.get("company"), Some("Acme"));
        assert_eq!(request.get("role"), None);
        assert_eq!(request.get("level"), None);
    }

    #[test]
    fn test_request_deserializes_from_flat_object() {
        let request: AnalysisRequest =
            serde_json::from_str(r#"{"topic": "Acme Rockets"}"#).unwrap();
        assert_eq!(request.get("topic"), Some("Acme Rockets"));
        assert_eq!(request.keys().collect::<Vec<_>>(), vec!["topic"]);
    }
}
