use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_STATUS: &str = "UNKNOWN";
pub const DEFAULT_SALARY: &str = "N/A";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Summary shown when an execution succeeded but its merge task produced nothing.
pub const OUTPUT_UNAVAILABLE_SUMMARY: &str =
    "The analysis finished but its output could not be retrieved.";

/// Output attached to the merge task of a succeeded execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTaskOutput {
    /// Free text, possibly fenced markdown and/or surrounded by prose.
    Text(String),
    /// Already-structured JSON produced by the engine.
    Structured(Value),
}

impl From<Value> for RawTaskOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => RawTaskOutput::Text(text),
            other => RawTaskOutput::Structured(other),
        }
    }
}

impl From<&str> for RawTaskOutput {
    fn from(text: &str) -> Self {
        RawTaskOutput::Text(text.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CultureReport {
    pub icebreakers: Vec<String>,
    pub red_flags: Vec<String>,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min_salary: String,
    pub max_salary: String,
    pub currency: String,
}

impl Default for SalaryRange {
    fn default() -> Self {
        Self {
            min_salary: DEFAULT_SALARY.to_string(),
            max_salary: DEFAULT_SALARY.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeReview {
    pub missing_skills: Vec<String>,
    pub gap_analysis: String,
}

/// Fixed-shape analysis result handed to the presentation layer.
///
/// Every section is always present. Missing upstream data degrades to the
/// defaults below, never to an absent key. `raw_output` is only set when
/// `parse_failed` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub status: String,
    pub summary: String,
    pub action_plan: String,
    pub culture: CultureReport,
    pub salary: SalaryRange,
    pub resume: ResumeReview,
    pub parse_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl Default for NormalizedResult {
    fn default() -> Self {
        Self {
            status: DEFAULT_STATUS.to_string(),
            summary: String::new(),
            action_plan: String::new(),
            culture: CultureReport::default(),
            salary: SalaryRange::default(),
            resume: ResumeReview::default(),
            parse_failed: false,
            raw_output: None,
        }
    }
}

impl NormalizedResult {
    /// Defaulted result for output that was absent or could not be parsed.
    /// `status` is the deployment's no-output policy.
    pub fn parse_failure(status: &str, raw_output: Option<String>) -> Self {
        let summary = if raw_output.is_none() {
            OUTPUT_UNAVAILABLE_SUMMARY.to_string()
        } else {
            String::new()
        };

        Self {
            status: status.to_string(),
            summary,
            parse_failed: true,
            raw_output,
            ..Self::default()
        }
    }
}
