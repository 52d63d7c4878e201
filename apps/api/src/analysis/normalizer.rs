//! Result Normalizer — turns whatever the merge task produced into a `NormalizedResult`.
//!
//! Never fails. Clean JSON, fenced JSON, JSON buried in prose, structured values
//! and missing output all come out as a fully shaped result.
//!
//! Extraction order:
//! 1. structured (non-string) values are mapped directly
//! 2. text has every markdown fence removed, then is trimmed
//! 3. the cleaned text is parsed as JSON
//! 4. failing that, the span from the first `{` to the last `}` is parsed
//! 5. failing that, a parse-failure result carrying the original text

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::analysis::{
    CultureReport, NormalizedResult, RawTaskOutput, ResumeReview, SalaryRange, DEFAULT_CURRENCY,
    DEFAULT_SALARY, DEFAULT_STATUS,
};
use crate::workflow_client::jobs::JobType;

/// Opening fence whose language tag runs to the end of its line, or any bare fence.
/// A fence directly followed by prose keeps the prose.
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z0-9_+\-]*(?:\r?\n|$)|```").expect("fence pattern is valid")
});

/// Normalizer bound to one deployment's no-output policy.
#[derive(Debug, Clone)]
pub struct Normalizer {
    no_output_status: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_status(DEFAULT_STATUS)
    }
}

impl Normalizer {
    pub fn with_status(no_output_status: &str) -> Self {
        Self {
            no_output_status: no_output_status.to_string(),
        }
    }

    pub fn for_job(job: &JobType) -> Self {
        Self::with_status(&job.no_output_status)
    }

    pub fn normalize(&self, raw: Option<&RawTaskOutput>) -> NormalizedResult {
        match raw {
            None => NormalizedResult::parse_failure(&self.no_output_status, None),
            Some(RawTaskOutput::Structured(value)) => match value {
                Value::Object(object) => map_result(object),
                Value::Null => NormalizedResult::parse_failure(&self.no_output_status, None),
                other => {
                    warn!("Task output is structured but not an object");
                    NormalizedResult::parse_failure(&self.no_output_status, Some(other.to_string()))
                }
            },
            Some(RawTaskOutput::Text(text)) => match parse_text(text) {
                Some(object) => map_result(&object),
                None => {
                    warn!(raw_len = text.len(), "Task output could not be parsed as JSON");
                    NormalizedResult::parse_failure(&self.no_output_status, Some(text.clone()))
                }
            },
        }
    }
}

/// Removes every markdown fence marker and trims the result.
/// Repeats until nothing changes, so stripping is idempotent.
pub fn strip_fences(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = FENCE.replace_all(&current, "").into_owned();
        if next == current {
            return current.trim().to_string();
        }
        current = next;
    }
}

/// First `{` to last `}`, inclusive. Deliberately not a balanced-brace scan.
pub fn outer_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_text(text: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_fences(text);

    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&cleaned) {
        return Some(object);
    }

    match serde_json::from_str::<Value>(outer_object_span(&cleaned)?) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn map_result(object: &Map<String, Value>) -> NormalizedResult {
    let status = string_at(object, &["status"])
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STATUS.to_string());

    // A previously normalized failure keeps its flag and untrimmed raw text.
    let parse_failed = field(object, &["parse_failed", "parseFailed"])
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let raw_output = field(object, &["raw_output", "rawOutput"])
        .and_then(Value::as_str)
        .filter(|_| parse_failed)
        .map(str::to_string);

    NormalizedResult {
        status,
        summary: string_at(object, &["summary"]).unwrap_or_default(),
        action_plan: string_at(object, &["action_plan", "actionPlan"]).unwrap_or_default(),
        culture: section(object, "culture").map(map_culture).unwrap_or_default(),
        salary: section(object, "salary").map(map_salary).unwrap_or_default(),
        resume: section(object, "resume").map(map_resume).unwrap_or_default(),
        parse_failed,
        raw_output,
    }
}

fn map_culture(object: &Map<String, Value>) -> CultureReport {
    CultureReport {
        icebreakers: string_list_at(object, &["icebreakers"]),
        red_flags: string_list_at(object, &["red_flags", "redFlags"]),
        pros: string_list_at(object, &["pros"]),
        cons: string_list_at(object, &["cons"]),
        score: number_at(object, &["score"]).unwrap_or(0.0),
    }
}

fn map_salary(object: &Map<String, Value>) -> SalaryRange {
    SalaryRange {
        min_salary: string_at(object, &["min_salary", "minSalary"])
            .unwrap_or_else(|| DEFAULT_SALARY.to_string()),
        max_salary: string_at(object, &["max_salary", "maxSalary"])
            .unwrap_or_else(|| DEFAULT_SALARY.to_string()),
        currency: string_at(object, &["currency"])
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    }
}

fn map_resume(object: &Map<String, Value>) -> ResumeReview {
    ResumeReview {
        missing_skills: string_list_at(object, &["missing_skills", "missingSkills"]),
        gap_analysis: string_at(object, &["gap_analysis", "gapAnalysis"]).unwrap_or_default(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tolerant field readers. A wrong type reads as absent, never as an error.
// ────────────────────────────────────────────────────────────────────────────

fn field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| object.get(*k)).filter(|v| !v.is_null())
}

fn section<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    field(object, &[key]).and_then(Value::as_object)
}

/// Strings pass through; numbers and booleans are rendered.
fn string_at(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match field(object, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list_at(object: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    match field(object, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn number_at(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    let number = match field(object, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> RawTaskOutput {
        RawTaskOutput::Text(s.to_string())
    }

    fn normalize(raw: Option<&RawTaskOutput>) -> NormalizedResult {
        Normalizer::default().normalize(raw)
    }

    #[test]
    fn test_fenced_json_passthrough() {
        let raw = text("```json\n{\"status\":\"CRITICAL\",\"summary\":\"X\"}\n```");
        let result = normalize(Some(&raw));
        assert_eq!(
            result,
            NormalizedResult {
                status: "CRITICAL".to_string(),
                summary: "X".to_string(),
                ..NormalizedResult::default()
            }
        );
        assert!(!result.parse_failed);
    }

    #[test]
    fn test_outer_brace_span_is_not_balanced() {
        let input = "noise {\"a\":1} more noise {\"b\":2} trailing";
        assert_eq!(
            outer_object_span(input),
            Some("{\"a\":1} more noise {\"b\":2}")
        );

        let result = normalize(Some(&text(input)));
        assert!(result.parse_failed);
        assert_eq!(result.raw_output.as_deref(), Some(input));
        assert_eq!(result.status, "UNKNOWN");
    }

    #[test]
    fn test_json_inside_prose_is_recovered() {
        let raw = text("Here is the report:\n{\"status\": \"SAFE\", \"summary\": \"All quiet\"}\nThanks!");
        let result = normalize(Some(&raw));
        assert!(!result.parse_failed);
        assert_eq!(result.status, "SAFE");
        assert_eq!(result.summary, "All quiet");
    }

    #[test]
    fn test_interleaved_fences_are_all_removed() {
        let raw = "Intro\n```json\n{\"status\":\"SAFE\",\n```\nmiddle prose\n```\n\"summary\":\"ok\"}\n```";
        let stripped = strip_fences(raw);
        assert!(!stripped.contains("```"));
        assert!(stripped.starts_with("Intro"));
    }

    #[test]
    fn test_strip_fences_is_idempotent() {
        for input in [
            "```json\n{\"a\":1}\n```",
            "``````json x ```",
            "prose ```rust\nfn main() {}\n``` more ```",
            "`` ```json ` ",
            "no fences at all",
        ] {
            let once = strip_fences(input);
            assert_eq!(strip_fences(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_absent_output_uses_policy_status() {
        let result = Normalizer::with_status("SAFE").normalize(None);
        assert!(result.parse_failed);
        assert_eq!(result.status, "SAFE");
        assert!(result.raw_output.is_none());
        assert_eq!(result.culture, CultureReport::default());
        assert_eq!(result.salary, SalaryRange::default());
        assert_eq!(result.resume, ResumeReview::default());
    }

    #[test]
    fn test_unparsable_text_is_fully_defaulted() {
        for input in ["", "   ", "not json", "{", "}{", "{\"status\": }", "[1,2,3]", "42"] {
            let result = normalize(Some(&text(input)));
            assert!(result.parse_failed, "input: {input:?}");
            assert_eq!(result.raw_output.as_deref(), Some(input));
            assert_eq!(result.salary.currency, "USD");
            assert_eq!(result.salary.min_salary, "N/A");
            assert!(result.culture.icebreakers.is_empty());
        }
    }

    #[test]
    fn test_structured_object_maps_directly() {
        let raw = RawTaskOutput::Structured(json!({
            "status": "CRITICAL",
            "summary": "Layoff rumours",
            "actionPlan": "Prepare questions",
            "culture": {
                "icebreakers": ["Ask about the rewrite"],
                "redFlags": ["High churn"],
                "pros": ["Remote"],
                "cons": ["On-call"],
                "score": "7.5"
            },
            "salary": {"minSalary": 120000, "max_salary": "150000"},
            "resume": {"missing_skills": ["Kubernetes"], "gap_analysis": "Needs infra"},
            "unrelated": {"ignored": true}
        }));
        let result = normalize(Some(&raw));

        assert_eq!(result.status, "CRITICAL");
        assert_eq!(result.action_plan, "Prepare questions");
        assert_eq!(result.culture.red_flags, vec!["High churn"]);
        assert_eq!(result.culture.pros, vec!["Remote"]);
        assert!((result.culture.score - 7.5).abs() < f64::EPSILON);
        assert_eq!(result.salary.min_salary, "120000");
        assert_eq!(result.salary.max_salary, "150000");
        assert_eq!(result.salary.currency, "USD");
        assert_eq!(result.resume.missing_skills, vec!["Kubernetes"]);
        assert_eq!(result.resume.gap_analysis, "Needs infra");
        assert!(!result.parse_failed);
    }

    #[test]
    fn test_missing_and_mistyped_sections_default() {
        let raw = RawTaskOutput::Structured(json!({
            "summary": "partial",
            "culture": "not an object",
            "resume": {"missing_skills": "Rust"},
            "salary": null
        }));
        let result = normalize(Some(&raw));
        assert_eq!(result.status, "UNKNOWN");
        assert_eq!(result.summary, "partial");
        assert_eq!(result.culture, CultureReport::default());
        assert_eq!(result.salary, SalaryRange::default());
        assert_eq!(result.resume.missing_skills, vec!["Rust"]);
        assert!(!result.parse_failed);
    }

    #[test]
    fn test_structured_non_object_is_parse_failure() {
        let result = normalize(Some(&RawTaskOutput::Structured(json!([1, 2]))));
        assert!(result.parse_failed);
        assert_eq!(result.raw_output.as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_normalizing_own_output_is_identity() {
        let fenced = text("```json\n{\"status\":\"SAFE\",\"culture\":{\"pros\":[\"Pay\"],\"score\":8},\"salary\":{\"currency\":\"EUR\"}}\n```");
        let garbage = text("  not json  ");
        let policy = Normalizer::with_status("SAFE");

        for once in [
            normalize(Some(&fenced)),
            normalize(Some(&garbage)),
            policy.normalize(None),
        ] {
            let reserialized = RawTaskOutput::Structured(serde_json::to_value(&once).unwrap());
            assert_eq!(normalize(Some(&reserialized)), once);
        }
    }

    #[test]
    fn test_raw_output_only_kept_with_failure_flag() {
        let raw = RawTaskOutput::Structured(json!({
            "status": "SAFE",
            "parseFailed": false,
            "rawOutput": "stale"
        }));
        let result = normalize(Some(&raw));
        assert!(!result.parse_failed);
        assert!(result.raw_output.is_none());
    }

    #[test]
    fn test_closing_fence_keeps_following_prose() {
        assert_eq!(
            strip_fences("```json\n{\"a\":1}\n```Summary done"),
            "{\"a\":1}\nSummary done"
        );
        assert_eq!(strip_fences("```rust"), "");
    }

    #[test]
    fn test_for_job_reads_policy() {
        let mut job = JobType::brand_radar();
        job.no_output_status = "SAFE".to_string();
        assert_eq!(Normalizer::for_job(&job).normalize(None).status, "SAFE");
    }
}
