// Job type definitions.
// Each remote flow expects a fixed set of form field names. The mapping lives here
// and must match the flow definition deployed on the workflow engine.

use thiserror::Error;

use crate::models::analysis::DEFAULT_STATUS;
use crate::models::request::AnalysisRequest;

/// Task whose output carries the final payload in both stock flows.
pub const MERGE_TASK_ID: &str = "merge_results";

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Field '{0}' is required")]
    MissingField(&'static str),
}

/// Maps one caller-facing request key to the form field the remote flow reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub form_name: &'static str,
    pub required: bool,
}

const BRAND_RADAR_FIELDS: &[FieldSpec] = &[FieldSpec {
    key: "topic",
    form_name: "brand_name",
    required: true,
}];

const CAREER_OPS_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "company",
        form_name: "company_name",
        required: true,
    },
    FieldSpec {
        key: "role",
        form_name: "job_role",
        required: true,
    },
    FieldSpec {
        key: "level",
        form_name: "experience_level",
        required: false,
    },
    FieldSpec {
        key: "resume",
        form_name: "resume_text",
        required: false,
    },
];

/// A remote flow the bridge knows how to drive.
#[derive(Debug, Clone, PartialEq)]
pub struct JobType {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
    /// Task id whose `outputs.value` is the job's final payload.
    pub output_task: String,
    /// Status reported when output is absent or unparsable.
    pub no_output_status: String,
}

impl JobType {
    /// Brand crisis radar: one topic in, a SAFE/CRITICAL verdict out.
    pub fn brand_radar() -> Self {
        Self {
            name: "brand-radar",
            fields: BRAND_RADAR_FIELDS,
            output_task: MERGE_TASK_ID.to_string(),
            no_output_status: DEFAULT_STATUS.to_string(),
        }
    }

    /// Career intelligence: company culture, salary band and resume gap analysis.
    pub fn career_ops() -> Self {
        Self {
            name: "career-ops",
            fields: CAREER_OPS_FIELDS,
            output_task: MERGE_TASK_ID.to_string(),
            no_output_status: DEFAULT_STATUS.to_string(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "brand-radar" => Some(Self::brand_radar()),
            "career-ops" => Some(Self::career_ops()),
            _ => None,
        }
    }

    /// Rejects requests missing any required field. Runs before any network call.
    pub fn validate(&self, request: &AnalysisRequest) -> Result<(), ValidationError> {
        match self
            .fields
            .iter()
            .find(|f| f.required && request.get(f.key).is_none())
        {
            Some(field) => Err(ValidationError::MissingField(field.key)),
            None => Ok(()),
        }
    }

    /// Form fields to submit, in mapping order. Unmapped request keys and
    /// blank optional fields are dropped.
    pub fn form_fields(&self, request: &AnalysisRequest) -> Vec<(&'static str, String)> {
        self.fields
            .iter()
            .filter_map(|f| request.get(f.key).map(|v| (f.form_name, v.to_string())))
            .collect()
    }
}
