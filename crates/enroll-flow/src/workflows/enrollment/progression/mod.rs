//! Step graph for the enrollment wizard.
//!
//! The effective order is a pure function of the record: the contract step
//! only exists for apprenticeship applicants with a host company, and the
//! payment gate always sits between the recap and final validation. All
//! navigation decisions are computed from one immutable record snapshot.

pub mod completion;

use serde::{Deserialize, Serialize};

use super::domain::ApplicationRecord;

pub use completion::is_step_complete;

/// One stage of the enrollment wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Informations,
    Contract,
    Documents,
    Recap,
    Payment,
    Validation,
}

impl Step {
    pub const fn label(self) -> &'static str {
        match self {
            Step::Informations => "Informations",
            Step::Contract => "Contrat",
            Step::Documents => "Documents",
            Step::Recap => "Dossier",
            Step::Payment => "Paiement",
            Step::Validation => "Validation",
        }
    }

    /// Route identifier for the step. Payment has no screen of its own in
    /// the wizard; it is performed from the recap screen, so both map to
    /// the `recap` slug.
    pub const fn slug(self) -> &'static str {
        match self {
            Step::Informations => "informations",
            Step::Contract => "contrat",
            Step::Documents => "documents",
            Step::Recap | Step::Payment => "recap",
            Step::Validation => "validation",
        }
    }

    /// Parse a route slug. Unknown slugs yield `None`, which navigation
    /// treats the same as an inaccessible step: redirect to the resume
    /// point instead of rendering anything.
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "informations" => Some(Step::Informations),
            "contrat" => Some(Step::Contract),
            "documents" => Some(Step::Documents),
            "recap" => Some(Step::Recap),
            "validation" => Some(Step::Validation),
            _ => None,
        }
    }
}

/// The ordered list of steps this record must pass through, recomputed
/// from the current track fields on every call.
pub fn effective_steps(record: &ApplicationRecord) -> Vec<Step> {
    let mut steps = Vec::with_capacity(6);
    steps.push(Step::Informations);
    if record.requires_contract_step() {
        steps.push(Step::Contract);
    }
    steps.push(Step::Documents);
    steps.push(Step::Recap);
    steps.push(Step::Payment);
    steps.push(Step::Validation);
    steps
}

/// Where the applicant should resume: the step immediately after the
/// longest complete prefix of the effective order. Returns the first step
/// when nothing is complete and the last when everything is.
pub fn next_incomplete_step(record: &ApplicationRecord) -> Step {
    let steps = effective_steps(record);
    for step in &steps {
        if !is_step_complete(*step, record) {
            return *step;
        }
    }
    *steps.last().expect("effective order is never empty")
}

/// Verdict for a requested navigation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum StepAccess {
    Granted,
    /// The earliest incomplete predecessor. Callers must redirect there
    /// rather than rendering the requested step.
    Blocked { blocking: Step },
}

/// Validate that every step strictly before `target` in the effective
/// order is complete. A target outside the effective order (e.g. the
/// contract step for an initial-track record) is blocked by the resume
/// point.
pub fn validate_access(target: Step, record: &ApplicationRecord) -> StepAccess {
    let steps = effective_steps(record);
    let Some(position) = steps.iter().position(|step| *step == target) else {
        return StepAccess::Blocked {
            blocking: next_incomplete_step(record),
        };
    };

    for step in &steps[..position] {
        if !is_step_complete(*step, record) {
            return StepAccess::Blocked { blocking: *step };
        }
    }
    StepAccess::Granted
}
