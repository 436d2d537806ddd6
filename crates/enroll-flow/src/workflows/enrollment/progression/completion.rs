//! Pure completion predicates for each wizard step.
//!
//! No I/O, no side effects: every predicate reads one record snapshot and
//! answers whether that step is done. Navigation and submission gating are
//! built entirely on these.

use super::Step;
use crate::workflows::enrollment::domain::{ApplicationRecord, ApplicationStatus, EnrollmentTrack};

/// Decide whether `step` is complete for the given record.
pub fn is_step_complete(step: Step, record: &ApplicationRecord) -> bool {
    match step {
        Step::Informations => informations_complete(record),
        Step::Contract => contract_complete(record),
        Step::Documents => documents_complete(record),
        Step::Recap => recap_complete(record),
        Step::Payment => payment_complete(record),
        Step::Validation => validation_complete(record),
    }
}

fn informations_complete(record: &ApplicationRecord) -> bool {
    let track_settled = match record.track {
        None => false,
        Some(EnrollmentTrack::Initial) => true,
        // Apprenticeship applicants must also answer the host-company
        // question before the first step counts as done.
        Some(EnrollmentTrack::Apprenticeship { host_company }) => host_company.is_some(),
    };

    record.personal.is_complete()
        && track_settled
        && record.is_foreign_student.is_some()
        && record.data_consent_accepted
        && !record.documents.identity_documents.is_empty()
}

/// The contract gate counts as passed once payment exists, or once every
/// later stage of the file is independently complete. The retroactive
/// branch keeps an applicant moving forward even if the gate's own flags
/// were cleared by a later back-office process.
fn contract_complete(record: &ApplicationRecord) -> bool {
    if record.paid_at.is_some() {
        return true;
    }

    informations_complete(record)
        && documents_complete(record)
        && recap_complete(record)
        && validation_complete(record)
}

fn documents_complete(record: &ApplicationRecord) -> bool {
    let docs = &record.documents;
    docs.cv.is_some()
        && docs.diploma.is_some()
        && docs.cover_letter.is_some()
        && !docs.transcripts.is_empty()
}

fn recap_complete(record: &ApplicationRecord) -> bool {
    record.terms_accepted && record.info_attested_correct && documents_complete(record)
}

fn payment_complete(record: &ApplicationRecord) -> bool {
    record.paid_at.is_some()
}

fn validation_complete(record: &ApplicationRecord) -> bool {
    record.status == ApplicationStatus::Validated
}
