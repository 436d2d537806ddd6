//! Step-scoped persistence with change detection.
//!
//! Saves go through a field-level diff against the last persisted record:
//! an unchanged form with nothing staged issues zero writes. Patches are
//! partial by construction (absent fields mean "leave untouched"), so a
//! stale snapshot can neither clear `paid_at` nor regress the status.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, EnrollmentTrack, UserId,
    IDENTITY_DOCUMENT_LIMIT,
};
use super::progression::{next_incomplete_step, Step};

/// Persistence abstraction for the application record, written to one
/// step at a time.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn create_record(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StepStoreError>;

    async fn save_step(
        &self,
        user: &UserId,
        patch: StepPatch,
    ) -> Result<(), StepStoreError>;

    async fn fetch_record(&self, user: &UserId)
        -> Result<Option<ApplicationRecord>, StepStoreError>;

    /// Destroys the record. Only the program-switch operation calls this.
    async fn delete_record(&self, user: &UserId) -> Result<(), StepStoreError>;
}

/// Error enumeration for step-store failures.
#[derive(Debug, thiserror::Error)]
pub enum StepStoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Partial fields for one step, produced by the diff. Every field is
/// optional; `None` leaves the persisted value untouched. There is by
/// design no way to express "clear `paid_at`" or "regress the status".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepPatch {
    Informations(InformationsPatch),
    Contract(ContractPatch),
    Documents(DocumentsPatch),
    Recap(RecapPatch),
    Payment(PaymentPatch),
    Validation(ValidationPatch),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InformationsPatch {
    pub civility: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub track: Option<EnrollmentTrack>,
    pub is_foreign_student: Option<bool>,
    pub data_consent_accepted: Option<bool>,
    pub identity_documents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractPatch {
    pub student_form_completed: Option<bool>,
    pub company_form_completed: Option<bool>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentsPatch {
    pub cv: Option<String>,
    pub diploma: Option<String>,
    pub cover_letter: Option<String>,
    pub identity_photo: Option<String>,
    pub transcripts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecapPatch {
    pub terms_accepted: Option<bool>,
    pub info_attested_correct: Option<bool>,
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentPatch {
    pub paid_at: Option<DateTime<Utc>>,
    pub status: Option<ApplicationStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationPatch {
    pub status: Option<ApplicationStatus>,
}

impl StepPatch {
    pub const fn step(&self) -> Step {
        match self {
            StepPatch::Informations(_) => Step::Informations,
            StepPatch::Contract(_) => Step::Contract,
            StepPatch::Documents(_) => Step::Documents,
            StepPatch::Recap(_) => Step::Recap,
            StepPatch::Payment(_) => Step::Payment,
            StepPatch::Validation(_) => Step::Validation,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StepPatch::Informations(patch) => *patch == InformationsPatch::default(),
            StepPatch::Contract(patch) => *patch == ContractPatch::default(),
            StepPatch::Documents(patch) => *patch == DocumentsPatch::default(),
            StepPatch::Recap(patch) => *patch == RecapPatch::default(),
            StepPatch::Payment(patch) => *patch == PaymentPatch::default(),
            StepPatch::Validation(patch) => *patch == ValidationPatch::default(),
        }
    }

    /// Document paths carried by this patch, used to clear staging
    /// buffers once the write lands.
    pub fn document_paths(&self) -> Vec<String> {
        match self {
            StepPatch::Informations(patch) => {
                patch.identity_documents.clone().unwrap_or_default()
            }
            StepPatch::Documents(patch) => {
                let mut paths: Vec<String> = [
                    patch.cv.clone(),
                    patch.diploma.clone(),
                    patch.cover_letter.clone(),
                    patch.identity_photo.clone(),
                ]
                .into_iter()
                .flatten()
                .collect();
                paths.extend(patch.transcripts.clone().unwrap_or_default());
                paths
            }
            _ => Vec::new(),
        }
    }

    /// Apply the patch to a record, honoring the write guards: statuses
    /// only advance, `paid_at` is set-once, identity documents stay under
    /// the cap. Store implementations share this so the guards hold
    /// everywhere.
    pub fn apply_to(&self, record: &mut ApplicationRecord) {
        match self {
            StepPatch::Informations(patch) => {
                let personal = &mut record.personal;
                apply_field(&mut personal.civility, &patch.civility);
                apply_field(&mut personal.last_name, &patch.last_name);
                apply_field(&mut personal.first_name, &patch.first_name);
                apply_field(&mut personal.phone, &patch.phone);
                apply_field(&mut personal.address, &patch.address);
                apply_field(&mut personal.postal_code, &patch.postal_code);
                apply_field(&mut personal.city, &patch.city);
                apply_field(&mut personal.country, &patch.country);
                if let Some(track) = patch.track {
                    record.track = Some(track);
                }
                if let Some(answer) = patch.is_foreign_student {
                    record.is_foreign_student = Some(answer);
                }
                if let Some(consent) = patch.data_consent_accepted {
                    record.data_consent_accepted = consent;
                }
                if let Some(documents) = &patch.identity_documents {
                    let mut documents = documents.clone();
                    documents.truncate(IDENTITY_DOCUMENT_LIMIT);
                    record.documents.identity_documents = documents;
                }
            }
            StepPatch::Contract(patch) => {
                if let Some(done) = patch.student_form_completed {
                    record.external_forms.student_form_completed = done;
                }
                if let Some(done) = patch.company_form_completed {
                    record.external_forms.company_form_completed = done;
                }
                if let Some(at) = patch.submitted_at {
                    record.external_forms.submitted_at = Some(at);
                }
            }
            StepPatch::Documents(patch) => {
                apply_field(&mut record.documents.cv, &patch.cv);
                apply_field(&mut record.documents.diploma, &patch.diploma);
                apply_field(&mut record.documents.cover_letter, &patch.cover_letter);
                apply_field(&mut record.documents.identity_photo, &patch.identity_photo);
                if let Some(transcripts) = &patch.transcripts {
                    record.documents.transcripts = transcripts.clone();
                }
            }
            StepPatch::Recap(patch) => {
                if let Some(accepted) = patch.terms_accepted {
                    record.terms_accepted = accepted;
                }
                if let Some(attested) = patch.info_attested_correct {
                    record.info_attested_correct = attested;
                }
                apply_status(record, patch.status);
            }
            StepPatch::Payment(patch) => {
                if let Some(at) = patch.paid_at {
                    // Set-once: the first settlement timestamp is
                    // authoritative.
                    record.paid_at.get_or_insert(at);
                }
                apply_status(record, patch.status);
            }
            StepPatch::Validation(patch) => {
                apply_status(record, patch.status);
            }
        }
    }
}

fn apply_field(target: &mut Option<String>, source: &Option<String>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

fn apply_status(record: &mut ApplicationRecord, requested: Option<ApplicationStatus>) {
    if let Some(requested) = requested {
        record.status = record.status.advanced_to(requested);
    }
}

/// Field-level diff of one step's scope between the in-memory form state
/// and the last persisted record. Fields absent from the form count as
/// untouched, and `paid_at`/`status` only ever diff forward.
pub fn diff_step(step: Step, form: &ApplicationRecord, baseline: &ApplicationRecord) -> StepPatch {
    match step {
        Step::Informations => StepPatch::Informations(InformationsPatch {
            civility: diff_text(&form.personal.civility, &baseline.personal.civility),
            last_name: diff_text(&form.personal.last_name, &baseline.personal.last_name),
            first_name: diff_text(&form.personal.first_name, &baseline.personal.first_name),
            phone: diff_text(&form.personal.phone, &baseline.personal.phone),
            address: diff_text(&form.personal.address, &baseline.personal.address),
            postal_code: diff_text(&form.personal.postal_code, &baseline.personal.postal_code),
            city: diff_text(&form.personal.city, &baseline.personal.city),
            country: diff_text(&form.personal.country, &baseline.personal.country),
            track: form.track.filter(|track| Some(*track) != baseline.track),
            is_foreign_student: form
                .is_foreign_student
                .filter(|answer| Some(*answer) != baseline.is_foreign_student),
            data_consent_accepted: diff_flag(
                form.data_consent_accepted,
                baseline.data_consent_accepted,
            ),
            identity_documents: diff_list(
                &form.documents.identity_documents,
                &baseline.documents.identity_documents,
            ),
        }),
        Step::Contract => StepPatch::Contract(ContractPatch {
            student_form_completed: diff_flag(
                form.external_forms.student_form_completed,
                baseline.external_forms.student_form_completed,
            ),
            company_form_completed: diff_flag(
                form.external_forms.company_form_completed,
                baseline.external_forms.company_form_completed,
            ),
            submitted_at: form
                .external_forms
                .submitted_at
                .filter(|at| Some(*at) != baseline.external_forms.submitted_at),
        }),
        Step::Documents => StepPatch::Documents(DocumentsPatch {
            cv: diff_text(&form.documents.cv, &baseline.documents.cv),
            diploma: diff_text(&form.documents.diploma, &baseline.documents.diploma),
            cover_letter: diff_text(&form.documents.cover_letter, &baseline.documents.cover_letter),
            identity_photo: diff_text(
                &form.documents.identity_photo,
                &baseline.documents.identity_photo,
            ),
            transcripts: diff_list(&form.documents.transcripts, &baseline.documents.transcripts),
        }),
        Step::Recap => StepPatch::Recap(RecapPatch {
            terms_accepted: diff_flag(form.terms_accepted, baseline.terms_accepted),
            info_attested_correct: diff_flag(
                form.info_attested_correct,
                baseline.info_attested_correct,
            ),
            status: diff_status(form.status, baseline.status),
        }),
        Step::Payment => StepPatch::Payment(PaymentPatch {
            paid_at: match (form.paid_at, baseline.paid_at) {
                (Some(at), None) => Some(at),
                _ => None,
            },
            status: diff_status(form.status, baseline.status),
        }),
        Step::Validation => StepPatch::Validation(ValidationPatch {
            status: diff_status(form.status, baseline.status),
        }),
    }
}

fn diff_text(form: &Option<String>, baseline: &Option<String>) -> Option<String> {
    match form {
        Some(value) if baseline.as_deref() != Some(value.as_str()) => Some(value.clone()),
        _ => None,
    }
}

fn diff_flag(form: bool, baseline: bool) -> Option<bool> {
    (form != baseline).then_some(form)
}

fn diff_list(form: &[String], baseline: &[String]) -> Option<Vec<String>> {
    (form != baseline).then(|| form.to_vec())
}

fn diff_status(form: ApplicationStatus, baseline: ApplicationStatus) -> Option<ApplicationStatus> {
    (form.rank() > baseline.rank()).then_some(form)
}

/// Persistence failure surfaced to navigation. A failed save leaves the
/// record, the staged buffers, and the current step untouched.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("no application record exists for this user yet")]
    MissingRecord,
    #[error(transparent)]
    Store(#[from] StepStoreError),
}

/// Whether a save actually reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    /// Empty diff and nothing staged: the write was skipped entirely.
    Unchanged,
    Persisted,
}

/// Result of `save_and_advance`: the refreshed record and where the
/// wizard resumes.
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub saved: SaveOutcome,
    pub next: Step,
    pub record: ApplicationRecord,
}

static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-local identifier for a fresh implicit draft.
pub(crate) fn fresh_record_id() -> ApplicationId {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ApplicationId(format!("cand-{id:06}"))
}

/// Change-detecting save controller. One logical writer per user session;
/// concurrent tabs are not defended against.
pub struct DraftPersistenceController<S> {
    store: Arc<S>,
    staged: Mutex<HashMap<UserId, BTreeSet<String>>>,
}

impl<S> DraftPersistenceController<S>
where
    S: StepStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Remember a freshly uploaded path so the next save knows the form
    /// is dirty even if field diffing misses it.
    pub fn stage_upload(&self, user: &UserId, path: String) {
        let mut staged = self.staged.lock().expect("staging mutex poisoned");
        staged.entry(user.clone()).or_default().insert(path);
    }

    pub fn staged_paths(&self, user: &UserId) -> BTreeSet<String> {
        let staged = self.staged.lock().expect("staging mutex poisoned");
        staged.get(user).cloned().unwrap_or_default()
    }

    fn clear_staged(&self, user: &UserId, persisted: &StepPatch) {
        let persisted_paths = persisted.document_paths();
        let mut staged = self.staged.lock().expect("staging mutex poisoned");
        if let Some(buffer) = staged.get_mut(user) {
            for path in persisted_paths {
                buffer.remove(&path);
            }
            if buffer.is_empty() {
                staged.remove(user);
            }
        }
    }

    /// Persist the step's fields without requiring completion. Creates
    /// the implicit draft on the first informations write. An identical
    /// form with an empty staging buffer is a no-op issuing zero writes.
    pub async fn save_draft(
        &self,
        user: &UserId,
        step: Step,
        form: &ApplicationRecord,
    ) -> Result<SaveOutcome, PersistenceError> {
        let baseline = match self.store.fetch_record(user).await? {
            Some(record) => record,
            None if step == Step::Informations => {
                let mut draft = ApplicationRecord::draft(
                    fresh_record_id(),
                    user.clone(),
                    form.email.clone(),
                );
                draft.program = form.program.clone();
                self.store.create_record(draft).await?
            }
            None => return Err(PersistenceError::MissingRecord),
        };

        let patch = diff_step(step, form, &baseline);
        let has_staged = !self.staged_paths(user).is_empty();
        if patch.is_empty() && !has_staged {
            debug!(user = %user.0, step = step.slug(), "no-op save skipped");
            return Ok(SaveOutcome::Unchanged);
        }

        self.store.save_step(user, patch.clone()).await?;
        self.clear_staged(user, &patch);
        Ok(SaveOutcome::Persisted)
    }

    /// Persist, refresh the record from the store, then and only then ask
    /// the progression graph where to go next. The confirming refresh
    /// guarantees navigation never runs on a stale snapshot.
    pub async fn save_and_advance(
        &self,
        user: &UserId,
        step: Step,
        form: &ApplicationRecord,
    ) -> Result<AdvanceOutcome, PersistenceError> {
        let saved = self.save_draft(user, step, form).await?;
        let record = self
            .store
            .fetch_record(user)
            .await?
            .ok_or(PersistenceError::MissingRecord)?;
        let next = next_incomplete_step(&record);
        Ok(AdvanceOutcome {
            saved,
            next,
            record,
        })
    }
}
