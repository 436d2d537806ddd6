//! Service facade composing the progression graph, persistence
//! controller, document manager, and gates over injected collaborators.
//!
//! Navigation is a pure function of (requested step, current record);
//! every collaborator failure is intercepted here and mapped into the
//! error taxonomy, so a failed save can never corrupt or advance the
//! wizard position.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::catalog::{Program, ProgramCatalog};
use super::documents::{
    plan_identity_documents, BucketRoster, DocumentError, DocumentInventory, DocumentSlotManager,
    FileUpload, SlotKey, StorageGateway,
};
use super::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, ProgramId, UserId,
};
use super::gates::{
    payment_gate_satisfied, FormCompletion, FormStatusProvider, GateConfig, GateWatchHandle,
    GateWatcher, PaymentDetails, PaymentError, PaymentIntent, PaymentMethod, PaymentProvider,
};
use super::persistence::{
    AdvanceOutcome, DraftPersistenceController, PersistenceError, SaveOutcome, StepStore,
};
use super::progression::{next_incomplete_step, validate_access, Step, StepAccess};

/// Error raised by the enrollment service.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentServiceError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error("unknown step '{0}'")]
    UnknownStep(String),
    #[error("unknown program '{0}'")]
    UnknownProgram(String),
}

/// Verdict for a navigation request. `Redirect` must send the client to
/// the returned step; the requested one is never rendered.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "navigation", rename_all = "snake_case")]
pub enum StepNavigation {
    Granted {
        step: Step,
        record: Option<ApplicationRecord>,
    },
    Redirect {
        to: Step,
    },
}

/// Home-screen summary: where to resume, plus the sanitized record state.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentOverview {
    pub resume_step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<super::domain::ApplicationStatusView>,
}

/// Receipt for a stored document.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub slot: SlotKey,
    pub path: String,
    /// Paths replaced or files refused, phrased for the banner.
    pub warnings: Vec<String>,
}

/// Outcome of a batched identity-document upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingReport {
    pub stored: Vec<String>,
    /// File names refused because the slot cap was reached.
    pub rejected: Vec<String>,
}

pub struct EnrollmentService<S, G, P, F> {
    persistence: DraftPersistenceController<S>,
    documents: DocumentSlotManager<G>,
    payments: Arc<P>,
    watcher: GateWatcher<F>,
    forms: Arc<F>,
    catalog: Arc<dyn ProgramCatalog>,
    default_fee_cents: u32,
}

impl<S, G, P, F> EnrollmentService<S, G, P, F>
where
    S: StepStore + 'static,
    G: StorageGateway + 'static,
    P: PaymentProvider + 'static,
    F: FormStatusProvider + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        storage: Arc<G>,
        payments: Arc<P>,
        forms: Arc<F>,
        catalog: Arc<dyn ProgramCatalog>,
        roster: BucketRoster,
        gates: GateConfig,
        default_fee_cents: u32,
    ) -> Self {
        Self {
            persistence: DraftPersistenceController::new(store),
            documents: DocumentSlotManager::new(storage, roster),
            payments,
            watcher: GateWatcher::new(Arc::clone(&forms), gates),
            forms,
            catalog,
            default_fee_cents,
        }
    }

    fn parse_step(slug: &str) -> Result<Step, EnrollmentServiceError> {
        Step::from_slug(slug).ok_or_else(|| EnrollmentServiceError::UnknownStep(slug.to_string()))
    }

    async fn fetch_record(
        &self,
        user: &UserId,
    ) -> Result<ApplicationRecord, EnrollmentServiceError> {
        self.persistence
            .store()
            .fetch_record(user)
            .await
            .map_err(PersistenceError::from)?
            .ok_or(EnrollmentServiceError::Persistence(
                PersistenceError::MissingRecord,
            ))
    }

    /// Home ("accueil") state: where the wizard resumes plus the record's
    /// visible status.
    pub async fn overview(
        &self,
        user: &UserId,
    ) -> Result<EnrollmentOverview, EnrollmentServiceError> {
        let record = self
            .persistence
            .store()
            .fetch_record(user)
            .await
            .map_err(PersistenceError::from)?;
        Ok(match record {
            Some(record) => EnrollmentOverview {
                resume_step: next_incomplete_step(&record),
                record: Some(record.status_view()),
            },
            None => EnrollmentOverview {
                resume_step: Step::Informations,
                record: None,
            },
        })
    }

    /// Navigate to a step. Invalid slugs and inaccessible steps both
    /// yield a redirect verdict; predecessors are re-validated against a
    /// fresh snapshot on every call.
    pub async fn open_step(
        &self,
        user: &UserId,
        slug: &str,
    ) -> Result<StepNavigation, EnrollmentServiceError> {
        let record = self
            .persistence
            .store()
            .fetch_record(user)
            .await
            .map_err(PersistenceError::from)?;

        let Some(record) = record else {
            // Nothing saved yet: only the first step is reachable.
            return Ok(match Step::from_slug(slug) {
                Some(Step::Informations) => StepNavigation::Granted {
                    step: Step::Informations,
                    record: None,
                },
                _ => StepNavigation::Redirect {
                    to: Step::Informations,
                },
            });
        };

        let Some(step) = Step::from_slug(slug) else {
            return Ok(StepNavigation::Redirect {
                to: next_incomplete_step(&record),
            });
        };

        Ok(match validate_access(step, &record) {
            StepAccess::Granted => StepNavigation::Granted {
                step,
                record: Some(record),
            },
            StepAccess::Blocked { blocking } => StepNavigation::Redirect { to: blocking },
        })
    }

    /// Persist the step's fields without requiring completion.
    pub async fn save_draft(
        &self,
        user: &UserId,
        slug: &str,
        form: &ApplicationRecord,
    ) -> Result<SaveOutcome, EnrollmentServiceError> {
        let step = Self::parse_step(slug)?;
        Ok(self.persistence.save_draft(user, step, form).await?)
    }

    /// Persist, refresh, and compute the next step. Submitting from the
    /// recap flips the status forward once the dossier holds together and
    /// every predecessor checks out.
    pub async fn save_and_advance(
        &self,
        user: &UserId,
        slug: &str,
        form: &ApplicationRecord,
    ) -> Result<AdvanceOutcome, EnrollmentServiceError> {
        let step = Self::parse_step(slug)?;
        let mut form = form.clone();

        if step == Step::Recap
            && form.terms_accepted
            && form.info_attested_correct
            && validate_access(Step::Recap, &form) == StepAccess::Granted
        {
            form.status = form.status.advanced_to(ApplicationStatus::Submitted);
        }

        let outcome = self.persistence.save_and_advance(user, step, &form).await?;
        info!(
            user = %user.0,
            step = step.slug(),
            next = outcome.next.slug(),
            "step saved and advanced"
        );
        Ok(outcome)
    }

    /// Resolve the document inventory for display, marking staged paths
    /// as new and physically absent ones as missing.
    pub async fn documents(
        &self,
        user: &UserId,
    ) -> Result<DocumentInventory, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let staged = self.persistence.staged_paths(user);
        Ok(self.documents.resolve(&record, &staged).await)
    }

    /// Store a file for a single-valued slot, replacing (and best-effort
    /// deleting) any previous object. Transcripts append instead.
    pub async fn upload_document(
        &self,
        user: &UserId,
        slot: SlotKey,
        file: FileUpload,
    ) -> Result<UploadReceipt, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let mut warnings = Vec::new();

        let path = match slot {
            SlotKey::IdentityDocument => {
                // Batched API owns the cardinality plan; a single file is
                // a batch of one.
                let report = self.upload_identity_documents(user, vec![file]).await?;
                if let Some(path) = report.stored.into_iter().next() {
                    path
                } else {
                    warnings.extend(report.rejected.iter().map(|name| {
                        format!("{name} refusé : limite de pièces d'identité atteinte")
                    }));
                    return Ok(UploadReceipt {
                        slot,
                        path: String::new(),
                        warnings,
                    });
                }
            }
            SlotKey::Transcript => {
                let path = self.documents.upload(&file, slot).await?;
                self.persistence.stage_upload(user, path.clone());
                path
            }
            single => {
                let previous = match single {
                    SlotKey::Cv => record.documents.cv.clone(),
                    SlotKey::Diploma => record.documents.diploma.clone(),
                    SlotKey::CoverLetter => record.documents.cover_letter.clone(),
                    SlotKey::IdentityPhoto => record.documents.identity_photo.clone(),
                    _ => None,
                };
                let path = match previous {
                    Some(old_path) => {
                        warnings.push(format!("remplace {old_path}"));
                        self.documents.replace(&old_path, &file, single).await?
                    }
                    None => self.documents.upload(&file, single).await?,
                };
                self.persistence.stage_upload(user, path.clone());
                path
            }
        };

        Ok(UploadReceipt {
            slot,
            path,
            warnings,
        })
    }

    /// Store a batch of identity documents against the two-slot cap:
    /// with K slots free, exactly the first K files are stored and the
    /// rest are reported back as refused.
    pub async fn upload_identity_documents(
        &self,
        user: &UserId,
        files: Vec<FileUpload>,
    ) -> Result<StagingReport, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let staged = self.persistence.staged_paths(user);
        let staged_identity = staged
            .iter()
            .filter(|path| path.starts_with(SlotKey::IdentityDocument.storage_prefix()))
            .count();
        let existing = record.documents.identity_documents.len() + staged_identity;

        let plan = plan_identity_documents(existing, files);
        let rejected = plan.rejected_names();
        if !rejected.is_empty() {
            warn!(
                user = %user.0,
                refused = rejected.len(),
                "identity document batch exceeds the slot cap"
            );
        }

        let mut stored = Vec::new();
        for file in &plan.accepted {
            let path = self
                .documents
                .upload(file, SlotKey::IdentityDocument)
                .await?;
            self.persistence.stage_upload(user, path.clone());
            stored.push(path);
        }

        Ok(StagingReport { stored, rejected })
    }

    /// Open a payment intent for the enrollment fee. Already-settled
    /// records short-circuit without touching the provider.
    pub async fn start_payment(
        &self,
        user: &UserId,
        method: PaymentMethod,
    ) -> Result<PaymentIntent, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        if payment_gate_satisfied(&record) {
            return Ok(PaymentIntent::AlreadyPaid);
        }

        let amount = record
            .program
            .as_ref()
            .and_then(|id| self.catalog.find(id))
            .map_or(self.default_fee_cents, |program| program.fee_cents);

        Ok(self
            .payments
            .create_intent(&record.id, amount, method)
            .await?)
    }

    /// Confirm a payment intent and persist the settlement. `paid_at` is
    /// written through a payment patch and is set-once from then on.
    pub async fn confirm_payment(
        &self,
        user: &UserId,
        client_secret: &str,
        details: &PaymentDetails,
    ) -> Result<ApplicationRecord, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let paid_at = self.payments.confirm(client_secret, details).await?;

        let mut form = record;
        form.paid_at = Some(paid_at);
        form.status = form.status.advanced_to(ApplicationStatus::Pending);

        let outcome = self
            .persistence
            .save_and_advance(user, Step::Payment, &form)
            .await?;
        info!(user = %user.0, "enrollment payment settled");
        Ok(outcome.record)
    }

    /// Record that the applicant was sent to the external forms.
    pub async fn mark_forms_submitted(
        &self,
        user: &UserId,
    ) -> Result<SaveOutcome, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let mut form = record;
        if form.external_forms.submitted_at.is_none() {
            form.external_forms.submitted_at = Some(Utc::now());
        }
        Ok(self
            .persistence
            .save_draft(user, Step::Contract, &form)
            .await?)
    }

    /// One-shot provider check, persisting whatever flags came back.
    /// Used when the record is refreshed outside the poll loop.
    pub async fn refresh_form_status(
        &self,
        user: &UserId,
    ) -> Result<FormCompletion, EnrollmentServiceError> {
        let record = self.fetch_record(user).await?;
        let status = match self.forms.completion_status(&record.id).await {
            Ok(status) => status,
            Err(error) => {
                // Provider hiccups stay invisible to the applicant; the
                // persisted flags simply keep their last value.
                warn!(user = %user.0, %error, "external form status check failed");
                return Ok(FormCompletion {
                    student_done: record.external_forms.student_form_completed,
                    company_done: record.external_forms.company_form_completed,
                });
            }
        };

        let mut form = record;
        form.external_forms.student_form_completed = status.student_done;
        form.external_forms.company_form_completed = status.company_done;
        self.persistence
            .save_draft(user, Step::Contract, &form)
            .await?;
        Ok(status)
    }

    /// Start the bounded poll loop for the contract gate. The caller owns
    /// the handle and must cancel it when leaving the step.
    pub fn watch_contract_gate(&self, application: ApplicationId) -> GateWatchHandle {
        self.watcher.watch(application)
    }

    pub fn programs(&self) -> Vec<Program> {
        self.catalog.list_programs()
    }

    /// Destructive program switch: the existing record is deleted and a
    /// fresh implicit draft is started against the chosen program.
    pub async fn switch_program(
        &self,
        user: &UserId,
        program_id: &ProgramId,
    ) -> Result<ApplicationRecord, EnrollmentServiceError> {
        let program = self
            .catalog
            .find(program_id)
            .ok_or_else(|| EnrollmentServiceError::UnknownProgram(program_id.0.clone()))?;

        let existing = self.fetch_record(user).await?;
        warn!(
            user = %user.0,
            from = existing.program.as_ref().map_or("", |p| p.0.as_str()),
            to = %program.id.0,
            "switching program destroys the current application"
        );

        self.persistence
            .store()
            .delete_record(user)
            .await
            .map_err(PersistenceError::from)?;

        let mut fresh = ApplicationRecord::draft(
            super::persistence::fresh_record_id(),
            user.clone(),
            existing.email,
        );
        fresh.program = Some(program.id);
        Ok(self
            .persistence
            .store()
            .create_record(fresh)
            .await
            .map_err(PersistenceError::from)?)
    }
}
