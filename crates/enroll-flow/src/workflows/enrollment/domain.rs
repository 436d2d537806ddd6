use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for enrollment applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for the applicant account owning a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Identifier wrapper for catalog programs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub String);

/// The per-applicant enrollment application, filled in step by step.
///
/// One record exists per user and program choice. It is created as an
/// implicit draft on the first personal-field write and mutated only
/// through step-scoped saves; switching programs destroys it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub user_id: UserId,
    /// Write-once: set at record creation, never patched afterwards.
    pub email: String,
    pub program: Option<ProgramId>,
    pub personal: PersonalDetails,
    pub track: Option<EnrollmentTrack>,
    pub is_foreign_student: Option<bool>,
    pub data_consent_accepted: bool,
    pub documents: DocumentPaths,
    pub external_forms: ExternalFormState,
    pub terms_accepted: bool,
    pub info_attested_correct: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub status: ApplicationStatus,
}

impl ApplicationRecord {
    /// Fresh implicit draft for a user, before any step has been saved.
    pub fn draft(id: ApplicationId, user_id: UserId, email: String) -> Self {
        Self {
            id,
            user_id,
            email,
            program: None,
            personal: PersonalDetails::default(),
            track: None,
            is_foreign_student: None,
            data_consent_accepted: false,
            documents: DocumentPaths::default(),
            external_forms: ExternalFormState::default(),
            terms_accepted: false,
            info_attested_correct: false,
            paid_at: None,
            status: ApplicationStatus::Draft,
        }
    }

    /// Whether the apprenticeship contract step belongs to this record's
    /// effective step order. Recomputed from the track on every call since
    /// the track can change between saves.
    pub fn requires_contract_step(&self) -> bool {
        matches!(
            self.track,
            Some(EnrollmentTrack::Apprenticeship {
                host_company: Some(HostCompanyChoice::Yes),
            })
        )
    }

    pub fn status_view(&self) -> ApplicationStatusView {
        ApplicationStatusView {
            application_id: self.id.clone(),
            status: self.status.label(),
            paid: self.paid_at.is_some(),
            program: self.program.clone(),
        }
    }
}

/// Applicant-provided personal details collected on the first step.
///
/// Every field starts empty; the completion oracle requires all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalDetails {
    pub civility: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl PersonalDetails {
    pub fn is_complete(&self) -> bool {
        [
            &self.civility,
            &self.last_name,
            &self.first_name,
            &self.phone,
            &self.address,
            &self.postal_code,
            &self.city,
            &self.country,
        ]
        .iter()
        .all(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }
}

/// Chosen enrollment track. Apprenticeship applicants must additionally
/// answer whether they already have a host company lined up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrollmentTrack {
    Initial,
    Apprenticeship { host_company: Option<HostCompanyChoice> },
}

impl EnrollmentTrack {
    pub const fn label(self) -> &'static str {
        match self {
            EnrollmentTrack::Initial => "initial",
            EnrollmentTrack::Apprenticeship { .. } => "apprenticeship",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCompanyChoice {
    Yes,
    No,
}

/// Declared storage paths for each required document slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentPaths {
    pub cv: Option<String>,
    pub diploma: Option<String>,
    pub cover_letter: Option<String>,
    pub identity_photo: Option<String>,
    /// At most [`IDENTITY_DOCUMENT_LIMIT`] entries.
    pub identity_documents: Vec<String>,
    pub transcripts: Vec<String>,
}

/// Hard cap on identity documents per record.
pub const IDENTITY_DOCUMENT_LIMIT: usize = 2;

impl DocumentPaths {
    /// All declared paths, in display order, paired with their slot.
    pub fn declared(&self) -> Vec<(crate::workflows::enrollment::documents::SlotKey, String)> {
        use crate::workflows::enrollment::documents::SlotKey;

        let mut declared = Vec::new();
        for (slot, path) in [
            (SlotKey::Cv, &self.cv),
            (SlotKey::Diploma, &self.diploma),
            (SlotKey::CoverLetter, &self.cover_letter),
            (SlotKey::IdentityPhoto, &self.identity_photo),
        ] {
            if let Some(path) = path {
                declared.push((slot, path.clone()));
            }
        }
        for path in &self.identity_documents {
            declared.push((SlotKey::IdentityDocument, path.clone()));
        }
        for path in &self.transcripts {
            declared.push((SlotKey::Transcript, path.clone()));
        }
        declared
    }
}

/// Completion flags reported back by the external form provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFormState {
    pub student_form_completed: bool,
    pub company_form_completed: bool,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of the record. Transitions are monotonic: a step save
/// may advance the status but never regress it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Draft,
    Submitted,
    Pending,
    Validated,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "draft",
            ApplicationStatus::Submitted => "submitted",
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Validated => "validated",
        }
    }

    pub const fn rank(self) -> u8 {
        match self {
            ApplicationStatus::Draft => 0,
            ApplicationStatus::Submitted => 1,
            ApplicationStatus::Pending => 2,
            ApplicationStatus::Validated => 3,
        }
    }

    /// The later of two statuses, used when applying step patches so a
    /// stale client snapshot can never walk the status backwards.
    pub fn advanced_to(self, requested: Self) -> Self {
        if requested.rank() > self.rank() {
            requested
        } else {
            self
        }
    }
}

/// Sanitized projection of a record's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatusView {
    pub application_id: ApplicationId,
    pub status: &'static str,
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramId>,
}
