//! Required-document slot reconciliation.
//!
//! Each record declares storage paths for its document slots; storage is
//! the source of physical truth. Resolution fans out one lookup per
//! declared path, tries the bucket roster in order, and reports paths that
//! resolve nowhere as `Missing` so the applicant is asked to re-upload
//! instead of silently losing a file.

pub mod drive;
pub mod storage;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{ApplicationRecord, IDENTITY_DOCUMENT_LIMIT};

pub use storage::{BucketRoster, FileUpload, StorageError, StorageGateway};

/// Logical document requirement on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Cv,
    Diploma,
    CoverLetter,
    IdentityPhoto,
    IdentityDocument,
    Transcript,
}

impl SlotKey {
    pub const fn label(self) -> &'static str {
        match self {
            SlotKey::Cv => "CV",
            SlotKey::Diploma => "Diplôme",
            SlotKey::CoverLetter => "Lettre de motivation",
            SlotKey::IdentityPhoto => "Photo d'identité",
            SlotKey::IdentityDocument => "Pièce d'identité",
            SlotKey::Transcript => "Relevé de notes",
        }
    }

    pub const fn slug(self) -> &'static str {
        match self {
            SlotKey::Cv => "cv",
            SlotKey::Diploma => "diploma",
            SlotKey::CoverLetter => "cover-letter",
            SlotKey::IdentityPhoto => "identity-photo",
            SlotKey::IdentityDocument => "identity-document",
            SlotKey::Transcript => "transcript",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "cv" => Some(SlotKey::Cv),
            "diploma" => Some(SlotKey::Diploma),
            "cover-letter" => Some(SlotKey::CoverLetter),
            "identity-photo" => Some(SlotKey::IdentityPhoto),
            "identity-document" => Some(SlotKey::IdentityDocument),
            "transcript" => Some(SlotKey::Transcript),
            _ => None,
        }
    }

    /// Directory prefix new uploads for this slot are stored under.
    pub const fn storage_prefix(self) -> &'static str {
        match self {
            SlotKey::Cv => "cv",
            SlotKey::Diploma => "diplomes",
            SlotKey::CoverLetter => "lettres",
            SlotKey::IdentityPhoto => "photos",
            SlotKey::IdentityDocument => "pieces-identite",
            SlotKey::Transcript => "releves",
        }
    }

    /// Entry cap for multi-valued slots; `None` means unbounded.
    pub const fn max_entries(self) -> Option<usize> {
        match self {
            SlotKey::IdentityDocument => Some(IDENTITY_DOCUMENT_LIMIT),
            SlotKey::Transcript => None,
            // Single-valued slots replace rather than append.
            _ => Some(1),
        }
    }

    pub const fn is_multi(self) -> bool {
        matches!(self, SlotKey::IdentityDocument | SlotKey::Transcript)
    }
}

/// Where a slot's file stands relative to storage reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOrigin {
    /// Declared on the record and resolvable in a bucket.
    Existing,
    /// Staged in this session, not yet part of a persisted save.
    New,
    /// Declared on the record but resolvable in no bucket: persisted
    /// metadata and physical storage disagree.
    Missing,
}

/// Derived view of one declared document. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSlot {
    pub slot: SlotKey,
    pub declared_path: String,
    pub resolved_url: Option<String>,
    pub origin: SlotOrigin,
}

/// Outcome of a full resolution pass. Missing slots carry their file name
/// so the UI can show a re-upload banner distinct from validation errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentInventory {
    pub slots: Vec<DocumentSlot>,
    pub missing: Vec<String>,
}

/// How a batch of offered identity documents splits against the slot cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub accepted: Vec<FileUpload>,
    pub rejected: Vec<FileUpload>,
}

impl StagingPlan {
    pub fn rejected_names(&self) -> Vec<String> {
        self.rejected.iter().map(|file| file.file_name.clone()).collect()
    }
}

/// Document failure surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown document slot '{0}'")]
    UnknownSlot(String),
}

/// Reconciles record-declared paths against the storage roster.
pub struct DocumentSlotManager<G> {
    storage: Arc<G>,
    roster: BucketRoster,
}

impl<G> DocumentSlotManager<G>
where
    G: StorageGateway + 'static,
{
    pub fn new(storage: Arc<G>, roster: BucketRoster) -> Self {
        Self { storage, roster }
    }

    pub fn roster(&self) -> &BucketRoster {
        &self.roster
    }

    /// Resolve every declared path concurrently. Paths in `staged` were
    /// uploaded in this session and are reported as `New` without a
    /// lookup; everything else is checked against the roster in order.
    /// Missing slots never abort the pass or hide their siblings.
    pub async fn resolve(
        &self,
        record: &ApplicationRecord,
        staged: &BTreeSet<String>,
    ) -> DocumentInventory {
        let declared = record.documents.declared();

        let lookups = declared.into_iter().map(|(slot, path)| async move {
            if staged.contains(&path) {
                return DocumentSlot {
                    slot,
                    declared_path: path,
                    resolved_url: None,
                    origin: SlotOrigin::New,
                };
            }

            let resolved = self.resolve_in_roster(&path).await;
            match resolved {
                Some(url) => DocumentSlot {
                    slot,
                    declared_path: path,
                    resolved_url: Some(url),
                    origin: SlotOrigin::Existing,
                },
                None => DocumentSlot {
                    slot,
                    declared_path: path,
                    resolved_url: None,
                    origin: SlotOrigin::Missing,
                },
            }
        });

        let slots = join_all(lookups).await;
        let missing = slots
            .iter()
            .filter(|slot| slot.origin == SlotOrigin::Missing)
            .map(|slot| file_name_of(&slot.declared_path).to_string())
            .collect();

        DocumentInventory { slots, missing }
    }

    /// First bucket that resolves the path wins. Backend errors count as a
    /// miss for that bucket so one unhealthy bucket cannot mask a file
    /// held by the next.
    async fn resolve_in_roster(&self, path: &str) -> Option<String> {
        for bucket in self.roster.iter() {
            match self.storage.resolve_signed_url(path, bucket).await {
                Ok(Some(url)) => return Some(url),
                Ok(None) => {}
                Err(error) => {
                    warn!(%path, %bucket, %error, "signed-url resolution failed, trying next bucket");
                }
            }
        }
        None
    }

    /// Store a file for a slot and return its new path. The caller owns
    /// appending or replacing the path on the record.
    pub async fn upload(&self, file: &FileUpload, slot: SlotKey) -> Result<String, DocumentError> {
        let path = self.storage.upload(file, slot).await?;
        Ok(path)
    }

    /// Replace a single-valued slot: best-effort delete of the old object
    /// across the roster, then store the new file. Deletion failures are
    /// logged and never abort the replacement.
    pub async fn replace(
        &self,
        old_path: &str,
        file: &FileUpload,
        slot: SlotKey,
    ) -> Result<String, DocumentError> {
        self.delete_everywhere(old_path).await;
        self.upload(file, slot).await
    }

    async fn delete_everywhere(&self, path: &str) {
        for bucket in self.roster.iter() {
            match self.storage.delete_object(path, bucket).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(error) => {
                    warn!(%path, %bucket, %error, "stale object deletion failed");
                }
            }
        }
    }
}

/// Split a batch of offered identity documents against the remaining free
/// slots: with K slots left, exactly the first K files are accepted and
/// the rest rejected for a user-facing warning.
pub fn plan_identity_documents(existing: usize, offered: Vec<FileUpload>) -> StagingPlan {
    let free = IDENTITY_DOCUMENT_LIMIT.saturating_sub(existing);
    let mut accepted = offered;
    let rejected = accepted.split_off(free.min(accepted.len()));
    StagingPlan { accepted, rejected }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
