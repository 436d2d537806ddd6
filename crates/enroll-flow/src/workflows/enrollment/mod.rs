//! Application progression engine for the enrollment wizard.
//!
//! One `ApplicationRecord` per applicant moves through a conditional,
//! partially ordered sequence of steps. Pure predicates decide step
//! completion, the progression graph gates navigation, a change-detecting
//! controller owns persistence, the slot manager reconciles documents
//! against storage, and two gates (payment, external forms) hold final
//! submission until their signals arrive.

pub mod catalog;
pub mod documents;
pub mod domain;
pub mod gates;
pub mod persistence;
pub mod progression;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use catalog::{CatalogError, CsvProgramCatalog, Program, ProgramCatalog, StaticProgramCatalog};
pub use documents::{
    BucketRoster, DocumentError, DocumentInventory, DocumentSlot, DocumentSlotManager, FileUpload,
    SlotKey, SlotOrigin, StorageError, StorageGateway,
};
pub use domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, ApplicationStatusView, DocumentPaths,
    EnrollmentTrack, ExternalFormState, HostCompanyChoice, PersonalDetails, ProgramId, UserId,
    IDENTITY_DOCUMENT_LIMIT,
};
pub use gates::{
    payment_gate_satisfied, FormCompletion, FormStatusProvider, GateConfig, GateError,
    GateWatchHandle, GateWatcher, PaymentDetails, PaymentError, PaymentIntent, PaymentMethod,
    PaymentProvider,
};
pub use persistence::{
    diff_step, AdvanceOutcome, DraftPersistenceController, PersistenceError, SaveOutcome,
    StepPatch, StepStore, StepStoreError,
};
pub use progression::{
    effective_steps, is_step_complete, next_incomplete_step, validate_access, Step, StepAccess,
};
pub use router::enrollment_router;
pub use service::{
    EnrollmentOverview, EnrollmentService, EnrollmentServiceError, StagingReport, StepNavigation,
    UploadReceipt,
};
