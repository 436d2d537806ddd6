use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::workflows::enrollment::catalog::{Program, StaticProgramCatalog};
use crate::workflows::enrollment::documents::{
    BucketRoster, FileUpload, SlotKey, StorageError, StorageGateway,
};
use crate::workflows::enrollment::domain::{
    ApplicationId, ApplicationRecord, ApplicationStatus, EnrollmentTrack, HostCompanyChoice,
    ProgramId, UserId,
};
use crate::workflows::enrollment::gates::{
    FormCompletion, FormStatusProvider, GateConfig, GateError, PaymentDetails, PaymentError,
    PaymentIntent, PaymentMethod, PaymentProvider,
};
use crate::workflows::enrollment::persistence::{StepPatch, StepStore, StepStoreError};
use crate::workflows::enrollment::service::EnrollmentService;

pub(super) fn user() -> UserId {
    UserId("user-42".to_string())
}

pub(super) fn paid_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 10, 30, 0).single().expect("valid timestamp")
}

/// Record with nothing filled in yet.
pub(super) fn draft_record() -> ApplicationRecord {
    let mut record = ApplicationRecord::draft(
        ApplicationId("cand-000900".to_string()),
        user(),
        "candidate@example.org".to_string(),
    );
    record.program = Some(ProgramId("MSC-INFO".to_string()));
    record
}

/// Record whose informations step is complete on the initial track.
pub(super) fn informations_complete_record() -> ApplicationRecord {
    let mut record = draft_record();
    record.personal.civility = Some("Mme".to_string());
    record.personal.last_name = Some("Durand".to_string());
    record.personal.first_name = Some("Claire".to_string());
    record.personal.phone = Some("+33600000001".to_string());
    record.personal.address = Some("12 rue des Lilas".to_string());
    record.personal.postal_code = Some("69003".to_string());
    record.personal.city = Some("Lyon".to_string());
    record.personal.country = Some("France".to_string());
    record.track = Some(EnrollmentTrack::Initial);
    record.is_foreign_student = Some(false);
    record.data_consent_accepted = true;
    record
        .documents
        .identity_documents
        .push("pieces-identite/1-cni.pdf".to_string());
    record
}

/// Informations + documents complete.
pub(super) fn documents_complete_record() -> ApplicationRecord {
    let mut record = informations_complete_record();
    record.documents.cv = Some("cv/1-cv.pdf".to_string());
    record.documents.diploma = Some("diplomes/1-bac.pdf".to_string());
    record.documents.cover_letter = Some("lettres/1-lm.pdf".to_string());
    record.documents.transcripts.push("releves/1-s1.pdf".to_string());
    record
}

/// Everything up to and including the recap complete.
pub(super) fn recap_complete_record() -> ApplicationRecord {
    let mut record = documents_complete_record();
    record.terms_accepted = true;
    record.info_attested_correct = true;
    record
}

pub(super) fn paid_record() -> ApplicationRecord {
    let mut record = recap_complete_record();
    record.paid_at = Some(paid_timestamp());
    record.status = ApplicationStatus::Pending;
    record
}

pub(super) fn apprenticeship(record: &mut ApplicationRecord, host_company: Option<HostCompanyChoice>) {
    record.track = Some(EnrollmentTrack::Apprenticeship { host_company });
}

#[derive(Default)]
pub(super) struct MemoryStepStore {
    records: Mutex<HashMap<UserId, ApplicationRecord>>,
    writes: AtomicUsize,
}

impl MemoryStepStore {
    pub(super) fn with_record(record: ApplicationRecord) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .expect("store mutex poisoned")
            .insert(record.user_id.clone(), record);
        store
    }

    /// Number of `save_step` calls that reached the store.
    pub(super) fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(super) fn record_of(&self, user: &UserId) -> Option<ApplicationRecord> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .get(user)
            .cloned()
    }
}

#[async_trait]
impl StepStore for MemoryStepStore {
    async fn create_record(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StepStoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if records.contains_key(&record.user_id) {
            return Err(StepStoreError::Conflict);
        }
        records.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }

    async fn save_step(&self, user: &UserId, patch: StepPatch) -> Result<(), StepStoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let record = records.get_mut(user).ok_or(StepStoreError::NotFound)?;
        patch.apply_to(record);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_record(
        &self,
        user: &UserId,
    ) -> Result<Option<ApplicationRecord>, StepStoreError> {
        let records = self.records.lock().expect("store mutex poisoned");
        Ok(records.get(user).cloned())
    }

    async fn delete_record(&self, user: &UserId) -> Result<(), StepStoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        records.remove(user).ok_or(StepStoreError::NotFound)?;
        Ok(())
    }
}

/// Store whose writes always fail, for persistence-failure paths.
pub(super) struct UnavailableStepStore {
    pub(super) snapshot: ApplicationRecord,
}

#[async_trait]
impl StepStore for UnavailableStepStore {
    async fn create_record(
        &self,
        _record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StepStoreError> {
        Err(StepStoreError::Unavailable("database offline".to_string()))
    }

    async fn save_step(&self, _user: &UserId, _patch: StepPatch) -> Result<(), StepStoreError> {
        Err(StepStoreError::Unavailable("database offline".to_string()))
    }

    async fn fetch_record(
        &self,
        _user: &UserId,
    ) -> Result<Option<ApplicationRecord>, StepStoreError> {
        Ok(Some(self.snapshot.clone()))
    }

    async fn delete_record(&self, _user: &UserId) -> Result<(), StepStoreError> {
        Err(StepStoreError::Unavailable("database offline".to_string()))
    }
}

/// In-memory storage keyed by (bucket, path).
#[derive(Default)]
pub(super) struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), String>>,
    upload_bucket: String,
    uploads: AtomicUsize,
    deletes: Mutex<Vec<(String, String)>>,
}

impl MemoryStorage {
    pub(super) fn new(upload_bucket: &str) -> Self {
        Self {
            upload_bucket: upload_bucket.to_string(),
            ..Self::default()
        }
    }

    pub(super) fn seed(&self, bucket: &str, path: &str) {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .insert(
                (bucket.to_string(), path.to_string()),
                format!("https://storage.test/{bucket}/{path}"),
            );
    }

    pub(super) fn contains(&self, bucket: &str, path: &str) -> bool {
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .contains_key(&(bucket.to_string(), path.to_string()))
    }

    pub(super) fn deleted(&self) -> Vec<(String, String)> {
        self.deletes.lock().expect("storage mutex poisoned").clone()
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn resolve_signed_url(
        &self,
        path: &str,
        bucket: &str,
    ) -> Result<Option<String>, StorageError> {
        let objects = self.objects.lock().expect("storage mutex poisoned");
        Ok(objects.get(&(bucket.to_string(), path.to_string())).cloned())
    }

    async fn delete_object(&self, path: &str, bucket: &str) -> Result<bool, StorageError> {
        let mut objects = self.objects.lock().expect("storage mutex poisoned");
        let removed = objects
            .remove(&(bucket.to_string(), path.to_string()))
            .is_some();
        if removed {
            self.deletes
                .lock()
                .expect("storage mutex poisoned")
                .push((bucket.to_string(), path.to_string()));
        }
        Ok(removed)
    }

    async fn upload(&self, file: &FileUpload, slot: SlotKey) -> Result<String, StorageError> {
        let seq = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let path = format!("{}/{seq}-{}", slot.storage_prefix(), file.file_name);
        self.objects
            .lock()
            .expect("storage mutex poisoned")
            .insert(
                (self.upload_bucket.clone(), path.clone()),
                format!("https://storage.test/{}/{path}", self.upload_bucket),
            );
        Ok(path)
    }
}

/// Backend that fails every call, to prove fallbacks keep going.
pub(super) struct FailingStorage;

#[async_trait]
impl StorageGateway for FailingStorage {
    async fn resolve_signed_url(
        &self,
        _path: &str,
        _bucket: &str,
    ) -> Result<Option<String>, StorageError> {
        Err(StorageError::Backend("storage offline".to_string()))
    }

    async fn delete_object(&self, _path: &str, _bucket: &str) -> Result<bool, StorageError> {
        Err(StorageError::Backend("storage offline".to_string()))
    }

    async fn upload(&self, _file: &FileUpload, _slot: SlotKey) -> Result<String, StorageError> {
        Err(StorageError::Backend("storage offline".to_string()))
    }
}

/// Payment stub settling every confirmation at a fixed timestamp.
#[derive(Default)]
pub(super) struct StubPayments {
    decline: bool,
    provider_error: bool,
    intents: AtomicUsize,
}

impl StubPayments {
    pub(super) fn declining() -> Self {
        Self {
            decline: true,
            ..Self::default()
        }
    }

    pub(super) fn misconfigured() -> Self {
        Self {
            provider_error: true,
            ..Self::default()
        }
    }

    pub(super) fn intent_count(&self) -> usize {
        self.intents.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for StubPayments {
    async fn create_intent(
        &self,
        application: &ApplicationId,
        _amount_cents: u32,
        _method: PaymentMethod,
    ) -> Result<PaymentIntent, PaymentError> {
        self.intents.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentIntent::Created {
            client_secret: format!("secret-{}", application.0),
        })
    }

    async fn confirm(
        &self,
        _client_secret: &str,
        _details: &PaymentDetails,
    ) -> Result<DateTime<Utc>, PaymentError> {
        if self.decline {
            return Err(PaymentError::Declined("insufficient funds".to_string()));
        }
        if self.provider_error {
            return Err(PaymentError::Provider("api key rejected".to_string()));
        }
        Ok(paid_timestamp())
    }
}

/// Form provider replaying a scripted sequence of responses; the last
/// entry repeats once the script runs out.
pub(super) struct ScriptedForms {
    responses: Mutex<Vec<FormCompletion>>,
    calls: AtomicUsize,
}

impl ScriptedForms {
    pub(super) fn new(responses: Vec<FormCompletion>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn pending_forever() -> Self {
        Self::new(vec![FormCompletion::default()])
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormStatusProvider for ScriptedForms {
    async fn completion_status(
        &self,
        _application: &ApplicationId,
    ) -> Result<FormCompletion, GateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().expect("forms mutex poisoned");
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses[0])
        }
    }
}

pub(super) fn roster() -> BucketRoster {
    BucketRoster::new(vec!["documents".to_string(), "documents-archive".to_string()])
}

pub(super) fn gate_config() -> GateConfig {
    GateConfig::default()
}

pub(super) fn catalog() -> StaticProgramCatalog {
    StaticProgramCatalog::new(vec![
        Program {
            id: ProgramId("MSC-INFO".to_string()),
            name: "Master Informatique".to_string(),
            fee_cents: 9500,
            apprenticeship_available: true,
        },
        Program {
            id: ProgramId("MSC-DATA".to_string()),
            name: "Master Data Science".to_string(),
            fee_cents: 12000,
            apprenticeship_available: false,
        },
    ])
}

pub(super) type TestService =
    EnrollmentService<MemoryStepStore, MemoryStorage, StubPayments, ScriptedForms>;

pub(super) struct ServiceHarness {
    pub(super) service: Arc<TestService>,
    pub(super) store: Arc<MemoryStepStore>,
    pub(super) storage: Arc<MemoryStorage>,
    pub(super) payments: Arc<StubPayments>,
    pub(super) forms: Arc<ScriptedForms>,
}

pub(super) fn build_service(record: Option<ApplicationRecord>) -> ServiceHarness {
    let store = Arc::new(match record {
        Some(record) => MemoryStepStore::with_record(record),
        None => MemoryStepStore::default(),
    });
    let storage = Arc::new(MemoryStorage::new("documents"));
    let payments = Arc::new(StubPayments::default());
    let forms = Arc::new(ScriptedForms::pending_forever());

    let service = Arc::new(EnrollmentService::new(
        Arc::clone(&store),
        Arc::clone(&storage),
        Arc::clone(&payments),
        Arc::clone(&forms),
        Arc::new(catalog()),
        roster(),
        gate_config(),
        9500,
    ));

    ServiceHarness {
        service,
        store,
        storage,
        payments,
        forms,
    }
}
