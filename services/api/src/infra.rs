use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use enroll_flow::workflows::enrollment::{
    ApplicationId, ApplicationRecord, EnrollmentService, FileUpload, FormCompletion,
    FormStatusProvider, GateError, PaymentDetails, PaymentError, PaymentIntent, PaymentMethod,
    PaymentProvider, Program, ProgramId, SlotKey, StaticProgramCatalog, StepPatch, StepStore,
    StepStoreError, StorageError, StorageGateway, UserId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ApiService = EnrollmentService<
    InMemoryStepStore,
    InMemoryStorage,
    InstantPaymentProvider,
    CountdownFormProvider,
>;

/// Record store backed by a process-local map. Deployments swap this for
/// the SIS-backed adapter; the engine only sees the trait.
#[derive(Default)]
pub(crate) struct InMemoryStepStore {
    records: Mutex<HashMap<UserId, ApplicationRecord>>,
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn create_record(
        &self,
        record: ApplicationRecord,
    ) -> Result<ApplicationRecord, StepStoreError> {
        let mut records = self.records.lock().expect("record mutex poisoned");
        if records.contains_key(&record.user_id) {
            return Err(StepStoreError::Conflict);
        }
        records.insert(record.user_id.clone(), record.clone());
        Ok(record)
    }

    async fn save_step(&self, user: &UserId, patch: StepPatch) -> Result<(), StepStoreError> {
        let mut records = self.records.lock().expect("record mutex poisoned");
        let record = records.get_mut(user).ok_or(StepStoreError::NotFound)?;
        patch.apply_to(record);
        Ok(())
    }

    async fn fetch_record(
        &self,
        user: &UserId,
    ) -> Result<Option<ApplicationRecord>, StepStoreError> {
        let records = self.records.lock().expect("record mutex poisoned");
        Ok(records.get(user).cloned())
    }

    async fn delete_record(&self, user: &UserId) -> Result<(), StepStoreError> {
        let mut records = self.records.lock().expect("record mutex poisoned");
        records.remove(user).ok_or(StepStoreError::NotFound)?;
        Ok(())
    }
}

/// Storage gateway keeping objects in memory, keyed by (bucket, path).
#[derive(Default)]
pub(crate) struct InMemoryStorage {
    objects: Mutex<HashMap<(String, String), String>>,
    upload_bucket: String,
    uploads: AtomicUsize,
}

impl InMemoryStorage {
    pub(crate) fn new(upload_bucket: &str) -> Self {
        Self {
            upload_bucket: upload_bucket.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StorageGateway for InMemoryStorage {
    async fn resolve_signed_url(
        &self,
        path: &str,
        bucket: &str,
    ) -> Result<Option<String>, StorageError> {
        let objects = self.objects.lock().expect("object mutex poisoned");
        Ok(objects.get(&(bucket.to_string(), path.to_string())).cloned())
    }

    async fn delete_object(&self, path: &str, bucket: &str) -> Result<bool, StorageError> {
        let mut objects = self.objects.lock().expect("object mutex poisoned");
        Ok(objects
            .remove(&(bucket.to_string(), path.to_string()))
            .is_some())
    }

    async fn upload(&self, file: &FileUpload, slot: SlotKey) -> Result<String, StorageError> {
        let seq = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let path = format!("{}/{seq}-{}", slot.storage_prefix(), file.file_name);
        self.objects.lock().expect("object mutex poisoned").insert(
            (self.upload_bucket.clone(), path.clone()),
            format!("memory://{}/{path}", self.upload_bucket),
        );
        Ok(path)
    }
}

/// Payment provider that settles every confirmation immediately.
#[derive(Default)]
pub(crate) struct InstantPaymentProvider;

#[async_trait]
impl PaymentProvider for InstantPaymentProvider {
    async fn create_intent(
        &self,
        application: &ApplicationId,
        _amount_cents: u32,
        _method: PaymentMethod,
    ) -> Result<PaymentIntent, PaymentError> {
        Ok(PaymentIntent::Created {
            client_secret: format!("demo-secret-{}", application.0),
        })
    }

    async fn confirm(
        &self,
        _client_secret: &str,
        _details: &PaymentDetails,
    ) -> Result<DateTime<Utc>, PaymentError> {
        Ok(Utc::now())
    }
}

/// Form provider reporting completion after a fixed number of polls, so
/// the demo can show the contract gate opening.
pub(crate) struct CountdownFormProvider {
    remaining: AtomicUsize,
}

impl CountdownFormProvider {
    pub(crate) fn completing_after(polls: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(polls),
        }
    }
}

#[async_trait]
impl FormStatusProvider for CountdownFormProvider {
    async fn completion_status(
        &self,
        _application: &ApplicationId,
    ) -> Result<FormCompletion, GateError> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(FormCompletion {
                student_done: true,
                company_done: true,
            });
        }
        self.remaining.fetch_sub(1, Ordering::SeqCst);
        Ok(FormCompletion {
            student_done: remaining <= 1,
            company_done: false,
        })
    }
}

pub(crate) fn default_catalog() -> StaticProgramCatalog {
    StaticProgramCatalog::new(vec![
        Program {
            id: ProgramId("BTS-SIO".to_string()),
            name: "BTS Services Informatiques aux Organisations".to_string(),
            fee_cents: 45000,
            apprenticeship_available: true,
        },
        Program {
            id: ProgramId("BACH-DEV".to_string()),
            name: "Bachelor Développement Web".to_string(),
            fee_cents: 59000,
            apprenticeship_available: true,
        },
        Program {
            id: ProgramId("MSC-EXPERT".to_string()),
            name: "Mastère Expert Informatique".to_string(),
            fee_cents: 69000,
            apprenticeship_available: false,
        },
    ])
}
