use std::collections::BTreeSet;
use std::sync::Arc;

use super::common::*;
use crate::workflows::enrollment::documents::{
    plan_identity_documents, DocumentSlotManager, FileUpload, SlotKey, SlotOrigin,
};

fn upload(name: &str) -> FileUpload {
    FileUpload::new(name, mime::APPLICATION_PDF, vec![0x25, 0x50, 0x44, 0x46])
}

fn manager(storage: Arc<MemoryStorage>) -> DocumentSlotManager<MemoryStorage> {
    DocumentSlotManager::new(storage, roster())
}

#[tokio::test]
async fn resolves_declared_paths_against_the_primary_bucket() {
    let storage = Arc::new(MemoryStorage::new("documents"));
    let record = documents_complete_record();
    for (_, path) in record.documents.declared() {
        storage.seed("documents", &path);
    }

    let inventory = manager(Arc::clone(&storage))
        .resolve(&record, &BTreeSet::new())
        .await;

    assert_eq!(inventory.slots.len(), record.documents.declared().len());
    assert!(inventory.missing.is_empty());
    assert!(inventory
        .slots
        .iter()
        .all(|slot| slot.origin == SlotOrigin::Existing && slot.resolved_url.is_some()));
}

#[tokio::test]
async fn falls_back_to_the_archive_bucket() {
    let storage = Arc::new(MemoryStorage::new("documents"));
    let mut record = informations_complete_record();
    record.documents.cv = Some("cv/old-cv.pdf".to_string());
    // Only the archive holds the object.
    storage.seed("documents-archive", "cv/old-cv.pdf");
    storage.seed("documents", "pieces-identite/1-cni.pdf");

    let inventory = manager(Arc::clone(&storage))
        .resolve(&record, &BTreeSet::new())
        .await;

    let cv = inventory
        .slots
        .iter()
        .find(|slot| slot.slot == SlotKey::Cv)
        .expect("cv slot present");
    assert_eq!(cv.origin, SlotOrigin::Existing);
    assert!(cv
        .resolved_url
        .as_deref()
        .is_some_and(|url| url.contains("documents-archive")));
}

#[tokio::test]
async fn missing_path_is_flagged_without_hiding_siblings() {
    let storage = Arc::new(MemoryStorage::new("documents"));
    let record = documents_complete_record();
    // Seed everything except the diploma.
    for (_, path) in record.documents.declared() {
        if !path.starts_with("diplomes/") {
            storage.seed("documents", &path);
        }
    }

    let inventory = manager(Arc::clone(&storage))
        .resolve(&record, &BTreeSet::new())
        .await;

    let diploma = inventory
        .slots
        .iter()
        .find(|slot| slot.slot == SlotKey::Diploma)
        .expect("diploma slot present");
    assert_eq!(diploma.origin, SlotOrigin::Missing);
    assert!(diploma.resolved_url.is_none());
    assert_eq!(inventory.missing, vec!["1-bac.pdf".to_string()]);

    let resolved = inventory
        .slots
        .iter()
        .filter(|slot| slot.origin == SlotOrigin::Existing)
        .count();
    assert_eq!(resolved, inventory.slots.len() - 1, "siblings still resolve");
}

#[tokio::test]
async fn staged_paths_are_reported_as_new() {
    let storage = Arc::new(MemoryStorage::new("documents"));
    let mut record = informations_complete_record();
    record.documents.cv = Some("cv/7-cv.pdf".to_string());
    storage.seed("documents", "pieces-identite/1-cni.pdf");

    let staged: BTreeSet<String> = [record.documents.cv.clone().expect("cv path")]
        .into_iter()
        .collect();
    let inventory = manager(Arc::clone(&storage)).resolve(&record, &staged).await;

    let cv = inventory
        .slots
        .iter()
        .find(|slot| slot.slot == SlotKey::Cv)
        .expect("cv slot present");
    assert_eq!(cv.origin, SlotOrigin::New);
    assert!(
        !inventory.missing.contains(&"7-cv.pdf".to_string()),
        "staged files are not storage inconsistencies"
    );
}

#[tokio::test]
async fn replace_deletes_the_old_object_first() {
    let storage = Arc::new(MemoryStorage::new("documents"));
    storage.seed("documents", "cv/1-cv.pdf");

    let manager = manager(Arc::clone(&storage));
    let path = manager
        .replace("cv/1-cv.pdf", &upload("cv-v2.pdf"), SlotKey::Cv)
        .await
        .expect("replace succeeds");

    assert!(!storage.contains("documents", "cv/1-cv.pdf"));
    assert!(storage.contains("documents", &path));
    assert_eq!(
        storage.deleted(),
        vec![("documents".to_string(), "cv/1-cv.pdf".to_string())]
    );
}

#[tokio::test]
async fn replace_survives_a_failed_delete() {
    let manager = DocumentSlotManager::new(Arc::new(FailingStorage), roster());
    let result = manager
        .replace("cv/1-cv.pdf", &upload("cv-v2.pdf"), SlotKey::Cv)
        .await;
    // Deletion failure is logged and ignored; the upload error is what
    // surfaces here because the whole backend is down.
    assert!(result.is_err());
}

#[tokio::test]
async fn backend_error_falls_through_to_the_next_bucket() {
    // Roster of one failing bucket then the memory bucket would need a
    // heterogeneous gateway; instead prove resolution completes and flags
    // the slot when every bucket errors.
    let manager = DocumentSlotManager::new(Arc::new(FailingStorage), roster());
    let record = documents_complete_record();

    let inventory = manager.resolve(&record, &BTreeSet::new()).await;
    assert_eq!(
        inventory.missing.len(),
        record.documents.declared().len(),
        "erroring buckets must not hang or abort resolution"
    );
}

#[test]
fn identity_plan_accepts_up_to_the_cap() {
    let plan = plan_identity_documents(0, vec![upload("a.pdf"), upload("b.pdf")]);
    assert_eq!(plan.accepted.len(), 2);
    assert!(plan.rejected.is_empty());
}

#[test]
fn identity_plan_takes_the_first_k_when_overflowing() {
    let plan = plan_identity_documents(1, vec![upload("a.pdf"), upload("b.pdf"), upload("c.pdf")]);
    assert_eq!(plan.accepted.len(), 1);
    assert_eq!(plan.accepted[0].file_name, "a.pdf");
    assert_eq!(plan.rejected_names(), vec!["b.pdf".to_string(), "c.pdf".to_string()]);
}

#[test]
fn identity_plan_rejects_everything_when_full() {
    let plan = plan_identity_documents(2, vec![upload("a.pdf")]);
    assert!(plan.accepted.is_empty());
    assert_eq!(plan.rejected.len(), 1);
}
