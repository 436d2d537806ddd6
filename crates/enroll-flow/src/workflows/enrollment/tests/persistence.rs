use std::sync::Arc;

use super::common::*;
use crate::workflows::enrollment::domain::{ApplicationStatus, UserId};
use crate::workflows::enrollment::persistence::{
    diff_step, DraftPersistenceController, PersistenceError, SaveOutcome, StepPatch,
    StepStoreError,
};
use crate::workflows::enrollment::progression::Step;

fn controller(store: Arc<MemoryStepStore>) -> DraftPersistenceController<MemoryStepStore> {
    DraftPersistenceController::new(store)
}

#[tokio::test]
async fn identical_form_saves_exactly_once() {
    let store = Arc::new(MemoryStepStore::with_record(draft_record()));
    let controller = controller(Arc::clone(&store));
    let mut form = draft_record();
    form.personal.last_name = Some("Durand".to_string());

    let first = controller
        .save_draft(&user(), Step::Informations, &form)
        .await
        .expect("first save");
    let second = controller
        .save_draft(&user(), Step::Informations, &form)
        .await
        .expect("second save");

    assert_eq!(first, SaveOutcome::Persisted);
    assert_eq!(second, SaveOutcome::Unchanged);
    assert_eq!(store.write_count(), 1, "no-op save must not reach the store");
}

#[tokio::test]
async fn staged_upload_marks_the_form_dirty() {
    let store = Arc::new(MemoryStepStore::with_record(documents_complete_record()));
    let controller = controller(Arc::clone(&store));
    let form = documents_complete_record();

    // Field diff is empty, but a file was staged this session.
    controller.stage_upload(&user(), "cv/2-cv.pdf".to_string());
    let outcome = controller
        .save_draft(&user(), Step::Documents, &form)
        .await
        .expect("save succeeds");

    assert_eq!(outcome, SaveOutcome::Persisted);
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn successful_save_clears_persisted_staged_paths() {
    let store = Arc::new(MemoryStepStore::with_record(informations_complete_record()));
    let controller = controller(Arc::clone(&store));

    controller.stage_upload(&user(), "cv/1-cv.pdf".to_string());
    let mut form = informations_complete_record();
    form.documents.cv = Some("cv/1-cv.pdf".to_string());

    controller
        .save_draft(&user(), Step::Documents, &form)
        .await
        .expect("save succeeds");

    assert!(
        controller.staged_paths(&user()).is_empty(),
        "persisted upload must leave the staging buffer"
    );
}

#[tokio::test]
async fn failed_save_keeps_the_staging_buffer() {
    let store = Arc::new(UnavailableStepStore {
        snapshot: informations_complete_record(),
    });
    let controller = DraftPersistenceController::new(store);

    controller.stage_upload(&user(), "cv/1-cv.pdf".to_string());
    let mut form = informations_complete_record();
    form.documents.cv = Some("cv/1-cv.pdf".to_string());

    let result = controller.save_draft(&user(), Step::Documents, &form).await;
    assert!(matches!(
        result,
        Err(PersistenceError::Store(StepStoreError::Unavailable(_)))
    ));
    assert_eq!(
        controller.staged_paths(&user()).len(),
        1,
        "failure must preserve local state for retry"
    );
}

#[tokio::test]
async fn first_informations_save_creates_the_implicit_draft() {
    let store = Arc::new(MemoryStepStore::default());
    let controller = controller(Arc::clone(&store));

    let mut form = draft_record();
    form.personal.first_name = Some("Claire".to_string());

    let outcome = controller
        .save_draft(&user(), Step::Informations, &form)
        .await
        .expect("save creates the draft");
    assert_eq!(outcome, SaveOutcome::Persisted);

    let record = store.record_of(&user()).expect("record exists");
    assert_eq!(record.email, form.email);
    assert_eq!(record.personal.first_name.as_deref(), Some("Claire"));
    assert_eq!(record.status, ApplicationStatus::Draft);
}

#[tokio::test]
async fn non_informations_save_without_record_is_refused() {
    let controller = controller(Arc::new(MemoryStepStore::default()));
    let result = controller
        .save_draft(&user(), Step::Documents, &documents_complete_record())
        .await;
    assert!(matches!(result, Err(PersistenceError::MissingRecord)));
}

#[tokio::test]
async fn partial_saves_never_clear_paid_at() {
    let store = Arc::new(MemoryStepStore::with_record(paid_record()));
    let controller = controller(Arc::clone(&store));

    // Stale client snapshot without the payment, editing the recap.
    let mut form = recap_complete_record();
    form.paid_at = None;
    form.terms_accepted = false;
    form.info_attested_correct = true;

    // terms_accepted flips false->true is a regression the client sent;
    // the diff includes it, but paid_at must survive regardless.
    controller
        .save_draft(&user(), Step::Recap, &form)
        .await
        .expect("save succeeds");

    let record = store.record_of(&user()).expect("record exists");
    assert_eq!(record.paid_at, Some(paid_timestamp()));
}

#[tokio::test]
async fn status_never_regresses_through_a_step_save() {
    let store = Arc::new(MemoryStepStore::with_record(paid_record()));
    let controller = controller(Arc::clone(&store));

    let mut form = paid_record();
    form.status = ApplicationStatus::Draft;
    form.terms_accepted = true;
    form.info_attested_correct = false;

    controller
        .save_draft(&user(), Step::Recap, &form)
        .await
        .expect("save succeeds");

    let record = store.record_of(&user()).expect("record exists");
    assert_eq!(record.status, ApplicationStatus::Pending);
}

#[tokio::test]
async fn save_and_advance_uses_the_refreshed_record() {
    let store = Arc::new(MemoryStepStore::with_record(informations_complete_record()));
    let controller = controller(Arc::clone(&store));

    let form = documents_complete_record();
    let outcome = controller
        .save_and_advance(&user(), Step::Documents, &form)
        .await
        .expect("advance succeeds");

    assert_eq!(outcome.saved, SaveOutcome::Persisted);
    assert_eq!(outcome.next, Step::Recap);
    // The returned record is the store's post-write truth, not the form.
    assert_eq!(
        outcome.record,
        store.record_of(&user()).expect("record exists")
    );
}

#[test]
fn diff_is_scoped_to_the_requested_step() {
    let baseline = informations_complete_record();
    let mut form = baseline.clone();
    form.personal.city = Some("Paris".to_string());
    form.documents.cv = Some("cv/9-cv.pdf".to_string());

    // An informations diff must not leak the documents change.
    match diff_step(Step::Informations, &form, &baseline) {
        StepPatch::Informations(patch) => {
            assert_eq!(patch.city.as_deref(), Some("Paris"));
        }
        other => panic!("expected informations patch, got {other:?}"),
    }

    match diff_step(Step::Documents, &form, &baseline) {
        StepPatch::Documents(patch) => {
            assert_eq!(patch.cv.as_deref(), Some("cv/9-cv.pdf"));
            assert!(patch.transcripts.is_none());
        }
        other => panic!("expected documents patch, got {other:?}"),
    }
}

#[test]
fn empty_diff_for_identical_records() {
    let baseline = recap_complete_record();
    for step in [
        Step::Informations,
        Step::Contract,
        Step::Documents,
        Step::Recap,
        Step::Payment,
        Step::Validation,
    ] {
        assert!(
            diff_step(step, &baseline, &baseline).is_empty(),
            "{step:?} diff of identical records must be empty"
        );
    }
}

#[test]
fn payment_patch_cannot_express_clearing_paid_at() {
    let baseline = paid_record();
    let mut form = baseline.clone();
    form.paid_at = None;

    match diff_step(Step::Payment, &form, &baseline) {
        StepPatch::Payment(patch) => assert!(patch.paid_at.is_none()),
        other => panic!("expected payment patch, got {other:?}"),
    }
}

#[test]
fn identity_documents_are_capped_when_a_patch_applies() {
    let mut record = draft_record();
    let patch = diff_step(
        Step::Informations,
        &{
            let mut form = draft_record();
            form.documents.identity_documents = vec![
                "pieces-identite/1.pdf".to_string(),
                "pieces-identite/2.pdf".to_string(),
                "pieces-identite/3.pdf".to_string(),
            ];
            form
        },
        &record,
    );

    patch.apply_to(&mut record);
    assert_eq!(record.documents.identity_documents.len(), 2);
}

#[tokio::test]
async fn staging_buffers_are_tracked_per_user() {
    let controller = controller(Arc::new(MemoryStepStore::default()));
    controller.stage_upload(&user(), "cv/1-cv.pdf".to_string());

    let other = UserId("user-99".to_string());
    assert!(controller.staged_paths(&other).is_empty());
    assert_eq!(controller.staged_paths(&user()).len(), 1);
}
