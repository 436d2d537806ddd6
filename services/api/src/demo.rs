use crate::infra::{
    default_catalog, ApiService, CountdownFormProvider, InMemoryStepStore, InMemoryStorage,
    InstantPaymentProvider,
};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

use enroll_flow::error::AppError;
use enroll_flow::workflows::enrollment::{
    ApplicationId, ApplicationRecord, BucketRoster, EnrollmentService, EnrollmentTrack,
    FileUpload, GateConfig, HostCompanyChoice, PaymentDetails, PaymentIntent, PaymentMethod,
    SlotKey, StepNavigation, UserId,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Walk the apprenticeship track (adds the contract step and gate)
    #[arg(long)]
    pub(crate) apprenticeship: bool,
    /// Stop before the payment gate
    #[arg(long)]
    pub(crate) skip_payment: bool,
    /// User identifier for the demo application
    #[arg(long, default_value = "demo-candidate")]
    pub(crate) user: String,
}

fn demo_file(name: &str) -> FileUpload {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    FileUpload::new(name, mime, format!("demo contents of {name}").into_bytes())
}

fn build_demo_service() -> Arc<ApiService> {
    let roster = BucketRoster::new(vec![
        "documents".to_string(),
        "documents-archive".to_string(),
    ]);
    // Tight gate timing so the contract poll completes within the demo.
    let gates = GateConfig {
        poll_interval: Duration::from_millis(50),
        poll_ceiling: Duration::from_secs(5),
    };

    Arc::new(EnrollmentService::new(
        Arc::new(InMemoryStepStore::default()),
        Arc::new(InMemoryStorage::new("documents")),
        Arc::new(InstantPaymentProvider),
        Arc::new(CountdownFormProvider::completing_after(3)),
        Arc::new(default_catalog()),
        roster,
        gates,
        45000,
    ))
}

async fn settle_payment(service: &ApiService, user: &UserId) -> Result<(), AppError> {
    let intent = service.start_payment(user, PaymentMethod::Card).await?;
    match intent {
        PaymentIntent::Created { client_secret } => {
            let record = service
                .confirm_payment(user, &client_secret, &PaymentDetails::default())
                .await?;
            println!(
                "payment settled at {}; status '{}'",
                record
                    .paid_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                record.status.label()
            );
        }
        PaymentIntent::AlreadyPaid => println!("enrollment fee already settled"),
    }
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let service = build_demo_service();
    let user = UserId(args.user.clone());

    println!("== Enrollment progression demo ==");
    for program in service.programs() {
        println!(
            "  program {}: {} ({} EUR)",
            program.id.0,
            program.name,
            program.fee_cents / 100
        );
    }

    // Jumping ahead before anything is saved gets redirected.
    if let StepNavigation::Redirect { to } = service.open_step(&user, "recap").await? {
        println!("navigating to 'recap' too early redirects to '{}'", to.slug());
    }

    // Step 1: informations.
    let mut form = ApplicationRecord::draft(
        ApplicationId(format!("demo-{}", args.user)),
        user.clone(),
        format!("{}@example.org", args.user),
    );
    form.program = service.programs().first().map(|program| program.id.clone());
    form.personal.civility = Some("M".to_string());
    form.personal.last_name = Some("Démo".to_string());
    form.personal.first_name = Some("Alex".to_string());
    form.personal.phone = Some("+33600000000".to_string());
    form.personal.address = Some("1 rue de la Paix".to_string());
    form.personal.postal_code = Some("75002".to_string());
    form.personal.city = Some("Paris".to_string());
    form.personal.country = Some("France".to_string());
    form.track = Some(if args.apprenticeship {
        EnrollmentTrack::Apprenticeship {
            host_company: Some(HostCompanyChoice::Yes),
        }
    } else {
        EnrollmentTrack::Initial
    });
    form.is_foreign_student = Some(false);
    form.data_consent_accepted = true;

    // Creates the implicit draft so uploads have a record to attach to.
    service.save_draft(&user, "informations", &form).await?;
    let identity = service
        .upload_identity_documents(&user, vec![demo_file("cni-recto.pdf")])
        .await?;
    form.documents.identity_documents = identity.stored.clone();

    let outcome = service.save_and_advance(&user, "informations", &form).await?;
    println!(
        "informations saved; wizard resumes at '{}'",
        outcome.next.slug()
    );
    let mut form = outcome.record;

    // Contract gate, apprenticeship only.
    if args.apprenticeship {
        service.mark_forms_submitted(&user).await?;
        println!("waiting on the external forms for {}...", form.id.0);
        let handle = service.watch_contract_gate(form.id.clone());
        handle.join().await;
        let status = service.refresh_form_status(&user).await?;
        println!(
            "external forms: student={} company={}",
            status.student_done, status.company_done
        );

        if let StepNavigation::Redirect { to } = service.open_step(&user, "documents").await? {
            // The contract gate only opens through payment (or once the
            // whole later file is complete), so settle the fee here.
            println!(
                "documents still blocked by '{}'; settling the fee to open the gate",
                to.slug()
            );
            settle_payment(&service, &user).await?;
        }
    }

    // Step 2: documents.
    for (slot, name) in [
        (SlotKey::Cv, "cv.pdf"),
        (SlotKey::Diploma, "diplome.pdf"),
        (SlotKey::CoverLetter, "lettre.pdf"),
    ] {
        let receipt = service.upload_document(&user, slot, demo_file(name)).await?;
        match slot {
            SlotKey::Cv => form.documents.cv = Some(receipt.path),
            SlotKey::Diploma => form.documents.diploma = Some(receipt.path),
            SlotKey::CoverLetter => form.documents.cover_letter = Some(receipt.path),
            _ => {}
        }
    }
    let transcript = service
        .upload_document(&user, SlotKey::Transcript, demo_file("releve-s1.pdf"))
        .await?;
    form.documents.transcripts = vec![transcript.path];

    let outcome = service.save_and_advance(&user, "documents", &form).await?;
    println!(
        "documents saved; wizard resumes at '{}'",
        outcome.next.slug()
    );

    let inventory = service.documents(&user).await?;
    println!(
        "document inventory: {} slots, {} missing",
        inventory.slots.len(),
        inventory.missing.len()
    );

    // Step 3: recap submission.
    let mut form = outcome.record;
    form.terms_accepted = true;
    form.info_attested_correct = true;
    let outcome = service.save_and_advance(&user, "recap", &form).await?;
    println!(
        "dossier submitted (status '{}'); wizard resumes at '{}'",
        outcome.record.status.label(),
        outcome.next.slug()
    );

    if args.skip_payment {
        println!("skipping the payment gate as requested");
        return Ok(());
    }

    // Step 4: payment gate.
    settle_payment(&service, &user).await?;

    let overview = service.overview(&user).await?;
    println!(
        "application now waits at '{}' for back-office validation",
        overview.resume_step.slug()
    );

    Ok(())
}
