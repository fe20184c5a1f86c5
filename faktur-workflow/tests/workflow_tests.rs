//! End-to-end tests for the inbox + orchestrator over a real store.

use faktur_core::config::{AppConfig, OcrConfig, OcrProvider};
use faktur_core::error::FakturError;
use faktur_core::events::{EventBus, InboxEvent};
use faktur_core::traits::{IntakeSink, InvoiceStore};
use faktur_core::types::{
    IntakeMetadata, InvoicePatch, InvoiceSource, InvoiceStatus, SuggestionRule,
};
use faktur_describe::AutoDescribe;
use faktur_export::ExportOptions;
use faktur_ocr::{OcrPipeline, TesseractOcr};
use faktur_store::MemoryStore;
use faktur_workflow::{App, Inbox, Workflow};
use rust_decimal::Decimal;
use std::sync::Arc;

const KSEF_XML: &str = r#"<?xml version="1.0"?><Faktura xmlns="urn:ksef">
<Fa><P_2>FV/2026/01/001</P_2><P_1>2026-01-15</P_1>
<P_13_1>1000,00</P_13_1><P_14_1>230,00</P_14_1><P_15>1230,00</P_15></Fa>
<Podmiot1><NIP>1234567890</NIP><Nazwa>ACME</Nazwa></Podmiot1></Faktura>"#;

fn fuel_rule() -> SuggestionRule {
    SuggestionRule {
        name: "fuel".to_string(),
        nip_pattern: None,
        name_pattern: None,
        amount_min: None,
        amount_max: None,
        keywords: Some(vec!["paliwo".to_string()]),
        category: "paliwo".to_string(),
        mpk: None,
        description: None,
        confidence: 90,
    }
}

fn workflow_with(rules: Vec<SuggestionRule>) -> (Arc<Workflow>, Arc<Inbox>, EventBus) {
    let bus = EventBus::new();
    let store: Arc<dyn InvoiceStore> = Arc::new(MemoryStore::new());
    let inbox = Arc::new(Inbox::new(store, bus.clone()));
    let describe = Arc::new(AutoDescribe::new(rules).with_bus(bus.clone()));
    let workflow = Arc::new(Workflow::new(
        inbox.clone(),
        OcrPipeline::new(OcrConfig::default()),
        describe,
        bus.clone(),
    ));
    (workflow, inbox, bus)
}

async fn add_ksef_invoice(inbox: &Inbox, reference: &str) -> faktur_core::types::Invoice {
    inbox
        .add(
            InvoiceSource::Ksef,
            Some(KSEF_XML.as_bytes().to_vec()),
            IntakeMetadata {
                file_name: Some(format!("ksef_{}.xml", reference)),
                file_type: Some("application/xml".to_string()),
                source_key: Some(format!("ksef:{}", reference)),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

// ============================================================================
// Intake and dedup
// ============================================================================

#[tokio::test]
async fn test_intake_dedup_is_idempotent() {
    let (_workflow, inbox, _bus) = workflow_with(Vec::new());

    let first = add_ksef_invoice(&inbox, "R1").await;
    let second = add_ksef_invoice(&inbox, "R1").await;
    assert_eq!(first.id, second.id);
    assert_eq!(inbox.get_stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn test_empty_source_key_rejected() {
    let (_workflow, inbox, _bus) = workflow_with(Vec::new());
    let err = inbox
        .add(
            InvoiceSource::Scanner,
            Some(b"x".to_vec()),
            IntakeMetadata {
                source_key: Some("  ".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FakturError::Validation(_)));
}

#[tokio::test]
async fn test_scanner_manual_intake() {
    let (_workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = inbox
        .add(
            InvoiceSource::Scanner,
            Some(vec![0x89, b'P', b'N', b'G']),
            IntakeMetadata {
                file_name: Some("skan.png".to_string()),
                file_type: Some("image/png".to_string()),
                source_key: Some("scan:3a1f".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(invoice.source, InvoiceSource::Scanner);
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.file_size, Some(4));
}

// ============================================================================
// Processing pipeline
// ============================================================================

#[tokio::test]
async fn test_process_invoice_ksef_end_to_end() {
    let (workflow, inbox, bus) = workflow_with(Vec::new());
    let mut rx = bus.subscribe();

    let invoice = add_ksef_invoice(&inbox, "E2E").await;
    let processed = workflow.process_invoice(invoice.id).await.unwrap();

    assert_eq!(processed.status, InvoiceStatus::Described);
    assert!(processed.processed_at.is_some());
    assert_eq!(processed.contractor_nip.as_deref(), Some("1234567890"));
    assert_eq!(processed.contractor_name.as_deref(), Some("ACME"));
    assert_eq!(processed.invoice_number.as_deref(), Some("FV/2026/01/001"));
    assert_eq!(processed.gross_amount, Some(Decimal::new(123000, 2)));
    assert_eq!(processed.net_amount, Some(Decimal::new(100000, 2)));
    assert_eq!(processed.vat_amount, Some(Decimal::new(23000, 2)));
    let parsed = processed.parsed_data.as_ref().unwrap();
    assert_eq!(parsed.confidence, 100);
    // no history and no rules: the sentinel suggestion
    assert_eq!(processed.suggestion.as_ref().unwrap().confidence, 0);

    // observed status sequence is a valid state-machine path
    let mut statuses = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let InboxEvent::StatusChanged { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses, vec![InvoiceStatus::Ocr, InvoiceStatus::Described]);
}

#[tokio::test]
async fn test_ocr_failure_keeps_status_and_allows_retry() {
    let bus = EventBus::new();
    let store: Arc<dyn InvoiceStore> = Arc::new(MemoryStore::new());
    let inbox = Arc::new(Inbox::new(store, bus.clone()));
    let describe = Arc::new(AutoDescribe::new(Vec::new()));
    let config = OcrConfig::default();
    let broken = OcrPipeline::new(config.clone()).with_tesseract(
        TesseractOcr::new(config).with_binaries("faktur-missing-bin", "faktur-missing-bin"),
    );
    let workflow = Workflow::new(inbox.clone(), broken, describe, bus.clone());
    let mut rx = bus.subscribe();

    let invoice = inbox
        .add(
            InvoiceSource::Scanner,
            Some(vec![0x89, b'P', b'N', b'G']),
            IntakeMetadata {
                file_name: Some("skan.png".to_string()),
                file_type: Some("image/png".to_string()),
                source_key: Some("scan:retry".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // first attempt fails; the record stays in `ocr`
    workflow.process_invoice(invoice.id).await.unwrap_err();
    let stuck = inbox.get_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, InvoiceStatus::Ocr);
    let kinds: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.kind())
        .collect();
    assert!(kinds.iter().any(|k| k == "ocr:error"), "kinds: {:?}", kinds);

    // reconfigure to the mock provider and retry in place
    workflow
        .configure_ocr(OcrConfig {
            provider: OcrProvider::ExternalApi,
            external_url: Some("mock://ocr".to_string()),
            mock_text: Some("NIP: 1234567890 Razem 246,00 PLN".to_string()),
            ..Default::default()
        })
        .await;
    let processed = workflow.process_invoice(invoice.id).await.unwrap();
    assert_eq!(processed.status, InvoiceStatus::Described);
    assert_eq!(processed.contractor_nip.as_deref(), Some("1234567890"));
}

#[tokio::test]
async fn test_zero_byte_file_skips_ocr() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = inbox
        .add(
            InvoiceSource::Storage,
            Some(Vec::new()),
            IntakeMetadata {
                file_name: Some("pusty.pdf".to_string()),
                source_key: Some("local:/pusty.pdf:1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let processed = workflow.process_invoice(invoice.id).await.unwrap();
    assert_eq!(processed.status, InvoiceStatus::Described);
    let parsed = processed.parsed_data.as_ref().unwrap();
    assert_eq!(parsed.confidence, 0);
    assert!(parsed.note.as_deref().unwrap().starts_with("No file content"));
}

// ============================================================================
// State machine
// ============================================================================

#[tokio::test]
async fn test_approve_records_history_and_suggests_next_time() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());

    let invoice = add_ksef_invoice(&inbox, "H1").await;
    workflow.process_invoice(invoice.id).await.unwrap();
    let approved = workflow
        .approve_invoice(
            invoice.id,
            InvoicePatch {
                category: Some(Some("telekomunikacja".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(approved.status, InvoiceStatus::Approved);
    assert!(approved.approved_at.is_some());

    // the same contractor now gets a history suggestion
    let next = add_ksef_invoice(&inbox, "H2").await;
    let processed = workflow.process_invoice(next.id).await.unwrap();
    let suggestion = processed.suggestion.unwrap();
    assert_eq!(suggestion.category.as_deref(), Some("telekomunikacja"));
    assert_eq!(suggestion.based_on, 1);
}

#[tokio::test]
async fn test_approve_straight_from_pending() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = add_ksef_invoice(&inbox, "P1").await;
    let approved = workflow
        .approve_invoice(invoice.id, InvoicePatch::default())
        .await
        .unwrap();
    assert_eq!(approved.status, InvoiceStatus::Approved);
}

#[tokio::test]
async fn test_reject_is_terminal() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = add_ksef_invoice(&inbox, "T1").await;

    let rejected = workflow
        .reject_invoice(invoice.id, Some("duplikat".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, InvoiceStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("duplikat"));

    // terminal: nothing moves out of rejected, and a failed approval with
    // overrides leaves the record completely untouched
    let err = workflow
        .approve_invoice(
            invoice.id,
            InvoicePatch {
                category: Some(Some("paliwo".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FakturError::Validation(_)));
    let after = inbox.get_invoice(invoice.id).await.unwrap().unwrap();
    assert_eq!(after, rejected);
    assert!(after.category.is_none());

    let err = workflow.process_invoice(invoice.id).await.unwrap_err();
    assert!(matches!(err, FakturError::Validation(_)));
}

#[tokio::test]
async fn test_booked_after_approved() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = add_ksef_invoice(&inbox, "B1").await;
    workflow
        .approve_invoice(invoice.id, InvoicePatch::default())
        .await
        .unwrap();
    let booked = workflow.mark_booked(invoice.id).await.unwrap();
    assert_eq!(booked.status, InvoiceStatus::Booked);
    assert!(booked.booked_at.is_some());

    // booking before approval is invalid
    let other = add_ksef_invoice(&inbox, "B2").await;
    let err = workflow.mark_booked(other.id).await.unwrap_err();
    assert!(matches!(err, FakturError::Validation(_)));
}

#[tokio::test]
async fn test_label_assignment_normalizes() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let invoice = add_ksef_invoice(&inbox, "L1").await;
    let updated = workflow
        .assign_invoice_labels(
            invoice.id,
            vec!["a".to_string(), "".to_string(), "b".to_string(), "a".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(updated.label_ids, vec!["a", "b"]);
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test]
async fn test_export_approved_kpir_csv() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());

    for reference in ["X1", "X2"] {
        let invoice = add_ksef_invoice(&inbox, reference).await;
        workflow.process_invoice(invoice.id).await.unwrap();
        workflow
            .approve_invoice(invoice.id, InvoicePatch::default())
            .await
            .unwrap();
    }

    let file = workflow
        .export_approved("kpir_csv", &ExportOptions::default())
        .await
        .unwrap();
    let text = String::from_utf8(file.content).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("lp;data_zdarzenia;nr_ksef;"));
    assert!(lines[1].starts_with("1;"));
    assert!(lines[2].starts_with("2;"));

    let err = workflow
        .export_approved("paper_tape", &ExportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FakturError::Validation(_)));
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_purge_empty_removes_stale_pending() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());

    inbox
        .add(InvoiceSource::Scanner, None, IntakeMetadata::default())
        .await
        .unwrap();
    let kept = add_ksef_invoice(&inbox, "K1").await;
    workflow.process_invoice(kept.id).await.unwrap();

    assert_eq!(inbox.purge_empty().await.unwrap(), 1);
    let stats = inbox.get_stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_source.get("ksef"), Some(&1));
}

#[tokio::test]
async fn test_stats_by_status_and_source() {
    let (workflow, inbox, _bus) = workflow_with(Vec::new());
    let a = add_ksef_invoice(&inbox, "S1").await;
    add_ksef_invoice(&inbox, "S2").await;
    workflow.process_invoice(a.id).await.unwrap();

    let stats = inbox.get_stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("described"), Some(&1));
    assert_eq!(stats.by_status.get("pending"), Some(&1));
    assert_eq!(stats.by_source.get("ksef"), Some(&2));
}

// ============================================================================
// Suggestion rules through the pipeline
// ============================================================================

#[tokio::test]
async fn test_rule_suggestion_applied_during_processing() {
    let (workflow, inbox, _bus) = workflow_with(vec![fuel_rule()]);
    let invoice = inbox
        .add(
            InvoiceSource::Scanner,
            Some(KSEF_XML.as_bytes().to_vec()),
            IntakeMetadata {
                file_name: Some("doc.xml".to_string()),
                source_key: Some("scan:rule".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // seed a description the keyword rule can match
    inbox
        .update_invoice(
            invoice.id,
            InvoicePatch {
                description: Some(Some("Tankowanie paliwa".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let processed = workflow.process_invoice(invoice.id).await.unwrap();
    let suggestion = processed.suggestion.unwrap();
    assert_eq!(suggestion.category.as_deref(), Some("paliwo"));
    assert_eq!(suggestion.confidence, 90);
    assert_eq!(suggestion.rule_name.as_deref(), Some("fuel"));
}

// ============================================================================
// App lifetime and persistence
// ============================================================================

#[tokio::test]
async fn test_app_persists_history_after_approval() {
    let store = Arc::new(MemoryStore::new());
    let app = App::build(AppConfig::default(), store.clone(), None)
        .await
        .unwrap();

    let invoice = app
        .workflow()
        .inbox()
        .add_invoice(
            InvoiceSource::Ksef,
            Some(KSEF_XML.as_bytes().to_vec()),
            IntakeMetadata {
                source_key: Some("ksef:APP1".to_string()),
                file_type: Some("application/xml".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    app.workflow().process_invoice(invoice.id).await.unwrap();
    app.workflow()
        .approve_invoice(
            invoice.id,
            InvoicePatch {
                category: Some(Some("biuro".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // the 1-second debounce coalesces, then writes the settings document
    tokio::time::sleep(std::time::Duration::from_millis(1600)).await;
    let settings = store.get_settings().await.unwrap().unwrap();
    let history = settings.get("contractorHistory").unwrap();
    assert!(history.get("1234567890").is_some());

    app.shutdown().await;
}

#[tokio::test]
async fn test_app_shutdown_flushes_settings() {
    let store = Arc::new(MemoryStore::new());
    let app = App::build(AppConfig::default(), store.clone(), None)
        .await
        .unwrap();
    app.start();
    app.shutdown().await;

    // even without any event the final flush writes the document
    let settings = store.get_settings().await.unwrap().unwrap();
    assert!(settings.get("syncState").is_some());
}
