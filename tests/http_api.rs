
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Extension, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{TimeZone, Utc};
use invoice_ledger::{
    api,
    domain::models::{
        DocumentLocation, ExtractedFields, InvoiceKind, InvoiceRecord, InvoiceStatus, RawAmount,
    },
    infrastructure::{
        extraction::{ExtractionError, ExtractionService},
        state::AppState,
    },
};
use serde_json::{json, Value};
use tower::ServiceExt;

use test_harness::{memory_config, memory_state};

struct FixedExtraction;

#[async_trait]
impl ExtractionService for FixedExtraction {
    async fn extract(&self, _location: &DocumentLocation) -> Result<ExtractedFields, ExtractionError> {
        Ok(ExtractedFields {
            amount: Some(RawAmount::from("€80.00")),
            date: Some("03/02/2025".into()),
            vendor_name: Some("Bakery".into()),
            currency: None,
        })
    }
}

fn app() -> Result<(Router, Arc<AppState>)> {
    let state = memory_state(memory_config(), Arc::new(FixedExtraction))?;
    let router = api::build_router(Arc::clone(&state.config)).layer(Extension(Arc::clone(&state)));
    Ok((router, state))
}

fn completed(owner_id: &str, invoice_id: &str, kind: InvoiceKind, amount: &str, date: &str) -> InvoiceRecord {
    InvoiceRecord {
        owner_id: owner_id.into(),
        invoice_id: invoice_id.into(),
        status: InvoiceStatus::Completed,
        kind,
        category: "Office".into(),
        amount: RawAmount::from(amount),
        invoice_date: date.into(),
        uploaded_at: Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()),
        vendor_name: Some("Vendor".into()),
        currency: "ILS".into(),
        error_detail: None,
        file_name: "doc.pdf".into(),
        object_key: format!("{owner_id}/{invoice_id}_doc.pdf"),
        processed_at: Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 1, 0).unwrap()),
    }
}

async fn read_body(response: axum::response::Response) -> Result<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

#[tokio::test]
async fn report_for_unknown_owner_is_all_zero() -> Result<()> {
    let (app, _) = app()?;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/reports?ownerId=nobody")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&read_body(response).await?)?;
    assert_eq!(body["totalInvoices"], json!(0));
    assert_eq!(body["monthly"], json!({}));
    assert_eq!(body["byCategory"], json!({}));
    assert_eq!(body["summary"]["netProfit"].as_f64(), Some(0.0));
    assert_eq!(body["period"]["selector"], json!("all"));
    Ok(())
}

#[tokio::test]
async fn report_without_owner_is_a_validation_error() -> Result<()> {
    let (app, _) = app()?;

    let response = app
        .oneshot(Request::builder().uri("/api/reports").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_str(&read_body(response).await?)?;
    assert_eq!(body["errorKind"], json!("ValidationError"));
    Ok(())
}

#[tokio::test]
async fn monthly_buckets_are_most_recent_first() -> Result<()> {
    let (app, state) = app()?;
    for record in [
        completed("owner-7", "a", InvoiceKind::Expense, "40", "15/11/2024"),
        completed("owner-7", "b", InvoiceKind::Income, "500", "02/03/2025"),
        completed("owner-7", "c", InvoiceKind::Expense, "60", "20/03/2025"),
    ] {
        state.records.put(&record).await?;
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/reports?ownerId=owner-7&period=all")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let raw = read_body(response).await?;
    let march = raw.find("\"3/2025\"").expect("march bucket present");
    let november = raw.find("\"11/2024\"").expect("november bucket present");
    assert!(march < november, "monthly keys out of order: {raw}");

    let body: Value = serde_json::from_str(&raw)?;
    assert_eq!(body["totalInvoices"], json!(3));
    assert_eq!(body["monthly"]["3/2025"]["count"], json!(2));
    assert_eq!(body["summary"]["netProfit"].as_f64(), Some(400.0));
    assert_eq!(body["byCategory"]["Office"].as_f64(), Some(100.0));
    Ok(())
}

#[tokio::test]
async fn month_period_filters_the_report() -> Result<()> {
    let (app, state) = app()?;
    state
        .records
        .put(&completed("owner-8", "a", InvoiceKind::Expense, "40", "15/11/2024"))
        .await?;
    state
        .records
        .put(&completed("owner-8", "b", InvoiceKind::Expense, "60", "20/03/2025"))
        .await?;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/reports?ownerId=owner-8&period=2024-11")
                .body(Body::empty())?,
        )
        .await?;

    let body: Value = serde_json::from_str(&read_body(response).await?)?;
    assert_eq!(body["totalInvoices"], json!(1));
    assert_eq!(body["summary"]["totalExpense"].as_f64(), Some(40.0));
    assert_eq!(body["period"]["year"], json!(2024));
    assert_eq!(body["period"]["month"], json!(11));
    Ok(())
}

#[tokio::test]
async fn upload_endpoint_stores_and_processes_invoice() -> Result<()> {
    let (app, _) = app()?;
    let payload = json!({
        "ownerId": "owner-9",
        "fileName": "bakery.pdf",
        "kind": "EXPENSE",
        "category": "Food",
        "fileContent": STANDARD.encode(b"%PDF-1.4 bakery"),
        "contentType": "application/pdf"
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&read_body(response).await?)?;
    let invoice = &body["invoice"];
    assert_eq!(invoice["status"], json!("COMPLETED"));
    assert_eq!(invoice["currency"], json!("EUR"));
    assert_eq!(invoice["invoiceDate"], json!("03/02/2025"));
    assert_eq!(invoice["vendorName"], json!("Bakery"));
    Ok(())
}

#[tokio::test]
async fn upload_endpoint_rejects_invalid_base64() -> Result<()> {
    let (app, _) = app()?;
    let payload = json!({
        "ownerId": "owner-9",
        "fileName": "bakery.pdf",
        "fileContent": "%%% not base64 %%%"
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn failing_a_completed_invoice_returns_conflict() -> Result<()> {
    let (app, state) = app()?;
    state
        .records
        .put(&completed("owner-3", "done", InvoiceKind::Expense, "10", "01/01/2025"))
        .await?;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices/owner-3/done/failure")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"reason": "late"}).to_string()))?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = serde_json::from_str(&read_body(response).await?)?;
    assert_eq!(body["errorKind"], json!("ConflictError"));
    let stored = state.records.get("owner-3", "done").await?;
    assert_eq!(stored.status, InvoiceStatus::Completed);
    assert_eq!(stored.error_detail, None);
    Ok(())
}

#[tokio::test]
async fn unknown_routes_return_not_found() -> Result<()> {
    let (app, _) = app()?;

    let response = app
        .oneshot(Request::builder().uri("/api/nothing-here").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn malformed_request_bodies_use_the_error_shape() -> Result<()> {
    let (app, _) = app()?;

    let missing_file_name = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"ownerId": "owner-9", "fileContent": "JVBERg=="}).to_string(),
                ))?,
        )
        .await?;
    assert_eq!(missing_file_name.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_str(&read_body(missing_file_name).await?)?;
    assert_eq!(body["errorKind"], json!("ValidationError"));
    assert!(body["message"].as_str().is_some());

    let wrong_type = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices/owner-9/inv-1/failure")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"reason": 42}).to_string()))?,
        )
        .await?;
    assert_eq!(wrong_type.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_str(&read_body(wrong_type).await?)?;
    assert_eq!(body["errorKind"], json!("ValidationError"));

    let not_json = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/invoices/owner-9/inv-1/extraction")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))?,
        )
        .await?;
    assert_eq!(not_json.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = serde_json::from_str(&read_body(not_json).await?)?;
    assert_eq!(body["errorKind"], json!("ValidationError"));
    Ok(())
}
