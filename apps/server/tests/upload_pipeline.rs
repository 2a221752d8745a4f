//! End-to-end upload tests: multipart intake, background processing, and the
//! read paths that report on the result.

mod support;

use axum::http::StatusCode;
use serde_json::json;

use pricebot_store::{history, products, vendors};
use support::{get, send, spawn_app, test_config, upload_request, wait_for_job};

const HAPPY_CSV: &str = "\
MODEL/SKU,DESCRIPTION,PRICE,QTY,CONDITION\n\
A1,iPhone 11 64GB Black,485.00,150,A/A-\n\
A2,iPhone 12 128GB,600,10,New\n";

#[tokio::test]
async fn spreadsheet_happy_path() {
    let app = spawn_app(test_config()).await;

    let (status, body) = send(
        &app.router,
        upload_request("prices.csv", HAPPY_CSV.as_bytes(), Some("Acme"), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let document_id = body["document_id"].as_str().unwrap().to_string();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&app.router, &job_id).await;
    assert_eq!(job["status"], "succeeded", "{job}");
    assert_eq!(job["summary"]["offers"], 2);
    assert_eq!(job["summary"]["warnings"], 0);

    // Document is terminal and carries its offers.
    let (status, body) = send(&app.router, get(&format!("/documents/{document_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["document"]["status"], "processed");
    assert_eq!(body["offers"].as_array().unwrap().len(), 2);

    // Vendor exists with both offers; two products; one open span each.
    let (_, vendors_body) = send(&app.router, get("/vendors")).await;
    let vendor = &vendors_body["vendors"][0];
    assert_eq!(vendor["name"], "Acme");
    let vendor_id = vendor["id"].as_str().unwrap();

    let (_, offers_body) = send(
        &app.router,
        get(&format!("/offers?vendor_id={vendor_id}")),
    )
    .await;
    assert_eq!(offers_body["offers"].as_array().unwrap().len(), 2);

    let (_, products_body) = send(&app.router, get("/products")).await;
    assert_eq!(products_body["total"], 2);

    let prices: Vec<&str> = offers_body["offers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|offer| offer["price"].as_str().unwrap())
        .collect();
    assert!(prices.contains(&"485.00"));
    assert!(prices.contains(&"600"));

    for product in products_body["products"].as_array().unwrap() {
        let product_id = product["id"].as_str().unwrap();
        let (status, history_body) = send(
            &app.router,
            get(&format!("/price-history/product/{product_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let spans = history_body["spans"].as_array().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0]["valid_to"].is_null());
    }
}

#[tokio::test]
async fn malformed_rows_are_warnings_not_failures() {
    let app = spawn_app(test_config()).await;
    let csv = "\
DESCRIPTION,PRICE\n\
iPhone 11,485.00\n\
,600\n\
Pixel 9,call us\n\
iPad Air,250\n";

    let (status, body) = send(
        &app.router,
        upload_request("mixed.csv", csv.as_bytes(), Some("Acme"), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "succeeded");
    assert_eq!(job["summary"]["offers"], 2);
    assert_eq!(job["summary"]["warnings"], 2);

    let document_id = body["document_id"].as_str().unwrap();
    let (_, offers_body) = send(
        &app.router,
        get(&format!("/offers?document_id={document_id}")),
    )
    .await;
    assert_eq!(offers_body["offers"].as_array().unwrap().len(), 2);

    let (_, doc_body) = send(&app.router, get(&format!("/documents/{document_id}"))).await;
    assert_eq!(doc_body["document"]["status"], "processed_with_warnings");
}

#[tokio::test]
async fn unknown_extension_is_rejected_up_front() {
    let app = spawn_app(test_config()).await;
    let (status, body) = send(
        &app.router,
        upload_request("report.docx", b"whatever", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsupported_file_type");

    let (status, _) = send(&app.router, upload_request("empty.csv", b"", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn whatsapp_transcript_upload_attributes_senders() {
    let app = spawn_app(test_config()).await;
    let transcript = "\
[12/01/2025, 10:31:22] Ana Phones: iPhone 15 $900\n\
[12/01/2025, 10:32:05] Beto Mayorista: Pixel 9 $700 x 20\n";

    let (status, body) = send(
        &app.router,
        upload_request("chat.txt", transcript.as_bytes(), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job = wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;
    assert_eq!(job["status"], "succeeded", "{job}");
    assert_eq!(job["summary"]["offers"], 2);

    // Senders became vendors because no vendor was declared.
    let names: Vec<String> = app
        .state
        .store
        .with_conn(|conn| {
            let (rows, _) = vendors::list(conn, 10, 0)?;
            Ok(rows.into_iter().map(|v| v.name).collect())
        })
        .await
        .unwrap();
    assert!(names.contains(&"Ana Phones".to_string()));
    assert!(names.contains(&"Beto Mayorista".to_string()));
}

#[tokio::test]
async fn declared_vendor_overrides_transcript_senders() {
    let app = spawn_app(test_config()).await;
    let transcript = "[12/01/2025, 10:31:22] Ana Phones: iPhone 15 $900\n";
    let (_, body) = send(
        &app.router,
        upload_request("chat.txt", transcript.as_bytes(), Some("Acme"), None),
    )
    .await;
    wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;

    let names: Vec<String> = app
        .state
        .store
        .with_conn(|conn| {
            let (rows, _) = vendors::list(conn, 10, 0)?;
            Ok(rows.into_iter().map(|v| v.name).collect())
        })
        .await
        .unwrap();
    assert_eq!(names, vec!["Acme".to_string()]);
}

#[tokio::test]
async fn out_of_order_uploads_materialize_correct_spans() {
    let app = spawn_app(test_config()).await;

    // Three uploads for the same product/vendor with explicit observation
    // order 10th -> 20th -> 15th, exercised through the real pipeline by
    // ingesting directly through the service with fixed capture times.
    let (product_id, vendor_id) = app
        .state
        .store
        .with_conn(|conn| {
            let now = pricebot_core::timefmt::now();
            let (vendor, _) = vendors::get_or_create(conn, "Acme", now)?;
            let product = products::new_product("iPhone 11 64GB", now);
            products::insert(conn, &product)?;
            Ok((product.id, vendor.id))
        })
        .await
        .unwrap();

    for (day, price) in [(10, 100i64), (20, 120), (15, 110)] {
        let captured =
            pricebot_core::timefmt::parse_wire(&format!("2025-01-{day:02}T00:00:00Z")).unwrap();
        let mut row = pricebot_core::RawOffer::new(
            "iPhone 11 64GB",
            rust_decimal::Decimal::new(price, 0),
            json!({}),
        );
        row.captured_at = Some(captured);
        app.state
            .ingestion
            .ingest(
                vec![row],
                pricebot_ingest::IngestTarget {
                    declared_vendor_id: Some(vendor_id),
                    default_currency: "USD".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let spans = app
        .state
        .store
        .with_conn(move |conn| history::for_pair(conn, product_id, vendor_id))
        .await
        .unwrap();
    assert_eq!(spans.len(), 3);
    let expect = |day: u32| {
        pricebot_core::timefmt::parse_wire(&format!("2025-01-{day:02}T00:00:00Z")).unwrap()
    };
    assert_eq!(spans[0].valid_from, expect(10));
    assert_eq!(spans[0].valid_to, Some(expect(15)));
    assert_eq!(spans[0].price, rust_decimal::Decimal::new(100, 0));
    assert_eq!(spans[1].valid_from, expect(15));
    assert_eq!(spans[1].valid_to, Some(expect(20)));
    assert_eq!(spans[1].price, rust_decimal::Decimal::new(110, 0));
    assert_eq!(spans[2].valid_from, expect(20));
    assert_eq!(spans[2].valid_to, None);
    assert_eq!(spans[2].price, rust_decimal::Decimal::new(120, 0));
}

#[tokio::test]
async fn repeat_upload_reuses_products() {
    let app = spawn_app(test_config()).await;
    let first = "DESCRIPTION,PRICE\niPhone 11 64GB Black,485.00\n";
    let (_, body) = send(
        &app.router,
        upload_request("day1.csv", first.as_bytes(), Some("Acme"), None),
    )
    .await;
    wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;

    let second = "DESCRIPTION,PRICE\niPhone 11 64GB Black,470.00\n";
    let (_, body) = send(
        &app.router,
        upload_request("day2.csv", second.as_bytes(), Some("Acme"), None),
    )
    .await;
    wait_for_job(&app.router, body["job_id"].as_str().unwrap()).await;

    let (_, products_body) = send(&app.router, get("/products")).await;
    assert_eq!(products_body["total"], 1, "{products_body}");
}

#[tokio::test]
async fn template_endpoint_matches_the_recognized_vocabulary() {
    let app = spawn_app(test_config()).await;
    let (status, body) = send(&app.router, get("/documents/templates/vendor-price")).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.starts_with("MODEL/SKU,DESCRIPTION,PRICE,QTY,CONDITION"));
}

#[tokio::test]
async fn job_status_for_unknown_id_is_404() {
    let app = spawn_app(test_config()).await;
    let (status, body) = send(
        &app.router,
        get(&format!("/documents/jobs/{}", uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}
