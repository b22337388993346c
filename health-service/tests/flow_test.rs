//! End-to-end flows against a real Postgres at `DATABASE_URL`.
//! Run with `cargo test -- --ignored` once the database is up.

mod common;

use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};
use common::{assert_error, body_json, body_text, TestApp};
use health_service::services::providers::mock::MockChatProvider;
use health_service::services::TokenKind;
use health_service::utils::{hash_password, Password};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n";

const REPORT_TEXT: &str = "LABORATORIO CENTRAL\nPaciente: Ana María\n\
                           Glucosa en ayunas 130 mg/dL (70 - 100)\n";

const GLUCOSE_REPLY: &str = r#"```json
[{"biomarker_code":"GLU","biomarker_name":"Glucosa","value":130,"unit":"mg/dL",
  "reference_range_low":70,"reference_range_high":100,"confidence":0.95}]
```"#;

fn unique_email() -> String {
    format!("user-{}@example.com", Uuid::new_v4())
}

async fn register(app: &TestApp, email: &str) -> (String, String) {
    let response = app
        .post_json(
            "/api/v1/auth/register",
            json!({ "email": email, "password": "s3cure-pass", "full_name": "  Ana   María " }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "bearer");
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["refresh_token"].as_str().unwrap().to_string(),
    )
}

/// Poll the result until a worker has moved it out of `pending`/`processing`.
async fn wait_for_result(app: &TestApp, access: &str, result_id: &str) -> Value {
    for _ in 0..100 {
        let detail = body_json(
            app.get(&format!("/api/v1/lab/results/{}", result_id), Some(access))
                .await,
        )
        .await;
        match detail["processing_status"].as_str() {
            Some("pending") | Some("processing") => {
                tokio::time::sleep(Duration::from_millis(50)).await
            }
            _ => return detail,
        }
    }
    panic!("lab result {} was not processed in time", result_id);
}

async fn upload_pdf(app: &TestApp, access: &str) -> String {
    let uploaded = app
        .post_file("/api/v1/lab/results/upload", "resultados.pdf", PDF_BYTES, access)
        .await;
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    body_json(uploaded).await["id"].as_str().unwrap().to_string()
}

async fn user_id(app: &TestApp, access: &str) -> Uuid {
    let me = body_json(app.get("/api/v1/users/me", Some(access)).await).await;
    me["id"].as_str().unwrap().parse().unwrap()
}

async fn seed_panel(app: &TestApp) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO lab_panels (id, name, biomarkers, price_cents) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind("Panel Metabólico")
    .bind(json!(["GLU", "HBA1C", "TSH"]))
    .bind(4900)
    .execute(app.state.db.pool())
    .await
    .unwrap();
    id
}

async fn seed_partner(app: &TestApp, password: &str) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let prefix = format!("T{}", &id.simple().to_string()[..5].to_uppercase());
    let hash = hash_password(&Password::new(password.to_string())).unwrap();
    sqlx::query(
        "INSERT INTO lab_partners (id, name, code_prefix, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind("Laboratorio Central")
    .bind(&prefix)
    .bind(hash.as_str())
    .execute(app.state.db.pool())
    .await
    .unwrap();
    (id, prefix)
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn register_login_and_profile_flow() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["ok"])).await;
    let email = unique_email();
    let (access, refresh) = register(&app, &email).await;

    let duplicate = app
        .post_json(
            "/api/v1/auth/register",
            json!({ "email": email.to_uppercase(), "password": "another-pass", "full_name": "Otra" }),
            None,
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let me = body_json(app.get("/api/v1/users/me", Some(&access)).await).await;
    assert_eq!(me["email"], email);
    assert_eq!(me["full_name"], "Ana María");
    assert_eq!(me["onboarding_completed"], false);

    let updated = app
        .send_json(
            "PATCH",
            "/api/v1/users/me",
            json!({ "weight_kg": 61.5, "language": "en" }),
            Some(&access),
        )
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = body_json(updated).await;
    assert_eq!(updated["weight_kg"], 61.5);
    assert_eq!(updated["language"], "en");
    assert_eq!(updated["full_name"], "Ana María");

    let profile = app
        .send_json(
            "PUT",
            "/api/v1/users/me/health-profile",
            json!({ "medical_conditions": ["hipotiroidismo"] }),
            Some(&access),
        )
        .await;
    assert_eq!(profile.status(), StatusCode::OK);

    let wrong = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": email, "password": "wrong-password" }),
            None,
        )
        .await;
    assert_error(wrong, StatusCode::UNAUTHORIZED, "Invalid credentials").await;

    let login = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": email, "password": "s3cure-pass" }),
            None,
        )
        .await;
    assert_eq!(login.status(), StatusCode::OK);

    let refreshed = app
        .post_json("/api/v1/auth/refresh", json!({ "refresh_token": refresh }), None)
        .await;
    assert_eq!(refreshed.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn unknown_subject_is_rejected() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["ok"])).await;
    let token = app.token(Uuid::new_v4(), TokenKind::Access);

    let response = app.get("/api/v1/users/me", Some(&token)).await;

    assert_error(response, StatusCode::UNAUTHORIZED, "User not found").await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn coach_streams_and_persists_reply() {
    let app =
        TestApp::spawn_migrated(MockChatProvider::new(&["Hola Ana.", "\nBebe agua."])).await;
    let (access, _) = register(&app, &unique_email()).await;

    let created = app
        .post_json("/api/v1/conversations", json!({}), Some(&access))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let conversation = body_json(created).await;
    assert_eq!(conversation["conversation_type"], "general");
    assert!(conversation["title"].is_null());
    let id = conversation["id"].as_str().unwrap().to_string();

    let stream = app
        .post_json(
            &format!("/api/v1/conversations/{}/messages", id),
            json!({ "content": "¿Cómo mejoro mi sueño?" }),
            Some(&access),
        )
        .await;
    assert_eq!(stream.status(), StatusCode::OK);
    assert_eq!(stream.headers()["content-type"], "text/event-stream");
    let sse = body_text(stream).await;
    assert!(sse.contains("data: Hola Ana.\n\n"));
    assert!(sse.contains("data: \ndata: Bebe agua.\n\n"));
    assert!(sse.ends_with("data: [DONE]\n\n"));

    let messages = body_json(
        app.get(&format!("/api/v1/conversations/{}/messages", id), Some(&access))
            .await,
    )
    .await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Hola Ana.\nBebe agua.");

    let conversations = body_json(app.get("/api/v1/conversations", Some(&access)).await).await;
    assert_eq!(conversations[0]["title"], "¿Cómo mejoro mi sueño?");

    let (stranger, _) = register(&app, &unique_email()).await;
    let hidden = app
        .get(&format!("/api/v1/conversations/{}/messages", id), Some(&stranger))
        .await;
    assert_error(hidden, StatusCode::NOT_FOUND, "Conversation not found").await;
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn coach_provider_failure_emits_error_frame_without_persisting() {
    let app = TestApp::spawn_migrated(MockChatProvider::failing_after(&["Parcial"], 1)).await;
    let (access, _) = register(&app, &unique_email()).await;

    let conversation = body_json(
        app.post_json("/api/v1/conversations", json!({ "title": "Sueño" }), Some(&access))
            .await,
    )
    .await;
    let id = conversation["id"].as_str().unwrap().to_string();

    let sse = body_text(
        app.post_json(
            &format!("/api/v1/conversations/{}/messages", id),
            json!({ "content": "Hola" }),
            Some(&access),
        )
        .await,
    )
    .await;
    assert!(sse.contains("event: error"));
    assert!(!sse.contains("[DONE]"));

    let messages = body_json(
        app.get(&format!("/api/v1/conversations/{}/messages", id), Some(&access))
            .await,
    )
    .await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn lab_orders_and_uploads() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["[]"])).await;
    let (access, _) = register(&app, &unique_email()).await;
    let panel_id = seed_panel(&app).await;

    let missing = app
        .post_json(
            "/api/v1/lab/orders",
            json!({ "panel_id": Uuid::new_v4() }),
            Some(&access),
        )
        .await;
    assert_error(missing, StatusCode::NOT_FOUND, "Panel not found").await;

    let order = app
        .post_json("/api/v1/lab/orders", json!({ "panel_id": panel_id }), Some(&access))
        .await;
    assert_eq!(order.status(), StatusCode::CREATED);
    let order = body_json(order).await;
    let code = order["order_code"].as_str().unwrap();
    assert!(code.starts_with("NOV-"));
    assert_eq!(code.len(), 10);
    assert_eq!(order["status"], "pending");

    let rejected = app
        .post_file("/api/v1/lab/results/upload", "foto.png", b"png", &access)
        .await;
    assert_error(rejected, StatusCode::BAD_REQUEST, "Only PDF files accepted").await;

    let uploaded = app
        .post_file("/api/v1/lab/results/upload", "Resultados.PDF", PDF_BYTES, &access)
        .await;
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let uploaded = body_json(uploaded).await;
    assert_eq!(uploaded["processing_status"], "pending");
    let result_id = uploaded["id"].as_str().unwrap().to_string();

    let detail = body_json(
        app.get(&format!("/api/v1/lab/results/{}", result_id), Some(&access))
            .await,
    )
    .await;
    assert_eq!(detail["biomarker_values"], json!([]));

    let url = body_json(
        app.get(&format!("/api/v1/lab/results/{}/pdf-url", result_id), Some(&access))
            .await,
    )
    .await;
    assert!(url["url"].as_str().unwrap().starts_with("file://"));

    let (stranger, _) = register(&app, &unique_email()).await;
    let hidden = app
        .get(&format!("/api/v1/lab/results/{}", result_id), Some(&stranger))
        .await;
    assert_error(hidden, StatusCode::NOT_FOUND, "Result not found").await;

    let imported = app
        .post_json("/api/v1/lab/import/gmail", json!({}), Some(&access))
        .await;
    assert_eq!(imported.status(), StatusCode::OK);
    assert_eq!(body_json(imported).await, json!([]));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn partner_portal_flow() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["[]"])).await;
    let (access, _) = register(&app, &unique_email()).await;
    let panel_id = seed_panel(&app).await;
    let (partner_id, prefix) = seed_partner(&app, "lab-password").await;

    let order = body_json(
        app.post_json(
            "/api/v1/lab/orders",
            json!({ "panel_id": panel_id, "lab_partner_id": partner_id }),
            Some(&access),
        )
        .await,
    )
    .await;
    let order_code = order["order_code"].as_str().unwrap().to_string();
    let order_id = order["id"].as_str().unwrap().to_string();
    assert!(order_code.starts_with(&format!("{}-", prefix)));

    let bad_login = app
        .post_json(
            "/api/v1/portal/auth/login",
            json!({ "code_prefix": prefix, "password": "nope" }),
            None,
        )
        .await;
    assert_error(bad_login, StatusCode::UNAUTHORIZED, "Invalid credentials").await;

    let login = body_json(
        app.post_json(
            "/api/v1/portal/auth/login",
            json!({ "code_prefix": prefix, "password": "lab-password" }),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(login["partner_name"], "Laboratorio Central");
    let portal = login["access_token"].as_str().unwrap().to_string();

    let user_route = app.get("/api/v1/users/me", Some(&portal)).await;
    assert_eq!(user_route.status(), StatusCode::UNAUTHORIZED);

    let orders = body_json(
        app.get(&format!("/api/v1/portal/orders?code={}", order_code), Some(&portal))
            .await,
    )
    .await;
    assert_eq!(orders.as_array().unwrap().len(), 1);
    assert_eq!(orders[0]["panel_name"], "Panel Metabólico");
    assert_eq!(orders[0]["user_name"], "Ana María");

    let not_pdf = app
        .post_file(
            &format!("/api/v1/portal/orders/{}/results", order_id),
            "resultado.docx",
            b"doc",
            &portal,
        )
        .await;
    assert_error(not_pdf, StatusCode::BAD_REQUEST, "Only PDF files accepted").await;

    let foreign = app
        .post_file(
            &format!("/api/v1/portal/orders/{}/results", Uuid::new_v4()),
            "resultado.pdf",
            PDF_BYTES,
            &portal,
        )
        .await;
    assert_error(foreign, StatusCode::NOT_FOUND, "Order not found").await;

    let uploaded = app
        .post_file(
            &format!("/api/v1/portal/orders/{}/results", order_id),
            "resultado.pdf",
            PDF_BYTES,
            &portal,
        )
        .await;
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let uploaded = body_json(uploaded).await;
    assert_eq!(uploaded["status"], "pending");
    let result_id = uploaded["result_id"].as_str().unwrap().to_string();

    let orders = body_json(app.get("/api/v1/lab/orders", Some(&access)).await).await;
    assert_eq!(orders[0]["status"], "completed");

    let review = app
        .post_json(
            &format!("/api/v1/portal/results/{}/review", result_id),
            json!({ "reviewer": "Dra. Pérez" }),
            Some(&portal),
        )
        .await;
    assert_eq!(review.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn worker_verifies_confident_extraction() {
    let app = TestApp::spawn_with_pipeline(MockChatProvider::new(&[GLUCOSE_REPLY]), REPORT_TEXT)
        .await;
    let (access, _) = register(&app, &unique_email()).await;

    let result_id = upload_pdf(&app, &access).await;
    let detail = wait_for_result(&app, &access, &result_id).await;

    assert_eq!(detail["processing_status"], "verified");
    assert_eq!(detail["confidence_score"], 0.95);
    let values = detail["biomarker_values"].as_array().unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["biomarker_code"], "GLU");
    assert_eq!(values[0]["value"], 130.0);
    assert_eq!(values[0]["status"], "flagged");
    assert_eq!(values[0]["date"], &detail["created_at"].as_str().unwrap()[..10]);

    let history = body_json(
        app.get("/api/v1/lab/biomarkers/GLU/history", Some(&access))
            .await,
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["status"], "flagged");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn worker_marks_result_failed_when_extraction_call_fails() {
    let app =
        TestApp::spawn_with_pipeline(MockChatProvider::failing_after(&[], 0), REPORT_TEXT).await;
    let (access, _) = register(&app, &unique_email()).await;

    let result_id = upload_pdf(&app, &access).await;
    let detail = wait_for_result(&app, &access, &result_id).await;

    assert_eq!(detail["processing_status"], "failed");
    assert_eq!(detail["biomarker_values"], json!([]));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn worker_fails_scanned_pdf_without_ocr_text() {
    let app = TestApp::spawn_with_pipeline(MockChatProvider::new(&[GLUCOSE_REPLY]), "  ").await;
    let (access, _) = register(&app, &unique_email()).await;

    let result_id = upload_pdf(&app, &access).await;
    let detail = wait_for_result(&app, &access, &result_id).await;

    assert_eq!(detail["processing_status"], "failed");
    assert_eq!(detail["confidence_score"], 0.0);
    assert_eq!(detail["biomarker_values"], json!([]));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn partner_reviews_result_with_missing_panel_biomarkers() {
    let app = TestApp::spawn_with_pipeline(MockChatProvider::new(&[GLUCOSE_REPLY]), REPORT_TEXT)
        .await;
    let (access, _) = register(&app, &unique_email()).await;
    let panel_id = seed_panel(&app).await;
    let (partner_id, prefix) = seed_partner(&app, "lab-password").await;

    let order = body_json(
        app.post_json(
            "/api/v1/lab/orders",
            json!({ "panel_id": panel_id, "lab_partner_id": partner_id }),
            Some(&access),
        )
        .await,
    )
    .await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let login = body_json(
        app.post_json(
            "/api/v1/portal/auth/login",
            json!({ "code_prefix": prefix, "password": "lab-password" }),
            None,
        )
        .await,
    )
    .await;
    let portal = login["access_token"].as_str().unwrap().to_string();

    let uploaded = body_json(
        app.post_file(
            &format!("/api/v1/portal/orders/{}/results", order_id),
            "resultado.pdf",
            PDF_BYTES,
            &portal,
        )
        .await,
    )
    .await;
    let result_id = uploaded["result_id"].as_str().unwrap().to_string();

    // One of three panel biomarkers found: 0.95 * (1 - 0.3 * 2/3).
    let detail = wait_for_result(&app, &access, &result_id).await;
    assert_eq!(detail["processing_status"], "review_needed");
    let confidence = detail["confidence_score"].as_f64().unwrap();
    assert!((confidence - 0.76).abs() < 1e-9);
    assert!(detail["reviewed_by"].is_null());

    let review_path = format!("/api/v1/portal/results/{}/review", result_id);

    let blank = app
        .post_json(&review_path, json!({ "reviewer": "   " }), Some(&portal))
        .await;
    assert_eq!(blank.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let reviewed = app
        .post_json(&review_path, json!({ "reviewer": " Dra. Pérez " }), Some(&portal))
        .await;
    assert_eq!(reviewed.status(), StatusCode::OK);
    let reviewed = body_json(reviewed).await;
    assert_eq!(reviewed["processing_status"], "verified");
    assert_eq!(reviewed["reviewed_by"], "Dra. Pérez");
    assert!(reviewed["reviewed_at"].is_string());
    assert_eq!(reviewed["biomarker_values"].as_array().unwrap().len(), 1);

    let again = app
        .post_json(&review_path, json!({ "reviewer": "Dra. Pérez" }), Some(&portal))
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let user_view = wait_for_result(&app, &access, &result_id).await;
    assert_eq!(user_view["processing_status"], "verified");
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn garmin_webhook_upserts_points_and_data_window() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["ok"])).await;
    let (access, _) = register(&app, &unique_email()).await;
    let user_id = user_id(&app, &access).await;
    let garmin_id = format!("g-{}", Uuid::new_v4().simple());

    app.state
        .db
        .upsert_garmin_connection(
            user_id,
            &garmin_id,
            "access",
            "refresh",
            Utc::now() + ChronoDuration::hours(1),
        )
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let ten_days_ago = today - ChronoDuration::days(10);
    let yesterday_noon = (today - ChronoDuration::days(1))
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp();

    let first = app
        .post_json(
            "/api/v1/garmin/webhooks",
            json!({
                "dailies": [
                    { "userId": garmin_id, "calendarDate": today.to_string(), "steps": 1000 },
                    { "userId": garmin_id, "calendarDate": ten_days_ago.to_string(), "steps": 50 },
                    { "userId": "someone-else", "calendarDate": today.to_string(), "steps": 9 },
                    { "userId": garmin_id, "steps": 7 }
                ],
                "sleep": [
                    { "userId": garmin_id, "startTimeInSeconds": yesterday_noon, "durationInSeconds": 27000 }
                ],
                "epochs": [{ "userId": garmin_id }]
            }),
            None,
        )
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await, json!({ "status": "ok" }));

    let second = app
        .post_json(
            "/api/v1/garmin/webhooks",
            json!({ "dailies": [
                { "userId": garmin_id, "calendarDate": today.to_string(), "steps": 2500 }
            ] }),
            None,
        )
        .await;
    assert_eq!(second.status(), StatusCode::OK);

    let week = body_json(
        app.get("/api/v1/garmin/data?data_type=activity&days=7", Some(&access))
            .await,
    )
    .await;
    let week = week.as_array().unwrap();
    assert_eq!(week.len(), 1);
    assert_eq!(week[0]["date"], today.to_string());
    assert_eq!(week[0]["data"]["steps"], 2500);

    let nine = body_json(
        app.get("/api/v1/garmin/data?data_type=activity&days=9", Some(&access))
            .await,
    )
    .await;
    assert_eq!(nine.as_array().unwrap().len(), 1);

    let ten = body_json(
        app.get("/api/v1/garmin/data?data_type=activity&days=10", Some(&access))
            .await,
    )
    .await;
    let ten = ten.as_array().unwrap();
    assert_eq!(ten.len(), 2);
    assert_eq!(ten[0]["date"], today.to_string());
    assert_eq!(ten[1]["date"], ten_days_ago.to_string());

    let sleep = body_json(
        app.get("/api/v1/garmin/data?data_type=sleep", Some(&access))
            .await,
    )
    .await;
    assert_eq!(sleep.as_array().unwrap().len(), 1);
    assert_eq!(
        sleep[0]["date"],
        (today - ChronoDuration::days(1)).to_string()
    );

    let connection = body_json(app.get("/api/v1/garmin/connection", Some(&access)).await).await;
    assert_eq!(connection["garmin_user_id"], garmin_id);
    assert!(connection["last_sync_at"].is_string());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn garmin_state_is_bound_to_the_starting_user() {
    let app = TestApp::spawn_migrated(MockChatProvider::new(&["ok"])).await;
    let (alice, _) = register(&app, &unique_email()).await;
    let (bob, _) = register(&app, &unique_email()).await;

    let started = body_json(app.get("/api/v1/garmin/connect-url", Some(&alice)).await).await;
    let state = started["state"].as_str().unwrap().to_string();

    let stolen = app
        .post_json(
            "/api/v1/garmin/callback",
            json!({ "code": "abc", "state": state }),
            Some(&bob),
        )
        .await;
    assert_error(
        stolen,
        StatusCode::BAD_REQUEST,
        "Invalid or expired state parameter",
    )
    .await;

    let google = body_json(app.get("/api/v1/auth/google/url", None).await).await;
    let google_url = google["url"].as_str().unwrap();
    let google_state = google_url
        .split("state=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap();

    let crossed = app
        .post_json(
            "/api/v1/garmin/callback",
            json!({ "code": "abc", "state": format!("google:{}", google_state) }),
            Some(&alice),
        )
        .await;
    assert_error(
        crossed,
        StatusCode::BAD_REQUEST,
        "Invalid or expired state parameter",
    )
    .await;
}
