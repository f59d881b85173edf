#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use fee_portal::api::{build_router, AppState};
use fee_portal::assistant::ERROR_REPLY;
use fee_portal::config::PortalConfig;
use fee_portal::{fees, setup_database};
use rusqlite::Connection;
use serde_json::{json, Value};
use tower::ServiceExt;

const PARENT_ID: &str = "8001015009087";

fn app() -> Router {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    fees::seed_school_fees(&conn).unwrap();
    build_router(AppState::new(conn, PortalConfig::default()))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn student(id_number: &str, first_name: &str, grade: &str) -> Value {
    json!({
        "id_number": id_number,
        "surname": "Johnson",
        "first_name": first_name,
        "date_of_birth": "2012-04-18",
        "gender": "F",
        "grade_applied_for": grade,
        "street_address": "12 Jacaranda Street",
        "city": "Pretoria",
        "state": "Gauteng",
        "postcode": "0181",
        "phone_number": "0821234567",
        "email": "parent1@gmail.com",
        "parent_id": PARENT_ID,
    })
}

/// Parent with Emma (Grade 10) and Lucas (Grade 7); returns their application ids
async fn register_family(app: &Router) -> Vec<String> {
    let (status, body) = call(
        app,
        "POST",
        "/api/parents/register",
        Some(json!({
            "full_name": "Sarah Johnson",
            "email": "sarah@gmail.com",
            "phone_number": "0821234567",
            "id_number": PARENT_ID,
            "password": "Secret#123",
            "street_address": "12 Jacaranda Street",
            "city": "Pretoria",
            "state": "Gauteng",
            "postcode": "0181",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["email"]["delivered"], true);

    let mut ids = Vec::new();
    for (id, name, grade) in [("0803155001081", "Emma", "Grade 10"), ("1102205001082", "Lucas", "Grade 7")] {
        let (status, body) = call(app, "POST", "/api/students/register", Some(student(id, name, grade))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        ids.push(body["data"]["application_id"].as_str().unwrap().to_string());
    }
    ids
}

#[tokio::test]
async fn test_health_uses_envelope() {
    let (status, body) = call(&app(), "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "data": "OK" }));
}

#[tokio::test]
async fn test_school_fee_by_grade() {
    let app = app();
    let uri = format!("/api/school-fees/{}", urlencoding::encode("Grade 10"));
    let (status, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["annual_fee"], 30000.0);

    let uri = format!("/api/school-fees/{}", urlencoding::encode("Grade 14"));
    let (status, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Grade R"));
}

#[tokio::test]
async fn test_plans_query() {
    let app = app();
    let (status, body) = call(&app, "GET", "/api/plans?annual_fee=96000&students=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let plans = body["data"].as_array().unwrap();
    assert_eq!(plans.len(), 7);
    assert_eq!(plans[0]["id"], "pay-monthly");
    assert_eq!(plans[0]["price"], 8000.0);

    let (status, _) = call(&app, "GET", "/api/plans?annual_fee=-5", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_parent_conflicts() {
    let app = app();
    register_family(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/parents/register",
        Some(json!({
            "full_name": "Sarah Johnson",
            "email": "other@gmail.com",
            "phone_number": "0821234567",
            "id_number": PARENT_ID,
            "password": "Secret#123",
            "street_address": "1 Main Road",
            "city": "Pretoria",
            "state": "Gauteng",
            "postcode": "0181",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn test_login_and_logout() {
    let app = app();
    register_family(&app).await;

    let (status, body) = call(&app, "POST", "/api/login/parent", Some(json!({ "id_number": PARENT_ID }))).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "POST",
        "/api/auth/login",
        Some(json!({ "email": "sarah@gmail.com", "password": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "POST", "/api/auth/logout", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_batch_update_reports_each_student() {
    let app = app();
    let ids = register_family(&app).await;

    let (status, body) = call(
        &app,
        "PUT",
        &format!("/api/parents/{}/students", PARENT_ID),
        Some(json!({
            "students": [
                { "application_id": ids[0], "city": "Polokwane" },
                { "application_id": ids[1], "phone_number": "12345" },
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updated"], json!([ids[0]]));
    assert_eq!(body["data"]["failed"][0]["id"], ids[1].as_str());

    let (_, body) = call(&app, "GET", &format!("/api/parents/{}/students", PARENT_ID), None).await;
    assert_eq!(body["data"][0]["city"], "Polokwane");
}

#[tokio::test]
async fn test_students_for_unknown_parent_is_404() {
    let (status, _) = call(&app(), "GET", "/api/students/parent/0000000000000", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_selected_plan_and_review() {
    let app = app();
    register_family(&app).await;

    let uri = format!("/api/parents/{}/selected-plan", PARENT_ID);
    let (status, _) = call(&app, "POST", &uri, Some(json!({ "selected_plan": "pay-once" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(body["data"]["selected_plan"], "pay-once");

    let (status, body) = call(&app, "GET", &format!("/api/parents/{}/review", PARENT_ID), None).await;
    assert_eq!(status, StatusCode::OK);
    // Emma 30000 * 0.95 + Lucas 26400 * 0.95
    assert_eq!(body["data"]["grand_total"], 53580.0);
    assert_eq!(body["data"]["complete"], true);

    let (status, _) = call(&app, "POST", &uri, Some(json!({ "selected_plan": "pay-whenever" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_declaration_requires_every_agreement() {
    let app = app();
    let ids = register_family(&app).await;

    let mut declaration = json!({
        "application_id": ids[0],
        "agree_truth": true,
        "agree_policies": true,
        "agree_financial": true,
        "agree_verification": true,
        "agree_data_processing": true,
        "agree_audit_storage": true,
        "agree_affordability_processing": false,
        "full_name": "Sarah Johnson",
        "city": "Pretoria",
    });

    let (status, body) = call(&app, "POST", "/api/declarations", Some(declaration.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "agree_affordability_processing");

    declaration["agree_affordability_processing"] = json!(true);
    let (status, _) = call(&app, "POST", "/api/declarations", Some(declaration)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", &format!("/api/declarations/{}", ids[0]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["full_name"], "Sarah Johnson");
}

#[tokio::test]
async fn test_forecast_csv_download() {
    let app = app();
    register_family(&app).await;

    let request = Request::builder()
        .uri(format!("/api/parents/{}/forecast.csv", PARENT_ID))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("Month,Standard Fees,Activity Fees,Total\n"));
}

#[tokio::test]
async fn test_assistant_without_key_apologises_and_keeps_history() {
    let app = app();
    register_family(&app).await;

    let (_, login) = call(&app, "POST", "/api/login/parent", Some(json!({ "id_number": PARENT_ID }))).await;
    let user_id = login["data"]["user_id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/api/assistant/chat",
        Some(json!({ "user_id": user_id, "message": "What do I owe?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reply"], ERROR_REPLY);
    assert_eq!(body["data"]["answered"], false);

    let (_, body) = call(&app, "GET", &format!("/api/assistant/history/{}", user_id), None).await;
    assert_eq!(body["data"], json!(["What do I owe?"]));
}
