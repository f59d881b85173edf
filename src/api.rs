// 🌐 REST API - axum router over the registration service
//
// Every JSON response uses the {success, data, error?} envelope.

use crate::assistant::Assistant;
use crate::config::PortalConfig;
use crate::dashboard::{self, DashboardData, FeeForecast};
use crate::email::{self, DeliveryReport, Mailer};
use crate::entities::{BankAccount, Declaration, FeeResponsibility, NewParent, NewStudent, Parent, Student, StudentUpdate, UserView};
use crate::error::{PortalError, PortalResult};
use crate::fees::{self, FeeSchedule};
use crate::pricing::{self, PlanId, PlanOffer};
use crate::review::ReviewSummary;
use crate::service::{self, BatchReport, ChatResponse, GradePlans, LoginResponse, SelectedPlanView, StudentEdit};
use crate::validation::ValidationError;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<PortalConfig>,
    pub assistant: Assistant,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Chat and mail backends are chosen from the configured API keys
    pub fn new(conn: Connection, config: PortalConfig) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            assistant: Assistant::new(config.chat_backend()),
            mailer: config.mailer(),
            config: Arc::new(config),
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    data: Option<()>,
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<ValidationError>,
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            success: false,
            data: None,
            error: self.to_string(),
            details: self.validation_errors().to_vec(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = PortalResult<Json<ApiResponse<T>>>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IdLoginRequest {
    pub id_number: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchUpdateRequest {
    pub students: Vec<StudentEdit>,
}

#[derive(Debug, Deserialize)]
pub struct SelectPlanRequest {
    pub selected_plan: String,
    #[serde(default)]
    pub application_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlansQuery {
    pub annual_fee: Option<f64>,
    pub students: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StudentsQuery {
    pub students: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub parent: Parent,
    pub email: DeliveryReport,
}

// ============================================================================
// Auth handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/parents/register
async fn register_parent(
    State(state): State<AppState>,
    Json(body): Json<NewParent>,
) -> ApiResult<RegistrationResponse> {
    let parent = {
        let conn = service::lock(&state.db)?;
        service::register_parent(&conn, &body, &state.config.email_rule)?
    };

    let message = email::account_created_email(&parent.email, &parent.full_name);
    let report = email::deliver(state.mailer.as_ref(), &message).await;
    ok(RegistrationResponse { parent, email: report })
}

/// POST /api/login/parent - legacy ID-number login
async fn login_parent(
    State(state): State<AppState>,
    Json(body): Json<IdLoginRequest>,
) -> ApiResult<LoginResponse> {
    let conn = service::lock(&state.db)?;
    ok(service::login_by_id_number(&conn, &body.id_number)?)
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<PasswordLoginRequest>,
) -> ApiResult<LoginResponse> {
    let conn = service::lock(&state.db)?;
    ok(service::login_with_password(&conn, &body.email, &body.password)?)
}

/// POST /api/auth/logout - `Authorization: Bearer <token>`
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<&'static str> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PortalError::Unauthorized("Missing Authorization header".to_string()))?;

    let conn = service::lock(&state.db)?;
    service::logout(&conn, token)?;
    ok("Logged out")
}

/// GET /api/user/:user_id
async fn get_user(State(state): State<AppState>, Path(user_id): Path<String>) -> ApiResult<UserView> {
    let conn = service::lock(&state.db)?;
    ok(service::get_user(&conn, &user_id)?)
}

// ============================================================================
// Student handlers
// ============================================================================

/// GET /api/parents/:parent_id/students (and the legacy /children alias)
async fn parent_students(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<Vec<Student>> {
    let conn = service::lock(&state.db)?;
    ok(service::list_students(&conn, &parent_id)?)
}

/// PUT /api/parents/:parent_id/students - batch update, per-student results
async fn batch_update_students(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    Json(body): Json<BatchUpdateRequest>,
) -> ApiResult<BatchReport> {
    let conn = service::lock(&state.db)?;
    ok(service::batch_update_students(
        &conn,
        &parent_id,
        &body.students,
        &state.config.email_rule,
    ))
}

/// PUT /api/parents/students/:application_id
async fn update_student_by_application(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Json(body): Json<StudentUpdate>,
) -> ApiResult<Student> {
    let conn = service::lock(&state.db)?;
    ok(service::update_student_by_application(
        &conn,
        &application_id,
        &body,
        &state.config.email_rule,
    )?)
}

/// POST /api/students/register
async fn register_student(
    State(state): State<AppState>,
    Json(body): Json<NewStudent>,
) -> ApiResult<Student> {
    let conn = service::lock(&state.db)?;
    ok(service::register_student(&conn, &body)?)
}

/// GET /api/students/parent/:parent_id - 404 when the parent has none
async fn students_for_parent(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<Vec<Student>> {
    let conn = service::lock(&state.db)?;
    let students = service::list_students(&conn, &parent_id)?;
    if students.is_empty() {
        return Err(PortalError::not_found(format!("Students for parent {}", parent_id)));
    }
    ok(students)
}

/// PUT /api/students/:id_number
async fn update_student(
    State(state): State<AppState>,
    Path(id_number): Path<String>,
    Json(body): Json<StudentUpdate>,
) -> ApiResult<Student> {
    let conn = service::lock(&state.db)?;
    ok(service::update_student(&conn, &id_number, &body, &state.config.email_rule)?)
}

// ============================================================================
// Fee & plan handlers
// ============================================================================

/// GET /api/school-fees
async fn school_fees(State(state): State<AppState>) -> ApiResult<Vec<FeeSchedule>> {
    let conn = service::lock(&state.db)?;
    ok(fees::all_fees(&conn)?)
}

/// GET /api/school-fees/:grade
async fn school_fee_for_grade(
    State(state): State<AppState>,
    Path(grade): Path<String>,
) -> ApiResult<FeeSchedule> {
    let grade = urlencoding::decode(&grade)
        .map(|g| g.into_owned())
        .unwrap_or(grade);
    let conn = service::lock(&state.db)?;
    ok(service::fee_for_grade(&conn, &grade)?)
}

/// GET /api/plans?annual_fee=&students=
async fn plans(State(state): State<AppState>, Query(q): Query<PlansQuery>) -> ApiResult<Vec<PlanOffer>> {
    let annual_fee = q.annual_fee.unwrap_or(state.config.default_annual_fee);
    ok(pricing::checked_financing_plans(annual_fee, q.students.unwrap_or(1))?)
}

/// GET /api/plans/grade/:grade?students=
async fn plans_for_grade(
    State(state): State<AppState>,
    Path(grade): Path<String>,
    Query(q): Query<StudentsQuery>,
) -> ApiResult<GradePlans> {
    let conn = service::lock(&state.db)?;
    ok(service::plans_for_grade(
        &conn,
        &grade,
        q.students.unwrap_or(1),
        state.config.default_annual_fee,
    ))
}

/// POST /api/parents/:parent_id/selected-plan
async fn save_selected_plan(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    Json(body): Json<SelectPlanRequest>,
) -> ApiResult<Vec<FeeResponsibility>> {
    let conn = service::lock(&state.db)?;
    ok(service::select_plan_for_parent(
        &conn,
        &parent_id,
        &body.selected_plan,
        body.application_id.as_deref(),
    )?)
}

/// GET /api/parents/:parent_id/selected-plan
async fn get_selected_plan(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<SelectedPlanView> {
    let conn = service::lock(&state.db)?;
    ok(service::selected_plan_for_parent(&conn, &parent_id)?)
}

// ============================================================================
// Declaration, banking & review handlers
// ============================================================================

/// POST /api/declarations
async fn save_declaration(
    State(state): State<AppState>,
    Json(body): Json<Declaration>,
) -> ApiResult<Declaration> {
    let conn = service::lock(&state.db)?;
    ok(service::save_declaration(&conn, &body)?)
}

/// GET /api/declarations/:application_id
async fn get_declaration(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
) -> ApiResult<Declaration> {
    let conn = service::lock(&state.db)?;
    ok(service::get_declaration(&conn, &application_id)?)
}

/// PUT /api/applications/:application_id/bank-account
async fn save_bank_account(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Json(body): Json<BankAccount>,
) -> ApiResult<FeeResponsibility> {
    let conn = service::lock(&state.db)?;
    ok(service::save_bank_account(&conn, &application_id, &body)?)
}

/// GET /api/parents/:parent_id/review?plan=
async fn review(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
    Query(q): Query<ReviewQuery>,
) -> ApiResult<ReviewSummary> {
    let plan = q.plan.as_deref().map(str::parse::<PlanId>).transpose()?;
    let conn = service::lock(&state.db)?;
    ok(service::review_for_parent(
        &conn,
        &parent_id,
        plan,
        state.config.default_annual_fee,
    )?)
}

/// POST /api/parents/:parent_id/send-registration-email
async fn send_registration_email(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<DeliveryReport> {
    ok(service::send_registration_email(&state.db, &parent_id, state.mailer.as_ref()).await?)
}

// ============================================================================
// Dashboard & assistant handlers
// ============================================================================

/// GET /api/parents/:parent_id/dashboard
async fn parent_dashboard(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<DashboardData> {
    let conn = service::lock(&state.db)?;
    ok(service::dashboard_for_parent(
        &conn,
        &parent_id,
        state.today(),
        state.config.default_annual_fee,
    )?)
}

fn forecast_for(state: &AppState, parent_id: &str) -> PortalResult<FeeForecast> {
    let conn = service::lock(&state.db)?;
    Ok(dashboard::build_forecast(
        &conn,
        parent_id,
        state.today(),
        state.config.default_annual_fee,
    ))
}

/// GET /api/parents/:parent_id/forecast
async fn parent_forecast(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> ApiResult<FeeForecast> {
    ok(forecast_for(&state, &parent_id)?)
}

/// GET /api/parents/:parent_id/forecast.csv
async fn parent_forecast_csv(
    State(state): State<AppState>,
    Path(parent_id): Path<String>,
) -> PortalResult<Response> {
    let csv = forecast_for(&state, &parent_id)?.to_csv_string()?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"fee-forecast.csv\""),
        ],
        csv,
    )
        .into_response())
}

/// POST /api/assistant/chat
async fn assistant_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    ok(service::ask_assistant(
        &state.db,
        &state.assistant,
        &body.user_id,
        &body.message,
        state.today(),
        state.config.default_annual_fee,
    )
    .await?)
}

/// GET /api/assistant/history/:user_id
async fn assistant_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<String>> {
    let conn = service::lock(&state.db)?;
    ok(service::assistant_history(&conn, &user_id)?)
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Auth
        .route("/parents/register", post(register_parent))
        .route("/login/parent", post(login_parent))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/user/:user_id", get(get_user))
        // Students
        .route("/parents/:parent_id/children", get(parent_students))
        .route(
            "/parents/:parent_id/students",
            get(parent_students).put(batch_update_students),
        )
        .route("/parents/students/:application_id", put(update_student_by_application))
        .route("/students/register", post(register_student))
        .route("/students/parent/:parent_id", get(students_for_parent))
        .route("/students/:id_number", put(update_student))
        // Fees & plans
        .route("/school-fees", get(school_fees))
        .route("/school-fees/:grade", get(school_fee_for_grade))
        .route("/plans", get(plans))
        .route("/plans/grade/:grade", get(plans_for_grade))
        .route(
            "/parents/:parent_id/selected-plan",
            get(get_selected_plan).post(save_selected_plan),
        )
        // Declarations, banking, review
        .route("/declarations", post(save_declaration))
        .route("/declarations/:application_id", get(get_declaration))
        .route("/applications/:application_id/bank-account", put(save_bank_account))
        .route("/parents/:parent_id/review", get(review))
        .route("/parents/:parent_id/send-registration-email", post(send_registration_email))
        // Dashboard & assistant
        .route("/parents/:parent_id/dashboard", get(parent_dashboard))
        .route("/parents/:parent_id/forecast", get(parent_forecast))
        .route("/parents/:parent_id/forecast.csv", get(parent_forecast_csv))
        .route("/assistant/chat", post(assistant_chat))
        .route("/assistant/history/:user_id", get(assistant_history))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
