// 🧩 Registration Service - wizard transitions with persistence
//
// Synchronous operations take a borrowed Connection. Operations that talk
// to the chat or mail services take the shared Mutex and release it before
// any await.

use crate::assistant::Assistant;
use crate::dashboard::{self, DashboardData};
use crate::db::{self, Event};
use crate::email::{self, DeliveryReport, EmailMessage, Mailer};
use crate::entities::{
    hash_password, new_salt, verify_password, BankAccount, Declaration, FeeResponsibility,
    NewParent, NewStudent, Parent, Student, StudentUpdate, UserView,
};
use crate::error::{PortalError, PortalResult};
use crate::fees::{self, FeeSchedule, FeeSource};
use crate::pricing::{self, PlanId, PlanOffer};
use crate::review::{self, ReviewSummary};
use crate::session::{RecentQueries, SessionContext};
use crate::validation::{self, EmailRule, ValidationError};
use crate::wizard::{Step, Wizard};
use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

pub const RE_REGISTERED: &str = "re-registered";

pub fn lock(db: &Mutex<Connection>) -> PortalResult<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|_| PortalError::Storage(anyhow!("database lock poisoned")))
}

fn record(conn: &Connection, event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) {
    let event = Event::new(event_type, "application", entity_id, data, actor);
    if let Err(e) = db::insert_event(conn, &event) {
        warn!(event_type, entity_id, error = %e, "failed to record event");
    }
}

fn actor(parent_id: &str) -> String {
    format!("parent:{}", parent_id)
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub parent_id: String,
    pub parent_name: String,
}

fn open_session(conn: &Connection, parent: &Parent) -> PortalResult<LoginResponse> {
    let session = db::create_session(conn, parent)?;
    info!(parent_id = %parent.id_number, "parent logged in");
    Ok(LoginResponse {
        token: session.token,
        user_id: session.user_id,
        parent_id: session.parent_id,
        parent_name: session.parent_name,
    })
}

pub fn register_parent(conn: &Connection, parent: &NewParent, rule: &EmailRule) -> PortalResult<Parent> {
    let parent = &parent.masked();
    validation::validate_parent_registration(parent, rule)?;

    let salt = new_salt();
    let hash = hash_password(&parent.password, &salt);

    let created = db::insert_parent(conn, parent, &hash, &salt)?.ok_or_else(|| {
        PortalError::Conflict("A parent with this ID number or email already exists".to_string())
    })?;

    record(
        conn,
        "parent_registered",
        &created.id_number,
        serde_json::json!({ "email": created.email }),
        &actor(&created.id_number),
    );
    info!(parent_id = %created.id_number, "parent registered");
    Ok(created)
}

/// Legacy login by ID number only
pub fn login_by_id_number(conn: &Connection, id_number: &str) -> PortalResult<LoginResponse> {
    let parent = db::find_parent_by_id_number(conn, id_number.trim())?
        .ok_or_else(|| PortalError::Unauthorized("Invalid ID number".to_string()))?;
    open_session(conn, &parent)
}

pub fn login_with_password(conn: &Connection, email: &str, password: &str) -> PortalResult<LoginResponse> {
    let invalid = || PortalError::Unauthorized("Invalid email or password".to_string());

    let (parent, hash, salt) = db::find_credentials_by_email(conn, email)?.ok_or_else(invalid)?;
    if !verify_password(password, &salt, &hash) {
        warn!(email, "failed login attempt");
        return Err(invalid());
    }
    open_session(conn, &parent)
}

pub fn logout(conn: &Connection, token: &str) -> PortalResult<()> {
    let ctx = load_session(conn, token)?;
    db::delete_session(conn, &ctx.token)?;
    Ok(())
}

/// Explicit loader at wizard entry
pub fn load_session(conn: &Connection, token: &str) -> PortalResult<SessionContext> {
    SessionContext::load(conn, token)?
        .ok_or_else(|| PortalError::Unauthorized("Session expired or invalid".to_string()))
}

pub fn get_user(conn: &Connection, user_id: &str) -> PortalResult<UserView> {
    db::find_parent_by_user_id(conn, user_id)?
        .map(|p| p.user_view())
        .ok_or_else(|| PortalError::not_found(format!("User {}", user_id)))
}

// ============================================================================
// STUDENTS
// ============================================================================

pub fn register_student(conn: &Connection, student: &NewStudent) -> PortalResult<Student> {
    let student = &student.masked();
    let mut errors = Vec::new();
    for (field, value) in [
        ("id_number", &student.id_number),
        ("first_name", &student.first_name),
        ("surname", &student.surname),
        ("grade_applied_for", &student.grade_applied_for),
    ] {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(field, "Required field is empty", "student"));
        }
    }
    if !errors.is_empty() {
        return Err(PortalError::Validation(errors));
    }

    if db::find_parent_by_id_number(conn, student.parent_id.trim())?.is_none() {
        return Err(PortalError::not_found(format!("Parent with ID {}", student.parent_id)));
    }

    let created = db::insert_student(conn, student)?.ok_or_else(|| {
        PortalError::Conflict(format!("Student {} is already registered", student.id_number))
    })?;

    record(
        conn,
        "student_registered",
        &created.application_id,
        serde_json::json!({ "id_number": created.id_number, "grade": created.grade_applied_for }),
        &actor(&created.parent_id),
    );
    Ok(created)
}

pub fn list_students(conn: &Connection, parent_id: &str) -> PortalResult<Vec<Student>> {
    Ok(db::get_students_by_parent(conn, parent_id)?)
}

/// Checks only the contact fields present in the update
fn validate_update(update: &StudentUpdate, context: &str, rule: &EmailRule) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if let Some(phone) = &update.phone_number {
        if !validation::validate_phone(phone) {
            errors.push(ValidationError::new("phone_number", validation::PHONE_MESSAGE, context));
        }
    }
    if let Some(email) = &update.email {
        if !rule.accepts(email) {
            errors.push(ValidationError::new(
                "email",
                format!("Email must be {}", rule.describe()),
                context,
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn update_student(
    conn: &Connection,
    id_number: &str,
    update: &StudentUpdate,
    rule: &EmailRule,
) -> PortalResult<Student> {
    let update = &update.masked();
    validate_update(update, id_number, rule)?;
    db::update_student_by_id_number(conn, id_number, update)?
        .ok_or_else(|| PortalError::not_found(format!("Student {}", id_number)))
}

pub fn update_student_by_application(
    conn: &Connection,
    application_id: &str,
    update: &StudentUpdate,
    rule: &EmailRule,
) -> PortalResult<Student> {
    let update = &update.masked();
    validate_update(update, application_id, rule)?;
    db::update_student_by_application_id(conn, application_id, update)?
        .ok_or_else(|| PortalError::not_found(format!("Application {}", application_id)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentEdit {
    pub application_id: String,
    #[serde(flatten)]
    pub update: StudentUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUpdate {
    pub id: String,
    pub reason: String,
}

/// Outcome of a batch update; successful rows stay written when others fail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub updated: Vec<String>,
    pub failed: Vec<FailedUpdate>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Update each learner independently, reporting which ones failed
pub fn batch_update_students(
    conn: &Connection,
    parent_id: &str,
    edits: &[StudentEdit],
    rule: &EmailRule,
) -> BatchReport {
    let mut report = BatchReport::default();

    for edit in edits {
        let id = edit.application_id.clone();
        let update = edit.update.masked();
        let fail = |reason: String| FailedUpdate { id: id.clone(), reason };

        if let Err(errors) = validate_update(&update, &id, rule) {
            let reason = errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>().join("; ");
            report.failed.push(fail(reason));
            continue;
        }

        match db::get_student_by_application_id(conn, &id) {
            Ok(Some(s)) if s.parent_id == parent_id => {}
            Ok(_) => {
                report.failed.push(fail("Student not found for this parent".to_string()));
                continue;
            }
            Err(e) => {
                report.failed.push(fail(e.to_string()));
                continue;
            }
        }

        match db::update_student_by_application_id(conn, &id, &update) {
            Ok(Some(_)) => report.updated.push(id.clone()),
            Ok(None) => report.failed.push(fail("Student not found for this parent".to_string())),
            Err(e) => {
                warn!(application_id = %id, error = %e, "student update failed");
                report.failed.push(fail(e.to_string()));
            }
        }
    }

    info!(
        parent_id,
        updated = report.updated.len(),
        failed = report.failed.len(),
        "batch student update"
    );
    report
}

// ============================================================================
// FEES & PLANS
// ============================================================================

pub fn fee_for_grade(conn: &Connection, grade: &str) -> PortalResult<FeeSchedule> {
    match fees::lookup_fee(conn, grade) {
        Some(fee) => Ok(fee),
        None => {
            let known = fees::known_grades(conn).unwrap_or_default();
            Err(PortalError::not_found(format!(
                "Fees for grade '{}' (available grades: {})",
                grade,
                known.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradePlans {
    pub fee: FeeSchedule,
    pub fee_source: FeeSource,
    pub student_count: u32,
    pub plans: Vec<PlanOffer>,
}

pub fn plans_for_grade(conn: &Connection, grade: &str, student_count: u32, default_annual_fee: f64) -> GradePlans {
    let (fee, fee_source) = fees::fee_or_default(conn, grade, default_annual_fee);
    let student_count = student_count.max(1);
    GradePlans {
        plans: pricing::financing_plans(fee.annual_fee, student_count),
        fee,
        fee_source,
        student_count,
    }
}

/// Save one plan for the parent's applications (or just `application_id`)
pub fn select_plan_for_parent(
    conn: &Connection,
    parent_id: &str,
    plan: &str,
    application_id: Option<&str>,
) -> PortalResult<Vec<FeeResponsibility>> {
    let plan: PlanId = plan.parse()?;
    let students = db::get_students_by_parent(conn, parent_id)?;

    let targets: Vec<&Student> = match application_id {
        Some(app) => students.iter().filter(|s| s.application_id == app).collect(),
        None => students.iter().collect(),
    };
    if targets.is_empty() {
        return Err(PortalError::not_found(format!("Applications for parent {}", parent_id)));
    }

    let mut saved = Vec::with_capacity(targets.len());
    for s in targets {
        saved.push(db::save_selected_plan(conn, &s.application_id, plan)?);
        record(
            conn,
            "plan_selected",
            &s.application_id,
            serde_json::json!({ "plan": plan }),
            &actor(parent_id),
        );
    }
    Ok(saved)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPlanView {
    pub application_id: String,
    pub selected_plan: PlanId,
    pub title: String,
}

pub fn selected_plan_for_parent(conn: &Connection, parent_id: &str) -> PortalResult<SelectedPlanView> {
    for s in db::get_students_by_parent(conn, parent_id)? {
        if let Some(plan) = db::get_selected_plan(conn, &s.application_id)? {
            return Ok(SelectedPlanView {
                application_id: s.application_id,
                selected_plan: plan,
                title: plan.title().to_string(),
            });
        }
    }
    Err(PortalError::not_found(format!("Selected plan for parent {}", parent_id)))
}

// ============================================================================
// DECLARATIONS & BANKING
// ============================================================================

pub fn save_declaration(conn: &Connection, declaration: &Declaration) -> PortalResult<Declaration> {
    validation::validate_declaration(declaration)?;
    if db::get_student_by_application_id(conn, &declaration.application_id)?.is_none() {
        return Err(PortalError::not_found(format!("Application {}", declaration.application_id)));
    }
    db::save_declaration(conn, declaration)?;
    record(
        conn,
        "declaration_signed",
        &declaration.application_id,
        serde_json::json!({ "full_name": declaration.full_name.trim(), "status": declaration.status }),
        "declaration",
    );
    db::get_declaration(conn, &declaration.application_id)?
        .ok_or_else(|| PortalError::Storage(anyhow!("declaration missing after save")))
}

pub fn get_declaration(conn: &Connection, application_id: &str) -> PortalResult<Declaration> {
    db::get_declaration(conn, application_id)?
        .ok_or_else(|| PortalError::not_found(format!("Declaration for {}", application_id)))
}

pub fn save_bank_account(
    conn: &Connection,
    application_id: &str,
    account: &BankAccount,
) -> PortalResult<FeeResponsibility> {
    validation::validate_bank_account(account)?;
    if db::get_student_by_application_id(conn, application_id)?.is_none() {
        return Err(PortalError::not_found(format!("Application {}", application_id)));
    }
    Ok(db::save_bank_account(conn, application_id, account)?)
}

// ============================================================================
// WIZARD
// ============================================================================

pub fn start_wizard(conn: &Connection, session: SessionContext) -> PortalResult<Wizard> {
    let students = db::get_students_by_parent(conn, &session.parent_id)?;
    if students.is_empty() {
        warn!(parent_id = %session.parent_id, "wizard started without students");
    }
    Ok(Wizard::start(session, students))
}

/// Validate, write each edited learner, and advance only when all succeeded
pub fn apply_details(
    conn: &Connection,
    wizard: &mut Wizard,
    edits: &[StudentEdit],
    rule: &EmailRule,
) -> PortalResult<BatchReport> {
    wizard.guard(Step::UpdateDetails)?;

    // Pre-check the merged records so nothing is written for invalid input
    let mut merged = wizard.selected().to_vec();
    for edit in edits {
        let slot = merged
            .iter_mut()
            .find(|s| s.application_id == edit.application_id)
            .ok_or_else(|| crate::wizard::WizardError::UnknownStudent(edit.application_id.clone()))?;
        slot.apply(&edit.update.masked());
    }
    validation::validate_details_batch(&merged, rule)?;

    let parent_id = wizard.session().parent_id.clone();
    let report = batch_update_students(conn, &parent_id, edits, rule);

    if report.is_complete() {
        wizard.update_details(merged, rule)?;
        if let Some(app) = wizard.application_id() {
            record(
                conn,
                "details_updated",
                app,
                serde_json::json!({ "updated": report.updated }),
                &actor(&parent_id),
            );
        }
    }

    Ok(report)
}

/// Run a step transition and its writes; on error the wizard is left as it was
fn transition<T>(wizard: &mut Wizard, step: impl FnOnce(&mut Wizard) -> PortalResult<T>) -> PortalResult<T> {
    let before = wizard.clone();
    let result = step(wizard);
    if let Err(e) = &result {
        warn!(step = %before.step(), error = %e, "wizard transition rolled back");
        *wizard = before;
    }
    result
}

/// Persist the plan for every selected application
pub fn choose_plan(conn: &Connection, wizard: &mut Wizard, plan: Option<PlanId>) -> PortalResult<()> {
    transition(wizard, |wizard| {
        wizard.choose_plan(plan)?;
        let Some(plan) = wizard.plan() else {
            return Ok(());
        };

        let parent_id = wizard.session().parent_id.clone();
        let apps = wizard.application_ids();
        db::save_selected_plans(conn, &apps, plan)?;
        for app in &apps {
            record(conn, "plan_selected", app, serde_json::json!({ "plan": plan }), &actor(&parent_id));
        }
        Ok(())
    })
}

pub fn declare(conn: &Connection, wizard: &mut Wizard, declaration: Declaration) -> PortalResult<()> {
    transition(wizard, |wizard| {
        wizard.declare(declaration)?;
        if let Some(d) = wizard.declaration() {
            db::save_declaration(conn, d)?;
            record(
                conn,
                "declaration_signed",
                &d.application_id,
                serde_json::json!({ "full_name": d.full_name.trim() }),
                &actor(&wizard.session().parent_id),
            );
        }
        Ok(())
    })
}

/// Amounts for `students` from their stored plans (or `plan_override`)
pub fn review_students(
    conn: &Connection,
    students: &[Student],
    plan_override: Option<PlanId>,
    default_annual_fee: f64,
) -> ReviewSummary {
    review::build_review(
        students,
        |s| {
            plan_override.or_else(|| match db::get_selected_plan(conn, &s.application_id) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(application_id = %s.application_id, error = %e, "stored plan unreadable");
                    None
                }
            })
        },
        |s| fees::fee_or_default(conn, &s.grade_applied_for, default_annual_fee),
    )
}

pub fn review(conn: &Connection, wizard: &Wizard, default_annual_fee: f64) -> PortalResult<ReviewSummary> {
    wizard.guard(Step::ReviewSubmit)?;
    Ok(review_students(conn, wizard.selected(), None, default_annual_fee))
}

pub fn review_for_parent(
    conn: &Connection,
    parent_id: &str,
    plan_override: Option<PlanId>,
    default_annual_fee: f64,
) -> PortalResult<ReviewSummary> {
    let students = db::get_students_by_parent(conn, parent_id)?;
    if students.is_empty() {
        return Err(PortalError::not_found(format!("Students for parent {}", parent_id)));
    }
    Ok(review_students(conn, &students, plan_override, default_annual_fee))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub submitted_at: DateTime<Utc>,
    pub application_ids: Vec<String>,
    pub email: Option<EmailMessage>,
}

/// Terminal transition: mark learners re-registered and compose the confirmation
pub fn submit(conn: &Connection, wizard: &mut Wizard) -> PortalResult<Submission> {
    transition(wizard, |wizard| submit_step(conn, wizard))
}

fn submit_step(conn: &Connection, wizard: &mut Wizard) -> PortalResult<Submission> {
    let submitted_at = wizard.submit()?;
    let application_ids = wizard.application_ids();
    let parent_id = wizard.session().parent_id.clone();
    let parent = db::find_parent_by_id_number(conn, &parent_id)?;

    db::set_student_status(conn, &application_ids, RE_REGISTERED)?;

    let plan_title = wizard.plan().map(|p| p.title()).unwrap_or("Not selected");
    record(
        conn,
        "registration_submitted",
        wizard.application_id().unwrap_or_default(),
        serde_json::json!({
            "applications": application_ids,
            "plan": wizard.plan(),
        }),
        &actor(&parent_id),
    );
    info!(parent_id = %parent_id, applications = application_ids.len(), "registration submitted");

    let names: Vec<String> = wizard.selected().iter().map(|s| s.full_name()).collect();
    let email = parent
        .map(|p| email::registration_email(&p.full_name, &p.email, &names, plan_title, submitted_at));

    Ok(Submission {
        submitted_at,
        application_ids,
        email,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub submitted_at: DateTime<Utc>,
    pub application_ids: Vec<String>,
    pub email: Option<DeliveryReport>,
}

/// Submit, then send the confirmation email; email failure never blocks
pub async fn submit_and_notify(
    db: &Mutex<Connection>,
    wizard: &mut Wizard,
    mailer: &dyn Mailer,
) -> PortalResult<SubmissionReport> {
    let submission = {
        let conn = lock(db)?;
        submit(&conn, wizard)?
    };

    let email = match &submission.email {
        Some(message) => Some(email::deliver(mailer, message).await),
        None => {
            warn!("parent record missing, confirmation email skipped");
            None
        }
    };

    Ok(SubmissionReport {
        submitted_at: submission.submitted_at,
        application_ids: submission.application_ids,
        email,
    })
}

/// Confirmation email outside the wizard, from stored records
pub async fn send_registration_email(
    db: &Mutex<Connection>,
    parent_id: &str,
    mailer: &dyn Mailer,
) -> PortalResult<DeliveryReport> {
    let message = {
        let conn = lock(db)?;
        let parent = db::find_parent_by_id_number(&conn, parent_id)?
            .ok_or_else(|| PortalError::not_found(format!("Parent {}", parent_id)))?;
        let students = db::get_students_by_parent(&conn, parent_id)?;

        let mut plan_title = "Not selected";
        for s in &students {
            if let Some(plan) = db::get_selected_plan(&conn, &s.application_id)? {
                plan_title = plan.title();
                break;
            }
        }

        let names: Vec<String> = students.iter().map(|s| s.full_name()).collect();
        email::registration_email(&parent.full_name, &parent.email, &names, plan_title, Utc::now())
    };

    Ok(email::deliver(mailer, &message).await)
}

// ============================================================================
// DASHBOARD & ASSISTANT
// ============================================================================

pub fn dashboard_for_parent(
    conn: &Connection,
    parent_id: &str,
    today: NaiveDate,
    default_annual_fee: f64,
) -> PortalResult<DashboardData> {
    Ok(dashboard::build_dashboard(conn, parent_id, today, default_annual_fee)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub answered: bool,
    pub history: Vec<String>,
}

/// Record the question in the user's history, then ask the assistant
pub async fn ask_assistant(
    db: &Mutex<Connection>,
    assistant: &Assistant,
    user_id: &str,
    message: &str,
    today: NaiveDate,
    default_annual_fee: f64,
) -> PortalResult<ChatResponse> {
    if message.trim().is_empty() {
        return Err(ValidationError::new("message", "Message cannot be empty", "assistant").into());
    }

    let (dashboard, history) = {
        let conn = lock(db)?;

        let dashboard = match db::find_parent_by_user_id(&conn, user_id)? {
            Some(parent) => {
                match dashboard::build_dashboard(&conn, &parent.id_number, today, default_annual_fee) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        warn!(user_id, error = %e, "billing data unavailable for assistant");
                        None
                    }
                }
            }
            None => None,
        };

        let mut history = RecentQueries::from_stored(db::load_recent_queries(&conn, user_id)?);
        history.push(message);
        db::save_recent_queries(&conn, user_id, history.as_slice())?;
        (dashboard, history)
    };

    let reply = assistant.ask(dashboard.as_ref(), message).await;

    Ok(ChatResponse {
        reply: reply.reply,
        answered: reply.answered,
        history: history.as_slice().to_vec(),
    })
}

pub fn assistant_history(conn: &Connection, user_id: &str) -> PortalResult<Vec<String>> {
    Ok(RecentQueries::from_stored(db::load_recent_queries(conn, user_id)?)
        .as_slice()
        .to_vec())
}

// ============================================================================
// TESTS
// ============================================================================
