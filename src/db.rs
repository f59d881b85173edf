// 🗄️ Storage - SQLite tables for parents, learners, plans and declarations
//
// Every function takes a borrowed Connection; callers own locking.
// Reads that find nothing return Ok(None) / an empty Vec, never an error.

use crate::entities::{
    BankAccount, Declaration, DeclarationStatus, FeeResponsibility, NewParent, NewStudent, Parent,
    Payment, Student, StudentUpdate,
};
use crate::pricing::PlanId;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Event for audit trail (every state change of an application is an event)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Logged-in parent, resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub parent_id: String,
    pub parent_name: String,
    pub created_at: DateTime<Utc>,
}

fn parse_time(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (ignored by in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Parents & Students
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents (
            id_number TEXT PRIMARY KEY,
            user_id TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            phone_number TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            street_address TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postcode TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            application_id TEXT PRIMARY KEY,
            id_number TEXT UNIQUE NOT NULL,
            first_name TEXT NOT NULL,
            surname TEXT NOT NULL,
            grade_applied_for TEXT NOT NULL,
            date_of_birth TEXT NOT NULL,
            gender TEXT NOT NULL DEFAULT '',
            home_language TEXT NOT NULL DEFAULT '',
            previous_grade TEXT NOT NULL DEFAULT '',
            previous_school TEXT NOT NULL DEFAULT '',
            street_address TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postcode TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            email TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'registered',
            parent_id TEXT NOT NULL REFERENCES parents(id_number),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Reference data
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_fees (
            grade TEXT PRIMARY KEY,
            annual_fee REAL NOT NULL,
            term_fee REAL NOT NULL,
            registration_fee REAL NOT NULL,
            re_registration_fee REAL NOT NULL,
            sport_fee REAL NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Application records (one row per application)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_responsibility (
            application_id TEXT PRIMARY KEY,
            selected_plan TEXT,
            fee_person TEXT NOT NULL DEFAULT 'Parent',
            relationship TEXT NOT NULL DEFAULT 'Parent',
            fee_terms_accepted INTEGER NOT NULL DEFAULT 0,
            account_holder_name TEXT,
            bank_name TEXT,
            account_type TEXT,
            account_number TEXT,
            branch_code TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS declarations (
            application_id TEXT PRIMARY KEY,
            agree_truth INTEGER NOT NULL,
            agree_policies INTEGER NOT NULL,
            agree_financial INTEGER NOT NULL,
            agree_verification INTEGER NOT NULL,
            agree_data_processing INTEGER NOT NULL,
            agree_audit_storage INTEGER NOT NULL,
            agree_affordability_processing INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            city TEXT,
            signed INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'completed',
            signed_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            amount_paid REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            plan_type TEXT,
            reference_number TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Sessions & assistant history
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            parent_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assistant_history (
            user_id TEXT PRIMARY KEY,
            queries TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_parent ON students(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id, payment_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// PARENTS
// ============================================================================

const PARENT_COLUMNS: &str = "id_number, user_id, full_name, email, phone_number,
    street_address, city, state, postcode, created_at";

fn map_parent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Parent> {
    let created_at: String = row.get(9)?;
    Ok(Parent {
        id_number: row.get(0)?,
        user_id: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        phone_number: row.get(4)?,
        street_address: row.get(5)?,
        city: row.get(6)?,
        state: row.get(7)?,
        postcode: row.get(8)?,
        created_at: parse_time(&created_at)?,
    })
}

/// Insert a parent; returns `Ok(None)` when the ID number or email is taken
pub fn insert_parent(
    conn: &Connection,
    parent: &NewParent,
    password_hash: &str,
    password_salt: &str,
) -> Result<Option<Parent>> {
    let user_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    let result = conn.execute(
        "INSERT INTO parents (
            id_number, user_id, full_name, email, phone_number, password_hash, password_salt,
            street_address, city, state, postcode, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            parent.id_number.trim(),
            user_id,
            parent.full_name.trim(),
            parent.email.trim(),
            parent.phone_number,
            password_hash,
            password_salt,
            parent.street_address,
            parent.city,
            parent.state,
            parent.postcode,
            now.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => find_parent_by_id_number(conn, parent.id_number.trim()),
        Err(e) if is_constraint_violation(&e) => Ok(None),
        Err(e) => Err(e).context("Failed to insert parent"),
    }
}

pub fn find_parent_by_id_number(conn: &Connection, id_number: &str) -> Result<Option<Parent>> {
    let parent = conn
        .query_row(
            &format!("SELECT {} FROM parents WHERE id_number = ?1", PARENT_COLUMNS),
            params![id_number],
            map_parent,
        )
        .optional()?;
    Ok(parent)
}

pub fn find_parent_by_user_id(conn: &Connection, user_id: &str) -> Result<Option<Parent>> {
    let parent = conn
        .query_row(
            &format!("SELECT {} FROM parents WHERE user_id = ?1", PARENT_COLUMNS),
            params![user_id],
            map_parent,
        )
        .optional()?;
    Ok(parent)
}

/// Parent plus (password_hash, password_salt) for login
pub fn find_credentials_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<(Parent, String, String)>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {}, password_hash, password_salt FROM parents WHERE LOWER(email) = LOWER(?1)",
                PARENT_COLUMNS
            ),
            params![email.trim()],
            |row| Ok((map_parent(row)?, row.get(10)?, row.get(11)?)),
        )
        .optional()?;
    Ok(found)
}

// ============================================================================
// STUDENTS
// ============================================================================

const STUDENT_COLUMNS: &str = "application_id, id_number, first_name, surname,
    grade_applied_for, date_of_birth, gender, street_address, city, state, postcode,
    phone_number, email, status, parent_id";

fn map_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        application_id: row.get(0)?,
        id_number: row.get(1)?,
        first_name: row.get(2)?,
        surname: row.get(3)?,
        grade_applied_for: row.get(4)?,
        date_of_birth: row.get(5)?,
        gender: row.get(6)?,
        street_address: row.get(7)?,
        city: row.get(8)?,
        state: row.get(9)?,
        postcode: row.get(10)?,
        phone_number: row.get(11)?,
        email: row.get(12)?,
        status: row.get(13)?,
        parent_id: row.get(14)?,
    })
}

/// Insert a learner under an existing parent; `Ok(None)` if the ID number exists
pub fn insert_student(conn: &Connection, student: &NewStudent) -> Result<Option<Student>> {
    let application_id = uuid::Uuid::new_v4().to_string();

    let result = conn.execute(
        "INSERT INTO students (
            application_id, id_number, first_name, surname, grade_applied_for, date_of_birth,
            gender, home_language, previous_grade, previous_school,
            street_address, city, state, postcode, phone_number, email, parent_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            application_id,
            student.id_number.trim(),
            student.first_name,
            student.surname,
            student.grade_applied_for,
            student.date_of_birth,
            student.gender,
            student.home_language,
            student.previous_grade,
            student.previous_school,
            student.street_address,
            student.city,
            student.state,
            student.postcode,
            student.phone_number,
            student.email,
            student.parent_id.trim(),
        ],
    );

    match result {
        Ok(_) => get_student_by_application_id(conn, &application_id),
        Err(e) if is_constraint_violation(&e) => Ok(None),
        Err(e) => Err(e).context("Failed to insert student"),
    }
}

pub fn get_students_by_parent(conn: &Connection, parent_id: &str) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE parent_id = ?1 ORDER BY first_name, surname",
        STUDENT_COLUMNS
    ))?;

    let students = stmt
        .query_map(params![parent_id], map_student)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

pub fn get_student_by_id_number(conn: &Connection, id_number: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id_number = ?1", STUDENT_COLUMNS),
            params![id_number],
            map_student,
        )
        .optional()?;
    Ok(student)
}

pub fn get_student_by_application_id(
    conn: &Connection,
    application_id: &str,
) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE application_id = ?1", STUDENT_COLUMNS),
            params![application_id],
            map_student,
        )
        .optional()?;
    Ok(student)
}

fn write_student(conn: &Connection, student: &Student) -> Result<()> {
    conn.execute(
        "UPDATE students SET
            first_name = ?2, surname = ?3, grade_applied_for = ?4, date_of_birth = ?5,
            street_address = ?6, city = ?7, state = ?8, postcode = ?9,
            phone_number = ?10, email = ?11
         WHERE application_id = ?1",
        params![
            student.application_id,
            student.first_name,
            student.surname,
            student.grade_applied_for,
            student.date_of_birth,
            student.street_address,
            student.city,
            student.state,
            student.postcode,
            student.phone_number,
            student.email,
        ],
    )
    .context("Failed to update student")?;
    Ok(())
}

/// Merge provided fields over the stored learner; `Ok(None)` if unknown
pub fn update_student_by_id_number(
    conn: &Connection,
    id_number: &str,
    update: &StudentUpdate,
) -> Result<Option<Student>> {
    let Some(mut student) = get_student_by_id_number(conn, id_number)? else {
        return Ok(None);
    };
    student.apply(update);
    write_student(conn, &student)?;
    Ok(Some(student))
}

pub fn update_student_by_application_id(
    conn: &Connection,
    application_id: &str,
    update: &StudentUpdate,
) -> Result<Option<Student>> {
    let Some(mut student) = get_student_by_application_id(conn, application_id)? else {
        return Ok(None);
    };
    student.apply(update);
    write_student(conn, &student)?;
    Ok(Some(student))
}

/// All-or-nothing status change across applications
pub fn set_student_status(conn: &Connection, application_ids: &[String], status: &str) -> Result<usize> {
    let tx = conn.unchecked_transaction().context("Failed to begin status update")?;
    let mut updated = 0;
    for id in application_ids {
        updated += tx
            .execute(
                "UPDATE students SET status = ?2 WHERE application_id = ?1",
                params![id, status],
            )
            .with_context(|| format!("Failed to update status for {}", id))?;
    }
    tx.commit().context("Failed to commit status update")?;
    Ok(updated)
}

// ============================================================================
// FEE RESPONSIBILITY (selected plan, bank details)
// ============================================================================

/// Upsert the selected plan; one row per application, last write wins
pub fn save_selected_plan(conn: &Connection, application_id: &str, plan: PlanId) -> Result<FeeResponsibility> {
    conn.execute(
        "INSERT INTO fee_responsibility (application_id, selected_plan, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(application_id) DO UPDATE SET
            selected_plan = excluded.selected_plan,
            updated_at = excluded.updated_at",
        params![application_id, plan.as_str(), Utc::now().to_rfc3339()],
    )
    .context("Failed to save selected plan")?;

    get_fee_responsibility(conn, application_id)?
        .context("fee_responsibility row missing after upsert")
}

/// Same plan on every application, in one transaction
pub fn save_selected_plans(conn: &Connection, application_ids: &[String], plan: PlanId) -> Result<()> {
    let tx = conn.unchecked_transaction().context("Failed to begin plan update")?;
    for id in application_ids {
        save_selected_plan(&tx, id, plan)?;
    }
    tx.commit().context("Failed to commit plan update")?;
    Ok(())
}

pub fn save_bank_account(
    conn: &Connection,
    application_id: &str,
    account: &BankAccount,
) -> Result<FeeResponsibility> {
    conn.execute(
        "INSERT INTO fee_responsibility (
            application_id, account_holder_name, bank_name, account_type,
            account_number, branch_code, fee_terms_accepted, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
         ON CONFLICT(application_id) DO UPDATE SET
            account_holder_name = excluded.account_holder_name,
            bank_name = excluded.bank_name,
            account_type = excluded.account_type,
            account_number = excluded.account_number,
            branch_code = excluded.branch_code,
            fee_terms_accepted = 1,
            updated_at = excluded.updated_at",
        params![
            application_id,
            account.account_holder_name.trim(),
            account.bank_name.trim(),
            account.account_type.trim(),
            account.account_number.trim(),
            account.branch_code.trim(),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to save bank account")?;

    get_fee_responsibility(conn, application_id)?
        .context("fee_responsibility row missing after upsert")
}

pub fn get_fee_responsibility(
    conn: &Connection,
    application_id: &str,
) -> Result<Option<FeeResponsibility>> {
    let row = conn
        .query_row(
            "SELECT application_id, selected_plan, fee_person, relationship, fee_terms_accepted,
                    account_holder_name, bank_name, account_type, account_number, branch_code,
                    updated_at
             FROM fee_responsibility WHERE application_id = ?1",
            params![application_id],
            |row| {
                let plan: Option<String> = row.get(1)?;
                let holder: Option<String> = row.get(5)?;
                let updated_at: String = row.get(10)?;

                let bank_account = match holder {
                    Some(account_holder_name) => Some(BankAccount {
                        account_holder_name,
                        bank_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                        account_type: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                        account_number: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                        branch_code: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
                    }),
                    None => None,
                };

                Ok(FeeResponsibility {
                    application_id: row.get(0)?,
                    selected_plan: plan.and_then(|p| p.parse().ok()),
                    fee_person: row.get(2)?,
                    relationship: row.get(3)?,
                    fee_terms_accepted: row.get(4)?,
                    bank_account,
                    updated_at: parse_time(&updated_at)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn get_selected_plan(conn: &Connection, application_id: &str) -> Result<Option<PlanId>> {
    Ok(get_fee_responsibility(conn, application_id)?.and_then(|r| r.selected_plan))
}

// ============================================================================
// DECLARATIONS
// ============================================================================

pub fn save_declaration(conn: &Connection, declaration: &Declaration) -> Result<()> {
    conn.execute(
        "INSERT INTO declarations (
            application_id, agree_truth, agree_policies, agree_financial, agree_verification,
            agree_data_processing, agree_audit_storage, agree_affordability_processing,
            full_name, city, signed, status, signed_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12)
         ON CONFLICT(application_id) DO UPDATE SET
            agree_truth = excluded.agree_truth,
            agree_policies = excluded.agree_policies,
            agree_financial = excluded.agree_financial,
            agree_verification = excluded.agree_verification,
            agree_data_processing = excluded.agree_data_processing,
            agree_audit_storage = excluded.agree_audit_storage,
            agree_affordability_processing = excluded.agree_affordability_processing,
            full_name = excluded.full_name,
            city = excluded.city,
            signed = 1,
            status = excluded.status,
            signed_at = excluded.signed_at",
        params![
            declaration.application_id,
            declaration.agree_truth,
            declaration.agree_policies,
            declaration.agree_financial,
            declaration.agree_verification,
            declaration.agree_data_processing,
            declaration.agree_audit_storage,
            declaration.agree_affordability_processing,
            declaration.full_name.trim(),
            declaration.city,
            declaration.status.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )
    .context("Failed to save declaration")?;
    Ok(())
}

pub fn get_declaration(conn: &Connection, application_id: &str) -> Result<Option<Declaration>> {
    let declaration = conn
        .query_row(
            "SELECT application_id, agree_truth, agree_policies, agree_financial,
                    agree_verification, agree_data_processing, agree_audit_storage,
                    agree_affordability_processing, full_name, city, status
             FROM declarations WHERE application_id = ?1",
            params![application_id],
            |row| {
                let status: String = row.get(10)?;
                Ok(Declaration {
                    application_id: row.get(0)?,
                    agree_truth: row.get(1)?,
                    agree_policies: row.get(2)?,
                    agree_financial: row.get(3)?,
                    agree_verification: row.get(4)?,
                    agree_data_processing: row.get(5)?,
                    agree_audit_storage: row.get(6)?,
                    agree_affordability_processing: row.get(7)?,
                    full_name: row.get(8)?,
                    city: row.get(9)?,
                    status: DeclarationStatus::parse(&status),
                })
            },
        )
        .optional()?;
    Ok(declaration)
}

// ============================================================================
// PAYMENTS
// ============================================================================

pub fn insert_payment(conn: &Connection, payment: &Payment) -> Result<()> {
    conn.execute(
        "INSERT INTO payments (
            id, student_id, amount_paid, payment_date, payment_status, plan_type, reference_number
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            payment.id,
            payment.student_id,
            payment.amount_paid,
            payment.payment_date.to_string(),
            payment.payment_status,
            payment.plan_type,
            payment.reference_number,
        ],
    )
    .context("Failed to insert payment")?;
    Ok(())
}

/// Payments for one learner, newest first
pub fn get_payments_for_student(conn: &Connection, student_id: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, amount_paid, payment_date, payment_status, plan_type, reference_number
         FROM payments
         WHERE student_id = ?1
         ORDER BY payment_date DESC",
    )?;

    let payments = stmt
        .query_map(params![student_id], |row| {
            let date: String = row.get(3)?;
            Ok(Payment {
                id: row.get(0)?,
                student_id: row.get(1)?,
                amount_paid: row.get(2)?,
                payment_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
                })?,
                payment_status: row.get(4)?,
                plan_type: row.get(5)?,
                reference_number: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payments)
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_time(&timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// SESSIONS
// ============================================================================

pub fn create_session(conn: &Connection, parent: &Parent) -> Result<Session> {
    let session = Session {
        token: uuid::Uuid::new_v4().to_string(),
        user_id: parent.user_id.clone(),
        parent_id: parent.id_number.clone(),
        parent_name: parent.full_name.clone(),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO sessions (token, user_id, parent_id, parent_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.token,
            session.user_id,
            session.parent_id,
            session.parent_name,
            session.created_at.to_rfc3339(),
        ],
    )
    .context("Failed to create session")?;

    Ok(session)
}

pub fn get_session(conn: &Connection, token: &str) -> Result<Option<Session>> {
    let session = conn
        .query_row(
            "SELECT token, user_id, parent_id, parent_name, created_at FROM sessions WHERE token = ?1",
            params![token],
            |row| {
                let created_at: String = row.get(4)?;
                Ok(Session {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    parent_id: row.get(2)?,
                    parent_name: row.get(3)?,
                    created_at: parse_time(&created_at)?,
                })
            },
        )
        .optional()?;
    Ok(session)
}

/// Returns true when a session was removed
pub fn delete_session(conn: &Connection, token: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(removed > 0)
}

// ============================================================================
// ASSISTANT HISTORY
// ============================================================================

pub fn load_recent_queries(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT queries FROM assistant_history WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(text) => Ok(serde_json::from_str(&text).context("Corrupt assistant history")?),
        None => Ok(Vec::new()),
    }
}

pub fn save_recent_queries(conn: &Connection, user_id: &str, queries: &[String]) -> Result<()> {
    conn.execute(
        "INSERT INTO assistant_history (user_id, queries, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
            queries = excluded.queries,
            updated_at = excluded.updated_at",
        params![user_id, serde_json::to_string(queries)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entities::declaration::tests::signed_declaration;

    pub(crate) fn new_parent(id_number: &str, email: &str) -> NewParent {
        NewParent {
            full_name: "Sarah Johnson".to_string(),
            email: email.to_string(),
            phone_number: "0821234567".to_string(),
            id_number: id_number.to_string(),
            password: "Secret#123".to_string(),
            street_address: "12 Jacaranda Street".to_string(),
            city: "Pretoria".to_string(),
            state: "Gauteng".to_string(),
            postcode: "0181".to_string(),
        }
    }

    pub(crate) fn new_student(parent_id: &str, id_number: &str, first_name: &str, grade: &str) -> NewStudent {
        NewStudent {
            id_number: id_number.to_string(),
            surname: "Johnson".to_string(),
            first_name: first_name.to_string(),
            date_of_birth: "2012-04-18".to_string(),
            gender: "F".to_string(),
            home_language: "English".to_string(),
            previous_grade: String::new(),
            grade_applied_for: grade.to_string(),
            previous_school: String::new(),
            street_address: "12 Jacaranda Street".to_string(),
            city: "Pretoria".to_string(),
            state: "Gauteng".to_string(),
            postcode: "0181".to_string(),
            phone_number: "0821234567".to_string(),
            email: "parent1@gmail.com".to_string(),
            parent_id: parent_id.to_string(),
        }
    }

    /// In-memory store with one parent and two learners (Emma Grade 10, Lucas Grade 7)
    pub(crate) fn seeded_family() -> (Connection, Parent, Vec<Student>) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        crate::fees::seed_school_fees(&conn).unwrap();

        let parent = insert_parent(&conn, &new_parent("8001015009087", "sarah@gmail.com"), "hash", "salt")
            .unwrap()
            .unwrap();
        insert_student(&conn, &new_student(&parent.id_number, "0803155001081", "Emma", "Grade 10"))
            .unwrap()
            .unwrap();
        insert_student(&conn, &new_student(&parent.id_number, "1102205001082", "Lucas", "Grade 7"))
            .unwrap()
            .unwrap();

        let students = get_students_by_parent(&conn, &parent.id_number).unwrap();
        (conn, parent, students)
    }

    #[test]
    fn test_parent_insert_and_conflicts() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let parent = insert_parent(&conn, &new_parent("8001015009087", "sarah@gmail.com"), "h", "s")
            .unwrap()
            .unwrap();
        assert_eq!(parent.full_name, "Sarah Johnson");

        // Duplicate ID number and duplicate email are both rejected
        assert!(insert_parent(&conn, &new_parent("8001015009087", "other@gmail.com"), "h", "s")
            .unwrap()
            .is_none());
        assert!(insert_parent(&conn, &new_parent("9001015009088", "sarah@gmail.com"), "h", "s")
            .unwrap()
            .is_none());

        let (found, hash, salt) = find_credentials_by_email(&conn, "SARAH@gmail.com").unwrap().unwrap();
        assert_eq!(found.user_id, parent.user_id);
        assert_eq!((hash.as_str(), salt.as_str()), ("h", "s"));
        assert!(find_parent_by_user_id(&conn, &parent.user_id).unwrap().is_some());
    }

    #[test]
    fn test_student_requires_existing_parent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let result = insert_student(&conn, &new_student("missing", "0803155001081", "Emma", "Grade 10"));
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_students_by_parent_and_update() {
        let (conn, parent, students) = seeded_family();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].first_name, "Emma");
        assert!(get_students_by_parent(&conn, "nobody").unwrap().is_empty());

        let update = StudentUpdate {
            grade_applied_for: Some("Grade 11".to_string()),
            ..Default::default()
        };
        let updated = update_student_by_id_number(&conn, "0803155001081", &update)
            .unwrap()
            .unwrap();
        assert_eq!(updated.grade_applied_for, "Grade 11");
        assert_eq!(updated.city, "Pretoria");
        assert_eq!(updated.parent_id, parent.id_number);

        assert!(update_student_by_id_number(&conn, "unknown", &update).unwrap().is_none());
    }

    #[test]
    fn test_selected_plan_upsert_keeps_one_row() {
        let (conn, _, students) = seeded_family();
        let app = &students[0].application_id;

        let first = save_selected_plan(&conn, app, PlanId::PayMonthly).unwrap();
        assert_eq!(first.fee_person, "Parent");
        assert!(!first.fee_terms_accepted);

        save_selected_plan(&conn, app, PlanId::PayOnce).unwrap();

        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fee_responsibility WHERE application_id = ?1",
                params![app],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(get_selected_plan(&conn, app).unwrap(), Some(PlanId::PayOnce));
        assert_eq!(get_selected_plan(&conn, "nope").unwrap(), None);
    }

    #[test]
    fn test_bank_account_keeps_plan() {
        let (conn, _, students) = seeded_family();
        let app = &students[0].application_id;

        save_selected_plan(&conn, app, PlanId::PayTerm).unwrap();
        let account = BankAccount {
            account_holder_name: "Sarah Johnson".to_string(),
            bank_name: "FNB".to_string(),
            account_type: "Cheque".to_string(),
            account_number: "62812345678".to_string(),
            branch_code: "250655".to_string(),
        };
        let row = save_bank_account(&conn, app, &account).unwrap();

        assert_eq!(row.selected_plan, Some(PlanId::PayTerm));
        assert!(row.fee_terms_accepted);
        assert_eq!(row.bank_account, Some(account));
    }

    #[test]
    fn test_declaration_upsert() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut d = signed_declaration("app-1");
        save_declaration(&conn, &d).unwrap();
        d.status = DeclarationStatus::InProgress;
        d.full_name = "Sarah M Johnson".to_string();
        save_declaration(&conn, &d).unwrap();

        let stored = get_declaration(&conn, "app-1").unwrap().unwrap();
        assert_eq!(stored.full_name, "Sarah M Johnson");
        assert_eq!(stored.status, DeclarationStatus::InProgress);
        assert!(get_declaration(&conn, "app-2").unwrap().is_none());
    }

    #[test]
    fn test_payments_newest_first() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        for (id, date) in [("p1", "2025-01-03"), ("p2", "2025-03-03")] {
            insert_payment(
                &conn,
                &Payment {
                    id: id.to_string(),
                    student_id: "0803155001081".to_string(),
                    amount_paid: 2500.0,
                    payment_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                    payment_status: "Paid".to_string(),
                    plan_type: None,
                    reference_number: None,
                },
            )
            .unwrap();
        }

        let payments = get_payments_for_student(&conn, "0803155001081").unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[0].id, "p2");
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "plan_selected",
            "application",
            "app-1",
            serde_json::json!({"plan": "pay-once"}),
            "parent:8001015009087",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "application", "app-1").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "plan_selected");
        assert_eq!(events[0].data["plan"], "pay-once");
    }

    #[test]
    fn test_sessions() {
        let (conn, parent, _) = seeded_family();

        let session = create_session(&conn, &parent).unwrap();
        let loaded = get_session(&conn, &session.token).unwrap().unwrap();
        assert_eq!(loaded.parent_id, parent.id_number);

        assert!(delete_session(&conn, &session.token).unwrap());
        assert!(!delete_session(&conn, &session.token).unwrap());
        assert!(get_session(&conn, &session.token).unwrap().is_none());
    }

    #[test]
    fn test_assistant_history_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        assert!(load_recent_queries(&conn, "u1").unwrap().is_empty());
        let queries = vec!["What do I owe?".to_string(), "When is my next payment?".to_string()];
        save_recent_queries(&conn, "u1", &queries).unwrap();
        save_recent_queries(&conn, "u1", &queries[..1]).unwrap();
        assert_eq!(load_recent_queries(&conn, "u1").unwrap(), queries[..1].to_vec());
    }
}
