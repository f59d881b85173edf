// 🏫 Fee Schedule Lookup - grade label → fee row
//
// Grade labels arrive in many shapes ("Grade 10", "10", "0", "GR_7-9").
// Lookups never fail loudly: anything that cannot be resolved is `None`
// and the caller decides on the fallback schedule.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// FEE SCHEDULE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub grade: String,
    pub annual_fee: f64,
    pub term_fee: f64,
    pub registration_fee: f64,
    pub re_registration_fee: f64,
    pub sport_fee: f64,
}

impl FeeSchedule {
    fn row(grade: &str, annual_fee: f64, term_fee: f64) -> Self {
        FeeSchedule {
            grade: grade.to_string(),
            annual_fee,
            term_fee,
            registration_fee: 800.0,
            re_registration_fee: 400.0,
            sport_fee: 0.0,
        }
    }

    /// Default row used when a grade cannot be resolved
    pub fn fallback(annual_fee: f64) -> Self {
        FeeSchedule::row("Unknown", annual_fee, (annual_fee / 4.0).round())
    }
}

/// Where a fee row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSource {
    Schedule,
    Fallback,
}

/// Seed table for the 2025/2026 academic year
pub fn default_school_fees() -> Vec<FeeSchedule> {
    let mut fees = vec![FeeSchedule::row("Grade R", 14400.0, 3600.0)];
    for n in 1..=12u32 {
        let (annual, term) = match n {
            1..=6 => (20400.0, 5100.0),
            7..=9 => (26400.0, 6600.0),
            10..=11 => (30000.0, 7500.0),
            _ => (32400.0, 8100.0),
        };
        fees.push(FeeSchedule::row(&format!("Grade {}", n), annual, term));
    }
    fees
}

// ============================================================================
// GRADE NORMALIZATION
// ============================================================================

fn grade_number(n: u32) -> Option<String> {
    match n {
        0 => Some("Grade R".to_string()),
        1..=12 => Some(format!("Grade {}", n)),
        _ => None,
    }
}

/// Canonical `"Grade {n}"` / `"Grade R"` label, or `None` if unrecognized
pub fn normalize_grade(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_ascii_uppercase();

    // Legacy bucket codes: GR_R, GR_1-6, GR_7-9, GR_10-11, GR_12
    if let Some(code) = upper.strip_prefix("GR_") {
        if code == "R" {
            return Some("Grade R".to_string());
        }
        let first = code.split('-').next()?;
        return first.parse::<u32>().ok().filter(|n| *n >= 1).and_then(grade_number);
    }

    let rest = upper
        .strip_prefix("GRADE")
        .map(str::trim)
        .unwrap_or(upper.as_str());

    if rest == "R" {
        return Some("Grade R".to_string());
    }

    rest.parse::<u32>().ok().and_then(grade_number)
}

// ============================================================================
// STORAGE
// ============================================================================

/// Insert the seed table; existing grades are left untouched
pub fn seed_school_fees(conn: &Connection) -> Result<usize> {
    let mut inserted = 0;
    for fee in default_school_fees() {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO school_fees (
                grade, annual_fee, term_fee, registration_fee, re_registration_fee, sport_fee
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fee.grade,
                fee.annual_fee,
                fee.term_fee,
                fee.registration_fee,
                fee.re_registration_fee,
                fee.sport_fee,
            ],
        )?;
    }
    Ok(inserted)
}

fn map_fee(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeeSchedule> {
    Ok(FeeSchedule {
        grade: row.get(0)?,
        annual_fee: row.get(1)?,
        term_fee: row.get(2)?,
        registration_fee: row.get(3)?,
        re_registration_fee: row.get(4)?,
        sport_fee: row.get(5)?,
    })
}

const FEE_COLUMNS: &str =
    "grade, annual_fee, term_fee, registration_fee, re_registration_fee, sport_fee";

pub fn all_fees(conn: &Connection) -> Result<Vec<FeeSchedule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM school_fees ORDER BY CASE WHEN grade = 'Grade R' THEN 0
         ELSE CAST(SUBSTR(grade, 7) AS INTEGER) END",
        FEE_COLUMNS
    ))?;

    let fees = stmt
        .query_map([], map_fee)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(fees)
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn query_fee(conn: &Connection, raw: &str) -> Result<Option<FeeSchedule>> {
    if let Some(grade) = normalize_grade(raw) {
        let exact = conn
            .query_row(
                &format!("SELECT {} FROM school_fees WHERE grade = ?1", FEE_COLUMNS),
                params![grade],
                map_fee,
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
    }

    // LIKE is case-insensitive for ASCII in SQLite; the label itself matches literally
    let pattern = format!("%{}%", escape_like(raw.trim()));
    let partial = conn
        .query_row(
            &format!(
                "SELECT {} FROM school_fees WHERE grade LIKE ?1 ESCAPE '\\' ORDER BY LENGTH(grade) LIMIT 1",
                FEE_COLUMNS
            ),
            params![pattern],
            map_fee,
        )
        .optional()?;

    Ok(partial)
}

/// Fee row for a raw grade label; `None` on any failure
pub fn lookup_fee(conn: &Connection, raw: &str) -> Option<FeeSchedule> {
    if raw.trim().is_empty() {
        warn!("fee lookup with empty grade label");
        return None;
    }

    match query_fee(conn, raw) {
        Ok(Some(fee)) => Some(fee),
        Ok(None) => {
            warn!(grade = raw, "no fee schedule for grade");
            None
        }
        Err(e) => {
            warn!(grade = raw, error = %e, "fee schedule lookup failed");
            None
        }
    }
}

/// Fee row for a grade, falling back to the configured default annual fee
pub fn fee_or_default(conn: &Connection, raw: &str, default_annual_fee: f64) -> (FeeSchedule, FeeSource) {
    match lookup_fee(conn, raw) {
        Some(fee) => (fee, FeeSource::Schedule),
        None => {
            warn!(
                grade = raw,
                annual_fee = default_annual_fee,
                "using default fee schedule"
            );
            (FeeSchedule::fallback(default_annual_fee), FeeSource::Fallback)
        }
    }
}

/// Canonical grade labels known to the store (used in 404 messages)
pub fn known_grades(conn: &Connection) -> Result<Vec<String>> {
    Ok(all_fees(conn)?.into_iter().map(|f| f.grade).collect())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        seed_school_fees(&conn).unwrap();
        conn
    }

    #[test]
    fn test_normalize_grade_table() {
        let cases = [
            ("Grade 10", Some("Grade 10")),
            ("grade 10", Some("Grade 10")),
            ("Grade10", Some("Grade 10")),
            (" 10 ", Some("Grade 10")),
            ("0", Some("Grade R")),
            ("R", Some("Grade R")),
            ("Grade R", Some("Grade R")),
            ("GR_R", Some("Grade R")),
            ("GR_1-6", Some("Grade 1")),
            ("GR_7-9", Some("Grade 7")),
            ("GR_10-11", Some("Grade 10")),
            ("GR_12", Some("Grade 12")),
            ("13", None),
            ("Grade 0", Some("Grade R")),
            ("kindergarten", None),
            ("", None),
        ];

        for (raw, expected) in cases {
            assert_eq!(normalize_grade(raw).as_deref(), expected, "input {:?}", raw);
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let conn = seeded();
        assert_eq!(seed_school_fees(&conn).unwrap(), 0);

        let fees = all_fees(&conn).unwrap();
        assert_eq!(fees.len(), 13);
        assert_eq!(fees[0].grade, "Grade R");
        assert_eq!(fees[12].grade, "Grade 12");
    }

    #[test]
    fn test_lookup_by_raw_labels() {
        let conn = seeded();

        assert_eq!(lookup_fee(&conn, "10").unwrap().annual_fee, 30000.0);
        assert_eq!(lookup_fee(&conn, "Grade 7").unwrap().term_fee, 6600.0);
        assert_eq!(lookup_fee(&conn, "0").unwrap().grade, "Grade R");
        assert_eq!(lookup_fee(&conn, "GR_1-6").unwrap().annual_fee, 20400.0);
        assert_eq!(lookup_fee(&conn, "Grade 12").unwrap().re_registration_fee, 400.0);
    }

    #[test]
    fn test_lookup_failures_are_none() {
        let conn = seeded();
        assert!(lookup_fee(&conn, "Grade 14").is_none());
        assert!(lookup_fee(&conn, "   ").is_none());

        // No table at all: storage error is swallowed
        let bare = Connection::open_in_memory().unwrap();
        assert!(lookup_fee(&bare, "Grade 10").is_none());
    }

    #[test]
    fn test_like_wildcards_match_literally() {
        let conn = seeded();
        assert!(lookup_fee(&conn, "%").is_none());
        assert!(lookup_fee(&conn, "_").is_none());
        assert!(lookup_fee(&conn, "Grade%").is_none());

        // Plain partial labels still resolve
        assert_eq!(lookup_fee(&conn, "ade 1").unwrap().grade, "Grade 1");
    }

    #[test]
    fn test_fee_or_default() {
        let conn = seeded();

        let (fee, source) = fee_or_default(&conn, "Grade 10", 96000.0);
        assert_eq!(source, FeeSource::Schedule);
        assert_eq!(fee.annual_fee, 30000.0);

        let (fee, source) = fee_or_default(&conn, "Grade 14", 96000.0);
        assert_eq!(source, FeeSource::Fallback);
        assert_eq!(fee.annual_fee, 96000.0);
        assert_eq!(fee.term_fee, 24000.0);
    }
}
