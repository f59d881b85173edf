// 📊 Dashboard & Fee Forecast - monthly billing picture per parent
//
// Both views degrade to fixed data instead of failing: the dashboard to an
// all-zero summary, the forecast to two demo learners. Every fallback is
// logged so an outage in the store shows up in the logs.

use crate::db;
use crate::entities::{Payment, Student};
use crate::fees::{self, FeeSchedule};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{info, warn};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    UpToDate,
    Partial,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::UpToDate => "up-to-date",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Learner {
    pub id: String,
    pub first_name: String,
    pub surname: String,
    pub student_id: String,
    pub grade: String,
    pub monthly_fee: f64,
    pub paid_this_month: f64,
    pub outstanding_amount: f64,
    /// ISO date (YYYY-MM-DD)
    pub next_payment_date: String,
    pub facility_linked: bool,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub tuition_fees: f64,
    pub activity_fees: f64,
    pub facility_fees: f64,
    pub sport_fees: f64,
    pub other_fees: f64,
}

impl FeeBreakdown {
    /// Split of one monthly fee: 60% tuition, 18% activity, 14% facility, 8% other
    pub fn from_monthly(monthly_fee: f64, sport_fee: f64) -> Self {
        FeeBreakdown {
            tuition_fees: (monthly_fee * 0.6).round(),
            activity_fees: (monthly_fee * 0.18).round(),
            facility_fees: (monthly_fee * 0.14).round(),
            sport_fees: sport_fee,
            other_fees: (monthly_fee * 0.08).round(),
        }
    }

    fn add(&mut self, other: &FeeBreakdown) {
        self.tuition_fees += other.tuition_fees;
        self.activity_fees += other.activity_fees;
        self.facility_fees += other.facility_fees;
        self.sport_fees += other.sport_fees;
        self.other_fees += other.other_fees;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub total_learners: usize,
    pub total_monthly_fees: f64,
    pub total_paid_this_month: f64,
    pub outstanding_amount: f64,
    pub learners: Vec<Learner>,
    pub fee_breakdown: FeeBreakdown,
    /// YYYY-MM
    pub current_month: String,
    pub generated_at: DateTime<Utc>,
    pub is_fallback: bool,
}

impl DashboardData {
    /// Fallback shown when a parent has no learners
    pub fn empty(today: NaiveDate) -> Self {
        DashboardData {
            total_learners: 0,
            total_monthly_fees: 0.0,
            total_paid_this_month: 0.0,
            outstanding_amount: 0.0,
            learners: Vec::new(),
            fee_breakdown: FeeBreakdown::default(),
            current_month: today.format("%Y-%m").to_string(),
            generated_at: Utc::now(),
            is_fallback: true,
        }
    }
}

// ============================================================================
// RULES
// ============================================================================

pub fn monthly_fee(annual_fee: f64) -> f64 {
    (annual_fee / 12.0).round()
}

pub fn payment_status(outstanding: f64, monthly_fee: f64) -> PaymentStatus {
    if outstanding <= 0.0 {
        PaymentStatus::UpToDate
    } else if outstanding < monthly_fee * 0.5 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Overdue
    }
}

pub fn end_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day)
}

/// One month after the latest paid payment, else the end of this month
pub fn next_payment_date(payments: &[Payment], today: NaiveDate) -> NaiveDate {
    payments
        .iter()
        .filter(|p| p.is_paid())
        .map(|p| p.payment_date)
        .max()
        .and_then(|last| last.checked_add_months(Months::new(1)))
        .unwrap_or_else(|| end_of_month(today))
}

fn paid_in_month(payments: &[Payment], today: NaiveDate) -> f64 {
    payments
        .iter()
        .filter(|p| p.is_paid())
        .filter(|p| p.payment_date.year() == today.year() && p.payment_date.month() == today.month())
        .map(|p| p.amount_paid)
        .sum()
}

/// Billing view of one learner
pub fn learner_summary(
    student: &Student,
    fee: &FeeSchedule,
    payments: &[Payment],
    facility_linked: bool,
    today: NaiveDate,
) -> (Learner, FeeBreakdown) {
    let monthly = monthly_fee(fee.annual_fee);
    let paid = paid_in_month(payments, today);
    let outstanding = (monthly - paid).max(0.0);

    let learner = Learner {
        id: student.application_id.clone(),
        first_name: student.first_name.clone(),
        surname: student.surname.clone(),
        student_id: student.id_number.clone(),
        grade: if student.grade_applied_for.trim().is_empty() {
            "N/A".to_string()
        } else {
            student.grade_applied_for.clone()
        },
        monthly_fee: monthly,
        paid_this_month: paid,
        outstanding_amount: outstanding,
        next_payment_date: next_payment_date(payments, today).to_string(),
        facility_linked,
        payment_status: payment_status(outstanding, monthly),
    };

    (learner, FeeBreakdown::from_monthly(monthly, fee.sport_fee))
}

// ============================================================================
// DASHBOARD
// ============================================================================

pub fn build_dashboard(
    conn: &Connection,
    parent_id: &str,
    today: NaiveDate,
    default_annual_fee: f64,
) -> Result<DashboardData> {
    let students = db::get_students_by_parent(conn, parent_id)
        .with_context(|| format!("Failed to load students for parent {}", parent_id))?;

    if students.is_empty() {
        warn!(parent_id, "no students for parent, showing empty dashboard");
        return Ok(DashboardData::empty(today));
    }

    let mut data = DashboardData::empty(today);
    data.is_fallback = false;

    for student in &students {
        let (fee, _) = fees::fee_or_default(conn, &student.grade_applied_for, default_annual_fee);
        let payments = db::get_payments_for_student(conn, &student.id_number)?;
        let facility_linked = db::get_fee_responsibility(conn, &student.application_id)?
            .map(|r| r.bank_account.is_some())
            .unwrap_or(false);

        let (learner, breakdown) = learner_summary(student, &fee, &payments, facility_linked, today);

        data.total_monthly_fees += learner.monthly_fee;
        data.total_paid_this_month += learner.paid_this_month;
        data.outstanding_amount += learner.outstanding_amount;
        data.fee_breakdown.add(&breakdown);
        data.learners.push(learner);
    }
    data.total_learners = data.learners.len();

    info!(
        parent_id,
        learners = data.total_learners,
        total_monthly = data.total_monthly_fees,
        outstanding = data.outstanding_amount,
        "dashboard ready"
    );

    Ok(data)
}

// ============================================================================
// FORECAST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMonth {
    /// "December 2025"
    pub month: String,
    pub standard_fees: f64,
    pub activity_fees: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeForecast {
    pub learners: Vec<Learner>,
    pub months: Vec<ForecastMonth>,
    pub total_remaining: f64,
    pub next_month_total: f64,
    pub is_fallback: bool,
}

impl FeeForecast {
    /// Months from `today`'s month to December; the current month only
    /// carries what is still outstanding
    pub fn from_learners(learners: Vec<Learner>, today: NaiveDate, is_fallback: bool) -> Self {
        let mut months = Vec::new();
        let mut cursor = today.with_day(1).unwrap_or(today);

        while cursor.year() == today.year() {
            let current = cursor.month() == today.month();

            let (mut standard, mut activity) = (0.0, 0.0);
            for l in &learners {
                let amount = if current { l.outstanding_amount } else { l.monthly_fee };
                let act = (amount * 0.18).round();
                activity += act;
                standard += amount - act;
            }

            months.push(ForecastMonth {
                month: cursor.format("%B %Y").to_string(),
                standard_fees: standard,
                activity_fees: activity,
                total: standard + activity,
            });

            match cursor.checked_add_months(Months::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        FeeForecast {
            total_remaining: months.iter().map(|m| m.total).sum(),
            next_month_total: months.get(1).map(|m| m.total).unwrap_or(0.0),
            learners,
            months,
            is_fallback,
        }
    }

    /// Demo learners shown when nothing can be loaded
    pub fn fallback(today: NaiveDate) -> Self {
        let demo = |id: &str, first: &str, student_id: &str, grade: &str, fee: f64, outstanding: f64| Learner {
            id: id.to_string(),
            first_name: first.to_string(),
            surname: "Johnson".to_string(),
            student_id: student_id.to_string(),
            grade: grade.to_string(),
            monthly_fee: fee,
            paid_this_month: 0.0,
            outstanding_amount: outstanding,
            next_payment_date: "2025-12-01".to_string(),
            facility_linked: true,
            payment_status: PaymentStatus::Partial,
        };

        let learners = vec![
            demo("1", "Emma", "2024-1042", "Grade 10", 6000.0, 7200.0),
            demo("2", "Lucas", "2024-1043", "Grade 7", 4500.0, 5250.0),
        ];

        FeeForecast::from_learners(learners, today, true)
    }

    /// `Month,Standard Fees,Activity Fees,Total`
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["Month", "Standard Fees", "Activity Fees", "Total"])?;
        for m in &self.months {
            wtr.write_record([
                m.month.clone(),
                format!("{:.2}", m.standard_fees),
                format!("{:.2}", m.activity_fees),
                format!("{:.2}", m.total),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Forecast for a parent; never fails
pub fn build_forecast(
    conn: &Connection,
    parent_id: &str,
    today: NaiveDate,
    default_annual_fee: f64,
) -> FeeForecast {
    match build_dashboard(conn, parent_id, today, default_annual_fee) {
        Ok(data) if !data.learners.is_empty() => FeeForecast::from_learners(data.learners, today, false),
        Ok(_) => {
            warn!(parent_id, "no learners for forecast, showing demo data");
            FeeForecast::fallback(today)
        }
        Err(e) => {
            warn!(parent_id, error = %e, "forecast unavailable, showing demo data");
            FeeForecast::fallback(today)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::seeded_family;
    use crate::entities::BankAccount;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn paid(id: &str, student_id: &str, amount: f64, date: &str, status: &str) -> Payment {
        Payment {
            id: id.to_string(),
            student_id: student_id.to_string(),
            amount_paid: amount,
            payment_date: day(date),
            payment_status: status.to_string(),
            plan_type: None,
            reference_number: None,
        }
    }

    #[test]
    fn test_payment_status_thresholds() {
        assert_eq!(payment_status(0.0, 2500.0), PaymentStatus::UpToDate);
        assert_eq!(payment_status(1249.0, 2500.0), PaymentStatus::Partial);
        assert_eq!(payment_status(1250.0, 2500.0), PaymentStatus::Overdue);
        assert_eq!(payment_status(2500.0, 2500.0), PaymentStatus::Overdue);
    }

    #[test]
    fn test_breakdown_percentages() {
        let b = FeeBreakdown::from_monthly(2500.0, 0.0);
        assert_eq!(b.tuition_fees, 1500.0);
        assert_eq!(b.activity_fees, 450.0);
        assert_eq!(b.facility_fees, 350.0);
        assert_eq!(b.other_fees, 200.0);
    }

    #[test]
    fn test_next_payment_date() {
        let today = day("2025-11-10");
        assert_eq!(next_payment_date(&[], today), day("2025-11-30"));

        let payments = vec![
            paid("p1", "s", 100.0, "2025-10-03", "Paid"),
            paid("p2", "s", 100.0, "2025-11-03", "Failed"),
        ];
        assert_eq!(next_payment_date(&payments, today), day("2025-11-03"));
        assert_eq!(end_of_month(day("2024-02-10")), day("2024-02-29"));
    }

    #[test]
    fn test_zero_students_gives_empty_dashboard() {
        let (conn, _, _) = seeded_family();
        let data = build_dashboard(&conn, "no-such-parent", day("2025-11-10"), 96000.0).unwrap();

        assert!(data.is_fallback);
        assert_eq!(data.total_learners, 0);
        assert_eq!(data.outstanding_amount, 0.0);
        assert_eq!(data.current_month, "2025-11");
    }

    #[test]
    fn test_dashboard_aggregates_learners() {
        let (conn, _, students) = seeded_family();
        let today = day("2025-11-10");
        let emma = &students[0];

        db::insert_payment(&conn, &paid("p1", &emma.id_number, 2000.0, "2025-11-02", "Paid")).unwrap();
        db::save_bank_account(
            &conn,
            &emma.application_id,
            &BankAccount {
                account_holder_name: "Sarah Johnson".to_string(),
                bank_name: "FNB".to_string(),
                account_type: "Cheque".to_string(),
                account_number: "62812345678".to_string(),
                branch_code: "250655".to_string(),
            },
        )
        .unwrap();

        let data = build_dashboard(&conn, &emma.parent_id, today, 96000.0).unwrap();

        // Grade 10: 30000 / 12 = 2500; Grade 7: 26400 / 12 = 2200
        assert_eq!(data.total_learners, 2);
        assert_eq!(data.total_monthly_fees, 4700.0);
        assert_eq!(data.total_paid_this_month, 2000.0);
        assert_eq!(data.outstanding_amount, 500.0 + 2200.0);

        let e = &data.learners[0];
        assert_eq!(e.payment_status, PaymentStatus::Partial);
        assert!(e.facility_linked);
        assert_eq!(e.next_payment_date, "2025-12-02");
        assert_eq!(data.learners[1].payment_status, PaymentStatus::Overdue);
        assert_eq!(data.fee_breakdown.tuition_fees, 1500.0 + 1320.0);
    }

    #[test]
    fn test_zero_students_gives_demo_forecast() {
        let (conn, _, _) = seeded_family();
        let forecast = build_forecast(&conn, "no-such-parent", day("2025-11-10"), 96000.0);

        assert!(forecast.is_fallback);
        assert_eq!(forecast.learners.len(), 2);
        assert_eq!(forecast.learners[0].first_name, "Emma");
        assert_eq!(forecast.learners[1].outstanding_amount, 5250.0);
    }

    #[test]
    fn test_storage_failure_gives_demo_forecast() {
        let bare = Connection::open_in_memory().unwrap();
        let forecast = build_forecast(&bare, "8001015009087", day("2025-11-10"), 96000.0);
        assert!(forecast.is_fallback);
    }

    #[test]
    fn test_forecast_months_and_csv() {
        let forecast = FeeForecast::fallback(day("2025-11-10"));

        // November carries outstanding (7200 + 5250), December the monthly fees
        assert_eq!(forecast.months.len(), 2);
        assert_eq!(forecast.months[0].month, "November 2025");
        assert_eq!(forecast.months[0].total, 12450.0);
        assert_eq!(forecast.months[1].total, 10500.0);
        assert_eq!(forecast.next_month_total, 10500.0);
        assert_eq!(forecast.total_remaining, 22950.0);

        let csv = forecast.to_csv_string().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Month,Standard Fees,Activity Fees,Total"));
        assert_eq!(lines.next(), Some("November 2025,10209.00,2241.00,12450.00"));
    }
}
