// 🧮 Review Aggregator - amount due per learner on the review step
// Prices come from pricing::plan_price, the same formula the offers use

use crate::entities::Student;
use crate::fees::{FeeSchedule, FeeSource};
use crate::pricing::{self, PlanId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewLine {
    pub application_id: String,
    pub student_name: String,
    pub grade: String,
    pub annual_fee: f64,
    pub fee_source: FeeSource,
    pub plan: Option<PlanId>,
    pub plan_title: Option<String>,
    pub period: Option<String>,
    /// Amount due per installment under the selected plan
    pub total_amount: f64,
    /// total_amount × installments per year
    pub annual_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub lines: Vec<ReviewLine>,
    pub student_count: u32,
    pub grand_total: f64,
    pub annual_total: f64,
    /// False when any learner has no stored plan
    pub complete: bool,
}

/// Recompute amounts from the stored plan and the current fee schedule
pub fn build_review<P, F>(students: &[Student], plan_for: P, fee_for: F) -> ReviewSummary
where
    P: Fn(&Student) -> Option<PlanId>,
    F: Fn(&Student) -> (FeeSchedule, FeeSource),
{
    let student_count = students.len() as u32;

    let lines: Vec<ReviewLine> = students
        .iter()
        .map(|student| {
            let (fee, fee_source) = fee_for(student);
            let plan = plan_for(student);

            let (total_amount, annual_cost) = match plan {
                Some(p) => {
                    let price = pricing::plan_price(p, fee.annual_fee, student_count.max(1));
                    (price, price * p.period().installments_per_year() as f64)
                }
                None => (0.0, 0.0),
            };

            ReviewLine {
                application_id: student.application_id.clone(),
                student_name: student.full_name(),
                grade: student.grade_applied_for.clone(),
                annual_fee: fee.annual_fee,
                fee_source,
                plan,
                plan_title: plan.map(|p| p.title().to_string()),
                period: plan.map(|p| p.period().label().to_string()),
                total_amount,
                annual_cost,
            }
        })
        .collect();

    ReviewSummary {
        student_count,
        grand_total: lines.iter().map(|l| l.total_amount).sum(),
        annual_total: lines.iter().map(|l| l.annual_cost).sum(),
        complete: lines.iter().all(|l| l.plan.is_some()),
        lines,
    }
}
