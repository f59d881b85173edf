// 🧾 Payment record - read-only history used by the dashboard

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Learner's ID number
    pub student_id: String,
    pub amount_paid: f64,
    pub payment_date: NaiveDate,
    /// "Paid", "Pending", "Failed"
    pub payment_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_number: Option<String>,
}

impl Payment {
    pub fn is_paid(&self) -> bool {
        self.payment_status.eq_ignore_ascii_case("paid")
    }
}
