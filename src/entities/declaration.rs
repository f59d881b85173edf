// ✍️ Declaration & fee responsibility records for an application

use crate::pricing::PlanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// DECLARATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationStatus {
    InProgress,
    #[default]
    Completed,
}

impl DeclarationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationStatus::InProgress => "in_progress",
            DeclarationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => DeclarationStatus::InProgress,
            _ => DeclarationStatus::Completed,
        }
    }
}

/// Signed declaration; every agreement must be true before review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub application_id: String,
    #[serde(default)]
    pub agree_truth: bool,
    #[serde(default)]
    pub agree_policies: bool,
    #[serde(default)]
    pub agree_financial: bool,
    #[serde(default)]
    pub agree_verification: bool,
    #[serde(default)]
    pub agree_data_processing: bool,
    #[serde(default)]
    pub agree_audit_storage: bool,
    #[serde(default)]
    pub agree_affordability_processing: bool,
    /// Digital signature
    pub full_name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub status: DeclarationStatus,
}

impl Declaration {
    /// (field, accepted) pairs in the order they are shown
    pub fn agreements(&self) -> [(&'static str, bool); 7] {
        [
            ("agree_truth", self.agree_truth),
            ("agree_policies", self.agree_policies),
            ("agree_financial", self.agree_financial),
            ("agree_verification", self.agree_verification),
            ("agree_data_processing", self.agree_data_processing),
            ("agree_audit_storage", self.agree_audit_storage),
            ("agree_affordability_processing", self.agree_affordability_processing),
        ]
    }

    pub fn all_agreed(&self) -> bool {
        self.agreements().iter().all(|(_, agreed)| *agreed)
    }
}

// ============================================================================
// FEE RESPONSIBILITY (selected plan + debit order details)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccount {
    pub account_holder_name: String,
    pub bank_name: String,
    pub account_type: String,
    pub account_number: String,
    pub branch_code: String,
}

/// One row per application; the selected plan is last-write-wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeResponsibility {
    pub application_id: String,
    pub selected_plan: Option<PlanId>,
    pub fee_person: String,
    pub relationship: String,
    pub fee_terms_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<BankAccount>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn signed_declaration(application_id: &str) -> Declaration {
        Declaration {
            application_id: application_id.to_string(),
            agree_truth: true,
            agree_policies: true,
            agree_financial: true,
            agree_verification: true,
            agree_data_processing: true,
            agree_audit_storage: true,
            agree_affordability_processing: true,
            full_name: "Sarah Johnson".to_string(),
            city: Some("Pretoria".to_string()),
            status: DeclarationStatus::Completed,
        }
    }

    #[test]
    fn test_all_agreed() {
        let mut d = signed_declaration("app-1");
        assert!(d.all_agreed());
        d.agree_audit_storage = false;
        assert!(!d.all_agreed());
    }

    #[test]
    fn test_missing_agreements_default_to_false() {
        let d: Declaration = serde_json::from_str(
            r#"{"application_id":"app-1","agree_truth":true,"full_name":"Sarah"}"#,
        )
        .unwrap();
        assert!(d.agree_truth);
        assert!(!d.agree_policies);
        assert_eq!(d.status, DeclarationStatus::Completed);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(DeclarationStatus::parse("in_progress"), DeclarationStatus::InProgress);
        assert_eq!(DeclarationStatus::parse("completed").as_str(), "completed");
    }
}
