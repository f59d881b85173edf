// ✅ Step Validators - admission checks that gate each wizard step
// Every check returns all problems at once so forms can show them inline

use crate::entities::{BankAccount, Declaration, NewParent, Student};
use crate::pricing::PlanId;
use serde::Serialize;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>, context: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub const PLAN_REQUIRED_MESSAGE: &str = "Please select a financing plan before continuing.";
pub const PHONE_MESSAGE: &str = "Phone number must be exactly 10 digits";
pub const ACKNOWLEDGMENT_MESSAGE: &str =
    "Please confirm that the information provided is accurate before submitting.";

// ============================================================================
// PHONE
// ============================================================================

/// Input masking: keep digits only, at most 10 of them
pub fn mask_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).take(10).collect()
}

/// Exactly 10 ASCII digits, nothing else
pub fn validate_phone(phone: &str) -> bool {
    phone.len() == 10 && phone.chars().all(|c| c.is_ascii_digit())
}

// ============================================================================
// EMAIL
// ============================================================================

/// Email admission rule: `local@domain` where local has no whitespace or `@`.
///
/// The default rule only admits `@gmail.com`; `any_domain()` admits any
/// `local@host.tld` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRule {
    domain: Option<String>,
}

impl Default for EmailRule {
    fn default() -> Self {
        EmailRule::domain("gmail.com")
    }
}

impl EmailRule {
    pub fn domain(domain: &str) -> Self {
        EmailRule {
            domain: Some(domain.trim().to_string()),
        }
    }

    pub fn any_domain() -> Self {
        EmailRule { domain: None }
    }

    /// `"*"` (or empty) means any domain
    pub fn from_setting(setting: &str) -> Self {
        match setting.trim() {
            "" | "*" => EmailRule::any_domain(),
            d => EmailRule::domain(d),
        }
    }

    pub fn describe(&self) -> String {
        match &self.domain {
            Some(d) => format!("a valid @{} address", d),
            None => "a valid email address".to_string(),
        }
    }

    pub fn accepts(&self, email: &str) -> bool {
        let Some((local, host)) = email.split_once('@') else {
            return false;
        };

        let clean = |s: &str| !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || c == '@');
        if !clean(local) || !clean(host) {
            return false;
        }

        match &self.domain {
            Some(d) => host == d,
            None => {
                // host.tld with non-empty labels
                let mut labels = host.split('.');
                host.contains('.') && labels.all(|l| !l.is_empty())
            }
        }
    }
}

// ============================================================================
// UPDATE DETAILS STEP
// ============================================================================

/// Phone and email checks for one learner
pub fn validate_student_details(student: &Student, rule: &EmailRule) -> ValidationResult {
    let context = student.id_number.as_str();
    let mut errors = Vec::new();

    if !validate_phone(&student.phone_number) {
        errors.push(ValidationError::new("phone_number", PHONE_MESSAGE, context));
    }

    if !rule.accepts(&student.email) {
        errors.push(ValidationError::new(
            "email",
            format!("Email must be {}", rule.describe()),
            context,
        ));
    }

    finish(errors)
}

/// Every learner must pass; errors carry the learner's ID number as context
pub fn validate_details_batch(students: &[Student], rule: &EmailRule) -> ValidationResult {
    let errors: Vec<ValidationError> = students
        .iter()
        .filter_map(|s| validate_student_details(s, rule).err())
        .flatten()
        .collect();

    finish(errors)
}

// ============================================================================
// FINANCING / DECLARATION / REVIEW STEPS
// ============================================================================

pub fn validate_plan_selection(plan: Option<PlanId>) -> Result<PlanId, ValidationError> {
    plan.ok_or_else(|| ValidationError::new("selected_plan", PLAN_REQUIRED_MESSAGE, "financing"))
}

pub fn validate_declaration(declaration: &Declaration) -> ValidationResult {
    let mut errors: Vec<ValidationError> = declaration
        .agreements()
        .iter()
        .filter(|(_, agreed)| !agreed)
        .map(|(field, _)| ValidationError::new(field, "This agreement must be accepted", "declaration"))
        .collect();

    if declaration.full_name.trim().chars().count() < 3 {
        errors.push(ValidationError::new(
            "full_name",
            "Full name must be at least 3 characters",
            "declaration",
        ));
    }

    finish(errors)
}

pub fn validate_acknowledgment(acknowledged: bool) -> Result<(), ValidationError> {
    if acknowledged {
        Ok(())
    } else {
        Err(ValidationError::new("acknowledged", ACKNOWLEDGMENT_MESSAGE, "review"))
    }
}

// ============================================================================
// ACCOUNT & BANKING
// ============================================================================

pub fn validate_password(password: &str) -> ValidationResult {
    let mut errors = Vec::new();
    let mut problem = |msg: &str| errors.push(ValidationError::new("password", msg, "auth"));

    if password.chars().count() < 8 {
        problem("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        problem("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        problem("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        problem("Password must contain at least one special character");
    }

    finish(errors)
}

pub fn validate_bank_account(account: &BankAccount) -> ValidationResult {
    let mut errors = Vec::new();
    let ctx = "bank_account";

    let holder = account.account_holder_name.trim().chars().count();
    if !(3..=50).contains(&holder) {
        errors.push(ValidationError::new(
            "account_holder_name",
            "Account holder name must be between 3 and 50 characters",
            ctx,
        ));
    }
    if account.bank_name.trim().chars().count() < 3 {
        errors.push(ValidationError::new("bank_name", "Bank name is required", ctx));
    }
    if account.account_type.trim().chars().count() < 3 {
        errors.push(ValidationError::new("account_type", "Account type is required", ctx));
    }

    let number = account.account_number.trim();
    if !(8..=17).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
        errors.push(ValidationError::new(
            "account_number",
            "Account number must be 8 to 17 digits",
            ctx,
        ));
    }

    let branch = account.branch_code.trim();
    if branch.len() != 6 || !branch.chars().all(|c| c.is_ascii_digit()) {
        errors.push(ValidationError::new(
            "branch_code",
            "Branch code must be exactly 6 digits",
            ctx,
        ));
    }

    finish(errors)
}

pub fn validate_parent_registration(parent: &NewParent, rule: &EmailRule) -> ValidationResult {
    let mut errors = Vec::new();
    let ctx = "registration";

    let required = [
        ("full_name", &parent.full_name),
        ("id_number", &parent.id_number),
        ("street_address", &parent.street_address),
        ("city", &parent.city),
        ("state", &parent.state),
        ("postcode", &parent.postcode),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(field, "Required field is empty", ctx));
        }
    }

    if !validate_phone(&parent.phone_number) {
        errors.push(ValidationError::new("phone_number", PHONE_MESSAGE, ctx));
    }
    if !rule.accepts(&parent.email) {
        errors.push(ValidationError::new(
            "email",
            format!("Email must be {}", rule.describe()),
            ctx,
        ));
    }
    if let Err(mut password_errors) = validate_password(&parent.password) {
        errors.append(&mut password_errors);
    }

    finish(errors)
}

// ============================================================================
// TESTS
// ============================================================================
