// ⚠️ Portal errors - one taxonomy for the service layer and the API

use crate::pricing::PricingError;
use crate::validation::ValidationError;
use crate::wizard::WizardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Wizard(WizardError),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("upstream service failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type PortalResult<T> = Result<T, PortalError>;

impl PortalError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PortalError::NotFound(what.into())
    }

    /// HTTP status used by the API layer
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::NotFound(_) => 404,
            PortalError::Validation(_) => 422,
            PortalError::Conflict(_) => 409,
            PortalError::Unauthorized(_) => 401,
            PortalError::Wizard(_) => 409,
            PortalError::Pricing(_) => 400,
            PortalError::Upstream(_) => 502,
            PortalError::Storage(_) => 500,
        }
    }

    /// Field-level details, when there are any
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            PortalError::Validation(errors) => errors,
            _ => &[],
        }
    }
}

impl From<WizardError> for PortalError {
    fn from(e: WizardError) -> Self {
        match e {
            WizardError::Invalid(errors) => PortalError::Validation(errors),
            other => PortalError::Wizard(other),
        }
    }
}

impl From<ValidationError> for PortalError {
    fn from(e: ValidationError) -> Self {
        PortalError::Validation(vec![e])
    }
}

impl From<Vec<ValidationError>> for PortalError {
    fn from(errors: Vec<ValidationError>) -> Self {
        PortalError::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::Step;

    #[test]
    fn test_status_codes() {
        assert_eq!(PortalError::not_found("student").status_code(), 404);
        assert_eq!(PortalError::Conflict("taken".into()).status_code(), 409);
        assert_eq!(PortalError::from(anyhow::anyhow!("disk")).status_code(), 500);
        assert_eq!(
            PortalError::from(PricingError::InvalidAnnualFee(-1.0)).status_code(),
            400
        );
    }

    #[test]
    fn test_wizard_invalid_becomes_validation() {
        let e = PortalError::from(WizardError::Invalid(vec![ValidationError::new(
            "selected_plan",
            "pick one",
            "financing",
        )]));
        assert_eq!(e.status_code(), 422);
        assert_eq!(e.to_string(), "validation failed: selected_plan: pick one");
        assert_eq!(e.validation_errors().len(), 1);

        let e = PortalError::from(WizardError::NoPreviousStep(Step::SelectStudents));
        assert_eq!(e.status_code(), 409);
    }
}
