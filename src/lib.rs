// School Fee Portal - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod entities;     // Parents, learners, declarations, payments
pub mod pricing;      // Financing plan calculator
pub mod fees;         // Fee schedule lookup
pub mod validation;   // Wizard step validators
pub mod session;      // Session context + recent assistant queries
pub mod wizard;       // Re-registration wizard state machine
pub mod review;       // Review aggregator
pub mod dashboard;    // Dashboard + fee forecast
pub mod assistant;    // AI billing assistant
pub mod email;        // Confirmation emails
pub mod db;
pub mod service;
pub mod error;
pub mod config;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use db::{setup_database, Event, Session};
pub use entities::{
    BankAccount, Declaration, DeclarationStatus, FeeResponsibility, NewParent, NewStudent, Parent,
    Payment, Student, StudentUpdate, UserView,
};
pub use pricing::{financing_plans, plan_price, PlanId, PlanOffer, PricingError};
pub use fees::{fee_or_default, lookup_fee, seed_school_fees, FeeSchedule, FeeSource};
pub use validation::{EmailRule, ValidationError, ValidationResult};
pub use session::{RecentQueries, SessionContext};
pub use wizard::{Step, Wizard, WizardError};
pub use review::{build_review, ReviewLine, ReviewSummary};
pub use dashboard::{build_dashboard, build_forecast, DashboardData, FeeForecast, Learner};
pub use assistant::{Assistant, ChatBackend};
pub use email::{EmailMessage, Mailer};
pub use error::{PortalError, PortalResult};
pub use config::PortalConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
