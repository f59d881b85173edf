// 🧭 Re-Registration Wizard - six-step state machine
//
// SelectStudents → UpdateDetails → ChooseFinancing → Declaration → ReviewSubmit → Success
//
// Each step carries the accumulated state forward. A single guard decides
// whether a step may be entered; every transition goes through it.

use crate::entities::{Declaration, Student};
use crate::pricing::PlanId;
use crate::session::SessionContext;
use crate::validation::{self, EmailRule, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// STEPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    SelectStudents,
    UpdateDetails,
    ChooseFinancing,
    Declaration,
    ReviewSubmit,
    Success,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::SelectStudents,
        Step::UpdateDetails,
        Step::ChooseFinancing,
        Step::Declaration,
        Step::ReviewSubmit,
        Step::Success,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::SelectStudents => "Select Students",
            Step::UpdateDetails => "Update Details",
            Step::ChooseFinancing => "Choose Financing",
            Step::Declaration => "Declaration",
            Step::ReviewSubmit => "Review & Submit",
            Step::Success => "Success",
        }
    }

    pub fn next(&self) -> Option<Step> {
        Step::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(&self) -> Option<Step> {
        self.index().checked_sub(1).map(|i| Step::ALL[i])
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WizardError {
    /// A predecessor's state is absent; the flow must restart from `restart_from`
    #[error("cannot open {target}: {missing}; restart from {restart_from}")]
    MissingState {
        target: Step,
        missing: &'static str,
        restart_from: Step,
    },

    #[error("registration has already been submitted")]
    Finished,

    #[error("there is no step before {0}")]
    NoPreviousStep(Step),

    #[error("student {0} is not part of this application")]
    UnknownStudent(String),

    #[error("step input is invalid")]
    Invalid(Vec<ValidationError>),
}

// ============================================================================
// WIZARD
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Wizard {
    session: SessionContext,
    step: Step,
    available: Vec<Student>,
    selected: Vec<Student>,
    details_confirmed: bool,
    plan: Option<PlanId>,
    declaration: Option<Declaration>,
    acknowledged: bool,
    submitted_at: Option<DateTime<Utc>>,
}

impl Wizard {
    /// Wizard entry: the parent's learners as loaded for this session
    pub fn start(session: SessionContext, available: Vec<Student>) -> Self {
        Wizard {
            session,
            step: Step::SelectStudents,
            available,
            selected: Vec::new(),
            details_confirmed: false,
            plan: None,
            declaration: None,
            acknowledged: false,
            submitted_at: None,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn available(&self) -> &[Student] {
        &self.available
    }

    pub fn selected(&self) -> &[Student] {
        &self.selected
    }

    pub fn plan(&self) -> Option<PlanId> {
        self.plan
    }

    pub fn declaration(&self) -> Option<&Declaration> {
        self.declaration.as_ref()
    }

    pub fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    /// Application id of the case: the first selected learner's
    pub fn application_id(&self) -> Option<&str> {
        self.selected.first().map(|s| s.application_id.as_str())
    }

    /// Every application touched by this registration
    pub fn application_ids(&self) -> Vec<String> {
        self.selected.iter().map(|s| s.application_id.clone()).collect()
    }

    pub fn progress_percent(&self) -> u8 {
        (self.step.index() * 100 / (Step::ALL.len() - 1)) as u8
    }

    // ------------------------------------------------------------------------
    // Route guard
    // ------------------------------------------------------------------------

    /// Check that every predecessor of `target` has left its state behind
    pub fn guard(&self, target: Step) -> Result<(), WizardError> {
        if self.step == Step::Success && target != Step::Success {
            return Err(WizardError::Finished);
        }

        let missing = |missing: &'static str, restart_from: Step| WizardError::MissingState {
            target,
            missing,
            restart_from,
        };

        if target >= Step::UpdateDetails && self.selected.is_empty() {
            return Err(missing("no students selected", Step::SelectStudents));
        }
        if target >= Step::ChooseFinancing && !self.details_confirmed {
            return Err(missing("student details not confirmed", Step::UpdateDetails));
        }
        if target >= Step::Declaration && self.plan.is_none() {
            return Err(missing("no financing plan selected", Step::ChooseFinancing));
        }
        if target >= Step::ReviewSubmit {
            let signed = self
                .declaration
                .as_ref()
                .map(|d| validation::validate_declaration(d).is_ok())
                .unwrap_or(false);
            if !signed {
                return Err(missing("declaration not signed", Step::Declaration));
            }
        }
        if target >= Step::Success && !self.acknowledged {
            return Err(missing("accuracy not acknowledged", Step::ReviewSubmit));
        }

        Ok(())
    }

    /// Direct navigation (deep link / reload) to a step
    pub fn enter(&mut self, target: Step) -> Result<(), WizardError> {
        self.guard(target)?;
        if target == Step::Success && self.submitted_at.is_none() {
            return Err(WizardError::MissingState {
                target,
                missing: "registration not submitted",
                restart_from: Step::ReviewSubmit,
            });
        }
        self.step = target;
        Ok(())
    }

    pub fn back(&mut self) -> Result<Step, WizardError> {
        if self.step == Step::Success {
            return Err(WizardError::Finished);
        }
        let previous = self
            .step
            .previous()
            .ok_or(WizardError::NoPreviousStep(self.step))?;
        self.step = previous;
        Ok(previous)
    }

    // ------------------------------------------------------------------------
    // Step transitions
    // ------------------------------------------------------------------------

    /// Step 1: pick learners by application id
    pub fn select_students(&mut self, application_ids: &[String]) -> Result<(), WizardError> {
        self.guard(Step::SelectStudents)?;

        if application_ids.is_empty() {
            return Err(WizardError::Invalid(vec![ValidationError::new(
                "students",
                "Please select at least one student to continue.",
                "select_students",
            )]));
        }

        let mut selected = Vec::with_capacity(application_ids.len());
        for id in application_ids {
            let student = self
                .available
                .iter()
                .find(|s| &s.application_id == id)
                .ok_or_else(|| WizardError::UnknownStudent(id.clone()))?;
            if !selected.iter().any(|s: &Student| s.application_id == student.application_id) {
                selected.push(student.clone());
            }
        }

        if selected != self.selected {
            self.details_confirmed = false;
        }
        self.selected = selected;
        self.step = Step::UpdateDetails;
        Ok(())
    }

    /// Step 2: edited copies of the selected learners
    pub fn update_details(&mut self, edited: Vec<Student>, rule: &EmailRule) -> Result<(), WizardError> {
        self.guard(Step::UpdateDetails)?;

        let mut merged = self.selected.clone();
        for student in edited {
            let slot = merged
                .iter_mut()
                .find(|s| s.application_id == student.application_id)
                .ok_or_else(|| WizardError::UnknownStudent(student.application_id.clone()))?;
            *slot = student;
        }

        validation::validate_details_batch(&merged, rule).map_err(WizardError::Invalid)?;

        self.selected = merged;
        self.details_confirmed = true;
        self.step = Step::ChooseFinancing;
        Ok(())
    }

    /// Step 3: financing plan; last choice wins
    pub fn choose_plan(&mut self, plan: Option<PlanId>) -> Result<(), WizardError> {
        self.guard(Step::ChooseFinancing)?;
        let plan = validation::validate_plan_selection(plan).map_err(|e| WizardError::Invalid(vec![e]))?;
        self.plan = Some(plan);
        self.step = Step::Declaration;
        Ok(())
    }

    /// Step 4: signed declaration, bound to this application
    pub fn declare(&mut self, mut declaration: Declaration) -> Result<(), WizardError> {
        self.guard(Step::Declaration)?;
        if let Some(id) = self.application_id() {
            declaration.application_id = id.to_string();
        }
        validation::validate_declaration(&declaration).map_err(WizardError::Invalid)?;
        self.declaration = Some(declaration);
        self.step = Step::ReviewSubmit;
        Ok(())
    }

    /// Step 5: "I confirm accuracy" checkbox
    pub fn acknowledge(&mut self, acknowledged: bool) -> Result<(), WizardError> {
        self.guard(Step::ReviewSubmit)?;
        self.acknowledged = acknowledged;
        Ok(())
    }

    /// Step 5 → 6: terminal
    pub fn submit(&mut self) -> Result<DateTime<Utc>, WizardError> {
        self.guard(Step::ReviewSubmit)?;
        validation::validate_acknowledgment(self.acknowledged)
            .map_err(|e| WizardError::Invalid(vec![e]))?;
        self.guard(Step::Success)?;

        let now = Utc::now();
        self.submitted_at = Some(now);
        self.step = Step::Success;
        Ok(now)
    }
}

// ============================================================================
// TESTS
// ============================================================================
