// 🎓 Student Entity - one learner inside an application
//
// A student row is created at registration, edited during the
// "update details" step and never deleted by the re-registration flow.

use crate::validation::mask_phone;
use serde::{Deserialize, Serialize};

// ============================================================================
// STUDENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    /// Application this learner belongs to (uuid)
    pub application_id: String,

    /// South African ID number of the learner
    pub id_number: String,

    pub first_name: String,
    pub surname: String,

    /// Raw grade label as captured ("Grade 10", "10", "GR_7-9", ...)
    pub grade_applied_for: String,

    pub date_of_birth: String,

    #[serde(default)]
    pub gender: String,

    // Address
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postcode: String,

    // Contact
    pub phone_number: String,
    pub email: String,

    /// Registration status ("registered", "re-registered", ...)
    #[serde(default)]
    pub status: String,

    /// Parent's ID number (foreign key to parents)
    #[serde(default)]
    pub parent_id: String,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.surname).trim().to_string()
    }

    /// Two-letter initials for avatars ("EJ")
    pub fn initials(&self) -> String {
        let first = self.first_name.chars().next();
        let last = self.surname.chars().next();
        first
            .into_iter()
            .chain(last)
            .collect::<String>()
            .to_uppercase()
    }

    /// Apply a partial update; fields left as `None` keep their value
    pub fn apply(&mut self, update: &StudentUpdate) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut self.first_name, &update.first_name);
        set(&mut self.surname, &update.surname);
        set(&mut self.grade_applied_for, &update.grade_applied_for);
        set(&mut self.date_of_birth, &update.date_of_birth);
        set(&mut self.street_address, &update.street_address);
        set(&mut self.city, &update.city);
        set(&mut self.state, &update.state);
        set(&mut self.postcode, &update.postcode);
        set(&mut self.phone_number, &update.phone_number);
        set(&mut self.email, &update.email);
    }
}

// ============================================================================
// REGISTRATION INPUT
// ============================================================================

/// Payload for registering a new learner under an existing parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub id_number: String,
    pub surname: String,
    pub first_name: String,
    pub date_of_birth: String,
    pub gender: String,
    #[serde(default)]
    pub home_language: String,
    #[serde(default)]
    pub previous_grade: String,
    pub grade_applied_for: String,
    #[serde(default)]
    pub previous_school: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub phone_number: String,
    pub email: String,
    /// Parent's ID number; must already exist
    pub parent_id: String,
}

impl NewStudent {
    /// Copy with the phone number reduced to its first 10 digits
    pub fn masked(&self) -> Self {
        NewStudent {
            phone_number: mask_phone(&self.phone_number),
            ..self.clone()
        }
    }
}

// ============================================================================
// PARTIAL UPDATE
// ============================================================================

/// Fields a parent may change on the "update details" step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_applied_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl StudentUpdate {
    pub fn masked(&self) -> Self {
        StudentUpdate {
            phone_number: self.phone_number.as_deref().map(mask_phone),
            ..self.clone()
        }
    }
}

impl From<&Student> for StudentUpdate {
    fn from(s: &Student) -> Self {
        StudentUpdate {
            first_name: Some(s.first_name.clone()),
            surname: Some(s.surname.clone()),
            grade_applied_for: Some(s.grade_applied_for.clone()),
            date_of_birth: Some(s.date_of_birth.clone()),
            street_address: Some(s.street_address.clone()),
            city: Some(s.city.clone()),
            state: Some(s.state.clone()),
            postcode: Some(s.postcode.clone()),
            phone_number: Some(s.phone_number.clone()),
            email: Some(s.email.clone()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fixture used across the crate's unit tests
    pub(crate) fn sample_student(application_id: &str, id_number: &str, grade: &str) -> Student {
        Student {
            application_id: application_id.to_string(),
            id_number: id_number.to_string(),
            first_name: "Emma".to_string(),
            surname: "Johnson".to_string(),
            grade_applied_for: grade.to_string(),
            date_of_birth: "2012-04-18".to_string(),
            gender: "F".to_string(),
            street_address: "12 Jacaranda Street".to_string(),
            city: "Pretoria".to_string(),
            state: "Gauteng".to_string(),
            postcode: "0181".to_string(),
            phone_number: "0821234567".to_string(),
            email: "parent1@gmail.com".to_string(),
            status: "registered".to_string(),
            parent_id: "8001015009087".to_string(),
        }
    }

    #[test]
    fn test_full_name_and_initials() {
        let s = sample_student("app-1", "1204180001088", "Grade 7");
        assert_eq!(s.full_name(), "Emma Johnson");
        assert_eq!(s.initials(), "EJ");
    }

    #[test]
    fn test_apply_partial_update() {
        let mut s = sample_student("app-1", "1204180001088", "Grade 7");
        let update = StudentUpdate {
            city: Some("Giyani".to_string()),
            phone_number: Some("0812345678".to_string()),
            ..Default::default()
        };

        s.apply(&update);

        assert_eq!(s.city, "Giyani");
        assert_eq!(s.phone_number, "0812345678");
        assert_eq!(s.street_address, "12 Jacaranda Street");
        assert_eq!(s.grade_applied_for, "Grade 7");
    }

    #[test]
    fn test_update_from_student_round_trips_fields() {
        let s = sample_student("app-1", "1204180001088", "Grade 7");
        let mut other = sample_student("app-2", "1204180001088", "Grade 1");
        other.apply(&StudentUpdate::from(&s));
        assert_eq!(other.grade_applied_for, "Grade 7");
        assert_eq!(other.application_id, "app-2");
    }
}
