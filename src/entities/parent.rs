// 👪 Parent Entity - the account holder who pays fees
//
// Identity is the South African ID number; the user_id (uuid) is what
// sessions and the assistant history are keyed on.

use crate::validation::mask_phone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parent {
    pub id_number: String,
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub created_at: DateTime<Utc>,
}

impl Parent {
    /// Public user view returned by `/api/user/{id}`
    pub fn user_view(&self) -> UserView {
        UserView {
            id: self.user_id.clone(),
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            phone: self.phone_number.clone(),
            role: "parent".to_string(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewParent {
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub id_number: String,
    pub password: String,
    pub street_address: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
}

impl NewParent {
    /// Copy with the phone number reduced to its first 10 digits
    pub fn masked(&self) -> Self {
        NewParent {
            phone_number: mask_phone(&self.phone_number),
            ..self.clone()
        }
    }
}

// ============================================================================
// PASSWORD HASHING
// ============================================================================

/// Salted SHA-256 digest, hex encoded
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt) == expected_hash
}
