// Entity Models
//
// Plain records owned by the portal's store. Parents own applications,
// applications own students, and each application carries one fee
// responsibility row (selected plan) and one declaration.

pub mod student;
pub mod parent;
pub mod declaration;
pub mod payment;

pub use student::{Student, NewStudent, StudentUpdate};
pub use parent::{Parent, NewParent, UserView, hash_password, verify_password, new_salt};
pub use declaration::{
    Declaration, DeclarationStatus, BankAccount, FeeResponsibility,
};
pub use payment::Payment;
