pub mod password;
pub mod totp;

pub use password::{hash_password, verify_password, Password};
