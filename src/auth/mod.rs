//! Password hashing and session tokens

mod hash;
mod token;

pub use hash::CredentialHasher;
pub use token::TokenManager;
