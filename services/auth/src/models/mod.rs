//! Authentication service models

pub mod session;
pub mod user;

// Re-export for convenience
pub use session::{NewSession, Session, TokenPair};
pub use user::{NewUser, OneTimePurpose, User, UserUpdate};
