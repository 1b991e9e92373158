//! Core types and traits for the mutation guard.
//!
//! The remote record API, the audit log, and the validation token store are all
//! reached through the traits defined here so that every layer above can be
//! exercised against in-memory doubles.

mod audit;
mod clock;
mod dto;
mod error;
mod hash;
mod token;
mod traits;

pub use audit::*;
pub use clock::*;
pub use dto::*;
pub use error::*;
pub use hash::*;
pub use token::*;
pub use traits::*;
