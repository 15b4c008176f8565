//! Simplebank Common Types
//!
//! Shared types used across the simplebank workspace: row identifiers,
//! currency codes, the ledger error taxonomy and time helpers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
