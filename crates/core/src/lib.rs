//! `netra-core` — shared building blocks for the Netra auth core.
//!
//! No IO, no crypto: just the error model and normalized lookup keys used by
//! the token and authorization layers.

pub mod error;
pub mod key;

pub use error::{CoreError, CoreResult};
pub use key::{LookupKey, normalize};
