//! Client secret wrapper and config errors shared by the ace-auth crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
