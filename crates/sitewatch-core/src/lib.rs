pub mod config;
pub mod detect;
pub mod error;
pub mod hash;
pub mod redact;
pub mod types;

pub use error::{Error, Result};
pub use hash::Digest;
pub use types::*;
