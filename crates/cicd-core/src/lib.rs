//! cicd-core - Shared types, error taxonomy, config model, and wire protocol

pub mod config;
pub mod error;
pub mod observe;
pub mod paths;
pub mod protocol;
pub mod types;

pub use error::{Error, ErrorCode, Fallback, Result};
pub use protocol::*;
pub use types::*;
