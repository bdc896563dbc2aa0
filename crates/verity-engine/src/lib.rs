pub mod backend;
pub mod capture;
pub mod collaborators;
pub mod config;
pub mod presentation;
pub mod runtime;
pub mod session;
pub mod synthesis;
pub mod triage;
pub mod verifier;

pub use runtime::{Runtime, StartResult};
pub use verity_common::error;
pub use verity_common::formatter;
pub use verity_common::protocol;
