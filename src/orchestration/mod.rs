//! # Orchestration
//!
//! The synchronous dispatch path ([`DispatchOrchestrator`]) and the error
//! taxonomy used to label provider failures in logs and errors.
//!
//! - **DispatchOrchestrator**: persist, select, invoke the adapter, record the
//!   outcome. Also the entry point for queueing and cancelling sends.
//! - **ErrorKind**: `network`, `auth`, `rate_limit`, `validation`, `unknown`,
//!   classified from adapter error text. Labels only; control flow never
//!   depends on it.

pub mod dispatcher;
pub mod error_classifier;

pub use dispatcher::{DispatchOrchestrator, DispatchReceipt};
pub use error_classifier::ErrorKind;
