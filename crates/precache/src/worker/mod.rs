//! # Request Interception Proxy
//!
//! One [`ServiceWorker`] per deployed version, driven through
//! `Installing → Waiting → Active → Redundant`.

mod message;
mod service;
mod state;

pub use message::ControlMessage;
pub use service::{ActivationReport, FetchOutcome, ServiceWorker};
pub use state::WorkerState;
