//! Per-client admission control.

mod controller;
mod record;

pub use controller::{AdmissionController, AttemptCharging, Decision, Rejection};
pub use record::{ClientRecord, ClientState};
