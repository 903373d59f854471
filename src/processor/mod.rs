//! Request parsing and evaluation.

mod command;
mod engine;

pub use command::{is_currency_code, Command, RequestError};
pub use engine::{Reply, RequestProcessor, Response};
