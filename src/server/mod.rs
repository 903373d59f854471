//! TCP front end: listener and per-connection handlers.

mod connection;
mod listener;

pub use connection::{client_id, serve_lines, ConnectionHandler};
pub use listener::Server;
