//! Local IPC: a per-database Unix socket carrying line-delimited JSON
//! request/response frames, so sibling CLI invocations can share one
//! running daemon's stores.

pub mod client;
pub mod proto;
pub mod server;
