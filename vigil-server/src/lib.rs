//! HTTP/SSE surface for the Vigil monitor.
//!
//! The binary in `main.rs` wires configuration, the database and the
//! monitor runtime, then serves the router assembled here. The modules are
//! exposed as a library so integration tests can drive handlers through a
//! real router.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

#[cfg(test)]
mod tests;
