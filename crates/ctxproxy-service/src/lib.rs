//! HTTP edge for the context-optimizing chat-completion proxy: wires
//! `ctxproxy_core`'s registries and pipeline to an axum router. Split into
//! a library so integration tests can build the router directly.

pub mod error_response;
pub mod routes;
pub mod state;
