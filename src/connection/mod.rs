// src/connection/mod.rs

//! Manages the lifecycle of a single client TCP connection: line framing,
//! request decoding and dispatch to the member's `RequestHandler`.

mod guard;
mod handler;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
