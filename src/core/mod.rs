// src/core/mod.rs

//! The central module containing consensus, membership and routing for coredge.

pub mod admin;
pub mod bus;
pub mod client;
pub mod consensus;
pub mod errors;
pub mod handler;
pub mod local;
pub mod membership;
pub mod metrics;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod state;

pub use errors::CoredgeError;
