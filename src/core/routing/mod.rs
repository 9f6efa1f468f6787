// src/core/routing/mod.rs

//! Routing: which member takes writes and which may serve reads.

pub mod service;
pub mod table;

pub use service::RoutingService;
pub use table::{AccessMode, RoutingTable};
