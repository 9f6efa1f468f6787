// src/core/state/mod.rs

//! Defines the shared `MemberState` and the per-connection client records.

mod client;
mod core;

pub use client::*;
pub use core::{MemberInit, MemberState};
