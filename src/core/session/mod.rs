// src/core/session/mod.rs

//! Client sessions and the driver that creates them.

pub mod classify;
mod driver;
mod binding;

pub use driver::Driver;
pub use binding::{Session, SessionState};
