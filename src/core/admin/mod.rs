// src/core/admin/mod.rs

//! Operator-facing administration of a member.
//!
//! This is the in-process administrative surface: each `MemberState` owns a
//! `RoleRegistry` that embedding tools call directly. No client request reaches it.

pub mod roles;

pub use roles::RoleRegistry;
