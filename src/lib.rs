//! Gatekeeper - Tiered Request Admission
//!
//! This crate implements the admission layer that sits in front of a
//! rate-sensitive upstream API. Each caller key is counted in fixed windows
//! by several independent limiters ("tiers"), and a request proceeds only if
//! every tier admits it. State lives in process memory.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
