//! Shared test utilities for leakwatch integration tests.
//!
//! This module provides:
//! - `TestHarness`: a service over a temp-dir database with a scripted adapter
//! - Builders for configs and billing rows

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{assert_snapshot_consistent, ScriptedAdapter, TestHarness};
