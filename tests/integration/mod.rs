//! Integration test suite for remedy.
//!
//! These tests drive the executor, the fan-out scheduler, the consolidation
//! engine and convergence rounds through the public API.
//!
//! # Test Categories
//!
//! - `executor_retry`: Retry, timeout and hook behavior of a single unit
//! - `fan_out`: Concurrency strategies, ordering and fail-fast
//! - `consolidation`: Ordering, cycles, duplicate merges and groups
//! - `convergence`: Round budgets and retry subsets
//!
//! # CI Compatibility
//!
//! Every backend is an in-process mock driven by prompt directives, so no
//! external CLI is ever spawned.

mod fixtures;

mod consolidation;
mod executor_retry;
mod fan_out;
