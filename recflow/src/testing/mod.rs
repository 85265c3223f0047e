//! Testing utilities for recflow pipelines.
//!
//! This module provides:
//! - A mock operation factory and an in-memory input loader
//! - State fixtures built through the reducer
//! - Assertions over cached results

mod assertions;
pub mod fixtures;
mod mocks;

pub use assertions::{
    assert_cached, assert_field_values, assert_not_cached, assert_record_count,
};
pub use fixtures::{cached_result, x_records, PipelineFixture};
pub use mocks::{MockOperationFactory, StaticLoader};
