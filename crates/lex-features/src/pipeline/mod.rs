//! Pipeline module.
//!
//! An ordered list of stages sharing one role registry.

mod builder;

pub use builder::{Pipeline, PipelineBuilder};
