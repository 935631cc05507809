//! Pipeline runtime.
//!
//! A [`Pipeline`] is an ordered chain of segments connected by flow
//! channels: the first segment's input is the pipeline's `In`, the last
//! segment's output its `Out`. Pipelines are built either programmatically
//! from segment instances ([`Pipeline::new`]) or from a declarative YAML
//! description ([`Pipeline::from_config`]), which also resolves the
//! `branch` and `parallelize` composites.

mod branch;
mod config;
mod pipeline;

pub use branch::Branch;
pub use config::{BuildError, SegmentSpec};
pub use pipeline::{InputClosed, Pipeline};
