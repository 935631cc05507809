//! Declarative pipeline builder.
//!
//! The description document is a YAML sequence of segment entries:
//!
//! ```yaml
//! - segment: flowfilter
//!   config:
//!     filter: proto tcp
//! - segment: branch
//!   if:
//!   - segment: flowfilter
//!     config: { filter: "bytes >1000" }
//!   then:
//!   - segment: dropfields
//!     config: { policy: drop, fields: note }
//!   bufsize: 1024
//! ```
//!
//! `$NAME` tokens in config values resolve from the environment, `$0`–`$9`
//! from the positional command line arguments; unresolved tokens become the
//! empty string. Substitution is textual and happens once, at build time.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use segments::{registry, ParallelizedSegment, Segment, SegmentError};

use crate::branch::Branch;
use crate::pipeline::Pipeline;

/// One entry of the pipeline description.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentSpec {
    /// Registry tag, or the reserved `branch`.
    pub segment: String,
    /// Segment-specific settings, handed to the factory after substitution.
    #[serde(default)]
    pub config: HashMap<String, String>,
    /// Input channel capacity override for this slot.
    #[serde(default)]
    pub bufsize: Option<usize>,
    /// Run this many identical instances behind a fan-out/fan-in wrapper.
    #[serde(default)]
    pub parallelize: Option<usize>,
    #[serde(default, rename = "if")]
    pub if_branch: Vec<SegmentSpec>,
    #[serde(default, rename = "then")]
    pub then_branch: Vec<SegmentSpec>,
    #[serde(default, rename = "else")]
    pub else_branch: Vec<SegmentSpec>,
}

/// Errors aborting a pipeline build. Nothing has been started when one of
/// these is returned.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("pipeline description is not a valid document: {0}")]
    Malformed(#[from] serde_yaml::Error),
    #[error("pipeline description contains no segments")]
    Empty,
    #[error("segment `{0}` takes no `if`/`then`/`else` branches, only `branch` does")]
    StrayBranches(String),
    #[error("segment `branch` cannot be parallelized")]
    ParallelizedBranch,
    #[error("`parallelize` must be at least 2, got {0}")]
    BadParallelize(usize),
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl Pipeline {
    /// Build a pipeline from a YAML description, substituting variables
    /// against the process environment and command line.
    pub fn from_config(raw: &[u8]) -> Result<Self, BuildError> {
        let specs: Vec<SegmentSpec> = serde_yaml::from_slice(raw)?;
        let args: Vec<String> = std::env::args().collect();
        build_pipeline(&specs, &args)
    }
}

/// Build a pipeline from parsed entries with explicit positional arguments.
pub(crate) fn build_pipeline(
    specs: &[SegmentSpec],
    args: &[String],
) -> Result<Pipeline, BuildError> {
    if specs.is_empty() {
        return Err(BuildError::Empty);
    }
    let mut built = Vec::with_capacity(specs.len());
    for spec in specs {
        built.push(build_segment(spec, args)?);
    }
    Ok(Pipeline::new(built))
}

fn build_segment(spec: &SegmentSpec, args: &[String]) -> Result<Box<dyn Segment>, BuildError> {
    let mut segment: Box<dyn Segment> = if spec.segment == "branch" {
        if spec.parallelize.is_some() {
            return Err(BuildError::ParallelizedBranch);
        }
        let condition = build_sub_pipeline(&spec.if_branch, args)?;
        let then_branch = build_sub_pipeline(&spec.then_branch, args)?;
        let else_branch = build_sub_pipeline(&spec.else_branch, args)?;
        Box::new(Branch::new(condition, then_branch, else_branch))
    } else {
        if !spec.if_branch.is_empty()
            || !spec.then_branch.is_empty()
            || !spec.else_branch.is_empty()
        {
            return Err(BuildError::StrayBranches(spec.segment.clone()));
        }
        let config = substitute_config(&spec.config, args);
        match spec.parallelize {
            None => registry().instantiate(&spec.segment, &config)?,
            Some(n) if n >= 2 => {
                let mut parallelized = ParallelizedSegment::new();
                for _ in 0..n {
                    parallelized.add_segment(registry().instantiate(&spec.segment, &config)?);
                }
                Box::new(parallelized)
            }
            Some(n) => return Err(BuildError::BadParallelize(n)),
        }
    };
    if let Some(bufsize) = spec.bufsize {
        segment.set_input_capacity(bufsize);
    }
    Ok(segment)
}

/// An empty branch slot behaves as identity, expressed as a single `pass`.
fn build_sub_pipeline(specs: &[SegmentSpec], args: &[String]) -> Result<Pipeline, BuildError> {
    if specs.is_empty() {
        let pass = registry().instantiate("pass", &HashMap::new())?;
        return Ok(Pipeline::new(vec![pass]));
    }
    build_pipeline(specs, args)
}

static VAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:([A-Za-z_][A-Za-z0-9_]*)|([0-9]))").expect("valid pattern"));

fn substitute_config(
    config: &HashMap<String, String>,
    args: &[String],
) -> HashMap<String, String> {
    config
        .iter()
        .map(|(key, value)| (key.clone(), substitute(value, args)))
        .collect()
}

fn substitute(value: &str, args: &[String]) -> String {
    VAR_TOKEN
        .replace_all(value, |caps: &regex::Captures| {
            if let Some(name) = caps.get(1) {
                std::env::var(name.as_str()).unwrap_or_default()
            } else if let Some(index) = caps.get(2) {
                let index: usize = index.as_str().parse().expect("single digit");
                args.get(index).cloned().unwrap_or_default()
            } else {
                String::new()
            }
        })
        .into_owned()
}
