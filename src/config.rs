//! Pipeline configuration
//!
//! [`PipelineConfig`] can be built in code or deserialized from TOML:
//!
//! ```toml
//! queue_capacity = 128      # defaults to 64
//! output_capacity = 1000    # omit for an unbounded final queue
//! failure_policy = "fail-fast"
//! thread_name_prefix = "ingest"
//! ```
//!
//! TOML has no null, so unbounded stage queues are selected in code with
//! `queue_capacity: None` or [`PipelineBuilder::unbounded_queues`].
//!
//! [`PipelineBuilder::unbounded_queues`]: crate::PipelineBuilder::unbounded_queues

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// How a pipeline reacts to a failed transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and keep processing later items
    #[default]
    Continue,
    /// Record the failure and discard every remaining item without transforming it
    FailFast,
}

/// Settings shared by every stage of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each stage's input queue; `None` for unbounded
    pub queue_capacity: Option<usize>,
    /// Capacity of the final output queue; `None` for unbounded
    pub output_capacity: Option<usize>,
    pub failure_policy: FailurePolicy,
    /// Worker threads are named `{prefix}-{stage}-{worker}`
    pub thread_name_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Some(64),
            output_capacity: None,
            failure_policy: FailurePolicy::Continue,
            thread_name_prefix: "pipeline".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities of zero
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == Some(0) {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.output_capacity == Some(0) {
            return Err(PipelineError::Config(
                "output_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
