use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::align::Token;
use crate::error::{Error, Result};

const DEFAULT_PARALLEL_THRESHOLD: usize = 64;

/// Parameters of the CTC alignment collapse.
///
/// Missing fields in a JSON config fall back to the defaults: blank `0`,
/// repeats merged, parallel collapse from 64 segments up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Token id that marks "no label" and is never emitted.
    pub blank: Token,
    /// Collapse runs of equal tokens not separated by a blank.
    pub merge_repeated: bool,
    pub parallel: bool,
    pub parallel_threshold: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            blank: 0,
            merge_repeated: true,
            parallel: true,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

impl AlignConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blank(mut self, blank: Token) -> Self {
        self.blank = blank;
        self
    }

    pub fn with_merge_repeated(mut self, merge_repeated: bool) -> Self {
        self.merge_repeated = merge_repeated;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel_threshold == 0 {
            return Err(Error::invalid("parallel_threshold must be >= 1"));
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: AlignConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub(crate) fn use_parallel(&self, segments: usize) -> bool {
        self.parallel && segments >= self.parallel_threshold.max(1)
    }
}
