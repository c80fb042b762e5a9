//! Runtime configuration
//!
//! Limits and addresses of the invocation core. The defaults describe the
//! stock layout; hosts with a different low-memory map load a JSON document
//! instead. Missing fields keep their defaults.

use crate::kernel::memory::{MAX_POOL_SIZE, POOL_SIZE};
use crate::kernel::trace::DEFAULT_TRACE_CAPACITY;
use serde::{Deserialize, Serialize};

/// Trampoline calling-convention version this core speaks
pub const PLUGIN_VERSION: u8 = 4;

/// Maximum number of builtin frames alive at once
pub const MAX_NESTING: usize = 32;

/// Arguments collected from a command tail (argv also holds the name)
pub const MAX_TAIL_ARGS: usize = 61;

/// Longest string a scratch string copy holds
pub const MAX_STRING_LEN: usize = 254;

/// Requests above this size are served but reported
pub const HEAP_WARN_THRESHOLD: usize = 1024;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Document is not valid JSON for this layout
    Parse(String),
    /// A field is out of range
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
            Self::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scratch pool capacity in bytes
    pub pool_size: usize,
    pub max_nesting: usize,
    pub heap_warn_threshold: usize,
    pub max_string_len: usize,
    pub max_tail_args: usize,
    pub plugin_version: u8,
    /// Segment the scratch pool is addressed through
    pub heap_segment: u16,
    /// Offset of the pool start within `heap_segment`
    pub heap_offset: u16,
    pub trace_capacity: usize,
    /// Keep informational trace events
    pub verbose: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: POOL_SIZE,
            max_nesting: MAX_NESTING,
            heap_warn_threshold: HEAP_WARN_THRESHOLD,
            max_string_len: MAX_STRING_LEN,
            max_tail_args: MAX_TAIL_ARGS,
            plugin_version: PLUGIN_VERSION,
            heap_segment: 0xc000,
            heap_offset: 0x0000,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            verbose: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::Invalid {
                field: "pool_size",
                reason: format!("{} is outside 1..={}", self.pool_size, MAX_POOL_SIZE),
            });
        }
        if self.heap_offset as usize + self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::Invalid {
                field: "heap_offset",
                reason: format!(
                    "pool of {} bytes at offset {:#x} crosses the segment end",
                    self.pool_size, self.heap_offset
                ),
            });
        }
        if self.max_nesting == 0 {
            return Err(ConfigError::Invalid {
                field: "max_nesting",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_tail_args == 0 {
            return Err(ConfigError::Invalid {
                field: "max_tail_args",
                reason: "must be at least 1".into(),
            });
        }
        // the length byte of a scratch string limits it to 255
        if self.max_string_len == 0 || self.max_string_len > 255 {
            return Err(ConfigError::Invalid {
                field: "max_string_len",
                reason: format!("{} is outside 1..=255", self.max_string_len),
            });
        }
        Ok(())
    }
}
