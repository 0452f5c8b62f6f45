//! Resource limits for policy script execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource limits applied to a single script invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock budget for the whole invocation
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Maximum number of fetch calls per invocation
    pub max_fetch_calls: u32,
    /// V8 heap limit in bytes
    pub max_heap_bytes: usize,
    /// Maximum size of the serialized script result in bytes
    pub max_result_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),    // production wall clock
            max_fetch_calls: 10,
            max_heap_bytes: 64 * 1024 * 1024,    // 64 MB
            max_result_bytes: 1024 * 1024,       // 1 MB result
        }
    }
}

impl ExecutionLimits {
    /// Limits used while validating an author's draft script. The wall-clock
    /// budget is stricter than production's so a slow script fails fast in
    /// the authoring UI.
    pub fn validation() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
