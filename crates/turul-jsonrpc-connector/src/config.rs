//! Configuration types for request dispatch

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long an asynchronous transaction may stay unanswered before the
    /// dispatcher answers it with a timeout error. `None` waits forever.
    #[serde(with = "option_duration_serde")]
    pub async_response_timeout: Option<Duration>,

    /// Answer with an error when the last handle of an asynchronous,
    /// unanswered transaction is dropped
    pub respond_on_leaked_transaction: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            async_response_timeout: Some(Duration::from_secs(300)), // 5 minutes
            respond_on_leaked_transaction: true,
        }
    }
}

impl DispatcherConfig {
    pub fn with_async_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.async_response_timeout = timeout;
        self
    }

    pub fn with_leak_responses(mut self, enabled: bool) -> Self {
        self.respond_on_leaked_transaction = enabled;
        self
    }
}

/// Millisecond (de)serialization for `Duration` fields
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Millisecond (de)serialization for `Option<Duration>` fields
pub mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
