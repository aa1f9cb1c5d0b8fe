//! Settings consumed when composing a reply pump.

use std::{fmt, time::Duration};

use serde::Deserialize;

use crate::error::{Error, Result};

const MAX_QUEUE_NAME_LEN: usize = 260;

/// Validated name of a broker queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Validates `name` as a queue name.
    ///
    /// Names are 1 to 260 characters of ASCII alphanumerics, `-`, `_`, `.`
    /// and `/`. Anything else fails with [`Error::InvalidQueueName`].
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let reason = if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
            Some("must be 1-260 characters")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        {
            Some("only ASCII alphanumerics, '-', '_', '.' and '/' are allowed")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidQueueName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    /// The name as given to the broker.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for QueueName {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings for a reply pump.
///
/// ```toml
/// reply_queue_name = "replies.node-1"
/// default_batch_size = 10
/// poll_interval_ms = 300
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PumpSettings {
    /// Queue the pump receives replies from.
    pub reply_queue_name: QueueName,
    /// Messages requested from the transport per receive call.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    /// How long one dispatch poll waits before checking for shutdown.
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_ms",
        deserialize_with = "deserialize_millis"
    )]
    pub poll_interval: Duration,
}

impl PumpSettings {
    /// Settings for `reply_queue_name` with the default batch size (10) and
    /// poll interval (300 ms).
    pub fn new(reply_queue_name: QueueName) -> Self {
        Self {
            reply_queue_name,
            default_batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
        }
    }

    /// Overrides the number of messages requested per receive.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size;
        self
    }

    /// Overrides how long the pump waits on an empty poll.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Parses settings from a TOML document.
    ///
    /// Missing optional keys take their defaults; a missing or invalid
    /// `reply_queue_name` fails with [`Error::Settings`].
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(300)
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
