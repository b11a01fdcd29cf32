use crate::core::{Result, StageError};
use std::str::FromStr;
use std::time::Duration;

/// Unit-of-work configuration
#[derive(Debug, Clone)]
pub struct UnitOfWorkConfig {
    /// Label attached to every log event of the unit
    pub label: String,

    /// Maximum number of executor groups running at the same time
    pub max_parallel_groups: usize,

    /// Per-command executor timeout
    pub executor_timeout: Option<Duration>,

    /// Flush queued domain events after a successful commit
    pub flush_events: bool,
}

impl UnitOfWorkConfig {
    pub fn new() -> Self {
        Self {
            label: "default".to_string(),
            max_parallel_groups: 8,
            executor_timeout: None,
            flush_events: true,
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn max_parallel_groups(mut self, max: usize) -> Self {
        self.max_parallel_groups = max;
        self
    }

    pub fn executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = Some(timeout);
        self
    }

    pub fn flush_events(mut self, flush: bool) -> Self {
        self.flush_events = flush;
        self
    }

    /// Parse from an option string
    ///
    /// Format: "label=orders;max_parallel_groups=4;executor_timeout_ms=500;flush_events=false"
    pub fn from_options(options: &str) -> Result<Self> {
        let mut config = Self::new();

        for pair in options.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| StageError::Config(format!("expected key=value, got '{}'", pair)))?;
            let value = value.trim();
            match key.trim() {
                "label" => config.label = value.to_string(),
                "max_parallel_groups" => config.max_parallel_groups = parse(key, value)?,
                "executor_timeout_ms" => {
                    config.executor_timeout = Some(Duration::from_millis(parse(key, value)?))
                }
                "flush_events" => config.flush_events = parse(key, value)?,
                other => return Err(StageError::Config(format!("unknown option '{}'", other))),
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_groups == 0 {
            return Err(StageError::Config("max_parallel_groups must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse<V: FromStr>(key: &str, value: &str) -> Result<V> {
    value
        .parse()
        .map_err(|_| StageError::Config(format!("invalid value '{}' for '{}'", value, key)))
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for UnitOfWorkConfig {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_options(s)
    }
}
