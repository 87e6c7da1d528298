use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_CONCURRENCY: usize = 1;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 500;

const ENV_MAX_CONCURRENCY: &str = "PPLNS_MAX_CONCURRENCY";
const ENV_POLLING_MS: &str = "PPLNS_POLLING_MS";
const ENV_METRICS_INTERVAL_SECS: &str = "PPLNS_METRICS_INTERVAL_SECS";

/// How an input stream decides when to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    /// Poll on a periodic timer.
    Interval(Duration),
    /// Never poll on a timer; callers drive [`crate::InputStream::poll`] themselves.
    Manual,
}

impl PollingMode {
    /// Maps a millisecond value onto a polling mode; negative values select manual polling.
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self::Manual
        } else {
            Self::Interval(Duration::from_millis(millis as u64))
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Interval(period) => Some(*period),
            Self::Manual => None,
        }
    }
}

impl Default for PollingMode {
    fn default() -> Self {
        Self::Interval(Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS))
    }
}

/// Runtime configuration for an input stream.
///
/// Construct through [`StreamConfig::builder`] or [`StreamConfig::new`] so the
/// values are validated before a stream observes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    max_concurrency: usize,
    polling: PollingMode,
    metrics_interval: Duration,
}

pub struct StreamConfigParams {
    pub max_concurrency: usize,
    pub polling: PollingMode,
    pub metrics_interval: Duration,
}

impl StreamConfig {
    pub fn builder() -> StreamConfigBuilder {
        StreamConfigBuilder::default()
    }

    pub fn new(params: StreamConfigParams) -> Result<Self> {
        let StreamConfigParams {
            max_concurrency,
            polling,
            metrics_interval,
        } = params;

        let config = Self {
            max_concurrency,
            polling,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `PPLNS_MAX_CONCURRENCY`, `PPLNS_POLLING_MS` (negative for manual
    /// polling) and `PPLNS_METRICS_INTERVAL_SECS`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(value) = parse_env::<usize>(ENV_MAX_CONCURRENCY)? {
            builder = builder.max_concurrency(value);
        }
        if let Some(value) = parse_env::<i64>(ENV_POLLING_MS)? {
            builder = builder.polling(PollingMode::from_millis(value));
        }
        if let Some(value) = parse_env::<u64>(ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(value));
        }

        builder.build()
    }

    /// Number of processor invocations allowed in flight before polling pauses.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn polling(&self) -> PollingMode {
        self.polling
    }

    /// Interval used by the metrics reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be greater than 0");
        }

        if let PollingMode::Interval(period) = self.polling {
            if period.is_zero() {
                bail!("polling interval must be greater than 0; use manual polling instead");
            }
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            polling: PollingMode::default(),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StreamConfigBuilder {
    max_concurrency: Option<usize>,
    polling: Option<PollingMode>,
    metrics_interval: Option<Duration>,
}

impl StreamConfigBuilder {
    pub fn max_concurrency(mut self, count: usize) -> Self {
        self.max_concurrency = Some(count);
        self
    }

    pub fn polling(mut self, mode: PollingMode) -> Self {
        self.polling = Some(mode);
        self
    }

    pub fn polling_interval(self, interval: Duration) -> Self {
        self.polling(PollingMode::Interval(interval))
    }

    pub fn manual_polling(self) -> Self {
        self.polling(PollingMode::Manual)
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<StreamConfig> {
        StreamConfig::new(StreamConfigParams {
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            polling: self.polling.unwrap_or_default(),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        })
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value: {raw:?}"))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {name}")),
    }
}
