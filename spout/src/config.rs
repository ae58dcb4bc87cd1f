use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::source::ConsumptionMode;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// How the broker client schedules deliveries: `ordered` or `concurrent`.
    #[envconfig(default = "concurrent")]
    pub consumption_mode: ConsumptionMode,

    /// Fail verdicts after which a batch is dropped. Negative = unlimited.
    #[envconfig(default = "5")]
    pub max_failures: i32,

    /// Optional bound on the producer's completion wait. Unset preserves the
    /// unbounded wait: a stalled sink then blocks its partition indefinitely.
    #[envconfig(from = "COMPLETION_TIMEOUT_MS")]
    pub completion_timeout: Option<EnvMsDuration>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
pub fn test_config(max_failures: i32, completion_timeout: Option<time::Duration>) -> Config {
    Config {
        consumption_mode: ConsumptionMode::Concurrent,
        max_failures,
        completion_timeout: completion_timeout.map(EnvMsDuration),
    }
}
