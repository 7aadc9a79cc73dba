use thiserror::Error;

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("allocation spike tolerance must be a positive finite number, got {0}")]
    SpikeTolerance(f64),
    #[error("collection interval `{name}` must be finite, got {value}")]
    Interval { name: &'static str, value: f64 },
    #[error("`{0}` must be at least 1")]
    ZeroThreads(&'static str),
    #[error("`{0}` must be at least 1 Hz")]
    ZeroFrequency(&'static str),
    #[error("granule size {0} is not a power of two")]
    GranuleSize(usize),
    #[error("statistics interval must be non-zero")]
    StatisticsInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("driver port has been shut down")]
    Shutdown,
}

/// Raised at an abort point once the collection has been asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("collection aborted")]
pub struct CycleAborted;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn `{name}` thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("engine already started")]
    AlreadyStarted,
    #[error("engine is not running")]
    NotRunning,
    #[error("`{0}` cannot be requested from outside the collector")]
    UnsupportedCause(crate::cause::GcCause),
    #[error(transparent)]
    Driver(#[from] DriverError),
}
