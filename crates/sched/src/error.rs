use crate::config::ConfigError;

/// Errors from building or driving the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("failed to build {pool} pool: {source}")]
    PoolBuild {
        pool: &'static str,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
    #[error("a tick is already in flight")]
    TickInFlight,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
