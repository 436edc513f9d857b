//! Engine configuration.

/// Tunables shared by the buffer store, step runtime, and scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-execution cap on buffered records (C2 guard).
    pub max_buffered_records: i64,
    /// Maximum concurrently running steps.
    pub worker_pool_size: usize,
    /// Chunk size when a node's config does not set one.
    pub default_chunk_size: usize,
    /// Delay between step retry attempts, milliseconds.
    pub retry_backoff_ms: u64,
    /// Strict plan validation (implicit joins, fork/join pairing).
    pub strict_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffered_records: 50_000,
            worker_pool_size: (num_cpus::get() * 2).max(4),
            default_chunk_size: 1_000,
            retry_backoff_ms: 250,
            strict_validation: true,
        }
    }
}

impl EngineConfig {
    /// Read overrides from the environment, keeping defaults elsewhere.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("WEFT_MAX_BUFFERED_RECORDS") {
            config.max_buffered_records = v;
        }
        if let Some(v) = env_parse("WEFT_WORKER_POOL_SIZE") {
            config.worker_pool_size = v;
        }
        if let Some(v) = env_parse("WEFT_DEFAULT_CHUNK_SIZE") {
            config.default_chunk_size = v;
        }
        if let Some(v) = env_parse("WEFT_RETRY_BACKOFF_MS") {
            config.retry_backoff_ms = v;
        }
        if let Some(v) = env_parse("WEFT_STRICT_VALIDATION") {
            config.strict_validation = v;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_buffered_records, 50_000);
        assert_eq!(config.default_chunk_size, 1_000);
        assert!(config.worker_pool_size >= 4);
        assert!(config.strict_validation);
    }
}
