//! Configuration for the packet parser and flow cache.
//!
//! Plain config structs with sane defaults, validated by a `#[must_use]`
//! chained builder whose `.build()` returns `Result<_, ConfigError>`
//! rather than panicking on bad input.

/// Configuration error raised by [`CacheConfigBuilder::build`].
///
/// A small enum with a hand-written `Display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `cache_size` was zero or not a power of two.
    InvalidCacheSize(usize),
    /// `line_size` was zero, not a power of two, or did not evenly divide
    /// `cache_size`.
    InvalidLineSize { cache_size: usize, line_size: usize },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidCacheSize(size) => {
                write!(f, "invalid cache size {size}: must be a power of two")
            }
            ConfigError::InvalidLineSize {
                cache_size,
                line_size,
            } => write!(
                f,
                "invalid line size {line_size}: must be a power of two dividing cache size {cache_size}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Sizing and timeout configuration for [`crate::cache::FlowCache`].
///
/// Per `spec.md` §3/§4.2: `cache_size` must be a power of two; `line_size`
/// must be a power of two that divides `cache_size` evenly. Timeouts are
/// wall-clock seconds measured against packet-supplied timestamps, not
/// `Instant::now()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub cache_size: usize,
    pub line_size: usize,
    pub active_timeout_secs: u32,
    pub inactive_timeout_secs: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size: 1 << 17,
            line_size: 4,
            active_timeout_secs: 1800,
            inactive_timeout_secs: 15,
        }
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_line_size(mut self, line_size: usize) -> Self {
        self.config.line_size = line_size;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_active_timeout_secs(mut self, secs: u32) -> Self {
        self.config.active_timeout_secs = secs;
        self
    }

    #[must_use = "builder methods consume self and return a new builder; the return value must be used"]
    pub fn with_inactive_timeout_secs(mut self, secs: u32) -> Self {
        self.config.inactive_timeout_secs = secs;
        self
    }

    /// Validates the configuration and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCacheSize`] if `cache_size` is zero or
    /// not a power of two, or [`ConfigError::InvalidLineSize`] if
    /// `line_size` is zero, not a power of two, or does not evenly divide
    /// `cache_size`.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let c = self.config;
        if c.cache_size == 0 || !c.cache_size.is_power_of_two() {
            return Err(ConfigError::InvalidCacheSize(c.cache_size));
        }
        if c.line_size == 0
            || !c.line_size.is_power_of_two()
            || c.line_size > c.cache_size
            || c.cache_size % c.line_size != 0
        {
            return Err(ConfigError::InvalidLineSize {
                cache_size: c.cache_size,
                line_size: c.line_size,
            });
        }
        Ok(c)
    }
}

/// Bounded-pool configuration for [`crate::parser::PacketParser`].
///
/// Per `spec.md` §3: "configurable caps: default 5 per type, 40 total
/// links; on overflow the parser fails with `OutOfMemory`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    pub max_descriptors_per_type: usize,
    pub max_descriptors_total: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_descriptors_per_type: 5,
            max_descriptors_total: 40,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two_cache_size() {
        let err = CacheConfigBuilder::new()
            .with_cache_size(100)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidCacheSize(100));
    }

    #[test]
    fn rejects_line_size_not_dividing_cache_size() {
        let err = CacheConfigBuilder::new()
            .with_cache_size(16)
            .with_line_size(3)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLineSize { .. }));
    }

    #[test]
    fn accepts_valid_power_of_two_pair() {
        let cfg = CacheConfigBuilder::new()
            .with_cache_size(1024)
            .with_line_size(8)
            .with_active_timeout_secs(60)
            .with_inactive_timeout_secs(10)
            .build()
            .unwrap();
        assert_eq!(cfg.cache_size, 1024);
        assert_eq!(cfg.line_size, 8);
    }

    #[test]
    fn parser_config_defaults() {
        let cfg = ParserConfig::default();
        assert_eq!(cfg.max_descriptors_per_type, 5);
        assert_eq!(cfg.max_descriptors_total, 40);
    }
}
