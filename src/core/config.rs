use crate::core::errors::{Result, TesseraError};
use crate::transport::Codec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime configuration shared by every location of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of locations participating in the job
    pub locations: usize,

    // Aggregation
    /// Envelopes buffered per destination before the buffer is force-flushed
    pub aggregation_limit: usize,
    /// Payload bytes buffered per destination before the buffer is force-flushed
    pub aggregation_bytes: usize,
    /// Scheduler iterations between opportunistic flushes of all buffers
    pub flush_interval: usize,

    /// Serialization used for every payload crossing a location boundary
    pub codec: Codec,

    // Guards
    /// Maximum nesting of blocking calls that pump incoming messages
    pub max_pump_depth: usize,
    /// Abort a fence that has not converged after this many rounds
    pub max_fence_rounds: Option<u64>,

    // Location threads
    /// Stack size of each location thread (platform default when unset)
    pub stack_size: Option<usize>,
    /// Prefix of each location thread's name
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            locations: 1,
            aggregation_limit: 64,
            aggregation_bytes: 64 * 1024, // 64KB
            flush_interval: 16,
            codec: Codec::Bincode,
            max_pump_depth: 64,
            max_fence_rounds: None,
            stack_size: None,
            thread_name: "tessera-location".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create a new builder for RuntimeConfig
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Default configuration for a job of `locations` participants
    pub fn with_locations(locations: usize) -> Self {
        Self {
            locations,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.locations == 0 {
            return Err(TesseraError::configuration_field(
                "locations must be greater than 0",
                "locations",
            ));
        }
        if self.locations > u32::MAX as usize {
            return Err(TesseraError::configuration_field(
                "locations does not fit a task id",
                "locations",
            ));
        }
        if self.aggregation_limit == 0 {
            return Err(TesseraError::configuration_field(
                "aggregation_limit must be greater than 0",
                "aggregation_limit",
            ));
        }
        if self.aggregation_bytes == 0 {
            return Err(TesseraError::configuration_field(
                "aggregation_bytes must be greater than 0",
                "aggregation_bytes",
            ));
        }
        if self.flush_interval == 0 {
            return Err(TesseraError::configuration_field(
                "flush_interval must be greater than 0",
                "flush_interval",
            ));
        }
        if self.max_pump_depth == 0 {
            return Err(TesseraError::configuration_field(
                "max_pump_depth must be greater than 0",
                "max_pump_depth",
            ));
        }
        if let Some(rounds) = self.max_fence_rounds {
            // a fence needs at least a first round and a confirming one
            if rounds < 2 {
                return Err(TesseraError::configuration_field(
                    "max_fence_rounds must be at least 2",
                    "max_fence_rounds",
                ));
            }
        }
        if self.thread_name.is_empty() {
            return Err(TesseraError::configuration_field(
                "thread_name cannot be empty",
                "thread_name",
            ));
        }
        Ok(())
    }

    /// Small buffers and a divergence guard, so ordering bugs show up early
    pub fn development() -> Self {
        Self {
            locations: 2,
            aggregation_limit: 1,
            flush_interval: 1,
            codec: Codec::Json,
            max_fence_rounds: Some(10_000),
            ..Default::default()
        }
    }

    /// Large aggregation buffers for message-heavy jobs
    pub fn high_throughput() -> Self {
        Self {
            aggregation_limit: 4096,
            aggregation_bytes: 4 * 1024 * 1024, // 4MB
            flush_interval: 256,
            stack_size: Some(8 * 1024 * 1024),
            ..Default::default()
        }
    }

    /// Parse a YAML document; omitted fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }
}

/// Builder for RuntimeConfig
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl Default for RuntimeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the number of locations
    pub fn locations(mut self, locations: usize) -> Self {
        self.config.locations = locations;
        self
    }

    /// Set aggregation thresholds
    pub fn aggregation(mut self, envelopes: usize, bytes: usize) -> Self {
        self.config.aggregation_limit = envelopes;
        self.config.aggregation_bytes = bytes;
        self
    }

    /// Set scheduler iterations between opportunistic flushes
    pub fn flush_interval(mut self, interval: usize) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Set the payload codec
    pub fn codec(mut self, codec: Codec) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn max_pump_depth(mut self, depth: usize) -> Self {
        self.config.max_pump_depth = depth;
        self
    }

    pub fn max_fence_rounds(mut self, rounds: Option<u64>) -> Self {
        self.config.max_fence_rounds = rounds;
        self
    }

    /// Set location thread stack size
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
        assert!(RuntimeConfig::development().validate().is_ok());
        assert!(RuntimeConfig::high_throughput().validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let config = RuntimeConfig {
            locations: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(TesseraError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("locations"))
            }
            other => panic!("expected configuration error, got {:?}", other),
        }

        let config = RuntimeConfig {
            max_fence_rounds: Some(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .locations(4)
            .aggregation(8, 1024)
            .codec(Codec::Json)
            .max_fence_rounds(Some(100))
            .build()
            .unwrap();

        assert_eq!(config.locations, 4);
        assert_eq!(config.aggregation_limit, 8);
        assert_eq!(config.aggregation_bytes, 1024);
        assert_eq!(config.codec, Codec::Json);
        assert_eq!(config.max_fence_rounds, Some(100));

        assert!(RuntimeConfig::builder().flush_interval(0).build().is_err());
    }

    #[test]
    fn test_yaml_config() {
        let config = RuntimeConfig::from_yaml_str(
            "locations: 3\ncodec: json\naggregation_limit: 2\n",
        )
        .unwrap();
        assert_eq!(config.locations, 3);
        assert_eq!(config.codec, Codec::Json);
        assert_eq!(config.aggregation_limit, 2);
        assert_eq!(config.flush_interval, RuntimeConfig::default().flush_interval);

        assert!(RuntimeConfig::from_yaml_str("locations: 0\n").is_err());
    }

    #[test]
    fn test_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        std::fs::write(&path, "locations: 5\nmax_pump_depth: 8\n").unwrap();

        let config = RuntimeConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.locations, 5);
        assert_eq!(config.max_pump_depth, 8);

        assert!(RuntimeConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
