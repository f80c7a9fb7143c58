use std::time::Duration;

/// Which durability backend backs the Coordinator's Allocation Map
/// and, independently, the Remember-Entities store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStoreMode {
    Persistence,
    Ddata,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberEntitiesStore {
    EventSourced,
    Ddata,
    Custom,
}

/// Drop policy applied by the Region's per-shard buffer on overflow.
/// Default is `DropNewest` (see DESIGN.md for the tradeoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOverflowPolicy {
    DropNewest,
    DropOldest,
}

/// The full set of knobs governing how a type's sharding runs.
#[derive(Debug, Clone)]
pub struct ShardingConfig {
    pub role: Option<String>,
    pub data_center: Option<String>,
    pub state_store_mode: StateStoreMode,
    pub remember_entities: bool,
    pub remember_entities_store: RememberEntitiesStore,
    pub buffer_size: usize,
    pub buffer_overflow_policy: BufferOverflowPolicy,
    pub handoff_timeout: Duration,
    pub shard_start_timeout: Duration,
    pub coordinator_failure_backoff: Duration,
    pub retry_interval: Duration,
    pub rebalance_interval: Duration,
    pub least_shard_allocation_absolute_limit: u32,
    pub least_shard_allocation_relative_limit: f64,
    pub legacy_threshold: u32,
    pub legacy_max_simultaneous_rebalance: u32,
    pub majority_min_cap: usize,
    pub coordinator_singleton_override_role: bool,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        ShardingConfig {
            role: None,
            data_center: None,
            state_store_mode: StateStoreMode::Persistence,
            remember_entities: false,
            remember_entities_store: RememberEntitiesStore::EventSourced,
            buffer_size: 1000,
            buffer_overflow_policy: BufferOverflowPolicy::DropNewest,
            handoff_timeout: Duration::from_secs(60),
            shard_start_timeout: Duration::from_secs(10),
            coordinator_failure_backoff: Duration::from_secs(5),
            retry_interval: Duration::from_secs(2),
            rebalance_interval: Duration::from_secs(10),
            least_shard_allocation_absolute_limit: 3,
            least_shard_allocation_relative_limit: 0.1,
            legacy_threshold: 1,
            legacy_max_simultaneous_rebalance: 3,
            majority_min_cap: 1,
            coordinator_singleton_override_role: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("least-shard-allocation-relative-limit must be in (0, 1], got {0}")]
    RelativeLimitOutOfRange(String),
    #[error("least-shard-allocation-absolute-limit must be >= 1, got {0}")]
    AbsoluteLimitTooSmall(u32),
    #[error("majority-min-cap must be >= 1, got {0}")]
    MajorityMinCapTooSmall(usize),
}

impl ShardingConfig {
    pub fn builder() -> ShardingConfigBuilder {
        ShardingConfigBuilder::default()
    }

    /// Validate the cross-field constraints on this configuration. The
    /// interaction between `coordinator_singleton_override_role` and a
    /// proxy-only deployment is orthogonal by construction (see
    /// DESIGN.md) - a proxy region simply never runs a coordinator
    /// singleton, so there is nothing further to check here for it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.least_shard_allocation_relative_limit > 0.0
            && self.least_shard_allocation_relative_limit <= 1.0)
        {
            return Err(ConfigError::RelativeLimitOutOfRange(
                self.least_shard_allocation_relative_limit.to_string(),
            ));
        }
        if self.least_shard_allocation_absolute_limit < 1 {
            return Err(ConfigError::AbsoluteLimitTooSmall(
                self.least_shard_allocation_absolute_limit,
            ));
        }
        if self.majority_min_cap < 1 {
            return Err(ConfigError::MajorityMinCapTooSmall(self.majority_min_cap));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardingConfigBuilder {
    config: ShardingConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct ShardingConfigOverrides {
    role: Option<String>,
    data_center: Option<String>,
    remember_entities: Option<bool>,
    buffer_size: Option<usize>,
}

impl ShardingConfigBuilder {
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.config.role = Some(role.into());
        self
    }

    pub fn data_center(mut self, dc: impl Into<String>) -> Self {
        self.config.data_center = Some(dc.into());
        self
    }

    pub fn remember_entities(mut self, enabled: bool) -> Self {
        self.config.remember_entities = Some(enabled);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = Some(size);
        self
    }

    pub fn build(self) -> ShardingConfig {
        let mut config = ShardingConfig::default();
        if let Some(role) = self.config.role {
            config.role = Some(role);
        }
        if let Some(dc) = self.config.data_center {
            config.data_center = Some(dc);
        }
        if let Some(remember) = self.config.remember_entities {
            config.remember_entities = remember;
        }
        if let Some(size) = self.config.buffer_size {
            config.buffer_size = size;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ShardingConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_relative_limit() {
        let mut config = ShardingConfig::default();
        config.least_shard_allocation_relative_limit = 0.0;
        assert!(config.validate().is_err());

        config.least_shard_allocation_relative_limit = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ShardingConfig::builder()
            .role("shard-host")
            .remember_entities(true)
            .buffer_size(50)
            .build();

        assert_eq!(config.role.as_deref(), Some("shard-host"));
        assert!(config.remember_entities);
        assert_eq!(config.buffer_size, 50);
    }
}
