//! Isolation configuration (TOML)
//!
//! ```toml
//! [strategy]
//! datasource = "session"   # or "routing"
//! stream = "single"        # or "topic"
//!
//! [cache]
//! real_prefix = "real:"
//! test_ttl_secs = 600
//! ```
//!
//! Every key has a default, so an empty file is a valid configuration.

use crate::error::ConfigError;
use loadiso_stream::SecurityProtocol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How relational access is isolated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceStrategy {
    /// One role, classification stamped on the session
    #[default]
    Session,
    /// Dedicated real and test roles, pool picked per acquisition
    Routing,
}

/// How events are isolated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStrategy {
    /// One shared stream, classification in metadata
    #[default]
    Single,
    /// Separate credentialed streams
    Topic,
}

/// `[strategy]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    /// Datasource strategy
    pub datasource: DatasourceStrategy,
    /// Stream strategy
    pub stream: StreamStrategy,
}

/// `[gate]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    /// Upper bound on one request, `0` for none
    pub request_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

/// `[datasource]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasourceConfig {
    /// Connections per pool
    pub pool_size: usize,
    /// Password shared by the database roles
    pub password: String,
    /// Role of the session strategy
    pub app_user: String,
    /// Production role of the routing strategy
    pub real_user: String,
    /// Load-test role of the routing strategy
    pub test_user: String,
    /// Superuser for seeding
    pub admin_user: String,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            pool_size: loadiso_store::DEFAULT_POOL_SIZE,
            password: "secret".to_string(),
            app_user: loadiso_store::APP_USER.to_string(),
            real_user: loadiso_store::APP_REAL_USER.to_string(),
            test_user: loadiso_store::APP_TEST_USER.to_string(),
            admin_user: loadiso_store::DB_ADMIN_USER.to_string(),
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Password shared by the cache users
    pub password: String,
    /// Production key prefix
    pub real_prefix: String,
    /// Load-test key prefix
    pub test_prefix: String,
    /// Production entry lifetime
    pub real_ttl_secs: u64,
    /// Load-test entry lifetime
    pub test_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            password: "secret".to_string(),
            real_prefix: loadiso_cache::REAL_PREFIX.to_string(),
            test_prefix: loadiso_cache::TEST_PREFIX.to_string(),
            real_ttl_secs: loadiso_cache::REAL_TTL.as_secs(),
            test_ttl_secs: loadiso_cache::TEST_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Production entry lifetime
    #[must_use]
    pub fn real_ttl(&self) -> Duration {
        Duration::from_secs(self.real_ttl_secs)
    }

    /// Load-test entry lifetime
    #[must_use]
    pub fn test_ttl(&self) -> Duration {
        Duration::from_secs(self.test_ttl_secs)
    }
}

/// `[stream]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// `PLAINTEXT` or `SASL_PLAINTEXT`
    pub security_protocol: String,
    /// Password shared by the stream principals
    pub password: String,
    /// Shared stream of the single strategy
    pub shared_topic: String,
    /// Consumer group of the shared stream
    pub shared_group: String,
    /// Production stream of the topic strategy
    pub real_topic: String,
    /// Load-test stream of the topic strategy
    pub test_topic: String,
    /// Consumer group of the production stream
    pub real_group: String,
    /// Consumer group of the load-test stream
    pub test_group: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            security_protocol: SecurityProtocol::SaslPlaintext.as_str().to_string(),
            password: "secret".to_string(),
            shared_topic: loadiso_stream::SHARED_TOPIC.to_string(),
            shared_group: loadiso_stream::SHARED_GROUP.to_string(),
            real_topic: loadiso_stream::REAL_TOPIC.to_string(),
            test_topic: loadiso_stream::TEST_TOPIC.to_string(),
            real_group: loadiso_stream::REAL_GROUP.to_string(),
            test_group: loadiso_stream::TEST_GROUP.to_string(),
        }
    }
}

impl StreamConfig {
    /// Parsed security protocol
    ///
    /// # Errors
    /// - `ConfigError::ValidationFailed` for unknown protocols
    pub fn protocol(&self) -> Result<SecurityProtocol, ConfigError> {
        self.security_protocol
            .parse()
            .map_err(|err: loadiso_stream::StreamError| ConfigError::ValidationFailed(err.to_string()))
    }
}

/// Complete isolation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationConfig {
    /// `[strategy]`
    pub strategy: StrategyConfig,
    /// `[gate]`
    pub gate: GateConfig,
    /// `[datasource]`
    pub datasource: DatasourceConfig,
    /// `[cache]`
    pub cache: CacheConfig,
    /// `[stream]`
    pub stream: StreamConfig,
}

impl IsolationConfig {
    /// Load and validate a TOML file
    ///
    /// # Errors
    /// - `ConfigError::ReadFailed` / `ParseFailed` for unreadable files
    /// - `ConfigError::ValidationFailed` if an invariant does not hold
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.into(), e))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(path.into(), e))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "loaded isolation config");
        Ok(config)
    }

    /// Parse and validate inline TOML
    ///
    /// # Errors
    /// - `ConfigError::InvalidToml` for malformed input
    /// - `ConfigError::ValidationFailed` if an invariant does not hold
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// - `ConfigError::SerializeFailed` if rendering fails
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Per-request time limit, if any
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.gate.request_timeout_ms > 0).then(|| Duration::from_millis(self.gate.request_timeout_ms))
    }

    /// Check startup invariants
    ///
    /// # Errors
    /// - `ConfigError::ValidationFailed` naming the first broken invariant
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasource.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "datasource.pool_size must be > 0".to_string(),
            ));
        }
        let ds = &self.datasource;
        let roles = [
            ("app_user", &ds.app_user),
            ("real_user", &ds.real_user),
            ("test_user", &ds.test_user),
            ("admin_user", &ds.admin_user),
        ];
        for (i, (first, a)) in roles.iter().enumerate() {
            if let Some((second, _)) = roles[i + 1..].iter().find(|(_, b)| a == b) {
                return Err(ConfigError::ValidationFailed(format!(
                    "datasource.{first} and datasource.{second} are both '{a}'"
                )));
            }
        }

        let (real, test) = (&self.cache.real_prefix, &self.cache.test_prefix);
        if real.is_empty() || test.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cache prefixes must not be empty".to_string(),
            ));
        }
        if real.starts_with(test.as_str()) || test.starts_with(real.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "cache prefixes '{real}' and '{test}' overlap"
            )));
        }
        if self.cache.real_ttl_secs == 0 || self.cache.test_ttl_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "cache TTLs must be > 0".to_string(),
            ));
        }

        self.stream.protocol()?;
        let stream = &self.stream;
        if [&stream.shared_topic, &stream.real_topic, &stream.test_topic]
            .iter()
            .any(|t| t.is_empty())
        {
            return Err(ConfigError::ValidationFailed(
                "stream topic names must not be empty".to_string(),
            ));
        }
        if stream.real_topic == stream.test_topic {
            return Err(ConfigError::ValidationFailed(format!(
                "stream.real_topic and stream.test_topic are both '{}'",
                stream.real_topic
            )));
        }
        if stream.real_group == stream.test_group {
            return Err(ConfigError::ValidationFailed(
                "stream.real_group and stream.test_group must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the datasource strategy
    #[must_use]
    pub fn with_datasource_strategy(mut self, strategy: DatasourceStrategy) -> Self {
        self.strategy.datasource = strategy;
        self
    }

    /// Set the stream strategy
    #[must_use]
    pub fn with_stream_strategy(mut self, strategy: StreamStrategy) -> Self {
        self.strategy.stream = strategy;
        self
    }

    /// Set the stream security protocol
    #[must_use]
    pub fn with_security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.stream.security_protocol = protocol.as_str().to_string();
        self
    }

    /// Set the pool size of every datasource pool
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.datasource.pool_size = pool_size;
        self
    }

    /// Set cache entry lifetimes
    #[must_use]
    pub fn with_cache_ttls(mut self, real: Duration, test: Duration) -> Self {
        self.cache.real_ttl_secs = real.as_secs();
        self.cache.test_ttl_secs = test.as_secs();
        self
    }

    /// Set the per-request time limit, `None` for unbounded
    #[must_use]
    pub fn with_request_timeout(mut self, limit: Option<Duration>) -> Self {
        self.gate.request_timeout_ms =
            limit.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = IsolationConfig::from_toml_str("").unwrap();
        assert_eq!(config, IsolationConfig::default());
        assert_eq!(config.strategy.datasource, DatasourceStrategy::Session);
        assert_eq!(config.strategy.stream, StreamStrategy::Single);
        assert_eq!(config.cache.real_ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.test_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn strategies_parse() {
        let config = IsolationConfig::from_toml_str(
            r#"
            [strategy]
            datasource = "routing"
            stream = "topic"

            [stream]
            security_protocol = "PLAINTEXT"
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy.datasource, DatasourceStrategy::Routing);
        assert_eq!(config.strategy.stream, StreamStrategy::Topic);
        assert_eq!(config.stream.protocol().unwrap(), SecurityProtocol::Plaintext);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            IsolationConfig::from_toml_str("[cache]\nprefix = \"x\"\n"),
            Err(ConfigError::InvalidToml(_))
        ));
    }

    #[test]
    fn overlapping_prefixes_are_rejected() {
        let err = IsolationConfig::from_toml_str(
            "[cache]\nreal_prefix = \"app:\"\ntest_prefix = \"app:\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));

        let err = IsolationConfig::from_toml_str(
            "[cache]\nreal_prefix = \"a:\"\ntest_prefix = \"a:test:\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn equal_topics_are_rejected() {
        let err = IsolationConfig::from_toml_str(
            "[stream]\nreal_topic = \"events\"\ntest_topic = \"events\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("'events'"));
    }

    #[test]
    fn database_roles_must_be_distinct() {
        let err = IsolationConfig::from_toml_str(
            "[datasource]\nadmin_user = \"app_test_user\"\n",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: datasource.test_user and datasource.admin_user are both 'app_test_user'"
        );

        let mut config = IsolationConfig::default();
        config.datasource.app_user = config.datasource.real_user.clone();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        config.datasource.app_user = "app_user".to_string();
        config.datasource.test_user = config.datasource.real_user.clone();
        assert!(config.validate().unwrap_err().to_string().contains("real_user"));

        assert!(IsolationConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        assert!(IsolationConfig::from_toml_str("[stream]\nsecurity_protocol = \"SSL\"\n").is_err());
    }

    #[test]
    fn toml_round_trip_preserves_strategy() {
        let config = IsolationConfig::default()
            .with_datasource_strategy(DatasourceStrategy::Routing)
            .with_request_timeout(None);
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("datasource = \"routing\""));
        assert_eq!(IsolationConfig::from_toml_str(&rendered).unwrap(), config);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadiso.toml");
        std::fs::write(&path, "[datasource]\npool_size = 4\n").unwrap();
        assert_eq!(IsolationConfig::load(&path).unwrap().datasource.pool_size, 4);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            IsolationConfig::load(&missing),
            Err(ConfigError::ReadFailed(..))
        ));
    }
}
