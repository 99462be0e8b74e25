//! # Configuration File
//!
//! TOML layout read by `ev-watch`:
//!
//! ```toml
//! [target]
//! host = "dc01.corp.example"
//! # port = 49667            # resolved through the endpoint mapper when absent
//! auth_level = "privacy"     # or "integrity"
//!
//! [credentials]
//! domain = "CORP"
//! user = "svc-events"
//! password_env = "EV_PASSWORD"
//!
//! [subscription]
//! path = "Security"
//! filter = "*"
//!
//! [watcher]
//! requested_records = 5
//! pull_timeout_ms = 15000
//! wait_timeout_ms = 120000
//! ```
//!
//! Only `[target]` and `[credentials]` are required. Missing keys take the
//! library defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ev_01_endpoint_mapper::MapperConfig;
use ev_02_rpc_transport::{AuthLevel, ConnectionConfig};
use ev_03_session_security::Credentials;
use ev_04_event_subscription::{EventLogQuery, SessionConfig, SubscriptionRequest, WatcherConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target: TargetSection,
    pub credentials: CredentialsSection,
    #[serde(default)]
    pub subscription: SubscriptionSection,
    #[serde(default)]
    pub watcher: WatcherSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub mapper: MapperSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevelName {
    Integrity,
    #[default]
    Privacy,
}

impl From<AuthLevelName> for AuthLevel {
    fn from(name: AuthLevelName) -> Self {
        match name {
            AuthLevelName::Integrity => AuthLevel::Integrity,
            AuthLevelName::Privacy => AuthLevel::Privacy,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub host: String,
    pub port: Option<u16>,
    #[serde(default)]
    pub auth_level: AuthLevelName,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsSection {
    #[serde(default)]
    pub domain: String,
    pub user: String,
    /// Inline password. `password_env` wins when both are set.
    pub password: Option<String>,
    /// Name of the environment variable holding the password.
    pub password_env: Option<String>,
    #[serde(default)]
    pub workstation: String,
}

impl std::fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("workstation", &self.workstation)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionSection {
    pub path: Option<String>,
    pub filter: Option<String>,
    #[serde(default)]
    pub read_existing: bool,
    #[serde(default)]
    pub reverse: bool,
    pub bookmark: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatcherSection {
    pub requested_records: Option<u32>,
    pub pull_timeout_ms: Option<u64>,
    pub wait_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub max_frag: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperSection {
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

pub const DEFAULT_PATH: &str = "Security";
pub const DEFAULT_FILTER: &str = "*";

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Resolves the password: the named environment variable, else the
    /// inline value.
    pub fn password(&self, var: impl Fn(&str) -> Option<String>) -> Result<String> {
        let creds = &self.credentials;
        if let Some(name) = &creds.password_env {
            return var(name).with_context(|| format!("Environment variable {} is not set", name));
        }
        match &creds.password {
            Some(password) => Ok(password.clone()),
            None => bail!("credentials need either password or password_env"),
        }
    }

    pub fn session_config(&self, password: String) -> Result<SessionConfig> {
        let creds = &self.credentials;
        let credentials = Credentials::new(creds.domain.clone(), creds.user.clone(), password)
            .with_workstation(creds.workstation.clone());

        let mut config = SessionConfig::new(self.target.host.clone(), credentials)
            .with_auth_level(self.target.auth_level.into())
            .with_connection(self.connection_config())
            .with_mapper(self.mapper_config());
        if let Some(port) = self.target.port {
            config = config.with_port(port);
        }
        config.validate().context("Invalid target configuration")?;
        Ok(config)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let section = &self.connection;
        let mut config = ConnectionConfig::default();
        if let Some(ms) = section.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.read_timeout_ms {
            config = config.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = section.max_frag {
            config = config.with_max_frag(max);
        }
        config
    }

    pub fn mapper_config(&self) -> MapperConfig {
        let section = &self.mapper;
        let defaults = MapperConfig::default();
        let connect = section
            .connect_timeout_ms
            .map_or(defaults.connect_timeout, Duration::from_millis);
        let read = section
            .read_timeout_ms
            .map_or(defaults.read_timeout, Duration::from_millis);
        let port = section.port.unwrap_or(defaults.port);
        defaults.with_port(port).with_timeouts(connect, read)
    }

    pub fn watcher_config(&self) -> Result<WatcherConfig> {
        let section = &self.watcher;
        let mut config = WatcherConfig::default();
        if let Some(records) = section.requested_records {
            config = config.with_requested_records(records);
        }
        if let Some(ms) = section.pull_timeout_ms {
            config = config.with_pull_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = section.wait_timeout_ms {
            config = config.with_wait_timeout(Duration::from_millis(ms));
        }
        config.validate().context("Invalid watcher configuration")?;
        Ok(config)
    }

    /// Builds the subscription request. Command-line values override the file.
    pub fn subscription_request(
        &self,
        read_existing: bool,
        bookmark: Option<String>,
    ) -> Result<SubscriptionRequest> {
        let section = &self.subscription;
        let mut query = EventLogQuery::new(
            section.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            section.filter.clone().unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        );
        if section.reverse {
            query = query.reversed();
        }

        let mut request =
            SubscriptionRequest::new(query).read_existing_events(read_existing || section.read_existing);
        if let Some(bookmark) = bookmark.or_else(|| section.bookmark.clone()) {
            request = request.with_bookmark(bookmark);
        }
        request.validate().context("Invalid subscription")?;
        Ok(request)
    }
}
