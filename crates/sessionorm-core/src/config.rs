//! Session factory configuration.
//!
//! A `Configuration` names the storage to connect to, the schema action to
//! run at startup and the entity types to map. It can be assembled in code
//! or loaded from a JSON resource:
//!
//! ```json
//! {
//!   "connection": { "url": "file://data/school.json", "username": "sa" },
//!   "settings": { "schema_action": "update", "log_statements": true }
//! }
//! ```
//!
//! Entity types are always registered in code with `register::<E>()`.

use crate::Result;
use crate::descriptor::EntityDescriptor;
use crate::entity::Entity;
use crate::error::{ConfigError, Error};
use crate::registry::EntityRegistry;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable naming the configuration resource used by `Configuration::configure`.
pub const CONFIG_ENV_VAR: &str = "SESSIONORM_CONFIG";

/// Resource read by `Configuration::configure` when the environment variable is unset.
pub const DEFAULT_CONFIG_FILE: &str = "sessionorm.json";

const URL_PATTERN: &str = r"^(?P<scheme>[a-z][a-z0-9+.-]*)://(?P<target>.+)$";

/// Storage dialect; selects the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// In-process tables, lost when the factory closes (`memory://name`)
    Memory,
    /// Tables persisted to a JSON snapshot file (`file://path`)
    JsonFile,
}

impl Dialect {
    pub const fn name(self) -> &'static str {
        match self {
            Dialect::Memory => "memory",
            Dialect::JsonFile => "json-file",
        }
    }

    pub const fn scheme(self) -> &'static str {
        match self {
            Dialect::Memory => "memory",
            Dialect::JsonFile => "file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "memory" => Some(Dialect::Memory),
            "json-file" | "json_file" | "jsonfile" => Some(Dialect::JsonFile),
            _ => None,
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "memory" | "mem" => Some(Dialect::Memory),
            "file" => Some(Dialect::JsonFile),
            _ => None,
        }
    }
}

/// What to do with mapped tables when a factory is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaAction {
    /// Leave storage untouched
    None,
    /// Drop and recreate every mapped table
    Create,
    /// Like `Create`, and drop the tables again when the factory closes
    CreateDrop,
    /// Create missing tables and add missing columns
    #[default]
    Update,
    /// Fail unless every mapped table and column already exists
    Validate,
}

impl SchemaAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(SchemaAction::None),
            "create" => Some(SchemaAction::Create),
            "create-drop" | "create_drop" => Some(SchemaAction::CreateDrop),
            "update" => Some(SchemaAction::Update),
            "validate" => Some(SchemaAction::Validate),
            _ => None,
        }
    }
}

/// Connection parameters for the storage.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connection URL: `memory://<name>` or `file://<path>`
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Explicit dialect; inferred from the URL scheme when absent
    pub dialect: Option<Dialect>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dialect", &self.dialect)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Parse the URL and reconcile it with the explicit dialect.
    ///
    /// Returns the dialect and the scheme-specific target (a store name or
    /// a file path).
    #[allow(clippy::result_large_err)]
    pub fn resolve(&self) -> Result<(Dialect, String)> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(Error::config("connection url is missing"));
        }

        let regex = url_regex()?;
        let caps = regex
            .captures(url)
            .ok_or_else(|| Error::config(format!("malformed connection url '{}'", url)))?;
        let scheme = &caps["scheme"];
        let target = caps["target"].to_string();

        let from_url = Dialect::from_scheme(scheme).ok_or_else(|| {
            Error::config(format!("unsupported connection url scheme '{}'", scheme))
        })?;

        match self.dialect {
            Some(dialect) if dialect != from_url => Err(Error::config(format!(
                "dialect '{}' does not match url scheme '{}'",
                dialect.name(),
                scheme
            ))),
            _ => Ok((from_url, target)),
        }
    }
}

#[allow(clippy::result_large_err)]
fn url_regex() -> Result<&'static Regex> {
    static URL: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(URL_PATTERN))
        .as_ref()
        .map_err(|e| {
            Error::Configuration(ConfigError {
                message: "connection url pattern failed to compile".to_string(),
                source: Some(Box::new(e.clone())),
            })
        })
}

/// Behavioural settings of a session factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema_action: SchemaAction,
    /// Log every write applied at commit at `info` level
    pub log_statements: bool,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_action(mut self, action: SchemaAction) -> Self {
        self.schema_action = action;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }
}

/// The on-disk shape of a configuration resource.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigResource {
    connection: ConnectionConfig,
    #[serde(default)]
    settings: Settings,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    type_id: TypeId,
    descriptor: &'static EntityDescriptor,
}

/// Everything needed to build a session factory.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    connection: ConnectionConfig,
    settings: Settings,
    entities: Vec<Registration>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the default resource: the file named by `SESSIONORM_CONFIG`,
    /// or `sessionorm.json` in the working directory.
    #[allow(clippy::result_large_err)]
    pub fn configure() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::from_file(path)
    }

    #[allow(clippy::result_large_err)]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(ConfigError {
                message: format!("cannot read configuration resource '{}'", path.display()),
                source: Some(Box::new(e)),
            })
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration resource");
        Self::from_json_str(&text)
    }

    #[allow(clippy::result_large_err)]
    pub fn from_json_str(text: &str) -> Result<Self> {
        let resource: ConfigResource = serde_json::from_str(text).map_err(|e| {
            Error::Configuration(ConfigError {
                message: format!("malformed configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        Ok(Self {
            connection: resource.connection,
            settings: resource.settings,
            entities: Vec::new(),
        })
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Shorthand for `connection(ConnectionConfig::new(url))`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.connection.url = url.into();
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schema_action(mut self, action: SchemaAction) -> Self {
        self.settings.schema_action = action;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.settings.log_statements = enabled;
        self
    }

    /// Map an entity type. Descriptors are validated when the factory is built.
    pub fn register<E: Entity>(mut self) -> Self {
        let type_id = TypeId::of::<E>();
        if !self.entities.iter().any(|r| r.type_id == type_id) {
            self.entities.push(Registration {
                type_id,
                descriptor: E::descriptor(),
            });
        }
        self
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn current_settings(&self) -> Settings {
        self.settings
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Validate every registered descriptor into a registry.
    #[allow(clippy::result_large_err)]
    pub fn build_registry(&self) -> Result<EntityRegistry> {
        let mut registry = EntityRegistry::new();
        for registration in &self.entities {
            registry.register_descriptor(registration.type_id, registration.descriptor)?;
        }
        Ok(registry)
    }
}
