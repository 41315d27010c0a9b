//! Gateway configuration: backend definitions and routing policies
//! (spec §6.4, expanded with a concrete on-disk shape in SPEC_FULL §6.6).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::identifier::BackendId;

/// Top-level gateway configuration, as loaded from a TOML file layered
/// with `GOBLIN_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub servers: Vec<BackendDef>,
    #[serde(default)]
    pub policies: Policies,
}

impl GatewayConfig {
    /// Load and validate configuration from a file path.
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("GOBLIN").separator("__"))
            .build()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;

        let cfg: Self = settings
            .try_deserialize()
            .map_err(|e| GatewayError::configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate backend id grammar and uniqueness at load time. A
    /// malformed id is a config-load error, never a runtime
    /// `RoutingError` (spec's sync algorithm assumes ids are already
    /// well-formed by the time the Registry sees them).
    pub fn validate(&self) -> GatewayResult<()> {
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            let id = BackendId::new(server.id.clone())
                .map_err(|e| GatewayError::configuration_with_key(e.to_string(), "servers[].id"))?;
            if !seen.insert(id) {
                return Err(GatewayError::configuration_with_key(
                    format!("duplicate backend id '{}'", server.id),
                    "servers[].id",
                ));
            }
            if let TransportDef::Http { url, .. } | TransportDef::Sse { url, .. } = &server.transport {
                url::Url::parse(url).map_err(|e| {
                    GatewayError::configuration_with_key(
                        format!("backend '{}' has an invalid url '{url}': {e}", server.id),
                        "servers[].url",
                    )
                })?;
            }
        }
        Ok(())
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &BackendDef> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

/// One backend's transport definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDef {
    pub id: String,
    #[serde(flatten)]
    pub transport: TransportDef,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-backend override of `policies.normalize_paths`.
    pub normalize_paths: Option<bool>,
}

fn default_true() -> bool {
    true
}

/// Backend transport configuration, tagged by `transport` in the config
/// file (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportDef {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        auth_token: Option<String>,
    },
}

impl TransportDef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
        }
    }
}

/// Routing policies applied across all backends unless overridden
/// per-backend (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Policies {
    pub default_timeout_ms: u64,
    pub output_size_limit_bytes: usize,
    pub normalize_paths: bool,
    pub metadata_cache_ttl_ms: u64,
}

impl Policies {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_cache_ttl_ms)
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            output_size_limit_bytes: 65_536,
            normalize_paths: false,
            metadata_cache_ttl_ms: 30_000,
        }
    }
}
