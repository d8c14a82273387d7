use std::env;
use std::str::FromStr;
use std::time::Duration;

use promtail_config_lib::resource::SNIPPET_FIELD;
use promtail_config_lib::{DocumentCodec, DocumentTarget, HandlerConfig};
use serde::Deserialize;
use tracing::warn;

/// Top-level promtail-config.toml configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub handler: HandlerSection,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct HandlerSection {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Run one last cycle after the HTTP server stopped.
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
}

/// Where the aggregated document lives.
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_target_namespace")]
    pub namespace: String,
    #[serde(default = "default_target_name")]
    pub name: String,
    #[serde(default = "default_target_field")]
    pub field: String,
    /// File holding a custom document header; the built-in one is used
    /// when unset.
    pub header_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Kubernetes,
    Sled,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kubernetes" | "kube" => Ok(Self::Kubernetes),
            "sled" => Ok(Self::Sled),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: BackendKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_api_server")]
    pub api_server: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_ca_path")]
    pub ca_path: String,
}

// ── Default value functions ──────────────────────────

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_initial_delay_secs() -> u64 {
    10
}

fn default_period_secs() -> u64 {
    30
}

fn default_flush_on_shutdown() -> bool {
    true
}

fn default_target_namespace() -> String {
    "loki".to_string()
}

fn default_target_name() -> String {
    "promtail".to_string()
}

fn default_target_field() -> String {
    SNIPPET_FIELD.to_string()
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Kubernetes
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_token_path() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_ca_path() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
        }
    }
}

impl Default for HandlerSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            period_secs: default_period_secs(),
            flush_on_shutdown: default_flush_on_shutdown(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            namespace: default_target_namespace(),
            name: default_target_name(),
            field: default_target_field(),
            header_file: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            data_dir: default_data_dir(),
            api_server: default_api_server(),
            token_path: default_token_path(),
            ca_path: default_ca_path(),
        }
    }
}

impl HandlerSection {
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            period: Duration::from_secs(self.period_secs),
        }
    }
}

impl TargetConfig {
    pub fn document_target(&self) -> DocumentTarget {
        DocumentTarget::new(&self.namespace, &self.name, &self.field)
    }

    /// Builds the codec, reading the custom header if one is configured.
    pub fn codec(&self) -> Result<DocumentCodec, Box<dyn std::error::Error>> {
        match &self.header_file {
            Some(path) => {
                let header = std::fs::read_to_string(path)
                    .map_err(|e| format!("failed to read header file {}: {}", path, e))?;
                Ok(DocumentCodec::with_header(&header)?)
            }
            None => Ok(DocumentCodec::default()),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults if the file
    /// doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path, error = %e, "Failed to parse config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PROMTAIL_CONFIG_NAMESPACE") {
            self.target.namespace = val;
        }

        if let Some(val) = lookup("PROMTAIL_CONFIG_NAME") {
            self.target.name = val;
        }

        if let Some(val) = lookup("PROMTAIL_CONFIG_BACKEND") {
            match val.parse() {
                Ok(kind) => self.backend.kind = kind,
                Err(e) => warn!(error = %e, "Ignoring PROMTAIL_CONFIG_BACKEND"),
            }
        }

        if let Some(val) = lookup("PROMTAIL_CONFIG_INITIAL_DELAY_SECS") {
            match val.parse() {
                Ok(secs) => self.handler.initial_delay_secs = secs,
                Err(_) => warn!(value = %val, "Ignoring PROMTAIL_CONFIG_INITIAL_DELAY_SECS"),
            }
        }

        if let Some(val) = lookup("PROMTAIL_CONFIG_PERIOD_SECS") {
            match val.parse() {
                Ok(secs) => self.handler.period_secs = secs,
                Err(_) => warn!(value = %val, "Ignoring PROMTAIL_CONFIG_PERIOD_SECS"),
            }
        }
    }
}
