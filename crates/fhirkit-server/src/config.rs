//! Application configuration: server bind address plus the set of tenants
//! this process serves (spec §3's Tenant data model). Loaded from an
//! optional TOML file with `FHIRKIT__`-prefixed environment overrides, in
//! the same shape the teacher's own config loader uses.

use std::net::SocketAddr;

use fhirkit_core::tenant::{FhirVersion, SmartPolicy, Tenant};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration (spec §3's
/// Tenant model and this crate's `[[tenants]]`/`[server]` shape).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] ::config::ConfigError),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub controller_name: String,
    pub base_url: String,
    #[serde(default = "default_fhir_version")]
    pub fhir_version: String,
    #[serde(default)]
    pub bootstrap_dir: Option<String>,
    #[serde(default)]
    pub smart_policy: SmartPolicyConfig,
    #[serde(default)]
    pub max_resource_count: Option<usize>,
}

fn default_fhir_version() -> String {
    "R4".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmartPolicyConfig {
    Required,
    #[default]
    Allowed,
    Disabled,
}

impl From<SmartPolicyConfig> for SmartPolicy {
    fn from(value: SmartPolicyConfig) -> Self {
        match value {
            SmartPolicyConfig::Required => SmartPolicy::Required,
            SmartPolicyConfig::Allowed => SmartPolicy::Allowed,
            SmartPolicyConfig::Disabled => SmartPolicy::Disabled,
        }
    }
}

impl TenantConfig {
    pub fn into_tenant(self) -> Result<Tenant, ConfigError> {
        let fhir_version: FhirVersion = self
            .fhir_version
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("tenant {}: {e}", self.controller_name)))?;
        let mut tenant = Tenant::new(self.controller_name, self.base_url, fhir_version);
        tenant.bootstrap_dir = self.bootstrap_dir;
        tenant.smart_policy = self.smart_policy.into();
        tenant.max_resource_count = self.max_resource_count;
        Ok(tenant)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be > 0".to_string()));
        }
        if self.tenants.is_empty() {
            return Err(ConfigError::Invalid("at least one [[tenants]] entry is required".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if !seen.insert(tenant.controller_name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate tenant controller_name: {}", tenant.controller_name)));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self.server.host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Loads configuration from an optional TOML file plus
    /// `FHIRKIT__`-prefixed environment overrides (e.g.
    /// `FHIRKIT__SERVER__PORT=9090`).
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let candidate = path.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("fhirkit.toml"));
        if candidate.exists() {
            builder = builder.add_source(File::from(candidate));
        }
        builder = builder.add_source(Environment::with_prefix("FHIRKIT").try_parsing(true).separator("__"));
        let cfg = builder.build()?;
        let merged: AppConfig = cfg.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(path: Option<P>) -> Result<AppConfig, ConfigError> {
        let p = path.as_ref().map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_tenant_list() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_controller_names() {
        let cfg = AppConfig {
            server: ServerSettings::default(),
            tenants: vec![
                TenantConfig { controller_name: "demo".into(), base_url: "https://x/demo".into(), fhir_version: "R4".into(), bootstrap_dir: None, smart_policy: SmartPolicyConfig::Allowed, max_resource_count: None },
                TenantConfig { controller_name: "demo".into(), base_url: "https://x/demo2".into(), fhir_version: "R4".into(), bootstrap_dir: None, smart_policy: SmartPolicyConfig::Allowed, max_resource_count: None },
            ],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tenant_config_converts_to_tenant() {
        let tc = TenantConfig { controller_name: "demo".into(), base_url: "https://x/demo".into(), fhir_version: "R4B".into(), bootstrap_dir: None, smart_policy: SmartPolicyConfig::Required, max_resource_count: Some(1000) };
        let tenant = tc.into_tenant().unwrap();
        assert_eq!(tenant.fhir_version, FhirVersion::R4B);
        assert!(tenant.smart_required());
    }
}
