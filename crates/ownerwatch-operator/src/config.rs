//! CRD and process configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kube::CustomResource;
use ownerwatch_core::{ControllerDescriptor, Registry, RegistryError, ResourceKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::health::DEFAULT_HEALTH_PORT;

/// Kind reference as written in configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindRef {
    /// API group, empty for the core group
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Kind name
    pub kind: String,
}

impl From<&KindRef> for ResourceKind {
    fn from(kind: &KindRef) -> Self {
        ResourceKind::new(&kind.group, &kind.version, &kind.kind)
    }
}

/// One registered controller
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSpec {
    /// Reconciliation handler name
    pub handler: String,
    /// Primary resource kind
    pub primary: KindRef,
    /// Secondary kinds owned by the primary (watch order)
    #[serde(default)]
    pub owns: Vec<KindRef>,
}

impl ControllerSpec {
    pub fn to_descriptor(&self) -> ControllerDescriptor {
        self.owns.iter().fold(
            ControllerDescriptor::new((&self.primary).into(), self.handler.as_str()),
            |descriptor, kind| descriptor.owns(kind.into()),
        )
    }
}

/// OwnerWatchConfig spec
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ownerwatch.dev",
    version = "v1alpha1",
    kind = "OwnerWatchConfig",
    plural = "ownerwatchconfigs",
    shortname = "owc",
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct OwnerWatchConfigSpec {
    /// Controllers, bound in this order
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
}

impl OwnerWatchConfigSpec {
    /// Read the spec from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Convert configured controllers into a validated registry
pub fn build_registry(spec: &OwnerWatchConfigSpec) -> Result<Registry, RegistryError> {
    if spec.controllers.is_empty() {
        warn!("No controllers configured, operator will idle");
    }
    Registry::from_descriptors(spec.controllers.iter().map(ControllerSpec::to_descriptor))
}

/// Process settings from the environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSettings {
    /// Restrict namespaced watches to one namespace (`WATCH_NAMESPACE`)
    pub watch_namespace: Option<String>,
    /// Load controllers from a file instead of the cluster (`OWNERWATCH_CONFIG_FILE`)
    pub config_file: Option<PathBuf>,
    /// Health server port (`HEALTH_PORT`)
    pub health_port: u16,
}

impl OperatorSettings {
    pub fn from_env() -> Result<Self> {
        let watch_namespace = non_empty_env("WATCH_NAMESPACE");
        let config_file = non_empty_env("OWNERWATCH_CONFIG_FILE").map(PathBuf::from);

        let health_port = match non_empty_env("HEALTH_PORT") {
            Some(port) => port
                .parse::<u16>()
                .with_context(|| format!("HEALTH_PORT is not a valid port: {port}"))?,
            None => DEFAULT_HEALTH_PORT,
        };

        Ok(Self {
            watch_namespace,
            config_file,
            health_port,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CONFIG_YAML: &str = r#"
controllers:
  - handler: database
    primary:
      group: db.example.com
      version: v1
      kind: Database
    owns:
      - group: apps
        version: v1
        kind: StatefulSet
      - version: v1
        kind: Service
  - handler: backup
    primary:
      group: db.example.com
      version: v1
      kind: Backup
"#;

    #[test]
    fn test_deserialize_config() {
        let spec: OwnerWatchConfigSpec =
            serde_yaml::from_str(CONFIG_YAML).expect("test YAML should parse successfully");

        assert_eq!(spec.controllers.len(), 2);
        assert_eq!(spec.controllers[0].owns.len(), 2);
        assert_eq!(spec.controllers[0].owns[1].group, "");
        assert!(spec.controllers[1].owns.is_empty());
    }

    #[test]
    fn test_build_registry_preserves_order() {
        let spec: OwnerWatchConfigSpec = serde_yaml::from_str(CONFIG_YAML).unwrap();
        let registry = build_registry(&spec).unwrap();

        assert_eq!(registry.len(), 2);
        let first = &registry.list()[0];
        assert_eq!(first.handler().as_str(), "database");
        assert_eq!(first.primary_kind(), &ResourceKind::new("db.example.com", "v1", "Database"));
        assert_eq!(
            first.secondary_kinds(),
            &[
                ResourceKind::new("apps", "v1", "StatefulSet"),
                ResourceKind::new("", "v1", "Service"),
            ]
        );
        assert_eq!(registry.list()[1].handler().as_str(), "backup");
    }

    #[test]
    fn test_build_registry_rejects_self_ownership() {
        let yaml = r#"
controllers:
  - handler: database
    primary: { group: db.example.com, version: v1, kind: Database }
    owns:
      - { group: db.example.com, version: v1, kind: Database }
"#;
        let spec: OwnerWatchConfigSpec = serde_yaml::from_str(yaml).unwrap();
        assert!(build_registry(&spec).is_err());
    }

    #[test]
    fn test_empty_config() {
        let spec: OwnerWatchConfigSpec = serde_yaml::from_str("{}").unwrap();
        assert!(build_registry(&spec).unwrap().is_empty());
    }

    #[test]
    fn test_from_file_missing() {
        let result = OwnerWatchConfigSpec::from_file(Path::new("/nonexistent/ownerwatch.yaml"));
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn settings_from_env_defaults() {
        std::env::remove_var("WATCH_NAMESPACE");
        std::env::remove_var("OWNERWATCH_CONFIG_FILE");
        std::env::remove_var("HEALTH_PORT");

        let settings = OperatorSettings::from_env().unwrap();
        assert_eq!(settings.watch_namespace, None);
        assert_eq!(settings.config_file, None);
        assert_eq!(settings.health_port, DEFAULT_HEALTH_PORT);
    }

    #[test]
    #[serial]
    fn settings_from_env_values() {
        std::env::set_var("WATCH_NAMESPACE", "databases");
        std::env::set_var("OWNERWATCH_CONFIG_FILE", "/etc/ownerwatch/controllers.yaml");
        std::env::set_var("HEALTH_PORT", "9090");

        let settings = OperatorSettings::from_env().unwrap();
        assert_eq!(settings.watch_namespace.as_deref(), Some("databases"));
        assert_eq!(
            settings.config_file,
            Some(PathBuf::from("/etc/ownerwatch/controllers.yaml"))
        );
        assert_eq!(settings.health_port, 9090);

        std::env::remove_var("WATCH_NAMESPACE");
        std::env::remove_var("OWNERWATCH_CONFIG_FILE");
        std::env::remove_var("HEALTH_PORT");
    }

    #[test]
    #[serial]
    fn settings_empty_namespace_means_cluster_wide() {
        std::env::set_var("WATCH_NAMESPACE", "");
        let settings = OperatorSettings::from_env().unwrap();
        assert_eq!(settings.watch_namespace, None);
        std::env::remove_var("WATCH_NAMESPACE");
    }

    #[test]
    #[serial]
    fn settings_invalid_port() {
        std::env::set_var("HEALTH_PORT", "not-a-port");
        assert!(OperatorSettings::from_env().is_err());
        std::env::remove_var("HEALTH_PORT");
    }
}
