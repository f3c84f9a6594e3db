use super::{pki::Pki, types::Mode};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Mirrors configured for one registry host, keyed by that host in `BashibleConfig::hosts`
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Hosts {
    pub mirrors: Vec<MirrorHost>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorHost {
    pub host: String,
    pub scheme: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rewrites: Vec<Rewrite>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Auth {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub from: String,
    pub to: String,
}

/// The stable part of the node configuration. Its hash is the deployed version, so nothing
/// per-run (PKI, bootstrap data) may live here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BashibleConfig {
    pub mode: Mode,
    pub images_base: String,
    #[serde(default)]
    pub proxy_endpoints: Vec<String>,
    pub hosts: BTreeMap<String, Hosts>,
    #[serde(default)]
    pub version: String,
}

impl BashibleConfig {
    pub fn new(mode: Mode, images_base: &str, hosts: BTreeMap<String, Hosts>) -> Result<Self> {
        let mut config = Self {
            mode,
            images_base: images_base.to_string(),
            proxy_endpoints: vec![],
            hosts,
            version: String::new(),
        };

        config.version = config.compute_version().context("computing bashible config version")?;
        config.validate().context("validating bashible config")?;

        Ok(config)
    }

    /// Hex SHA-256 of the JSON encoding with an empty version. Map keys are sorted, so equal
    /// configs always hash the same. Changing this encoding changes every deployed version.
    pub fn compute_version(&self) -> Result<String> {
        let unversioned = Self {
            version: String::new(),
            ..self.clone()
        };

        let bytes = serde_json::to_vec(&unversioned).context("serializing bashible config")?;

        Ok(hex::encode(Sha256::digest(bytes)))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.images_base.is_empty(), "imagesBase is empty");
        ensure!(!self.hosts.is_empty(), "no hosts configured");

        for (host, hosts) in &self.hosts {
            ensure!(!host.is_empty(), "empty host key");
            ensure!(!hosts.mirrors.is_empty(), "host {} has no mirrors", host);

            for mirror in &hosts.mirrors {
                ensure!(!mirror.host.is_empty(), "host {} has a mirror without host", host);
                ensure!(
                    matches!(mirror.scheme.as_str(), "http" | "https"),
                    "mirror {} of host {} has invalid scheme {:?}",
                    mirror.host,
                    host,
                    mirror.scheme
                );
            }
        }

        ensure!(
            self.version == self.compute_version()?,
            "version {:?} does not match the config content",
            self.version
        );

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self).context("serializing bashible config to yaml")?.into_bytes())
    }

    /// Template context for node bootstrap. The version is carried over verbatim.
    pub fn to_context(&self, registry_module_enable: bool, bootstrap: Bootstrap) -> BashibleContext {
        BashibleContext {
            mode: self.mode,
            images_base: self.images_base.clone(),
            proxy_endpoints: self.proxy_endpoints.clone(),
            hosts: self.hosts.clone(),
            version: self.version.clone(),
            registry_module_enable,
            bootstrap,
        }
    }
}

/// Upstream registry the bootstrap proxy pulls through
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapProxy {
    pub host: String,
    pub path: String,
    pub scheme: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ttl: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Pki>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<BootstrapProxy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BashibleContext {
    pub mode: Mode,
    pub images_base: String,
    pub proxy_endpoints: Vec<String>,
    pub hosts: BTreeMap<String, Hosts>,
    pub version: String,
    pub registry_module_enable: bool,
    pub bootstrap: Bootstrap,
}
