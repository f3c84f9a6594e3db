use super::{
    constants::DEFAULT_IMAGES_REPO,
    data::address_and_path,
    docker_cfg::{parse_docker_cfg, validate_registry_docker_cfg},
    settings::{DeckhouseSettings, RegistrySettings},
    types::{Mode, Scheme},
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as base64_standard, Engine as _};
use serde::{Deserialize, Serialize};

/// Registry fields of the bootstrap (pre-cluster) configuration
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InitConfig {
    pub images_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub registry_docker_cfg: String,
    #[serde(rename = "registryCA", skip_serializing_if = "String::is_empty")]
    pub registry_ca: String,
    pub registry_scheme: String,
}

impl std::fmt::Debug for InitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitConfig")
            .field("images_repo", &self.images_repo)
            .field(
                "registry_docker_cfg",
                &if self.registry_docker_cfg.is_empty() { "" } else { "<redacted>" },
            )
            .field("registry_ca", &if self.registry_ca.is_empty() { "" } else { "<ca>" })
            .field("registry_scheme", &self.registry_scheme)
            .finish()
    }
}

impl InitConfig {
    /// Copy with the CE repository and HTTPS filled in where unset, and the repo trimmed
    pub fn with_defaults(&self) -> Self {
        let mut config = self.clone();

        config.images_repo = self.images_repo.trim().trim_end_matches('/').to_string();
        if config.images_repo.is_empty() {
            config.images_repo = DEFAULT_IMAGES_REPO.to_string();
        }

        if config.registry_scheme.is_empty() {
            config.registry_scheme = Scheme::default().to_string();
        }

        config
    }

    /// Registry settings carrying the credentials found in the docker config, if any
    pub fn to_registry_settings(&self) -> Result<RegistrySettings> {
        let images_repo = self.images_repo.trim().to_string();

        let mut settings = RegistrySettings {
            images_repo: images_repo.clone(),
            scheme: Scheme::from_str_or_default(&self.registry_scheme).to_string(),
            ca: self.registry_ca.clone(),
            ..Default::default()
        };

        if self.registry_docker_cfg.is_empty() {
            return Ok(settings);
        }

        let (address, _) = address_and_path(&images_repo);

        validate_registry_docker_cfg(&self.registry_docker_cfg, &address).context("failed to validate registryDockerCfg")?;

        let docker_cfg = base64_standard
            .decode(self.registry_docker_cfg.trim())
            .context("failed to decode registryDockerCfg")?;

        let (username, password) =
            parse_docker_cfg(&docker_cfg, &address).context("failed to extract credentials from registryDockerCfg")?;

        settings.username = username;
        settings.password = password;

        Ok(settings)
    }

    /// A bootstrap-only installation always runs against an externally managed registry
    pub fn to_deckhouse_settings(&self) -> Result<DeckhouseSettings> {
        Ok(DeckhouseSettings {
            mode: Mode::Unmanaged.to_string(),
            unmanaged: Some(self.with_defaults().to_registry_settings()?),
            ..Default::default()
        })
    }
}
