use super::{constants::LICENSE_USERNAME, docker_cfg, settings::RegistrySettings, types::Scheme};
use anyhow::{ensure, Context, Result};
use base64::{engine::general_purpose::STANDARD as base64_standard, Engine as _};

/// Normalized connection parameters of a registry, as consumed by secrets and mirrors
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Data {
    pub images_repo: String,
    pub scheme: Scheme,
    pub ca: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("images_repo", &self.images_repo)
            .field("scheme", &self.scheme)
            .field("ca", &if self.ca.is_empty() { "" } else { "<ca>" })
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl Data {
    /// A license replaces whatever credentials the settings carry
    pub fn from_registry_settings(settings: &RegistrySettings) -> Self {
        let (username, password) = if settings.license.is_empty() {
            (settings.username.clone(), settings.password.clone())
        } else {
            (LICENSE_USERNAME.to_string(), settings.license.clone())
        };

        Self {
            images_repo: settings.images_repo.clone(),
            scheme: Scheme::from_str_or_default(&settings.scheme),
            ca: settings.ca.clone(),
            username,
            password,
        }
    }

    pub fn auth_base64(&self) -> String {
        if self.username.is_empty() {
            return String::new();
        }

        base64_standard.encode(format!("{}:{}", self.username, self.password))
    }

    pub fn address_and_path(&self) -> (String, String) {
        address_and_path(&self.images_repo)
    }

    pub fn docker_cfg(&self) -> Result<Vec<u8>> {
        ensure!(!self.images_repo.is_empty(), "images repo is empty, cannot build docker config");

        let (address, _) = self.address_and_path();
        docker_cfg::build_docker_cfg(&self.username, &self.password, &address).context("building docker config")
    }

    pub fn docker_cfg_base64(&self) -> Result<String> {
        Ok(base64_standard.encode(self.docker_cfg()?))
    }
}

/// Splits `host[:port]/some/path` into `host[:port]` and `/some/path`. Without a path the second
/// part is empty.
pub fn address_and_path(images_repo: &str) -> (String, String) {
    let images_repo = images_repo.trim().trim_end_matches('/');

    match images_repo.split_once('/') {
        Some((address, path)) => (address.trim_end_matches('/').to_string(), format!("/{}", path)),
        None => (images_repo.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(images_repo: &str) -> RegistrySettings {
        RegistrySettings {
            images_repo: images_repo.to_string(),
            scheme: "HTTPS".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_license_rewrite() {
        let data = Data::from_registry_settings(&RegistrySettings {
            username: "ignored".to_string(),
            password: "ignored".to_string(),
            license: "lic".to_string(),
            ..settings("r.example.com/test")
        });

        assert_eq!(data.username, "license-token");
        assert_eq!(data.password, "lic");
        assert_eq!(data.auth_base64(), base64_standard.encode("license-token:lic"));
    }

    #[test]
    fn test_pass_through() {
        let data = Data::from_registry_settings(&RegistrySettings {
            scheme: "http".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            ..settings("r.example.com")
        });

        assert_eq!(data.scheme, Scheme::Http);
        assert_eq!((data.username.as_str(), data.password.as_str()), ("u", "p"));
        assert_eq!(Data::from_registry_settings(&settings("r.example.com")).auth_base64(), "");
    }

    #[test]
    fn test_address_and_path() {
        assert_eq!(address_and_path("r.example.com"), ("r.example.com".to_string(), String::new()));
        assert_eq!(address_and_path("r.example.com:5000/a/b/"), ("r.example.com:5000".to_string(), "/a/b".to_string()));
        assert_eq!(
            address_and_path("registry.d8-system.svc:5001/system/deckhouse"),
            ("registry.d8-system.svc:5001".to_string(), "/system/deckhouse".to_string())
        );
    }

    #[test]
    fn test_docker_cfg_uses_host_only() -> Result<()> {
        let data = Data::from_registry_settings(&RegistrySettings {
            username: "u".to_string(),
            password: "p".to_string(),
            ..settings("registry.example.com/path")
        });

        let cfg: serde_json::Value = serde_json::from_slice(&data.docker_cfg()?)?;
        assert_eq!(cfg.pointer("/auths/registry.example.com/auth"), Some(&serde_json::json!("dTpw")));
        assert!(!data.docker_cfg_base64()?.is_empty());

        Ok(())
    }

    #[test]
    fn test_docker_cfg_requires_images_repo() {
        assert!(Data::default().docker_cfg().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let data = Data {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", data).contains("hunter2"));
    }
}
