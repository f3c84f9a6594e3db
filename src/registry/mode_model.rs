use super::{
    bashible::{Auth, BashibleConfig, BootstrapProxy, Hosts, MirrorHost, Rewrite},
    constants::{HOST, HOST_WITH_PATH, PATH_REGEXP},
    data::{address_and_path, Data},
    error::RegistryError,
    pki::{Pki, PkiProvider},
    settings::Settings,
    types::{Mode, Scheme},
};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

/// Where images come from inside the cluster and where they come from outside of it, for one
/// validated mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeModel {
    pub module_required: bool,
    pub mode: Mode,
    pub in_cluster_images_repo: String,
    pub remote_images_repo: String,
    pub remote_data: Data,
    pub ttl: Option<String>,
}

impl ModeModel {
    pub fn from_settings(settings: &Settings) -> Self {
        let remote_data = Data::from_registry_settings(settings.registry());
        let remote_images_repo = remote_data.images_repo.clone();

        match settings {
            Settings::Direct(_) => Self {
                module_required: true,
                mode: Mode::Direct,
                in_cluster_images_repo: HOST_WITH_PATH.to_string(),
                remote_images_repo,
                remote_data,
                ttl: None,
            },
            Settings::Unmanaged(_) => Self {
                module_required: false,
                mode: Mode::Unmanaged,
                in_cluster_images_repo: remote_images_repo.clone(),
                remote_images_repo,
                remote_data,
                ttl: None,
            },
        }
    }

    /// What cluster components use to pull. Direct goes through the in-cluster registry service
    /// and trusts its CA.
    pub fn in_cluster_data_with(&self, pki: &Pki) -> Data {
        match self.mode {
            Mode::Direct => Data {
                images_repo: HOST_WITH_PATH.to_string(),
                scheme: Scheme::Https,
                ca: pki.ca.cert.clone(),
                username: self.remote_data.username.clone(),
                password: self.remote_data.password.clone(),
            },
            _ => self.remote_data.clone(),
        }
    }

    pub async fn in_cluster_data(&self, pki: &dyn PkiProvider) -> Result<Data> {
        match self.mode {
            Mode::Direct => Ok(self.in_cluster_data_with(&pki.get().await.context("getting registry pki")?)),
            _ => Ok(self.remote_data.clone()),
        }
    }

    pub fn images_base(&self) -> &str {
        &self.in_cluster_images_repo
    }

    pub fn bashible_mirrors(&self) -> Result<BTreeMap<String, Hosts>> {
        let (remote_address, remote_path) = self.remote_data.address_and_path();

        let mirror = |rewrites: Vec<Rewrite>| MirrorHost {
            host: remote_address.clone(),
            scheme: self.remote_data.scheme.lowercase().to_string(),
            ca: self.remote_data.ca.clone(),
            auth: Auth {
                username: self.remote_data.username.clone(),
                password: self.remote_data.password.clone(),
            },
            rewrites,
        };

        let (key, mirror) = match self.mode {
            Mode::Direct => (
                HOST.to_string(),
                mirror(vec![Rewrite {
                    from: PATH_REGEXP.to_string(),
                    to: remote_path.trim_start_matches('/').to_string(),
                }]),
            ),
            Mode::Unmanaged => (remote_address.clone(), mirror(vec![])),
            mode => bail!(RegistryError::UnknownMode(mode.to_string())),
        };

        Ok(BTreeMap::from([(key, Hosts { mirrors: vec![mirror] })]))
    }

    pub fn bashible_config(&self) -> Result<BashibleConfig> {
        BashibleConfig::new(self.mode, self.images_base(), self.bashible_mirrors()?)
    }

    /// Upstream of the bootstrap pull-through proxy, only proxy mode has one
    pub fn bootstrap_proxy(&self) -> Option<BootstrapProxy> {
        if self.mode != Mode::Proxy {
            return None;
        }

        let (host, path) = address_and_path(&self.remote_images_repo);

        Some(BootstrapProxy {
            host,
            path,
            scheme: self.remote_data.scheme.lowercase().to_string(),
            ca: self.remote_data.ca.clone(),
            user: self.remote_data.username.clone(),
            password: self.remote_data.password.clone(),
            ttl: self.ttl.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{pki::CertKey, settings::RegistrySettings};

    fn registry(images_repo: &str) -> RegistrySettings {
        RegistrySettings {
            images_repo: images_repo.to_string(),
            scheme: "HTTPS".to_string(),
            ..Default::default()
        }
    }

    fn pki_with_ca(cert: &str) -> Pki {
        Pki {
            ca: CertKey {
                cert: cert.to_string(),
                key: "key".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_direct_in_cluster_repo_is_fixed() {
        for images_repo in ["r.example.com/test", "other.example.com:5000", "registry.deckhouse.io/deckhouse/ee"] {
            let model = ModeModel::from_settings(&Settings::Direct(registry(images_repo)));

            assert_eq!(model.in_cluster_images_repo, "registry.d8-system.svc:5001/system/deckhouse");
            assert_eq!(model.remote_images_repo, images_repo);
            assert!(model.module_required);
        }
    }

    #[test]
    fn test_unmanaged_model() {
        let model = ModeModel::from_settings(&Settings::Unmanaged(registry("r.example.com/test")));

        assert_eq!(model.in_cluster_images_repo, "r.example.com/test");
        assert_eq!(model.remote_images_repo, "r.example.com/test");
        assert_eq!(model.images_base(), "r.example.com/test");
        assert!(!model.module_required);
        assert_eq!(model.in_cluster_data_with(&Pki::default()), model.remote_data);
    }

    #[tokio::test]
    async fn test_direct_in_cluster_data() -> Result<()> {
        let model = ModeModel::from_settings(&Settings::Direct(RegistrySettings {
            username: "u".to_string(),
            password: "p".to_string(),
            scheme: "HTTP".to_string(),
            ..registry("r.example.com/test")
        }));

        let data = model.in_cluster_data(&pki_with_ca("C")).await?;
        assert_eq!(
            data,
            Data {
                images_repo: "registry.d8-system.svc:5001/system/deckhouse".to_string(),
                scheme: Scheme::Https,
                ca: "C".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            }
        );

        Ok(())
    }

    #[test]
    fn test_direct_mirrors() -> Result<()> {
        let model = ModeModel::from_settings(&Settings::Direct(RegistrySettings {
            ca: "ca".to_string(),
            license: "lic".to_string(),
            ..registry("r.example.com:8443/deckhouse/ee")
        }));

        let mirrors = model.bashible_mirrors()?;
        assert_eq!(mirrors.keys().collect::<Vec<_>>(), vec!["registry.d8-system.svc:5001"]);
        assert_eq!(
            mirrors["registry.d8-system.svc:5001"].mirrors,
            vec![MirrorHost {
                host: "r.example.com:8443".to_string(),
                scheme: "https".to_string(),
                ca: "ca".to_string(),
                auth: Auth {
                    username: "license-token".to_string(),
                    password: "lic".to_string(),
                },
                rewrites: vec![Rewrite {
                    from: "^system/deckhouse".to_string(),
                    to: "deckhouse/ee".to_string(),
                }],
            }]
        );

        Ok(())
    }

    #[test]
    fn test_unmanaged_mirrors() -> Result<()> {
        let model = ModeModel::from_settings(&Settings::Unmanaged(RegistrySettings {
            scheme: "HTTP".to_string(),
            ..registry("r.example.com/test")
        }));

        let mirrors = model.bashible_mirrors()?;
        let mirror = &mirrors["r.example.com"].mirrors[0];
        assert_eq!(mirror.host, "r.example.com");
        assert_eq!(mirror.scheme, "http");
        assert!(mirror.rewrites.is_empty());

        Ok(())
    }

    #[test]
    fn test_bootstrap_proxy_only_for_proxy_mode() {
        let model = ModeModel::from_settings(&Settings::Direct(registry("r.example.com/test")));
        assert_eq!(model.bootstrap_proxy(), None);

        let proxy = ModeModel {
            mode: Mode::Proxy,
            ttl: Some("1h".to_string()),
            ..model
        };
        let bootstrap = proxy.bootstrap_proxy();
        assert_eq!(bootstrap.as_ref().map(|p| p.host.as_str()), Some("r.example.com"));
        assert_eq!(bootstrap.as_ref().map(|p| p.path.as_str()), Some("/test"));
        assert_eq!(bootstrap.map(|p| p.ttl), Some("1h".to_string()));

        assert!(proxy.bashible_mirrors().is_err());
    }
}
