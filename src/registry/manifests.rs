use super::{
    bashible::{BashibleConfig, BashibleContext, Bootstrap},
    constants::{BASHIBLE_CONFIG_SECRET_NAME, CONFIG_SECRET_KEY, DECKHOUSE_REGISTRY_SECRET_NAME, INIT_SECRET_NAME, SYSTEM_NAMESPACE},
    data::{address_and_path, Data},
    mode_model::ModeModel,
    pki::{Pki, PkiProvider},
    types::Scheme,
};
use crate::k8s::{secret_manifest, K8sResourceLocation};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub type SecretData = BTreeMap<String, Vec<u8>>;

pub const DOCKER_CONFIG_JSON_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// Payload of `d8-system/deckhouse-registry`, how cluster components pull images
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeckhouseRegistrySecret {
    pub address: String,
    pub path: String,
    pub scheme: Scheme,
    pub ca: String,
    pub docker_config_json: Vec<u8>,
}

impl DeckhouseRegistrySecret {
    pub fn from_data(data: &Data) -> Result<Self> {
        let (address, path) = data.address_and_path();

        Ok(Self {
            address,
            path,
            scheme: data.scheme,
            ca: data.ca.clone(),
            docker_config_json: data.docker_cfg().context("building .dockerconfigjson")?,
        })
    }

    pub fn location() -> K8sResourceLocation {
        K8sResourceLocation::secret(SYSTEM_NAMESPACE, DECKHOUSE_REGISTRY_SECRET_NAME)
    }

    pub fn to_data(&self) -> SecretData {
        let mut data = SecretData::new();

        data.insert("address".to_string(), self.address.as_bytes().to_vec());
        if !self.path.is_empty() {
            data.insert("path".to_string(), self.path.as_bytes().to_vec());
        }
        data.insert("scheme".to_string(), self.scheme.lowercase().as_bytes().to_vec());
        if !self.ca.is_empty() {
            data.insert("ca".to_string(), self.ca.as_bytes().to_vec());
        }
        data.insert(".dockerconfigjson".to_string(), self.docker_config_json.clone());

        data
    }

    pub fn manifest(&self) -> Value {
        secret_manifest(&Self::location(), DOCKER_CONFIG_JSON_SECRET_TYPE, &self.to_data())
    }
}

/// Payload of `d8-system/registry-bashible-config`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BashibleConfigSecret {
    pub config: BashibleConfig,
}

impl BashibleConfigSecret {
    pub fn location() -> K8sResourceLocation {
        K8sResourceLocation::secret(SYSTEM_NAMESPACE, BASHIBLE_CONFIG_SECRET_NAME)
    }

    pub fn to_data(&self) -> Result<SecretData> {
        Ok(SecretData::from([(CONFIG_SECRET_KEY.to_string(), self.config.to_yaml()?)]))
    }

    pub fn manifest(&self) -> Result<Value> {
        Ok(secret_manifest(&Self::location(), OPAQUE_SECRET_TYPE, &self.to_data()?))
    }
}

/// Payload of `d8-system/registry-init`, hands the PKI over to the registry operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryInitSecret {
    pub pki: Pki,
}

impl RegistryInitSecret {
    pub fn location() -> K8sResourceLocation {
        K8sResourceLocation::secret(SYSTEM_NAMESPACE, INIT_SECRET_NAME)
    }

    pub fn to_data(&self) -> Result<SecretData> {
        Ok(SecretData::from([(CONFIG_SECRET_KEY.to_string(), self.pki.to_yaml()?)]))
    }

    pub fn manifest(&self) -> Result<Value> {
        Ok(secret_manifest(&Self::location(), OPAQUE_SECRET_TYPE, &self.to_data()?))
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct KubeadmContext {
    pub address: String,
    pub path: String,
}

/// Every artifact of one build, all derived from the same PKI
#[derive(Clone, Debug)]
pub struct Manifests {
    pub deckhouse_registry: DeckhouseRegistrySecret,
    pub bashible_config: Option<BashibleConfigSecret>,
    pub registry_init: Option<RegistryInitSecret>,
    pub kubeadm_context: KubeadmContext,
    pub bashible_context: BashibleContext,
}

pub struct ManifestBuilder {
    model: ModeModel,
    legacy_mode: bool,
}

impl ManifestBuilder {
    pub fn new(model: ModeModel, legacy_mode: bool) -> Self {
        Self { model, legacy_mode }
    }

    pub fn model(&self) -> &ModeModel {
        &self.model
    }

    pub fn legacy_mode(&self) -> bool {
        self.legacy_mode
    }

    /// Legacy clusters may not have the PKI yet, their components keep pulling from the remote
    pub async fn deckhouse_registry_secret(&self, pki: &dyn PkiProvider) -> Result<DeckhouseRegistrySecret> {
        let data = if self.legacy_mode {
            self.model.remote_data.clone()
        } else {
            self.model.in_cluster_data(pki).await.context("building in-cluster registry data")?
        };

        DeckhouseRegistrySecret::from_data(&data).context("building deckhouse-registry secret")
    }

    pub async fn deckhouse_registry_secret_data(&self, pki: &dyn PkiProvider) -> Result<SecretData> {
        Ok(self.deckhouse_registry_secret(pki).await?.to_data())
    }

    pub fn registry_bashible_config_secret(&self) -> Result<Option<BashibleConfigSecret>> {
        if self.legacy_mode {
            return Ok(None);
        }

        Ok(Some(BashibleConfigSecret {
            config: self.model.bashible_config().context("building bashible config")?,
        }))
    }

    pub fn registry_bashible_config_secret_data(&self) -> Result<Option<SecretData>> {
        self.registry_bashible_config_secret()?
            .map(|secret| secret.to_data())
            .transpose()
    }

    pub fn kubeadm_context(&self) -> KubeadmContext {
        let (address, path) = address_and_path(&self.model.in_cluster_images_repo);
        KubeadmContext { address, path }
    }

    pub async fn bashible_context(&self, pki: &dyn PkiProvider) -> Result<BashibleContext> {
        let config = self.model.bashible_config().context("building bashible config")?;

        let init = if self.legacy_mode {
            None
        } else {
            Some(pki.get().await.context("getting registry pki")?)
        };

        Ok(config.to_context(
            !self.legacy_mode,
            Bootstrap {
                init,
                proxy: self.model.bootstrap_proxy(),
            },
        ))
    }

    pub fn registry_init_secret(&self, pki: &Pki) -> RegistryInitSecret {
        RegistryInitSecret { pki: pki.clone() }
    }

    pub fn registry_init_secret_data(&self, pki: &Pki) -> Result<SecretData> {
        self.registry_init_secret(pki).to_data()
    }

    /// Builds every artifact. The PKI is fetched once, and not at all in legacy mode.
    pub async fn build(&self, pki: &dyn PkiProvider) -> Result<Manifests> {
        let acquired = if self.legacy_mode {
            None
        } else {
            Some(pki.get().await.context("getting registry pki")?)
        };
        let pki = acquired.clone().unwrap_or_default();

        let deckhouse_registry = self.deckhouse_registry_secret(&pki).await?;
        let bashible_context = self.bashible_context(&pki).await?;

        let registry_init = acquired
            .filter(|_| self.model.module_required)
            .map(|pki| self.registry_init_secret(&pki));

        Ok(Manifests {
            deckhouse_registry,
            bashible_config: self.registry_bashible_config_secret()?,
            registry_init,
            kubeadm_context: self.kubeadm_context(),
            bashible_context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::secret_data;
    use crate::registry::{
        pki::CertKey,
        settings::{RegistrySettings, Settings},
        types::Mode,
    };

    fn pki() -> Pki {
        Pki {
            ca: CertKey {
                cert: "C".to_string(),
                key: "K".to_string(),
            },
            ..Default::default()
        }
    }

    fn builder(settings: Settings, legacy_mode: bool) -> ManifestBuilder {
        ManifestBuilder::new(ModeModel::from_settings(&settings), legacy_mode)
    }

    fn direct() -> Settings {
        Settings::Direct(RegistrySettings {
            images_repo: "r.example.com/test".to_string(),
            scheme: "HTTPS".to_string(),
            license: "lic".to_string(),
            ..Default::default()
        })
    }

    fn unmanaged() -> Settings {
        Settings::Unmanaged(RegistrySettings {
            images_repo: "r.example.com:5000".to_string(),
            scheme: "HTTP".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_direct_deckhouse_registry_secret() -> Result<()> {
        let data = builder(direct(), false).deckhouse_registry_secret_data(&pki()).await?;

        assert_eq!(data["address"], b"registry.d8-system.svc:5001".to_vec());
        assert_eq!(data["path"], b"/system/deckhouse".to_vec());
        assert_eq!(data["scheme"], b"https".to_vec());
        assert_eq!(data["ca"], b"C".to_vec());

        let cfg: serde_json::Value = serde_json::from_slice(&data[".dockerconfigjson"])?;
        assert_eq!(
            cfg.pointer("/auths/registry.d8-system.svc:5001/username"),
            Some(&serde_json::json!("license-token"))
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_uses_remote() -> Result<()> {
        let data = builder(direct(), true).deckhouse_registry_secret_data(&pki()).await?;

        assert_eq!(data["address"], b"r.example.com".to_vec());
        assert_eq!(data["path"], b"/test".to_vec());
        assert!(!data.contains_key("ca"));

        Ok(())
    }

    #[tokio::test]
    async fn test_optional_keys_are_omitted() -> Result<()> {
        let data = builder(unmanaged(), false).deckhouse_registry_secret_data(&pki()).await?;

        assert_eq!(
            data.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![".dockerconfigjson", "address", "scheme"]
        );
        assert_eq!(data["scheme"], b"http".to_vec());

        Ok(())
    }

    #[test]
    fn test_bashible_config_secret() -> Result<()> {
        assert_eq!(builder(direct(), true).registry_bashible_config_secret_data()?, None);

        let data = builder(direct(), false)
            .registry_bashible_config_secret_data()?
            .context("bashible config secret is missing")?;
        let config: BashibleConfig = serde_yaml::from_slice(&data["config"])?;
        assert_eq!(config.mode, Mode::Direct);
        assert_eq!(config.images_base, "registry.d8-system.svc:5001/system/deckhouse");
        config.validate()?;

        Ok(())
    }

    #[test]
    fn test_kubeadm_context() {
        assert_eq!(
            builder(direct(), false).kubeadm_context(),
            KubeadmContext {
                address: "registry.d8-system.svc:5001".to_string(),
                path: "/system/deckhouse".to_string(),
            }
        );
        assert_eq!(
            builder(unmanaged(), false).kubeadm_context(),
            KubeadmContext {
                address: "r.example.com:5000".to_string(),
                path: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_bashible_context() -> Result<()> {
        let builder = builder(direct(), false);
        let context = builder.bashible_context(&pki()).await?;

        assert!(context.registry_module_enable);
        assert_eq!(context.bootstrap.init, Some(pki()));
        assert_eq!(context.bootstrap.proxy, None);
        assert_eq!(context.version, builder.model().bashible_config()?.version);

        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_bashible_context_has_no_pki() -> Result<()> {
        let context = builder(direct(), true).bashible_context(&pki()).await?;

        assert!(!context.registry_module_enable);
        assert_eq!(context.bootstrap.init, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_registry_init_secret() -> Result<()> {
        let data = builder(direct(), false).registry_init_secret_data(&pki())?;
        assert_eq!(Pki::from_yaml(&data["config"])?, pki());

        let manifest = RegistryInitSecret { pki: pki() }.manifest()?;
        assert_eq!(manifest["type"], serde_json::json!("Opaque"));
        assert_eq!(secret_data(&manifest)?, data);

        Ok(())
    }

    #[tokio::test]
    async fn test_build() -> Result<()> {
        let manifests = builder(direct(), false).build(&pki()).await?;
        assert!(manifests.bashible_config.is_some());
        assert_eq!(manifests.registry_init.map(|secret| secret.pki), Some(pki()));
        assert_eq!(manifests.deckhouse_registry.ca, "C");

        let manifests = builder(unmanaged(), false).build(&pki()).await?;
        assert!(manifests.bashible_config.is_some());
        assert!(manifests.registry_init.is_none());

        let manifests = builder(direct(), true).build(&pki()).await?;
        assert!(manifests.bashible_config.is_none());
        assert!(manifests.registry_init.is_none());
        assert_eq!(manifests.deckhouse_registry.address, "r.example.com");

        assert_eq!(
            manifests.deckhouse_registry.manifest()["type"],
            serde_json::json!("kubernetes.io/dockerconfigjson")
        );

        Ok(())
    }
}
