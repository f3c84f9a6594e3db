use super::constants::{CA_COMMON_NAME, CONFIG_SECRET_KEY, INIT_SECRET_NAME, SYSTEM_NAMESPACE, USER_RO_NAME, USER_RW_NAME};
use crate::{
    k8s::{secret_data, K8sResourceLocation, KubeClient},
    retry::{retry_with_backoff, RetryConfig},
};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use x509_certificate::CapturedX509Certificate;

const CA_KEY_BITS: usize = 2048;
const CA_VALIDITY_DAYS: i64 = 3650;
const PASSWORD_LENGTH: usize = 32;
const BCRYPT_COST: u32 = 10;

/// PEM encoded certificate and its PKCS#8 private key
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CertKey {
    pub cert: String,
    pub key: String,
}

impl std::fmt::Debug for CertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertKey")
            .field("cert", &self.cert)
            .field("key", &if self.key.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl CertKey {
    /// Self-signed CA valid for ten years
    pub fn generate_ca(common_name: &str) -> Result<Self> {
        let private_key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), CA_KEY_BITS).context("generating rsa key")?;
        let key_pem = private_key.to_pkcs8_pem(LineEnding::LF).context("encoding rsa key")?.to_string();

        let key_pair = KeyPair::from_pem(&key_pem).context("loading rsa key")?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, common_name);

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign, KeyUsagePurpose::DigitalSignature];
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(CA_VALIDITY_DAYS);

        let cert = params.self_signed(&key_pair).context("self-signing ca certificate")?;

        Ok(Self { cert: cert.pem(), key: key_pem })
    }

    pub fn common_name(&self) -> Result<Option<String>> {
        let cert = CapturedX509Certificate::from_pem(self.cert.as_bytes()).context("parsing certificate")?;
        Ok(cert.subject_common_name())
    }
}

/// Registry account, only the bcrypt hash of its password is kept
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub name: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
}

impl User {
    pub fn new(name: &str, password: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            password_hash: bcrypt::hash(password, BCRYPT_COST).context(format!("hashing password of user {}", name))?,
        })
    }

    /// User with a random alphanumeric password. The password itself is discarded.
    pub fn generate(name: &str) -> Result<Self> {
        Self::new(name, &random_password())
    }

    pub fn verify(&self, password: &str) -> Result<bool> {
        bcrypt::verify(password, &self.password_hash).context(format!("verifying password of user {}", self.name))
    }
}

pub(crate) fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Trust material of the in-cluster registry
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pki {
    pub ca: CertKey,
    #[serde(rename = "userRW")]
    pub user_rw: User,
    #[serde(rename = "userRO")]
    pub user_ro: User,
}

impl Pki {
    /// CPU bound, run it off the async executor
    pub fn generate() -> Result<Self> {
        log::info!("generating registry pki");

        Ok(Self {
            ca: CertKey::generate_ca(CA_COMMON_NAME).context("generating ca")?,
            user_rw: User::generate(USER_RW_NAME).context("generating rw user")?,
            user_ro: User::generate(USER_RO_NAME).context("generating ro user")?,
        })
    }

    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(yaml).context("parsing pki yaml")
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self).context("serializing pki yaml")?.into_bytes())
    }

    /// Sanity check for a PKI read back from the cluster
    pub fn check(&self) -> Result<()> {
        ensure!(
            self.ca.common_name().context("checking ca certificate")?.as_deref() == Some(CA_COMMON_NAME),
            "ca certificate common name is not {}",
            CA_COMMON_NAME
        );

        let key = pem::parse(&self.ca.key).context("parsing ca key pem")?;
        ensure!(
            matches!(key.tag(), "PRIVATE KEY" | "RSA PRIVATE KEY"),
            "unexpected ca key pem tag {}",
            key.tag()
        );

        ensure!(self.user_rw.name == USER_RW_NAME, "unexpected rw user name {:?}", self.user_rw.name);
        ensure!(self.user_ro.name == USER_RO_NAME, "unexpected ro user name {:?}", self.user_ro.name);
        ensure!(
            !self.user_rw.password_hash.is_empty() && !self.user_ro.password_hash.is_empty(),
            "user password hash is empty"
        );

        Ok(())
    }
}

#[async_trait]
pub trait PkiProvider: Send + Sync {
    async fn get(&self) -> Result<Pki>;
}

/// A PKI that is already known
#[async_trait]
impl PkiProvider for Pki {
    async fn get(&self) -> Result<Pki> {
        Ok(self.clone())
    }
}

/// Generates a PKI on first use and hands out copies of it afterwards. A failed generation leaves
/// the cache empty so the next caller tries again.
#[derive(Default)]
pub struct LazyPki {
    cached: OnceCell<Pki>,
}

impl LazyPki {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PkiProvider for LazyPki {
    async fn get(&self) -> Result<Pki> {
        self.cached
            .get_or_try_init(|| async { tokio::task::spawn_blocking(Pki::generate).await.context("joining pki generation")? })
            .await
            .cloned()
    }
}

/// Reads the PKI persisted in the init secret, generating one when the cluster has none yet
pub struct ClusterPkiProvider {
    kube: Arc<dyn KubeClient>,
    retry: RetryConfig,
    generator: LazyPki,
    cached: OnceCell<Pki>,
}

impl ClusterPkiProvider {
    pub fn new(kube: Arc<dyn KubeClient>, retry: RetryConfig) -> Self {
        Self {
            kube,
            retry,
            generator: LazyPki::new(),
            cached: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<Pki> {
        let location = K8sResourceLocation::secret(SYSTEM_NAMESPACE, INIT_SECRET_NAME);

        let secret = retry_with_backoff(&self.retry, "get registry init secret", || self.kube.get(&location)).await?;

        let Some(secret) = secret else {
            log::info!("{} not found, using a fresh pki", location);
            return self.generator.get().await;
        };

        let data = secret_data(&secret).context(format!("decoding {}", location))?;
        let config = data
            .get(CONFIG_SECRET_KEY)
            .context(format!("{} has no {} key", location, CONFIG_SECRET_KEY))?;

        let pki = Pki::from_yaml(config).context(format!("loading pki from {}", location))?;
        pki.check().context(format!("checking pki from {}", location))?;

        log::info!("loaded registry pki from {}", location);

        Ok(pki)
    }
}

#[async_trait]
impl PkiProvider for ClusterPkiProvider {
    async fn get(&self) -> Result<Pki> {
        self.cached.get_or_try_init(|| self.load()).await.cloned()
    }
}
