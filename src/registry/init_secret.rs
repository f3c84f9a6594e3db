//! Handshake with the in-cluster registry operator over `d8-system/registry-init`. The installer
//! creates the secret with the PKI, the operator marks it applied once it took the PKI over, and
//! the installer then removes it.

use super::{constants::INIT_SECRET_APPLIED_ANNOTATION, error::RegistryError, manifests::RegistryInitSecret, pki::Pki};
use crate::{
    k8s::{has_annotation, is_already_exists, KubeClient},
    retry::{retry_with_backoff, RetryConfig},
};
use anyhow::{bail, Context, Result};

/// Creates the init secret unless it is already there. Returns whether it was created.
pub async fn create_registry_init_secret(kube: &dyn KubeClient, pki: &Pki, retry: &RetryConfig) -> Result<bool> {
    let secret = RegistryInitSecret { pki: pki.clone() };
    let location = RegistryInitSecret::location();
    let manifest = secret.manifest().context("building registry init secret")?;

    retry_with_backoff(retry, "create registry init secret", || async {
        match kube.create(&location, manifest.clone()).await {
            Ok(()) => {
                log::info!("created {}", location);
                Ok(true)
            }
            Err(err) if is_already_exists(&err) => {
                log::info!("{} already exists", location);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    })
    .await
}

/// One step of the handshake. Fails with `RegistryError::IsNotReady` while the operator has not
/// acknowledged the secret yet; every other outcome leaves the secret deleted.
pub async fn check_init_secret(kube: &dyn KubeClient, module_enabled: bool) -> Result<()> {
    let location = RegistryInitSecret::location();

    let Some(secret) = kube.get(&location).await.context(format!("getting {}", location))? else {
        return Ok(());
    };

    if module_enabled && !has_annotation(&secret, INIT_SECRET_APPLIED_ANNOTATION) {
        bail!(RegistryError::IsNotReady);
    }

    if kube.delete(&location).await.context(format!("deleting {}", location))? {
        log::info!("deleted {}", location);
    }

    Ok(())
}

/// Polls the handshake until the secret is gone or the attempts run out
pub async fn wait_init_secret_applied(kube: &dyn KubeClient, module_enabled: bool, retry: &RetryConfig) -> Result<()> {
    retry_with_backoff(retry, "wait for registry init secret", || check_init_secret(kube, module_enabled))
        .await
        .context("waiting for the registry module to take over the pki")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        k8s::{set_annotation, InMemoryKube},
        registry::error::is_not_ready,
    };

    async fn put_init_secret(kube: &InMemoryKube, applied: bool) -> Result<()> {
        let mut manifest = RegistryInitSecret { pki: Pki::default() }.manifest()?;
        if applied {
            set_annotation(&mut manifest, INIT_SECRET_APPLIED_ANNOTATION, "")?;
        }
        kube.put(&RegistryInitSecret::location(), manifest).await
    }

    #[tokio::test]
    async fn test_handshake() -> Result<()> {
        let kube = InMemoryKube::new();
        put_init_secret(&kube, false).await?;

        assert!(is_not_ready(&check_init_secret(&kube, true).await.unwrap_err()));
        assert!(kube.get(&RegistryInitSecret::location()).await?.is_some());

        put_init_secret(&kube, true).await?;
        check_init_secret(&kube, true).await?;
        assert!(kube.get(&RegistryInitSecret::location()).await?.is_none());

        check_init_secret(&kube, true).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_module_disabled_removes_secret() -> Result<()> {
        let kube = InMemoryKube::new();
        put_init_secret(&kube, false).await?;

        check_init_secret(&kube, false).await?;
        assert!(kube.get(&RegistryInitSecret::location()).await?.is_none());

        check_init_secret(&kube, false).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_wait_gives_up() -> Result<()> {
        let kube = InMemoryKube::new();
        put_init_secret(&kube, false).await?;

        let err = wait_init_secret_applied(&kube, true, &RetryConfig::immediate(3)).await.unwrap_err();
        assert!(is_not_ready(&err));

        Ok(())
    }

    #[tokio::test]
    async fn test_wait_survives_transient_errors() -> Result<()> {
        let kube = InMemoryKube::new();
        put_init_secret(&kube, true).await?;
        kube.fail_next(2);

        wait_init_secret_applied(&kube, true, &RetryConfig::immediate(3)).await?;
        assert!(kube.get(&RegistryInitSecret::location()).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_create_is_idempotent() -> Result<()> {
        let kube = InMemoryKube::new();
        let retry = RetryConfig::immediate(2);

        assert!(create_registry_init_secret(&kube, &Pki::default(), &retry).await?);
        assert!(!create_registry_init_secret(&kube, &Pki::default(), &retry).await?);

        Ok(())
    }
}
