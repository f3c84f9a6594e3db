use crate::{
    k8s::{config_map_data, K8sResourceLocation, KubeClient},
    registry::RegistryError,
    retry::{retry_with_backoff, RetryConfig},
};
use anyhow::{bail, Context, Result};
use uuid::Uuid;

pub const COMMANDER_UUID_NAMESPACE: &str = "kube-system";
pub const COMMANDER_UUID_CONFIG_MAP: &str = "d8-commander-uuid";
pub const COMMANDER_UUID_KEY: &str = "commander-uuid";

/// Refuses to touch a cluster that another commander instance owns. A cluster without the
/// ownership configmap is not owned by anyone.
pub async fn check_commander_uuid(kube: &dyn KubeClient, expected: &Uuid, retry: &RetryConfig) -> Result<()> {
    let location = K8sResourceLocation::config_map(COMMANDER_UUID_NAMESPACE, COMMANDER_UUID_CONFIG_MAP);

    let Some(config_map) = retry_with_backoff(retry, "get commander uuid", || kube.get(&location)).await? else {
        log::info!("{} not found, skipping ownership check", location);
        return Ok(());
    };

    let Some(actual) = config_map_data(&config_map, COMMANDER_UUID_KEY)? else {
        log::info!("{} has no {} key, skipping ownership check", location, COMMANDER_UUID_KEY);
        return Ok(());
    };

    let actual = Uuid::parse_str(actual.trim()).context(format!("parsing {} of {}", COMMANDER_UUID_KEY, location))?;

    if actual != *expected {
        bail!(RegistryError::ManagedByAnotherOwner {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }

    log::info!("cluster is owned by commander {}", expected);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::InMemoryKube;
    use serde_json::json;

    const OWNER: &str = "6f2a6ea4-2c4f-4d2b-9d0c-1a6c3c3f1f0e";

    async fn kube_with_owner(owner: &str) -> Result<InMemoryKube> {
        let kube = InMemoryKube::new();
        let location = K8sResourceLocation::config_map(COMMANDER_UUID_NAMESPACE, COMMANDER_UUID_CONFIG_MAP);
        kube.put(
            &location,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "d8-commander-uuid", "namespace": "kube-system"},
                "data": {"commander-uuid": owner},
            }),
        )
        .await?;
        Ok(kube)
    }

    #[tokio::test]
    async fn test_absent_is_ok() -> Result<()> {
        check_commander_uuid(&InMemoryKube::new(), &Uuid::parse_str(OWNER)?, &RetryConfig::immediate(1)).await
    }

    #[tokio::test]
    async fn test_same_owner() -> Result<()> {
        let kube = kube_with_owner(OWNER).await?;
        check_commander_uuid(&kube, &Uuid::parse_str(OWNER)?, &RetryConfig::immediate(1)).await
    }

    #[tokio::test]
    async fn test_other_owner() -> Result<()> {
        let kube = kube_with_owner(OWNER).await?;
        let expected = Uuid::new_v4();

        let err = check_commander_uuid(&kube, &expected, &RetryConfig::immediate(1)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::ManagedByAnotherOwner {
                expected: expected.to_string(),
                actual: OWNER.to_string(),
            })
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_uuid() -> Result<()> {
        let kube = kube_with_owner("not-a-uuid").await?;
        assert!(check_commander_uuid(&kube, &Uuid::new_v4(), &RetryConfig::immediate(1)).await.is_err());

        Ok(())
    }
}
