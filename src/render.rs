use crate::{
    commander::check_commander_uuid,
    config::RegistryConfig,
    k8s::{InMemoryKube, K8sResourceLocation, KubeClient},
    logging,
    registry::{
        bashible::BashibleContext,
        init_secret::{create_registry_init_secret, wait_init_secret_applied},
        manifests::{KubeadmContext, RegistryInitSecret},
        pki::ClusterPkiProvider,
        settings::resolve,
        DeckhouseSettings, ManifestBuilder, Mode, ModeModel,
    },
    retry::{retry_with_backoff, RetryConfig},
};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::{path::Path, sync::Arc, time::Instant};

mod timing;

pub use timing::{RunTime, RunTimes};

pub const KUBEADM_CONTEXT_FILE: &str = "kubeadm-context.yaml";
pub const BASHIBLE_CONTEXT_FILE: &str = "bashible-context.yaml";

/// What a run produced, safe to log and to write into the summary file
#[derive(Serialize, Clone, Debug)]
pub struct RenderSummary {
    pub mode: Mode,
    pub legacy_mode: bool,
    pub module_required: bool,
    pub version: String,
    pub artifacts: Vec<K8sResourceLocation>,
    pub init_secret_created: bool,
    pub written_files: Vec<String>,
    pub run_times: Option<RunTimes>,
}

pub struct Rendered {
    pub summary: RenderSummary,
    pub kubeadm_context: KubeadmContext,
    pub bashible_context: BashibleContext,
}

async fn put_object(kube: &dyn KubeClient, retry: &RetryConfig, manifest: Value) -> Result<K8sResourceLocation> {
    let location = K8sResourceLocation::try_from(&manifest).context("locating rendered object")?;

    retry_with_backoff(retry, &format!("put {}", location), || kube.put(&location, manifest.clone())).await?;

    log::info!("rendered {}", location);

    Ok(location)
}

/// Turns the configured inputs into the registry objects of the cluster, stored through `kube`
pub async fn render(config: &RegistryConfig, kube: Arc<dyn KubeClient>, retry: &RetryConfig) -> Result<Rendered> {
    if let Some(commander_uuid) = &config.commander_uuid {
        check_commander_uuid(&*kube, commander_uuid, retry)
            .await
            .context("checking cluster ownership")?;
    }

    let resolved = resolve(config.init_config.as_ref(), config.module_config.as_ref()).context("resolving registry settings")?;
    let settings = resolved.validated().context("validating registry settings")?;

    let builder = ManifestBuilder::new(ModeModel::from_settings(&settings), config.legacy_mode);
    let pki = ClusterPkiProvider::new(Arc::clone(&kube), retry.clone());

    let manifests = builder.build(&pki).await.context("building registry manifests")?;

    let mut artifacts = vec![put_object(&*kube, retry, manifests.deckhouse_registry.manifest()).await?];

    if let Some(bashible_config) = &manifests.bashible_config {
        artifacts.push(put_object(&*kube, retry, bashible_config.manifest()?).await?);
    }

    artifacts.push(put_object(&*kube, retry, DeckhouseSettings::from(&settings).module_config_manifest()).await?);

    let module_enabled = builder.model().module_required && !builder.legacy_mode();

    let init_secret_created = match &manifests.registry_init {
        Some(registry_init) => {
            artifacts.push(RegistryInitSecret::location());
            create_registry_init_secret(&*kube, &registry_init.pki, retry)
                .await
                .context("creating registry init secret")?
        }
        None => false,
    };

    if !module_enabled {
        wait_init_secret_applied(&*kube, false, retry)
            .await
            .context("removing leftover registry init secret")?;
    }

    log::info!(
        "rendered {} objects for registry mode {}, bashible config version {}",
        artifacts.len(),
        settings.mode(),
        manifests.bashible_context.version
    );

    Ok(Rendered {
        summary: RenderSummary {
            mode: settings.mode(),
            legacy_mode: builder.legacy_mode(),
            module_required: builder.model().module_required,
            version: manifests.bashible_context.version.clone(),
            artifacts,
            init_secret_created,
            written_files: vec![],
            run_times: None,
        },
        kubeadm_context: manifests.kubeadm_context,
        bashible_context: manifests.bashible_context,
    })
}

async fn write_output(kube: &InMemoryKube, output_dir: &Path, rendered: &Rendered) -> Result<Vec<String>> {
    let mut written = kube
        .write_to_dir(output_dir, &rendered.summary.artifacts)
        .await
        .context("writing rendered objects")?;

    for (file_name, yaml) in [
        (KUBEADM_CONTEXT_FILE, serde_yaml::to_string(&rendered.kubeadm_context)?),
        (BASHIBLE_CONTEXT_FILE, serde_yaml::to_string(&rendered.bashible_context)?),
    ] {
        let path = output_dir.join(file_name);
        tokio::fs::write(&path, yaml).await.context(format!("writing {}", path.display()))?;
        written.push(path.display().to_string());
    }

    Ok(written)
}

/// A full run of the binary: load the cluster objects, render, write everything out
pub async fn run(config: &RegistryConfig) -> Result<RenderSummary> {
    let kube = Arc::new(InMemoryKube::new());

    if let Some(cluster_dir) = &config.cluster_dir {
        kube.load_dir(cluster_dir).await.context("loading cluster objects")?;
    }

    let render_start = Instant::now();
    let mut rendered = render(config, kube.clone(), &RetryConfig::default()).await.context("rendering")?;
    let render_run_time = RunTime::since_start(render_start);

    let write_run_time = match &config.output_dir {
        Some(output_dir) => {
            let write_start = Instant::now();
            rendered.summary.written_files = write_output(&kube, output_dir, &rendered).await.context("writing output")?;
            Some(RunTime::since_start(write_start))
        }
        None => None,
    };

    rendered.summary.run_times = Some(RunTimes {
        render_run_time,
        write_run_time,
    });

    logging::generate_summary(config, &rendered.summary).context("generating summary")?;

    Ok(rendered.summary)
}
