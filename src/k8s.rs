use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64_standard, Engine as _};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct K8sResourceLocation {
    pub namespace: Option<String>,
    pub kind: String,
    pub apiversion: String,
    pub name: String,
}

impl Serialize for K8sResourceLocation {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl std::fmt::Display for K8sResourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}:{}", self.apiversion, self.kind, namespace, self.name),
            None => write!(f, "{}/{}/{}", self.apiversion, self.kind, self.name),
        }
    }
}

impl K8sResourceLocation {
    pub fn new(namespace: Option<&str>, kind: &str, name: &str, apiversion: &str) -> Self {
        Self {
            namespace: namespace.map(|namespace| namespace.to_string()),
            kind: kind.to_string(),
            name: name.to_string(),
            apiversion: apiversion.to_string(),
        }
    }

    pub fn secret(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), "Secret", name, "v1")
    }

    pub fn config_map(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), "ConfigMap", name, "v1")
    }

    /// Storage key of the object, `/registry/<plural>/[<namespace>/]<name>`
    pub fn as_storage_key(&self) -> String {
        format!(
            "/registry/{}/{}{}",
            plural(&self.kind),
            match &self.namespace {
                Some(namespace) => format!("{}/", namespace),
                None => "".to_string(),
            },
            self.name
        )
    }

    fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.yaml",
            self.namespace.as_deref().unwrap_or("cluster"),
            self.kind.to_lowercase(),
            self.name
        )
    }
}

fn plural(kind: &str) -> String {
    let kind = kind.to_lowercase();
    match kind.as_str() {
        "configmap" => "configmaps".to_string(),
        "moduleconfig" => "moduleconfigs".to_string(),
        _ if kind.ends_with('s') => format!("{}es", kind),
        _ => format!("{}s", kind),
    }
}

impl TryFrom<&Value> for K8sResourceLocation {
    type Error = anyhow::Error;

    fn try_from(value: &Value) -> Result<Self> {
        let metadata = value.get("metadata").context("object has no metadata")?;

        let namespace = match metadata.get("namespace") {
            Some(namespace) => match namespace.as_str().context("metadata.namespace must be a string")? {
                "" => None,
                namespace => Some(namespace),
            },
            None => None,
        };

        Ok(Self::new(
            namespace,
            value.get("kind").and_then(Value::as_str).context("object has no kind")?,
            metadata.get("name").and_then(Value::as_str).context("object has no metadata.name")?,
            value.get("apiVersion").and_then(Value::as_str).context("object has no apiVersion")?,
        ))
    }
}

/// Failures a Kubernetes API call can report besides NotFound, which the client maps to `None`
/// or `false` instead
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KubeError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("transient api error: {0}")]
    Transient(String),
}

/// The slice of the Kubernetes API the registry core talks to
#[async_trait]
pub trait KubeClient: Send + Sync {
    async fn get(&self, location: &K8sResourceLocation) -> Result<Option<Value>>;

    /// Fails with `KubeError::AlreadyExists` when the object is present
    async fn create(&self, location: &K8sResourceLocation, value: Value) -> Result<()>;

    /// Create or replace
    async fn put(&self, location: &K8sResourceLocation, value: Value) -> Result<()>;

    /// `false` when there was nothing to delete
    async fn delete(&self, location: &K8sResourceLocation) -> Result<bool>;
}

/// A Kubernetes object store backed by an in-memory map of YAML documents. Serves as the render
/// target of a run and as the cluster in tests. Failures can be injected to exercise retries.
#[derive(Default)]
pub struct InMemoryKube {
    objects: Mutex<BTreeMap<K8sResourceLocation, Vec<u8>>>,
    pending_failures: AtomicUsize,
}

impl InMemoryKube {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls fail with `KubeError::Transient`
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<()> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_ok();

        if injected {
            bail!(KubeError::Transient("injected failure".to_string()));
        }

        Ok(())
    }

    /// Loads every `*.yaml` / `*.yml` file of `dir`, one object per file
    pub async fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(dir).await.context(format!("reading {}", dir.display()))?;
        let mut loaded = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !matches!(path.extension().and_then(|ext| ext.to_str()), Some("yaml") | Some("yml")) {
                continue;
            }

            let value: Value = serde_yaml::from_slice(&tokio::fs::read(&path).await.context(format!("reading {}", path.display()))?)
                .context(format!("parsing {}", path.display()))?;
            let location = K8sResourceLocation::try_from(&value).context(format!("locating {}", path.display()))?;

            self.put(&location, value).await?;
            loaded += 1;
        }

        log::info!("loaded {} objects from {}", loaded, dir.display());

        Ok(loaded)
    }

    /// Writes the stored objects at `locations` to `dir`, one YAML file per object. Locations
    /// with no object are skipped.
    pub async fn write_to_dir(&self, dir: &Path, locations: &[K8sResourceLocation]) -> Result<Vec<String>> {
        tokio::fs::create_dir_all(dir).await.context(format!("creating {}", dir.display()))?;

        let objects = {
            let objects = self.objects.lock().await;
            locations
                .iter()
                .filter_map(|location| objects.get(location).map(|yaml| (location.clone(), yaml.clone())))
                .collect::<Vec<_>>()
        };

        let writes = objects
            .into_iter()
            .map(|(location, yaml)| {
                let path = dir.join(location.file_name());
                tokio::spawn(async move {
                    tokio::fs::write(&path, yaml).await.context(format!("writing {}", path.display()))?;
                    anyhow::Ok(path.display().to_string())
                })
            })
            .collect::<Vec<_>>();

        join_all(writes)
            .await
            .into_iter()
            .map(|joined| joined.context("joining write task")?)
            .collect()
    }
}

#[async_trait]
impl KubeClient for InMemoryKube {
    async fn get(&self, location: &K8sResourceLocation) -> Result<Option<Value>> {
        self.injected_failure()?;

        match self.objects.lock().await.get(location) {
            Some(yaml) => Ok(Some(serde_yaml::from_slice(yaml).context(format!("decoding {}", location))?)),
            None => Ok(None),
        }
    }

    async fn create(&self, location: &K8sResourceLocation, value: Value) -> Result<()> {
        self.injected_failure()?;

        let mut objects = self.objects.lock().await;
        if objects.contains_key(location) {
            bail!(KubeError::AlreadyExists(location.to_string()));
        }

        objects.insert(location.clone(), serde_yaml::to_string(&value)?.into_bytes());

        Ok(())
    }

    async fn put(&self, location: &K8sResourceLocation, value: Value) -> Result<()> {
        self.injected_failure()?;

        self.objects
            .lock()
            .await
            .insert(location.clone(), serde_yaml::to_string(&value)?.into_bytes());

        Ok(())
    }

    async fn delete(&self, location: &K8sResourceLocation) -> Result<bool> {
        self.injected_failure()?;

        Ok(self.objects.lock().await.remove(location).is_some())
    }
}

pub fn is_already_exists(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<KubeError>(), Some(KubeError::AlreadyExists(_)))
}

pub const REGISTRY_LABELS: [(&str, &str); 2] = [("heritage", "deckhouse"), ("module", "registry")];

/// A `v1/Secret` manifest with base64 encoded `data`
pub fn secret_manifest(location: &K8sResourceLocation, secret_type: &str, data: &BTreeMap<String, Vec<u8>>) -> Value {
    let labels = REGISTRY_LABELS
        .iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect::<Map<String, Value>>();

    let data = data
        .iter()
        .map(|(key, value)| (key.clone(), json!(base64_standard.encode(value))))
        .collect::<Map<String, Value>>();

    let mut metadata = Map::new();
    metadata.insert("name".to_string(), json!(location.name));
    if let Some(namespace) = &location.namespace {
        metadata.insert("namespace".to_string(), json!(namespace));
    }
    metadata.insert("labels".to_string(), Value::Object(labels));

    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata,
        "type": secret_type,
        "data": data,
    })
}

/// Decoded `data` of a secret, an absent `data` is empty
pub fn secret_data(secret: &Value) -> Result<BTreeMap<String, Vec<u8>>> {
    let Some(data) = secret.get("data") else {
        return Ok(BTreeMap::new());
    };

    data.as_object()
        .context("secret data must be an object")?
        .iter()
        .map(|(key, value)| {
            let encoded = value.as_str().context(format!("secret data {} must be a string", key))?;
            Ok((
                key.clone(),
                base64_standard.decode(encoded).context(format!("decoding secret data {}", key))?,
            ))
        })
        .collect()
}

pub fn has_annotation(value: &Value, annotation: &str) -> bool {
    value
        .pointer("/metadata/annotations")
        .and_then(Value::as_object)
        .is_some_and(|annotations| annotations.contains_key(annotation))
}

pub fn set_annotation(value: &mut Value, annotation: &str, annotation_value: &str) -> Result<()> {
    let metadata = value
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .context("object has no metadata")?;

    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .context("metadata.annotations must be an object")?;

    annotations.insert(annotation.to_string(), json!(annotation_value));

    Ok(())
}

/// A `data` entry of a configmap, empty values count as absent
pub fn config_map_data<'a>(config_map: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match config_map.pointer("/data").and_then(|data| data.get(key)) {
        None => Ok(None),
        Some(value) => match value.as_str().context(format!("configmap data {} must be a string", key))? {
            "" => Ok(None),
            value => Ok(Some(value)),
        },
    }
}
