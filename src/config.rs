use crate::registry::{DeckhouseSettings, InitConfig};
use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::LevelFilter;
use serde::Serialize;
use serde_json::Value;
use std::{env, str::FromStr};
use uuid::Uuid;

use self::cli::Cli;
pub use self::path::ConfigPath;

mod cli;
mod path;

pub const CONFIG_ENV_VAR: &str = "DHCTL_REGISTRY_CONFIG";

/// All parsed inputs, coalesced into a single struct for convenience
#[derive(Serialize)]
pub struct RegistryConfig {
    #[serde(serialize_with = "redacted_debug")]
    pub init_config: Option<InitConfig>,
    #[serde(serialize_with = "redacted_debug")]
    pub module_config: Option<DeckhouseSettings>,
    pub legacy_mode: bool,
    pub cluster_dir: Option<ConfigPath>,
    pub output_dir: Option<ConfigPath>,
    pub summary_file: Option<ConfigPath>,
    #[serde(serialize_with = "display")]
    pub log_level: LevelFilter,
    pub threads: Option<usize>,
    pub commander_uuid: Option<Uuid>,

    pub cli_raw: Option<String>,
}

// Registry settings carry credentials, the summary only gets their redacting Debug form
fn redacted_debug<T: std::fmt::Debug, S: serde::Serializer>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => format!("{:?}", value).serialize(serializer),
        None => serializer.serialize_none(),
    }
}

fn display<T: std::fmt::Display, S: serde::Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    value.to_string().serialize(serializer)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            init_config: None,
            module_config: None,
            legacy_mode: false,
            cluster_dir: None,
            output_dir: None,
            summary_file: None,
            log_level: LevelFilter::Info,
            threads: None,
            commander_uuid: None,
            cli_raw: None,
        }
    }
}

/// A module config input is either a whole deckhouse ModuleConfig or only its registry section
pub(crate) fn parse_module_config(value: Value) -> Result<Option<DeckhouseSettings>> {
    if value.get("kind").and_then(Value::as_str) == Some("ModuleConfig") {
        return DeckhouseSettings::from_module_config(&value);
    }

    Ok(Some(serde_json::from_value(value).context("parsing registry settings")?))
}

fn read_yaml(path: &ConfigPath) -> Result<Value> {
    serde_yaml::from_slice(&std::fs::read(&**path).context(format!("reading {}", path))?).context(format!("parsing {}", path))
}

impl RegistryConfig {
    pub fn parse_from_config_file(config_bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(config_bytes)?;

        let mut value = value.as_object().context("config file must be a YAML object")?.clone();

        let init_config = match value.remove("init_config") {
            Some(value) => {
                ensure!(value.is_object(), "init_config must be an object");
                Some(serde_json::from_value::<InitConfig>(value).context("parsing init_config")?)
            }
            None => None,
        };

        let module_config = match value.remove("module_config") {
            Some(value) => {
                ensure!(value.is_object(), "module_config must be an object");
                parse_module_config(value).context("parsing module_config")?
            }
            None => None,
        };

        let legacy_mode = value
            .remove("legacy_mode")
            .unwrap_or(Value::Bool(false))
            .as_bool()
            .context("legacy_mode must be a boolean")?;

        let cluster_dir = match value.remove("cluster_dir") {
            Some(value) => Some(ConfigPath::existing_dir(value.as_str().context("cluster_dir must be a string")?).context("cluster_dir")?),
            None => None,
        };

        let output_dir = match value.remove("output_dir") {
            Some(value) => Some(ConfigPath::new(value.as_str().context("output_dir must be a string")?).context("output_dir")?),
            None => None,
        };

        let summary_file = match value.remove("summary_file") {
            Some(value) => Some(ConfigPath::new(value.as_str().context("summary_file must be a string")?).context("summary_file")?),
            None => None,
        };

        let log_level = match value.remove("log_level") {
            Some(value) => {
                let level = value.as_str().context("log_level must be a string")?;
                LevelFilter::from_str(level).context(format!("log_level {}", level))?
            }
            None => LevelFilter::Info,
        };

        let threads = match value.remove("threads") {
            Some(value) => Some(
                value
                    .as_u64()
                    .context("threads must be an integer")?
                    .try_into()
                    .context("threads must be an integer")?,
            ),
            None => None,
        };

        let commander_uuid = match value.remove("commander_uuid") {
            Some(value) => {
                let uuid = value.as_str().context("commander_uuid must be a string")?;
                Some(Uuid::parse_str(uuid).context(format!("commander_uuid {}", uuid))?)
            }
            None => None,
        };

        ensure!(
            value.is_empty(),
            "unknown keys {:?} in config file",
            value.keys().map(|key| key.to_string()).collect::<Vec<String>>().join(", ")
        );

        let config = Self {
            init_config,
            module_config,
            legacy_mode,
            cluster_dir,
            output_dir,
            summary_file,
            log_level,
            threads,
            commander_uuid,
            cli_raw: None,
        };

        config.check()?;

        Ok(config)
    }

    pub(crate) fn parse_from_cli(cli: Cli) -> Result<Self> {
        let init_config = match cli.init_config.map(ConfigPath::from) {
            Some(path) => Some(serde_json::from_value::<InitConfig>(read_yaml(&path)?).context(format!("parsing init config {}", path))?),
            None => None,
        };

        let module_config = match cli.module_config.map(ConfigPath::from) {
            Some(path) => parse_module_config(read_yaml(&path)?).context(format!("parsing module config {}", path))?,
            None => None,
        };

        let config = Self {
            init_config,
            module_config,
            legacy_mode: cli.legacy_mode,
            cluster_dir: cli.cluster_dir.map(ConfigPath::from),
            output_dir: cli.output_dir.map(ConfigPath::from),
            summary_file: cli.summary_file.map(ConfigPath::from),
            log_level: cli.log_level,
            threads: cli.threads,
            commander_uuid: cli.commander_uuid,
            cli_raw: Some(serde_json::to_string(&env::args().collect::<Vec<String>>())?),
        };

        config.check()?;

        Ok(config)
    }

    fn check(&self) -> Result<()> {
        ensure!(
            self.init_config.is_some() || self.module_config.is_some(),
            "at least one of init_config or module_config must be given"
        );

        Ok(())
    }

    pub fn new() -> Result<RegistryConfig> {
        Ok(match env::var(CONFIG_ENV_VAR) {
            Ok(var) => {
                let num_args = env::args().len();
                ensure!(
                    num_args == 1,
                    "{CONFIG_ENV_VAR} is set, but there are {num_args} CLI arguments. {CONFIG_ENV_VAR} is meant to be used with no arguments."
                );
                RegistryConfig::parse_from_config_file(&std::fs::read(&var).context(format!("reading {} file {}", CONFIG_ENV_VAR, var))?)
                    .context(format!("parsing {} file {}", CONFIG_ENV_VAR, var))?
            }
            Err(_) => RegistryConfig::parse_from_cli(Cli::parse()).context("CLI parsing")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_file() -> Result<()> {
        let output_dir = tempfile::tempdir()?;

        let config = RegistryConfig::parse_from_config_file(
            format!(
                r#"
init_config:
  imagesRepo: r.example.com/test
  registryScheme: HTTP
module_config:
  mode: Direct
  direct:
    license: lic
legacy_mode: true
output_dir: {}
log_level: debug
threads: 2
commander_uuid: 6f2a6ea4-2c4f-4d2b-9d0c-1a6c3c3f1f0e
"#,
                output_dir.path().display()
            )
            .as_bytes(),
        )?;

        assert_eq!(config.init_config.as_ref().map(|init| init.images_repo.as_str()), Some("r.example.com/test"));
        assert_eq!(config.module_config.as_ref().map(|module| module.mode.as_str()), Some("Direct"));
        assert!(config.legacy_mode);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.threads, Some(2));
        assert!(config.commander_uuid.is_some());
        assert_eq!(config.output_dir.as_deref(), Some(output_dir.path()));

        Ok(())
    }

    #[test]
    fn test_module_config_resource() -> Result<()> {
        let config = RegistryConfig::parse_from_config_file(
            br#"
module_config:
  apiVersion: deckhouse.io/v1alpha1
  kind: ModuleConfig
  metadata:
    name: deckhouse
  spec:
    version: 1
    settings:
      registry:
        mode: Unmanaged
        unmanaged:
          imagesRepo: r.example.com
"#,
        )?;

        assert_eq!(
            config.module_config.and_then(|module| module.unmanaged).map(|unmanaged| unmanaged.images_repo),
            Some("r.example.com".to_string())
        );

        Ok(())
    }

    #[test]
    fn test_rejects_bad_config_files() {
        assert!(RegistryConfig::parse_from_config_file(b"legacy_mode: true\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"init_config: {}\nfoo: bar\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"init_config: {}\nlegacy_mode: yes please\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"init_config: {}\ncommander_uuid: nope\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"init_config: {}\nlog_level: loud\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"init_config: {}\ncluster_dir: /does/not/exist\n").is_err());
        assert!(RegistryConfig::parse_from_config_file(b"- a\n").is_err());
    }

    #[test]
    fn test_summary_redacts_credentials() -> Result<()> {
        let config = RegistryConfig::parse_from_config_file(
            b"module_config:\n  mode: Direct\n  direct:\n    password: hunter2\ncommander_uuid: 6f2a6ea4-2c4f-4d2b-9d0c-1a6c3c3f1f0e\n",
        )?;

        let summary = serde_yaml::to_string(&config)?;
        assert!(summary.contains("module_config"));
        assert!(summary.contains("commander_uuid: 6f2a6ea4-2c4f-4d2b-9d0c-1a6c3c3f1f0e"));
        assert!(!summary.contains("hunter2"));

        Ok(())
    }
}
