//! Registry configuration and provisioning: turns user facing registry intent into the secrets and
//! template contexts consumed by node bootstrap and the in-cluster registry operator.

pub mod bashible;
pub mod constants;
pub mod data;
pub mod docker_cfg;
pub mod error;
pub mod init_config;
pub mod init_secret;
pub mod manifests;
pub mod mode_model;
pub mod pki;
pub mod settings;
pub mod types;

pub use data::Data;
pub use error::RegistryError;
pub use init_config::InitConfig;
pub use manifests::ManifestBuilder;
pub use mode_model::ModeModel;
pub use settings::{DeckhouseSettings, ProxySettings, RegistrySettings, Settings};
pub use types::{CheckMode, Mode, Scheme};
