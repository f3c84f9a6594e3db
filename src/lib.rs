//! Registry configuration and provisioning core of the Deckhouse installer

pub mod commander;
pub mod config;
pub mod k8s;
pub mod logging;
pub mod registry;
pub mod render;
pub mod retry;
pub mod runtime;
