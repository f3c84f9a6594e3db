use clap::Parser;
use clio::ClioPath;
use log::LevelFilter;
use uuid::Uuid;

/// Renders the registry secrets, ModuleConfig and bootstrap contexts of a Deckhouse cluster
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// YAML file with the registry fields of the bootstrap configuration (imagesRepo,
    /// registryDockerCfg, registryCA, registryScheme)
    #[clap(long, value_parser = clap::value_parser!(ClioPath).exists().is_file(), required_unless_present = "module_config")]
    pub(crate) init_config: Option<ClioPath>,

    /// YAML file with either the deckhouse ModuleConfig or just its registry section
    #[clap(long, value_parser = clap::value_parser!(ClioPath).exists().is_file())]
    pub(crate) module_config: Option<ClioPath>,

    /// The cluster predates the registry module. Nodes keep pulling from the remote registry and
    /// no PKI is handed over.
    #[clap(long)]
    pub(crate) legacy_mode: bool,

    /// Directory of YAML objects already present in the cluster, such as the registry-init secret
    /// or the commander uuid configmap
    #[clap(long, value_parser = clap::value_parser!(ClioPath).exists().is_dir())]
    pub(crate) cluster_dir: Option<ClioPath>,

    /// Where to write the rendered objects and contexts
    #[clap(long, value_parser = clap::value_parser!(ClioPath))]
    pub(crate) output_dir: Option<ClioPath>,

    /// A file to write a summary of the run into
    #[clap(long, value_parser = clap::value_parser!(ClioPath))]
    pub(crate) summary_file: Option<ClioPath>,

    #[clap(long, default_value = "info")]
    pub(crate) log_level: LevelFilter,

    /// Number of tokio worker threads, defaults to the number of cores
    #[clap(long)]
    pub(crate) threads: Option<usize>,

    /// Refuse to render for a cluster whose d8-commander-uuid configmap carries a different uuid
    #[clap(long)]
    pub(crate) commander_uuid: Option<Uuid>,
}
