use lazy_regex::{lazy_regex, Lazy, Regex};

/// In-cluster registry service, host and port
pub const HOST: &str = "registry.d8-system.svc:5001";
/// Path under which the in-cluster registry serves platform images
pub const PATH: &str = "/system/deckhouse";
pub const HOST_WITH_PATH: &str = "registry.d8-system.svc:5001/system/deckhouse";
/// Rewrite source used by the Direct mode mirror
pub const PATH_REGEXP: &str = "^system/deckhouse";

pub const DEFAULT_IMAGES_REPO: &str = "registry.deckhouse.io/deckhouse/ce";
pub const LICENSE_USERNAME: &str = "license-token";

pub const CA_COMMON_NAME: &str = "registry-ca";
pub const USER_RW_NAME: &str = "rw";
pub const USER_RO_NAME: &str = "ro";

pub const SYSTEM_NAMESPACE: &str = "d8-system";
pub const DECKHOUSE_REGISTRY_SECRET_NAME: &str = "deckhouse-registry";
pub const BASHIBLE_CONFIG_SECRET_NAME: &str = "registry-bashible-config";
pub const INIT_SECRET_NAME: &str = "registry-init";
pub const INIT_SECRET_APPLIED_ANNOTATION: &str = "registry.deckhouse.io/is-applied";
pub const CONFIG_SECRET_KEY: &str = "config";

pub const MODULE_CONFIG_NAME: &str = "deckhouse";
pub const MODULE_CONFIG_API_VERSION: &str = "deckhouse.io/v1alpha1";

/// Smallest upstream cache TTL accepted for proxy settings, in seconds
pub const MIN_PROXY_TTL_SECONDS: u64 = 5 * 60;

pub const IMAGES_REPO_PATTERN: &str = r"^[0-9a-zA-Z.\-]+(:[0-9]{1,5})?(/[0-9a-zA-Z.\-_]+)*$";
pub const TTL_PATTERN: &str = r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$";

pub static IMAGES_REPO_REGEX: Lazy<Regex> = lazy_regex!(r"^[0-9a-zA-Z.\-]+(:[0-9]{1,5})?(/[0-9a-zA-Z.\-_]+)*$");
pub static DOCKER_CFG_HOST_REGEX: Lazy<Regex> = lazy_regex!(r"^([a-z]|\d)+(\.?|-?)(([a-z]|\d)+(\.|-|))*([a-z]|\d+|([a-z]|\d):\d+)$");
pub static TTL_REGEX: Lazy<Regex> = lazy_regex!(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$");
