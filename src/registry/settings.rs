use super::{
    constants::{
        DEFAULT_IMAGES_REPO, IMAGES_REPO_PATTERN, IMAGES_REPO_REGEX, MIN_PROXY_TTL_SECONDS, MODULE_CONFIG_API_VERSION,
        MODULE_CONFIG_NAME, TTL_PATTERN, TTL_REGEX,
    },
    error::RegistryError,
    init_config::InitConfig,
    types::{CheckMode, Mode, Scheme},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::str::FromStr;

type ValidationResult = std::result::Result<(), RegistryError>;

/// Connection settings of a single registry, in the shape users write them in the ModuleConfig
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    pub images_repo: String,
    pub scheme: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub license: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub check_mode: String,
}

impl std::fmt::Debug for RegistrySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &str| if value.is_empty() { "" } else { "<redacted>" };

        f.debug_struct("RegistrySettings")
            .field("images_repo", &self.images_repo)
            .field("scheme", &self.scheme)
            .field("ca", &if self.ca.is_empty() { "" } else { "<ca>" })
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("license", &redacted(&self.license))
            .field("check_mode", &self.check_mode)
            .finish()
    }
}

fn trim_images_repo(images_repo: &str) -> String {
    images_repo.trim().trim_end_matches('/').to_string()
}

fn overlay(base: &mut String, other: &str) {
    if !other.is_empty() {
        *base = other.to_string();
    }
}

impl RegistrySettings {
    /// Cluster defaults: the CE repository over HTTPS
    pub fn new() -> Self {
        Self {
            images_repo: DEFAULT_IMAGES_REPO.to_string(),
            scheme: Scheme::default().to_string(),
            ..Default::default()
        }
    }

    /// User settings with the cluster defaults filled in where the user left them out
    pub fn apply_settings(user: Option<&RegistrySettings>) -> Self {
        let Some(user) = user else {
            return Self::new();
        };

        let mut settings = user.clone();
        settings.images_repo = trim_images_repo(&user.images_repo);

        if settings.images_repo.is_empty() {
            settings.images_repo = DEFAULT_IMAGES_REPO.to_string();
        }

        if settings.scheme.is_empty() {
            settings.scheme = Scheme::default().to_string();
        }

        settings
    }

    /// Field-wise overlay of `other`'s non-empty values on a copy of `self`
    pub fn merge(&self, other: Option<&RegistrySettings>) -> Self {
        let mut merged = self.clone();

        if let Some(other) = other {
            overlay(&mut merged.images_repo, &trim_images_repo(&other.images_repo));
            overlay(&mut merged.scheme, &other.scheme);
            overlay(&mut merged.ca, &other.ca);
            overlay(&mut merged.username, &other.username);
            overlay(&mut merged.password, &other.password);
            overlay(&mut merged.license, &other.license);
            overlay(&mut merged.check_mode, &other.check_mode);
        }

        merged
    }

    pub fn validate(&self) -> ValidationResult {
        if self.images_repo.is_empty() {
            return Err(RegistryError::invalid("Field 'imagesRepo' is required"));
        }

        if !IMAGES_REPO_REGEX.is_match(&self.images_repo) {
            return Err(RegistryError::invalid(format!(
                "Field 'imagesRepo' value {:?} does not match the regexp pattern `{}`",
                self.images_repo, IMAGES_REPO_PATTERN
            )));
        }

        let scheme = Scheme::from_str(&self.scheme)
            .map_err(|_| RegistryError::invalid(format!("Invalid scheme {:?}, expected HTTP or HTTPS", self.scheme)))?;

        if !self.license.is_empty() && (!self.username.is_empty() || !self.password.is_empty()) {
            return Err(RegistryError::invalid(
                "License field must be empty when using credentials (username/password)",
            ));
        }

        if self.username.is_empty() && !self.password.is_empty() {
            return Err(RegistryError::invalid("Username is required when password is provided"));
        }

        if !self.username.is_empty() && self.password.is_empty() {
            return Err(RegistryError::invalid("Password is required when username is provided"));
        }

        if scheme == Scheme::Http && !self.ca.is_empty() {
            return Err(RegistryError::invalid("CA is not allowed when scheme is 'HTTP'"));
        }

        if !self.check_mode.is_empty() && CheckMode::from_str(&self.check_mode).is_err() {
            return Err(RegistryError::invalid(format!("unknown registry check mode {:?}", self.check_mode)));
        }

        Ok(())
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("imagesRepo".to_string(), json!(self.images_repo));
        map.insert("scheme".to_string(), json!(self.scheme));

        for (key, value) in [
            ("ca", &self.ca),
            ("username", &self.username),
            ("password", &self.password),
            ("license", &self.license),
            ("checkMode", &self.check_mode),
        ] {
            if !value.is_empty() {
                map.insert(key.to_string(), json!(value));
            }
        }

        map
    }
}

/// Registry settings of the caching proxy mode, the upstream registry plus an upstream cache TTL
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    #[serde(flatten)]
    pub registry: RegistrySettings,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ttl: String,
}

impl ProxySettings {
    pub fn new() -> Self {
        Self {
            registry: RegistrySettings::new(),
            ttl: String::new(),
        }
    }

    pub fn merge(&self, other: Option<&ProxySettings>) -> Self {
        let mut merged = self.clone();

        if let Some(other) = other {
            merged.registry = merged.registry.merge(Some(&other.registry));
            overlay(&mut merged.ttl, &other.ttl);
        }

        merged
    }

    pub fn validate(&self) -> ValidationResult {
        self.registry.validate()?;

        if let Some(ttl) = self.ttl_seconds()? {
            if ttl < MIN_PROXY_TTL_SECONDS {
                return Err(RegistryError::invalid(format!(
                    "Field 'ttl' value {:?} must be at least {}m",
                    self.ttl,
                    MIN_PROXY_TTL_SECONDS / 60
                )));
            }
        }

        Ok(())
    }

    /// TTL in seconds, `None` when unset
    pub fn ttl_seconds(&self) -> std::result::Result<Option<u64>, RegistryError> {
        if self.ttl.is_empty() {
            return Ok(None);
        }

        let pattern_error =
            || RegistryError::invalid(format!("Field 'ttl' value {:?} does not match required pattern `{}`", self.ttl, TTL_PATTERN));

        let captures = TTL_REGEX.captures(&self.ttl).ok_or_else(pattern_error)?;

        let mut seconds = 0u64;
        for (index, multiplier) in [(1, 3600u64), (2, 60), (3, 1)] {
            if let Some(value) = captures.get(index) {
                let value: u64 = value.as_str().parse().map_err(|_| pattern_error())?;
                seconds = value
                    .checked_mul(multiplier)
                    .and_then(|value| seconds.checked_add(value))
                    .ok_or_else(pattern_error)?;
            }
        }

        Ok(Some(seconds))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.registry.to_map();
        if !self.ttl.is_empty() {
            map.insert("ttl".to_string(), json!(self.ttl));
        }
        map
    }
}

/// The `registry` section of the deckhouse ModuleConfig. The mode is kept as written so that
/// unknown modes survive parsing and are reported by `validate`.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
#[serde(rename_all = "camelCase", default)]
pub struct DeckhouseSettings {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct: Option<RegistrySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmanaged: Option<RegistrySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

impl DeckhouseSettings {
    /// Defaults for `mode`. An empty mode means Direct, modes without defaults only carry the
    /// mode itself.
    pub fn new(mode: &str) -> Self {
        let mode = if mode.is_empty() { Mode::Direct.to_string() } else { mode.to_string() };

        let mut settings = Self {
            mode: mode.clone(),
            ..Default::default()
        };

        match Mode::from_str(&mode) {
            Ok(Mode::Direct) => settings.direct = Some(RegistrySettings::new()),
            Ok(Mode::Unmanaged) => settings.unmanaged = Some(RegistrySettings::new()),
            Ok(Mode::Proxy) => settings.proxy = Some(ProxySettings::new()),
            Ok(Mode::Local) | Err(_) => {}
        }

        settings
    }

    /// Fresh settings rooted on the user's mode, with defaults filled into the block of that mode
    pub fn apply_settings(user: &DeckhouseSettings) -> Self {
        let mut settings = Self {
            mode: user.mode.clone(),
            ..Default::default()
        };

        match Mode::from_str(&user.mode) {
            Ok(Mode::Direct) => settings.direct = Some(RegistrySettings::apply_settings(user.direct.as_ref())),
            Ok(Mode::Unmanaged) => settings.unmanaged = Some(RegistrySettings::apply_settings(user.unmanaged.as_ref())),
            Ok(Mode::Proxy) => {
                settings.proxy = Some(ProxySettings {
                    registry: RegistrySettings::apply_settings(user.proxy.as_ref().map(|proxy| &proxy.registry)),
                    ttl: user.proxy.as_ref().map(|proxy| proxy.ttl.clone()).unwrap_or_default(),
                })
            }
            Ok(Mode::Local) | Err(_) => {}
        }

        settings
    }

    /// Copy of `self` with `other` laid over it. Blocks present in `other` are merged field by
    /// field, an empty mode in `other` keeps the current one.
    pub fn merge(&self, other: Option<&DeckhouseSettings>) -> Self {
        let mut merged = self.clone();

        let Some(other) = other else {
            return merged;
        };

        overlay(&mut merged.mode, &other.mode);

        if let Some(direct) = &other.direct {
            merged.direct = Some(merged.direct.take().unwrap_or_default().merge(Some(direct)));
        }

        if let Some(unmanaged) = &other.unmanaged {
            merged.unmanaged = Some(merged.unmanaged.take().unwrap_or_default().merge(Some(unmanaged)));
        }

        if let Some(proxy) = &other.proxy {
            merged.proxy = Some(merged.proxy.take().unwrap_or_default().merge(Some(proxy)));
        }

        merged
    }

    pub fn validate(&self) -> ValidationResult {
        let mode = match Mode::from_str(&self.mode) {
            Ok(mode) if mode.is_supported() => mode,
            _ => return Err(RegistryError::UnknownMode(self.mode.clone())),
        };

        validate_section("direct", self.direct.as_ref(), mode == Mode::Direct, RegistrySettings::validate)?;
        validate_section("unmanaged", self.unmanaged.as_ref(), mode == Mode::Unmanaged, RegistrySettings::validate)?;
        validate_section("proxy", self.proxy.as_ref(), mode == Mode::Proxy, ProxySettings::validate)?;

        Ok(())
    }

    /// Validates and narrows the settings down to the populated block of the selected mode
    pub fn validated(&self) -> std::result::Result<Settings, RegistryError> {
        self.validate()?;

        match (Mode::from_str(&self.mode), &self.direct, &self.unmanaged) {
            (Ok(Mode::Direct), Some(direct), _) => Ok(Settings::Direct(direct.clone())),
            (Ok(Mode::Unmanaged), _, Some(unmanaged)) => Ok(Settings::Unmanaged(unmanaged.clone())),
            _ => Err(RegistryError::UnknownMode(self.mode.clone())),
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("mode".to_string(), json!(self.mode));

        if let Some(direct) = &self.direct {
            map.insert("direct".to_string(), Value::Object(direct.to_map()));
        }

        if let Some(unmanaged) = &self.unmanaged {
            map.insert("unmanaged".to_string(), Value::Object(unmanaged.to_map()));
        }

        if let Some(proxy) = &self.proxy {
            map.insert("proxy".to_string(), Value::Object(proxy.to_map()));
        }

        map
    }

    /// Reads `spec.settings.registry` of a deckhouse ModuleConfig object
    pub fn from_module_config(module_config: &Value) -> Result<Option<Self>> {
        match module_config.pointer("/spec/settings/registry") {
            Some(registry) => Ok(Some(
                serde_json::from_value(registry.clone()).context("parsing registry section of ModuleConfig")?,
            )),
            None => Ok(None),
        }
    }

    /// The deckhouse ModuleConfig carrying these settings as its registry section
    pub fn module_config_manifest(&self) -> Value {
        json!({
            "apiVersion": MODULE_CONFIG_API_VERSION,
            "kind": "ModuleConfig",
            "metadata": {
                "name": MODULE_CONFIG_NAME,
            },
            "spec": {
                "version": 1,
                "settings": {
                    "registry": Value::Object(self.to_map()),
                },
            },
        })
    }

    fn with_registry_block(mode: &str, registry: RegistrySettings) -> Self {
        let mut settings = Self {
            mode: mode.to_string(),
            ..Default::default()
        };

        match Mode::from_str(mode) {
            Ok(Mode::Direct) => settings.direct = Some(registry),
            Ok(Mode::Unmanaged) => settings.unmanaged = Some(registry),
            Ok(Mode::Proxy) => {
                settings.proxy = Some(ProxySettings {
                    registry,
                    ttl: String::new(),
                })
            }
            Ok(Mode::Local) | Err(_) => {}
        }

        settings
    }
}

fn validate_section<T>(
    name: &str,
    section: Option<&T>,
    selected: bool,
    validate: impl Fn(&T) -> ValidationResult,
) -> ValidationResult {
    match (section, selected) {
        (Some(section), true) => validate(section).map_err(|err| err.in_section(name)),
        (None, true) => Err(RegistryError::invalid(format!("{}: is required", name))),
        (Some(_), false) => Err(RegistryError::invalid(format!("Field '{}' must be empty", name))),
        (None, false) => Ok(()),
    }
}

/// Validated settings, one variant per mode the core turns into artifacts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settings {
    Direct(RegistrySettings),
    Unmanaged(RegistrySettings),
}

impl Settings {
    pub fn mode(&self) -> Mode {
        match self {
            Settings::Direct(_) => Mode::Direct,
            Settings::Unmanaged(_) => Mode::Unmanaged,
        }
    }

    pub fn registry(&self) -> &RegistrySettings {
        match self {
            Settings::Direct(registry) | Settings::Unmanaged(registry) => registry,
        }
    }
}

impl From<&Settings> for DeckhouseSettings {
    fn from(settings: &Settings) -> Self {
        DeckhouseSettings::with_registry_block(settings.mode().as_ref(), settings.registry().clone())
    }
}

/// Fuses the three input surfaces. Precedence, lowest first: cluster defaults of the selected
/// mode, the bootstrap init config, the user's module config. Without an explicit mode a bare init
/// config means Unmanaged, anything else Direct.
pub fn resolve(init_config: Option<&InitConfig>, module_settings: Option<&DeckhouseSettings>) -> Result<DeckhouseSettings> {
    let mode = match module_settings.map(|settings| settings.mode.as_str()) {
        Some(mode) if !mode.is_empty() => mode.to_string(),
        _ if init_config.is_some() => Mode::Unmanaged.to_string(),
        _ => Mode::Direct.to_string(),
    };

    let mut settings = DeckhouseSettings::new(&mode);

    if let Some(init_config) = init_config {
        let registry = init_config
            .with_defaults()
            .to_registry_settings()
            .context("converting init config to registry settings")?;

        settings = settings.merge(Some(&DeckhouseSettings::with_registry_block(&mode, registry)));
    }

    if let Some(module_settings) = module_settings {
        settings = settings.merge(Some(module_settings));
    }

    log::info!("resolved registry mode {}", settings.mode);

    Ok(settings)
}
