use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter)]
pub enum Mode {
    Unmanaged,
    Direct,
    Proxy,
    Local,
}

impl Mode {
    /// Modes the core is able to turn into artifacts
    pub fn is_supported(&self) -> bool {
        matches!(self, Mode::Unmanaged | Mode::Direct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Scheme {
    #[serde(rename = "HTTP")]
    #[strum(serialize = "HTTP")]
    Http,
    #[default]
    #[serde(rename = "HTTPS")]
    #[strum(serialize = "HTTPS")]
    Https,
}

impl Scheme {
    /// Case-insensitive parse, anything unrecognized (including empty) falls back to HTTPS
    pub fn from_str_or_default(value: &str) -> Self {
        value.trim().parse().unwrap_or_default()
    }

    /// Form used in secrets and mirror definitions
    pub fn lowercase(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, EnumIter)]
pub enum CheckMode {
    Default,
    Relax,
}
