use thiserror::Error;

/// Sentinel errors of the registry core. They travel inside `anyhow::Error` and callers that need
/// to branch on them use `downcast_ref::<RegistryError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown registry mode: {0:?}")]
    UnknownMode(String),

    #[error("{0}")]
    InvalidSettings(String),

    #[error("registry is not initialized")]
    IsNotReady,

    #[error("cluster is managed by another commander: expected uuid {expected}, found {actual}")]
    ManagedByAnotherOwner { expected: String, actual: String },
}

impl RegistryError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidSettings(message.into())
    }

    /// Prefix a validation message with the section it came from, e.g. `direct: ...`
    pub(crate) fn in_section(self, section: &str) -> Self {
        match self {
            Self::InvalidSettings(message) => Self::InvalidSettings(format!("{}: {}", section, message)),
            other => other,
        }
    }
}

pub fn is_not_ready(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<RegistryError>(), Some(RegistryError::IsNotReady))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_prefix() {
        let err = RegistryError::invalid("Field 'imagesRepo' is required").in_section("direct");
        assert_eq!(err.to_string(), "direct: Field 'imagesRepo' is required");

        let err = RegistryError::IsNotReady.in_section("direct");
        assert_eq!(err, RegistryError::IsNotReady);
    }

    #[test]
    fn test_sentinels_survive_context() {
        let err = anyhow::Error::from(RegistryError::IsNotReady).context("checking registry-init");
        assert!(is_not_ready(&err));
        assert!(!matches!(err.downcast_ref::<RegistryError>(), Some(RegistryError::UnknownMode(_))));
    }
}
