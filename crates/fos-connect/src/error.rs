//! Crate-wide error type

use crate::builder::ConfigError;
use crate::preferences::PreferencesError;
use crate::provider::CatalogError;
use crate::store::StoreError;
use uuid::Uuid;

/// Orchestrator errors
///
/// Cloneable so that it can be kept in `ConnectionState::last_error` and
/// broadcast to every configuration-error subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Profile not found: {0}")]
    ProfileNotFound(Uuid),

    #[error("Profile {0} is not a provider profile")]
    NotProvider(Uuid),

    #[error("Unable to fetch provider data for profile {profile_id}: {source}")]
    ProviderFetchFailed {
        profile_id: Uuid,
        #[source]
        source: CatalogError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tunnel failure: {0}")]
    StrategyFailure(String),

    #[error("Profile store error: {0}")]
    Store(#[from] StoreError),

    #[error("Preferences error: {0}")]
    Preferences(#[from] PreferencesError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: Error = ConfigError::MissingAccount.into();
        assert_eq!(err, Error::Config(ConfigError::MissingAccount));
        assert_eq!(err.to_string(), "Configuration error: Missing account");
    }

    #[test]
    fn test_fetch_failure_message() {
        let id = Uuid::nil();
        let err = Error::ProviderFetchFailed {
            profile_id: id,
            source: CatalogError::FetchFailed("timeout".into()),
        };
        assert!(err.to_string().contains("timeout"));
    }
}
