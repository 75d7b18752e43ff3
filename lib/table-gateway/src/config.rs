//! Connection settings for database backends.

use async_trait::async_trait;

use crate::GatewayError;

/// Environment variable read by `ConnectionConfig::from_env`.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Connection configuration for database backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
}

impl ConnectionConfig {
    /// Read the database URL from `DATABASE_URL`.
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_var(DATABASE_URL_VAR)
    }

    /// Read the database URL from the environment variable `name`.
    pub fn from_var(name: &str) -> Result<Self, GatewayError> {
        match std::env::var(name) {
            Ok(url) if !url.trim().is_empty() => Ok(ConnectionConfig::Url(url)),
            Ok(_) => Err(GatewayError::Configuration(format!("{} is empty", name))),
            Err(e) => Err(GatewayError::Configuration(format!("{}: {}", name, e))),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// A backend that can be opened from a `ConnectionConfig`.
#[async_trait]
pub trait GatewayConnection: Sized + Send + Sync {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn urls_convert_into_config() {
        let url = "postgres://localhost/gateway".to_string();
        assert_eq!(ConnectionConfig::from(url.as_str()).url(), url);
        assert_eq!(ConnectionConfig::from(&url), ConnectionConfig::Url(url.clone()));
    }

    #[test]
    fn missing_variable_is_a_configuration_error() {
        let result = ConnectionConfig::from_var("TABLE_GATEWAY_TEST_UNSET_URL");
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }
}
