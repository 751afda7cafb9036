//! Error types for the DHT peer keeper
//!
//! The core bookkeeping operations report success through booleans and
//! empty results; this type only covers construction, configuration and
//! the network plumbing around the core.

use std::fmt;

/// Error type for DHT peer keeper operations
#[derive(Debug, Clone)]
pub enum DhtError {
    /// Configuration errors (non-positive capacities, bad ports)
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Network errors (socket binding, DNS resolution)
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl DhtError {
    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        DhtError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        DhtError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(
        message: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        DhtError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            DhtError::NetworkError { source, .. } => {
                *source = Some(
                    source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)),
                );
            }
            DhtError::ConfigError { field, .. } | DhtError::ValidationError { field, .. } => {
                *field = Some(
                    field.as_ref().map_or_else(|| ctx.clone(), |f| format!("{}: {}", f, ctx)),
                );
            }
        }
        self
    }
}

impl fmt::Display for DhtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DhtError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            DhtError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => {
                        write!(f, "Network error: {} (address: {}, source: {})", message, a, s)
                    }
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            DhtError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for DhtError {}

impl From<std::io::Error> for DhtError {
    fn from(err: std::io::Error) -> Self {
        DhtError::NetworkError {
            message: err.to_string(),
            address: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for DhtError {
    fn from(err: std::net::AddrParseError) -> Self {
        DhtError::network_error_full(
            "Failed to parse address",
            "unknown".to_string(),
            err.to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_with_field() {
        let err = DhtError::config_error_with_field("must be at least 1", "max_hosts");
        assert!(err.to_string().contains("Config error"));
        assert!(err.to_string().contains("max_hosts"));
    }

    #[test]
    fn test_network_error_full() {
        let err = DhtError::network_error_full("Failed to bind", "0.0.0.0:6881", "address in use");
        assert_eq!(
            err.to_string(),
            "Network error: Failed to bind (address: 0.0.0.0:6881, source: address in use)"
        );
    }

    #[test]
    fn test_with_context() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err = DhtError::from(io_err).with_context("binding UDP socket to 0.0.0.0:6881");
        assert!(err.to_string().contains("0.0.0.0:6881"));

        let err = DhtError::config_error_with_field("must be at least 1", "max_hosts")
            .with_context("from --max-hosts");
        assert!(err.to_string().contains("max_hosts: from --max-hosts"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: DhtError = io_err.into();
        assert!(matches!(err, DhtError::NetworkError { .. }));
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: DhtError = addr_err.into();
        assert!(matches!(err, DhtError::NetworkError { .. }));
    }

    #[test]
    fn test_validation_error_with_field() {
        let err = DhtError::validation_error_with_field("Value out of range", "port");
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("port"));
    }
}
