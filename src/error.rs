//! Error types and handling for Ampwise
//!
//! Sensor and configuration problems are absorbed close to where they occur;
//! only actuator failures travel up through a policy cycle as errors.

use thiserror::Error;

/// Result type alias for Ampwise operations
pub type Result<T> = std::result::Result<T, AmpwiseError>;

/// Main error type for Ampwise
#[derive(Debug, Error)]
pub enum AmpwiseError {
    /// Required helper/entity missing or configuration file invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Actuator call rejected or failed on the host side
    #[error("Actuator error: {service} - {message}")]
    Actuator { service: String, message: String },

    /// Actuator call did not acknowledge within the service timeout
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Sequencer queue is at capacity; the operation was not accepted
    #[error("Operation queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Sensor value missing or unparseable
    #[error("Sensor error: {entity} - {message}")]
    Sensor { entity: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl AmpwiseError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new actuator error for the given `domain.service`
    pub fn actuator<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Actuator {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new queue-full error
    pub const fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Create a new sensor error
    pub fn sensor<S: Into<String>, M: Into<String>>(entity: S, message: M) -> Self {
        Self::Sensor {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Whether this error came out of an actuator call (failure or timeout).
    pub const fn is_actuator_failure(&self) -> bool {
        matches!(self, Self::Actuator { .. } | Self::Timeout { .. })
    }
}

impl From<std::io::Error> for AmpwiseError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for AmpwiseError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AmpwiseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for AmpwiseError {
    fn from(err: chrono::ParseError) -> Self {
        Self::validation("datetime".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AmpwiseError::config("missing charger switch");
        assert!(matches!(err, AmpwiseError::Config { .. }));

        let err = AmpwiseError::actuator("switch.turn_on", "refused");
        assert!(matches!(err, AmpwiseError::Actuator { .. }));
        assert!(err.is_actuator_failure());

        let err = AmpwiseError::queue_full(4);
        assert!(!err.is_actuator_failure());
    }

    #[test]
    fn test_error_display() {
        let err = AmpwiseError::config("test error");
        assert_eq!(format!("{err}"), "Configuration error: test error");

        let err = AmpwiseError::validation("charger.levels", "must be ascending");
        assert_eq!(
            format!("{err}"),
            "Validation error: charger.levels - must be ascending"
        );

        let err = AmpwiseError::queue_full(10);
        assert_eq!(format!("{err}"), "Operation queue full (capacity 10)");
    }
}
