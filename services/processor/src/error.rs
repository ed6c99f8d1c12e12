//! services/processor/src/error.rs
//!
//! Defines the primary error type for the processor service.

use crate::config::ConfigError;

/// The primary error type for the `processor` service.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library, including migrations.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_convert_with_question_mark() {
        fn load() -> Result<(), ProcessorError> {
            Err::<(), _>(ConfigError::InvalidValue("SCHEDULER_BATCH_SIZE".into(), "must be positive".into()))?;
            Ok(())
        }
        let err = load().unwrap_err();
        assert!(matches!(err, ProcessorError::Config(_)));
        assert!(err.to_string().contains("SCHEDULER_BATCH_SIZE"));

        let io: ProcessorError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert!(matches!(io, ProcessorError::Io(_)));
    }
}
