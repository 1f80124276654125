use std::path::PathBuf;

/// Fatal persistence faults. The only error class that makes a command exit
/// non-zero; everything else is reported and the command returns normally.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to replace {path}: {source}")]
    Rename {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },
    #[error("journal recovery failed in {dir}: {message}")]
    Journal { dir: PathBuf, message: String },
}

impl PersistenceError {
    pub fn code(&self) -> &'static str {
        match self {
            PersistenceError::Read { .. } => "persistence.read_failed",
            PersistenceError::Write { .. } => "persistence.write_failed",
            PersistenceError::Rename { .. } => "persistence.rename_failed",
            PersistenceError::Serialize { .. } => "persistence.serialize_failed",
            PersistenceError::Journal { .. } => "persistence.journal_failed",
        }
    }
}

/// Non-fatal command rejections: bad input, or a pattern that matched nothing.
/// Commands report these and leave both stores untouched.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Referential(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CommandError {
    pub fn validation(message: impl Into<String>) -> Self {
        CommandError::Validation(message.into())
    }

    pub fn referential(message: impl Into<String>) -> Self {
        CommandError::Referential(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "command.validation",
            CommandError::Referential(_) => "command.no_match",
            CommandError::Persistence(e) => e.code(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CommandError::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_fatal() {
        let err = CommandError::validation("bad skip kind");
        assert!(!err.is_fatal());
        assert_eq!(err.code(), "command.validation");
    }

    #[test]
    fn persistence_errors_are_fatal() {
        let err = CommandError::from(PersistenceError::Serialize {
            what: "plan",
            message: "boom".to_string(),
        });
        assert!(err.is_fatal());
        assert_eq!(err.code(), "persistence.serialize_failed");
    }
}
