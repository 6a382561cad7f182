use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImgError {
    #[error("Unknown archive format: {0}")]
    UnknownFormat(PathBuf),

    #[error("Directory truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Malformed directory record {record}: {reason}")]
    Malformed { record: usize, reason: String },

    #[error("Entry already exists: {0} (use replace instead)")]
    DuplicateName(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry payload cannot be resolved: {name} ({reason})")]
    UnresolvableEntry { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Only the first of the two V1 renames went through. The archive pair on
    /// disk is inconsistent and needs manual repair.
    #[error(
        "Partial swap: {renamed} was replaced but {pending} was not ({source}); archive pair is inconsistent"
    )]
    PartialSwap {
        renamed: PathBuf,
        pending: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rebuild cancelled")]
    Cancelled,

    #[error("Layout overflow: {0}")]
    LayoutOverflow(String),

    #[error("Archive already open: {0}")]
    AlreadyOpen(PathBuf),

    #[error("Invalid entry pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ImgError {
    /// Errors the caller can handle and carry on with the same handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ImgError::DuplicateName(_)
                | ImgError::NotFound(_)
                | ImgError::Malformed { .. }
                | ImgError::UnresolvableEntry { .. }
        )
    }

    /// Whether the archive on disk is guaranteed to be exactly as it was
    /// before the failing operation started.
    pub fn original_untouched(&self) -> bool {
        !matches!(self, ImgError::PartialSwap { .. })
    }
}

pub type Result<T> = std::result::Result<T, ImgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_swap_is_the_only_damaging_error() {
        let err = ImgError::PartialSwap {
            renamed: PathBuf::from("gta3.dir"),
            pending: PathBuf::from("gta3.img"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.original_untouched());
        assert!(err.to_string().contains("gta3.dir"));

        assert!(ImgError::Cancelled.original_untouched());
        assert!(ImgError::NotFound("a.dff".into()).original_untouched());
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ImgError::DuplicateName("a.dff".into()).is_recoverable());
        assert!(ImgError::NotFound("a.dff".into()).is_recoverable());
        assert!(!ImgError::Cancelled.is_recoverable());
        assert!(!ImgError::UnknownFormat(PathBuf::from("x.bin")).is_recoverable());
    }
}
