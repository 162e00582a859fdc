use crate::audit::AuditError;
use crate::paths::FilenameFormatError;
use crate::storage::StorageError;
use crate::toa5::HeaderError;
use thiserror::Error;

/// Everything that can stop a routing invocation
#[derive(Error, Debug)]
pub enum RouteError {
    /// The notification is not one this router understands
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed logger header: {0}")]
    MalformedHeader(#[from] HeaderError),

    #[error(transparent)]
    FilenameFormat(#[from] FilenameFormatError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditError),
}

/// How the router treats an error once it has been recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Bad file content: the invocation ends normally, the audit record is marked failed
    SoftFail,
    /// Surfaced to the caller as an invocation failure
    HardFail,
}

impl RouteError {
    pub fn disposition(&self) -> Disposition {
        match self {
            RouteError::MalformedHeader(_) => Disposition::SoftFail,
            RouteError::Protocol(_)
            | RouteError::FilenameFormat(_)
            | RouteError::Storage(_)
            | RouteError::Audit(_) => Disposition::HardFail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_header_errors_are_soft() {
        let header = RouteError::from(HeaderError::MissingField("station name"));
        assert_eq!(header.disposition(), Disposition::SoftFail);

        let protocol = RouteError::Protocol("unexpected event".to_string());
        assert_eq!(protocol.disposition(), Disposition::HardFail);

        let filename = RouteError::from(FilenameFormatError {
            filename: "data.dat".to_string(),
            segments: 1,
        });
        assert_eq!(filename.disposition(), Disposition::HardFail);

        let storage = RouteError::from(StorageError::Backend("timeout".to_string()));
        assert_eq!(storage.disposition(), Disposition::HardFail);
    }

    #[test]
    fn test_error_messages_carry_detail() {
        let err = RouteError::from(HeaderError::InvalidSignature("abc".to_string()));
        assert!(err.to_string().contains("abc"));
    }
}
