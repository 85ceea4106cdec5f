use std::io;
use std::path::PathBuf;

const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("mount failed for {}: {reason}", path.display())]
    MountFailure { path: PathBuf, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{operation} denied for {target}")]
    CapabilityDenied {
        operation: &'static str,
        target: String,
    },
    #[error("corrupt entry {name}: {reason}")]
    CorruptEntry { name: String, reason: String },
    #[error("no file descriptors left to open {}", path.display())]
    ExhaustedHandles { path: PathBuf },
    #[error("unsafe path: {0}")]
    UnsafePath(String),
    #[error("invalid open mode: {0:?}")]
    InvalidMode(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn mount(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        FsError::MountFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(name: impl Into<String>, reason: impl ToString) -> Self {
        FsError::CorruptEntry {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn denied(operation: &'static str, target: impl Into<String>) -> Self {
        FsError::CapabilityDenied {
            operation,
            target: target.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(err) => err,
            FsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            FsError::UnsafePath(_) | FsError::InvalidMode(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            FsError::CapabilityDenied { .. } => {
                io::Error::new(io::ErrorKind::PermissionDenied, err)
            }
            FsError::CorruptEntry { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// True when the OS refused an open because the process or system ran out of
/// descriptors.
pub(crate) fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(EMFILE) | Some(ENFILE))
}

pub(crate) fn closed_handle() -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::Other,
        "file handle is closed",
    ))
}
