use std::path::PathBuf;

#[derive(Debug)]
pub enum MirrorError {
    InvalidToken,
    PathNotFound,
    IsDirectory,
    /// A single file upload was refused
    FileUploadFailed,
    /// At least one upload of a tree sync was refused
    UploadFailed,
    PathEscapesRoot,
    Storage(String),
    Io { path: PathBuf, error: std::io::Error },
}

impl std::fmt::Display for MirrorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorError::InvalidToken => write!(f, "Invalid token."),
            MirrorError::PathNotFound => write!(f, "Path not found"),
            MirrorError::IsDirectory => write!(f, "This path is a directory."),
            MirrorError::FileUploadFailed => write!(f, "Upload NOT successful"),
            MirrorError::UploadFailed => write!(f, "Upload NOT successful."),
            MirrorError::PathEscapesRoot => write!(f, "Path escapes the local directory."),
            MirrorError::Storage(message) => write!(f, "{message}"),
            MirrorError::Io { path, error } => write!(f, "{}: {}", path.display(), error),
        }
    }
}

impl std::error::Error for MirrorError {}

impl From<s3::error::S3Error> for MirrorError {
    fn from(e: s3::error::S3Error) -> Self {
        MirrorError::Storage(e.to_string())
    }
}
