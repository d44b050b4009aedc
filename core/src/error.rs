use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt superblock: {0}")]
    CorruptSuperblock(String),

    #[error("No free clusters available")]
    NoSpace,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a directory: inode {0}")]
    NotADirectory(u32),

    #[error("Directory not empty")]
    NotEmpty,

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}
