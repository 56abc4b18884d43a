/// All errors produced by refstore.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid dirent: {0}")]
    InvalidDirent(String),

    #[error("invalid fence: {0}")]
    InvalidFence(String),

    #[error("fence already exists: {0}")]
    FenceExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("link depth exceeded resolving key: {0}")]
    LinkLoop(String),

    #[error("invalid blobref: {0}")]
    InvalidBlobRef(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownHash(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Error {
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    pub fn invalid_dirent(msg: impl Into<String>) -> Self {
        Self::InvalidDirent(msg.into())
    }

    pub fn invalid_fence(msg: impl Into<String>) -> Self {
        Self::InvalidFence(msg.into())
    }

    pub fn fence_exists(name: impl Into<String>) -> Self {
        Self::FenceExists(name.into())
    }

    pub fn not_a_directory(what: impl Into<String>) -> Self {
        Self::NotADirectory(what.into())
    }

    pub fn link_loop(key: impl Into<String>) -> Self {
        Self::LinkLoop(key.into())
    }

    pub fn invalid_blobref(s: impl Into<String>) -> Self {
        Self::InvalidBlobRef(s.into())
    }

    pub fn unknown_hash(name: impl Into<String>) -> Self {
        Self::UnknownHash(name.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
