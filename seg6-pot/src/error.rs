use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Seg6Error {
    #[error("invalid IPv6 SID: {0:?}")]
    InvalidSid(String),

    #[error("hex decode key: {0}")]
    InvalidKeyEncoding(String),

    #[error("key must be 32 bytes, got {0}")]
    WrongKeyLength(usize),

    #[error("open pinned map {}: {reason}", path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("no entry for SID {0}")]
    NotFound(String),

    #[error("map write failed: {0}")]
    WriteFailed(String),

    #[error("map read failed: {0}")]
    ReadFailed(String),

    #[error("iterate map: {0}")]
    IterationFailed(String),

    #[error("load eBPF object: {0}")]
    LoadFailed(String),

    #[error("program '{0}' not found in eBPF object")]
    ProgramNotFound(String),

    #[error("tc hook: {0}")]
    HookCreateFailed(String),

    #[error("tc hook teardown: {0}")]
    HookDestroyFailed(String),

    #[error("attach failed: {0}")]
    AttachFailed(String),
}
