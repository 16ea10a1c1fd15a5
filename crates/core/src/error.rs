use std::path::PathBuf;
use thiserror::Error;

use crate::{dispatch::DispatchError, types::ValidationError};

#[derive(Error, Debug)]
pub enum PromptMasterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("未检测到 API Key（BYOK），请先在 AI 设置中完成配置。")]
    MissingApiKey,

    #[error("A generation request is already in flight")]
    Busy,

    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Storage write failed for {path}: {reason}")]
    StorageFailed { path: PathBuf, reason: String },

    #[error("In-memory storage lock poisoned")]
    StoragePoisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PromptMasterError>;
