use crate::config_store::ConfigStoreError;
use crate::feed::FeedError;
use crate::sync::store::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct SyncError {
    stage: &'static str,
    message: String,
    kind: SyncErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Operator input or configuration is unusable; nothing was written.
    InvalidInput,
    /// A collaborator (feed, store, proxy) failed.
    Upstream,
    Internal,
}

impl SyncError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::InvalidInput,
        }
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::Upstream,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: SyncErrorKind::Internal,
        }
    }

    pub fn feed(stage: &'static str, err: FeedError) -> Self {
        match err {
            FeedError::NotConfigured | FeedError::InvalidConfig(_) => {
                Self::invalid_input(stage, err.to_string())
            }
            _ => Self::upstream(stage, err.to_string()),
        }
    }

    pub fn store(stage: &'static str, err: StoreError) -> Self {
        Self::upstream(stage, err.to_string())
    }

    pub fn config(stage: &'static str, err: ConfigStoreError) -> Self {
        match err {
            ConfigStoreError::Decode { .. } => Self::invalid_input(stage, err.to_string()),
            _ => Self::internal(stage, err.to_string()),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> SyncErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
