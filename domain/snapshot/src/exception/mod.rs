use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineException {
    #[error("No account named `{name}` is configured.")]
    UnknownAccount { name: String },

    #[error("Snapshot destination {path:?} already exists.")]
    SnapshotExists { path: PathBuf },

    #[error("Storage backend is unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Engine internal error: {source}")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for EngineException {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<EngineException>() {
            Ok(e) => e,
            Err(e) => EngineException::InternalError { source: e },
        }
    }
}
