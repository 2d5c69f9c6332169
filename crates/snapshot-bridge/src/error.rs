use snapshot_core::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("malformed patch payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("{0} thread disconnected")]
    Disconnected(&'static str),
}

impl BridgeError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            BridgeError::Snapshot(err) => err.is_recoverable(),
            BridgeError::Payload(_) | BridgeError::Disconnected(_) => false,
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
