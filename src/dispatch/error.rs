use super::EntityId;
use crate::collector::SourceError;
use crate::storage::SinkError;

/// Error type for dispatcher construction.
#[derive(Debug)]
pub enum DispatchError {
    /// The process exited before its dispatcher could attach.
    Vanished(u32),
    /// Another dispatcher already owns this entity.
    AlreadyDispatched(EntityId),
    /// The controller is tearing the tree down and accepts no new dispatchers.
    ShuttingDown(EntityId),
    Source(SourceError),
    Sink(SinkError),
    /// A worker thread could not be started.
    Spawn(std::io::Error),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Vanished(pid) => write!(f, "process {} exited before attach", pid),
            DispatchError::AlreadyDispatched(id) => write!(f, "entity {} is already dispatched", id),
            DispatchError::ShuttingDown(id) => {
                write!(f, "not dispatching {}: shutdown in progress", id)
            }
            DispatchError::Source(e) => write!(f, "metric source error: {}", e),
            DispatchError::Sink(e) => write!(f, "sink error: {}", e),
            DispatchError::Spawn(e) => write!(f, "failed to spawn worker: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Source(e) => Some(e),
            DispatchError::Sink(e) => Some(e),
            DispatchError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SinkError> for DispatchError {
    fn from(e: SinkError) -> Self {
        DispatchError::Sink(e)
    }
}

/// `NotFound` becomes [`DispatchError::Vanished`].
impl From<SourceError> for DispatchError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::NotFound(pid) => DispatchError::Vanished(pid),
            other => DispatchError::Source(other),
        }
    }
}
