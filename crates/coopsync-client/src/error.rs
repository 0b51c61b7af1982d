use coopsync_protocol::ProtocolError;
use coopsync_transport::TransportError;

/// Errors from the sync registry.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A producer/consumer pair already exists under this label.
    #[error("sync label '{0}' is already registered")]
    DuplicateLabel(String),
}

/// Errors surfaced by the participant engine.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A host-only action was attempted by a client.
    #[error("only the host can {0}")]
    NotHost(&'static str),

    /// The action needs an active session.
    #[error("session is not active")]
    NotActive,

    /// The driver has stopped and no longer accepts commands.
    #[error("client driver stopped")]
    DriverStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_duplicate_label_message() {
        let err = SyncError::DuplicateLabel("doors".into());
        assert_eq!(err.to_string(), "sync label 'doors' is already registered");
    }

    #[test]
    fn test_client_error_from_sync_is_transparent() {
        let err: ClientError = SyncError::DuplicateLabel("doors".into()).into();
        assert_eq!(err.to_string(), "sync label 'doors' is already registered");
    }

    #[test]
    fn test_client_error_not_host_message() {
        assert_eq!(
            ClientError::NotHost("broadcast").to_string(),
            "only the host can broadcast"
        );
    }
}
