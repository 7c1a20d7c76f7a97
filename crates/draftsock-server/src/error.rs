/// Errors that abort the server.
///
/// Everything per-connection is handled inside the reactor loop and logged;
/// only transport-fatal conditions surface here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The readiness poll could not be created or failed while waiting.
    #[error("readiness poll failed: {0}")]
    Poll(std::io::Error),

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The configured serializer short name is not known.
    #[error("unknown serializer '{0}'")]
    UnknownSerializer(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
