/// Errors that can occur during a draft handshake.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The draft declined to handshake this connection.
    #[error("draft declined the connection")]
    Declined,

    /// A legacy challenge key could not be reduced to a number.
    #[error("malformed challenge key: {0}")]
    MalformedChallenge(&'static str),

    /// The handshake response could not be written to the transport.
    #[error("handshake write failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
