use std::fmt;

use draftsock_server::ServerError;

pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn server_error(context: &str, err: ServerError) -> CliError {
    let code = match &err {
        ServerError::Bind { .. } | ServerError::Poll(_) | ServerError::Accept(_) => TRANSPORT_ERROR,
        ServerError::UnknownSerializer(_) => USAGE,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_serializer_maps_to_usage() {
        let err = server_error(
            "bind failed",
            ServerError::UnknownSerializer("yaml".to_string()),
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("yaml"));
    }

    #[test]
    fn bind_failure_maps_to_transport() {
        let err = server_error(
            "bind failed",
            ServerError::Bind {
                addr: "127.0.0.1:80".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
