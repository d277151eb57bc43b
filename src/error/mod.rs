use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Queue lifecycle errors
    Closed,
    QueueFull,
    NotInitialized,
    InitializationError,

    // Payload errors
    SerializationError,
    DecodeError,
    InvalidEvent,

    // Delivery errors
    TransportError,
    ServerError,
    ClientError,
    UnexpectedStatus,

    // Collaborator errors
    EngineError,

    // Configuration errors
    ConfigInvalid,
    InvalidSdkKey,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Closed => "CLOSED",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::InitializationError => "INITIALIZATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::InvalidEvent => "INVALID_EVENT",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ClientError => "CLIENT_ERROR",
            ErrorCode::UnexpectedStatus => "UNEXPECTED_STATUS",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::InvalidSdkKey => "INVALID_SDK_KEY",
        }
    }

    /// Whether a batch that failed with this code goes back to the buffer.
    ///
    /// Only server-side conditions are retried; transport failures are
    /// permanent at the batch level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::ServerError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct EventsError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl EventsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn closed() -> Self {
        Self::new(
            ErrorCode::Closed,
            "Client was closed, no more events can be tracked.",
        )
    }

    pub fn queue_full() -> Self {
        Self::new(ErrorCode::QueueFull, "Max event queue size reached, dropping event")
    }

    pub fn not_initialized(operation: &str) -> Self {
        Self::new(
            ErrorCode::NotInitialized,
            format!("{} called before the event queue was initialized", operation),
        )
    }

    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ErrorCode::SerializationError, message, source)
    }

    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ErrorCode::TransportError, message, source)
    }

    pub fn server(status: u16, body: &str) -> Self {
        Self::new(ErrorCode::ServerError, format!("Server Error: {} - {}", status, body))
    }

    pub fn client(status: u16, body: &str) -> Self {
        Self::new(ErrorCode::ClientError, format!("Client Error: {} - {}", status, body))
    }

    pub fn decode(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::with_source(ErrorCode::DecodeError, message, source)
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InitializationError, message)
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EngineError, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Errors a producer sees synchronously; the event is dropped.
    pub fn is_producer_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Closed | ErrorCode::QueueFull | ErrorCode::SerializationError
        )
    }

    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::TransportError
                | ErrorCode::ServerError
                | ErrorCode::ClientError
                | ErrorCode::UnexpectedStatus
        )
    }
}

pub type Result<T> = std::result::Result<T, EventsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let error = EventsError::queue_full();
        let displayed = format!("{}", error);
        assert!(displayed.starts_with("[QUEUE_FULL]"));
        assert!(displayed.contains("dropping event"));
    }

    #[test]
    fn test_only_server_errors_are_retryable() {
        assert!(EventsError::server(503, "").is_retryable());
        assert!(!EventsError::client(400, "bad").is_retryable());
        assert!(!EventsError::new(ErrorCode::TransportError, "reset").is_retryable());
        assert!(!EventsError::new(ErrorCode::UnexpectedStatus, "204").is_retryable());
    }

    #[test]
    fn test_producer_errors() {
        assert!(EventsError::closed().is_producer_error());
        assert!(EventsError::queue_full().is_producer_error());
        assert!(!EventsError::server(500, "").is_producer_error());
    }

    #[test]
    fn test_with_source_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let error = EventsError::transport("Failed to make request to events api", io);
        assert_eq!(error.code, ErrorCode::TransportError);
        assert!(error.source.is_some());
        assert!(error.is_delivery_error());
    }
}
