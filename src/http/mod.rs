mod dispatcher;
pub mod retry;

pub use dispatcher::{classify_response, Dispatcher, EVENTS_BATCH_PATH};
pub use retry::{backoff, ApiResponse, RetryConfig, RetryConfigBuilder, RetryingExecutor};
