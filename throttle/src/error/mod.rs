mod throttle_error;

pub use throttle_error::ThrottleError;
pub type Result<T> = std::result::Result<T, ThrottleError>;
