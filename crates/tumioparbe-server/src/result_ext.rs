//! Logging helpers for `Result` and `Option`.
//!
//! Gateway calls and background jobs often swallow an error after recording
//! it; `log` keeps the caller location in the event so those paths stay
//! traceable.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with `context` if this is an `Err`, returning `self`
    /// unchanged.
    ///
    /// ```ignore
    /// use tumioparbe_server::ResultExt;
    ///
    /// let sent = sms.send_otp(&phone, &otp).await.log("sending OTP");
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "tumioparbe_server",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

/// Extension trait for logging a missing value.
pub trait OptionResultExt<T> {
    /// Log a warning if this is `None`.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller_location = std::panic::Location::caller();
            tracing::warn!(
                target: "tumioparbe_server",
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_passes_value_through() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(result.log("quoting fees").unwrap(), 42);
    }

    #[test]
    fn test_result_ext_keeps_error() {
        let result: Result<i32, &str> = Err("gateway down");
        assert!(result.log("creating bKash payment").is_err());
    }

    #[test]
    fn test_option_ext() {
        assert_eq!(Some(7).log_none("looking up parent phone"), Some(7));
        assert!(None::<i32>.log_none("looking up parent phone").is_none());
    }
}
