//! Error types for ufshpb-core.

use thiserror::Error;

/// Errors that can occur while setting up or driving the HPB cache.
#[derive(Debug, Error)]
pub enum Error {
    /// A device descriptor was missing, truncated, or decoded to nonsense.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// The device or logical unit does not support HPB.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Backing memory for the node pool could not be allocated.
    #[error("allocation failed: need {needed} bytes")]
    AllocationFailed {
        /// Bytes requested from the allocator.
        needed: usize,
    },

    /// Device-level I/O error. Refill reads failing with this are retried.
    #[error("device error: {0}")]
    Device(String),

    /// The HPB reset handshake did not settle within the poll budget.
    #[error("reset handshake still pending after {retries} polls")]
    ResetTimeout {
        /// Number of flag polls performed before giving up.
        retries: u32,
    },

    /// Caller input is invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for HPB cache operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_descriptor() {
        let err = Error::InvalidDescriptor("geometry descriptor too short".to_string());
        assert!(err.to_string().contains("invalid descriptor"));
        assert!(err.to_string().contains("geometry"));
    }

    #[test]
    fn test_error_display_allocation_failed() {
        let err = Error::AllocationFailed { needed: 1 << 20 };
        assert!(err.to_string().contains("1048576"));
    }

    #[test]
    fn test_error_display_reset_timeout() {
        let err = Error::ResetTimeout { retries: 10 };
        let msg = err.to_string();
        assert!(msg.contains("reset"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn test_error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
