//! Native status classification
//!
//! Maps libopus status codes onto the small set of failure categories the
//! JVM caller can handle. Every failure raised by the bridge is a
//! [`BridgeError`]; the JNI layer turns it into the matching throwable.

use crate::opus;
use thiserror::Error;

/// JVM throwable used when a category class cannot be resolved
pub const FALLBACK_EXCEPTION_CLASS: &str = "java/lang/RuntimeException";

/// A libopus status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpusStatus {
    /// Success. Any non-negative return (a byte or sample count) lands here.
    Ok,
    BadArg,
    BufferTooSmall,
    InternalError,
    InvalidPacket,
    Unimplemented,
    InvalidState,
    AllocFail,
    Unknown(i32),
}

impl From<i32> for OpusStatus {
    fn from(code: i32) -> Self {
        match code {
            c if c >= opus::OPUS_OK => OpusStatus::Ok,
            opus::OPUS_BAD_ARG => OpusStatus::BadArg,
            opus::OPUS_BUFFER_TOO_SMALL => OpusStatus::BufferTooSmall,
            opus::OPUS_INTERNAL_ERROR => OpusStatus::InternalError,
            opus::OPUS_INVALID_PACKET => OpusStatus::InvalidPacket,
            opus::OPUS_UNIMPLEMENTED => OpusStatus::Unimplemented,
            opus::OPUS_INVALID_STATE => OpusStatus::InvalidState,
            opus::OPUS_ALLOC_FAIL => OpusStatus::AllocFail,
            other => OpusStatus::Unknown(other),
        }
    }
}

impl OpusStatus {
    pub fn code(self) -> i32 {
        match self {
            OpusStatus::Ok => opus::OPUS_OK,
            OpusStatus::BadArg => opus::OPUS_BAD_ARG,
            OpusStatus::BufferTooSmall => opus::OPUS_BUFFER_TOO_SMALL,
            OpusStatus::InternalError => opus::OPUS_INTERNAL_ERROR,
            OpusStatus::InvalidPacket => opus::OPUS_INVALID_PACKET,
            OpusStatus::Unimplemented => opus::OPUS_UNIMPLEMENTED,
            OpusStatus::InvalidState => opus::OPUS_INVALID_STATE,
            OpusStatus::AllocFail => opus::OPUS_ALLOC_FAIL,
            OpusStatus::Unknown(code) => code,
        }
    }
}

/// Caller-visible failure raised by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Parameters the codec cannot honor (channels, sample rate, bad packet)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Destination capacity too small; carries no message
    #[error("buffer overflow")]
    BufferOverflow,
    /// Internal codec inconsistency
    #[error("runtime failure: {0}")]
    Runtime(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// An `(offset, length)` window that does not fit its buffer
    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    /// JNI class name of the throwable raised for this failure.
    pub fn java_class(&self) -> &'static str {
        match self {
            BridgeError::InvalidArgument(_) => "java/lang/IllegalArgumentException",
            BridgeError::BufferOverflow => "java/nio/BufferOverflowException",
            BridgeError::Runtime(_) => "java/lang/RuntimeException",
            BridgeError::OutOfMemory(_) => "java/lang/OutOfMemoryError",
            BridgeError::IndexOutOfBounds(_) => "java/lang/ArrayIndexOutOfBoundsException",
        }
    }

    /// Message handed to the throwable, if the category carries one.
    pub fn message(&self) -> Option<&str> {
        match self {
            BridgeError::BufferOverflow => None,
            BridgeError::InvalidArgument(msg)
            | BridgeError::Runtime(msg)
            | BridgeError::OutOfMemory(msg)
            | BridgeError::IndexOutOfBounds(msg) => Some(msg),
        }
    }
}

/// Classify a failed libopus status.
///
/// Must only be called with a negative status. Passing a success code is a
/// bug in the caller and yields an invalid-argument failure saying so.
pub fn classify(status: i32, message: &str) -> BridgeError {
    match OpusStatus::from(status) {
        OpusStatus::Ok => {
            BridgeError::InvalidArgument("BUG: classify called with OPUS_OK".to_string())
        }
        OpusStatus::InvalidPacket | OpusStatus::BadArg => {
            BridgeError::InvalidArgument(message.to_string())
        }
        OpusStatus::BufferTooSmall => BridgeError::BufferOverflow,
        OpusStatus::Unimplemented | OpusStatus::InvalidState | OpusStatus::InternalError => {
            BridgeError::Runtime(message.to_string())
        }
        OpusStatus::AllocFail => BridgeError::OutOfMemory(message.to_string()),
        OpusStatus::Unknown(_) => BridgeError::Runtime(message.to_string()),
    }
}

/// Classify a failed status using libopus' own description as the message.
pub fn classify_native(status: i32) -> BridgeError {
    classify(status, &opus::strerror(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ok_is_a_bug() {
        assert_eq!(
            classify(opus::OPUS_OK, "ignored"),
            BridgeError::InvalidArgument("BUG: classify called with OPUS_OK".to_string())
        );
        // Positive byte counts are success as well
        assert!(matches!(classify(42, "ignored"), BridgeError::InvalidArgument(m) if m.starts_with("BUG")));
    }

    #[test]
    fn test_classify_invalid_argument() {
        assert_eq!(
            classify(opus::OPUS_BAD_ARG, "bad"),
            BridgeError::InvalidArgument("bad".to_string())
        );
        assert_eq!(
            classify(opus::OPUS_INVALID_PACKET, "corrupt"),
            BridgeError::InvalidArgument("corrupt".to_string())
        );
    }

    #[test]
    fn test_classify_buffer_too_small_drops_message() {
        let err = classify(opus::OPUS_BUFFER_TOO_SMALL, "too small");
        assert_eq!(err, BridgeError::BufferOverflow);
        assert_eq!(err.message(), None);
    }

    #[test]
    fn test_classify_runtime() {
        for code in [opus::OPUS_UNIMPLEMENTED, opus::OPUS_INVALID_STATE, opus::OPUS_INTERNAL_ERROR] {
            assert_eq!(classify(code, "boom"), BridgeError::Runtime("boom".to_string()));
        }
    }

    #[test]
    fn test_classify_alloc_fail() {
        assert_eq!(
            classify(opus::OPUS_ALLOC_FAIL, "oom"),
            BridgeError::OutOfMemory("oom".to_string())
        );
    }

    #[test]
    fn test_classify_unknown_defaults_to_runtime() {
        assert_eq!(OpusStatus::from(-99), OpusStatus::Unknown(-99));
        assert_eq!(classify(-99, "what"), BridgeError::Runtime("what".to_string()));
    }

    #[test]
    fn test_status_code_round_trip() {
        for code in -7..=0 {
            assert_eq!(OpusStatus::from(code).code(), code);
        }
        assert_eq!(OpusStatus::from(-123).code(), -123);
    }

    #[test]
    fn test_java_classes() {
        assert_eq!(
            BridgeError::InvalidArgument(String::new()).java_class(),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(BridgeError::BufferOverflow.java_class(), "java/nio/BufferOverflowException");
        assert_eq!(BridgeError::Runtime(String::new()).java_class(), FALLBACK_EXCEPTION_CLASS);
        assert_eq!(
            BridgeError::OutOfMemory(String::new()).java_class(),
            "java/lang/OutOfMemoryError"
        );
    }

    #[test]
    fn test_classify_native_uses_strerror() {
        assert_eq!(
            classify_native(opus::OPUS_INTERNAL_ERROR),
            BridgeError::Runtime("internal error".to_string())
        );
    }
}
