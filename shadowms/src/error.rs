use std::fmt;


/// Errors produced while reading a shadow-copy volume.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied value was invalid (bad range, oversized request).
    Argument { reason: &'static str },

    /// The operation does not fit the current lifecycle state.
    State { reason: &'static str },

    /// The underlying byte source failed or returned short.
    Io(std::io::Error),

    /// Magic, version, record type, or flag combination mismatch.
    UnsupportedFormat { reason: &'static str },

    /// A decoded field references a position past the enclosing block.
    OutOfBounds { reason: &'static str },

    /// An allocation was refused.
    ResourceExhausted,

    /// The abort flag was observed.
    Cancelled,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument { reason }
                => write!(f, "invalid argument: {}", reason),
            Self::State { reason }
                => write!(f, "invalid state: {}", reason),
            Self::Io(e)
                => write!(f, "I/O error: {}", e),
            Self::UnsupportedFormat { reason }
                => write!(f, "unsupported format: {}", reason),
            Self::OutOfBounds { reason }
                => write!(f, "value out of bounds: {}", reason),
            Self::ResourceExhausted
                => write!(f, "allocation refused"),
            Self::Cancelled
                => write!(f, "operation aborted"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self { Self::Io(value) }
}
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }
}
impl From<std::collections::TryReserveError> for Error {
    fn from(_value: std::collections::TryReserveError) -> Self { Self::ResourceExhausted }
}
