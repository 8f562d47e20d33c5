//! Driver error types.

use core::fmt;

/// Result type for driver operations.
pub type Result<T> = core::result::Result<T, Error>;

/// ATA driver error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Drive never completed attach (or was isolated after a wedge)
    Offline,
    /// Command-ready or completion wait exceeded its bound
    Timeout,
    /// Controller latched an error after the command finished
    HardwareError {
        /// Status register at completion
        status: u8,
        /// Error register at completion
        error: u8,
    },
    /// Device stuck busy or never raised DRQ (only with `WedgePolicy::Isolate`)
    Wedged,
    /// Partition or replacement table failed validation
    MalformedTable,
    /// Caller was cancelled while waiting for the device
    Interrupted,
    /// No drive with that index
    NoDrive,
    /// No partition with that index
    NoPartition,
    /// Identification and probing found no usable geometry
    BadGeometry,
    /// Rejected configuration value
    BadConfig,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Offline => write!(f, "drive offline"),
            Error::Timeout => write!(f, "ata drive timeout"),
            Error::HardwareError { status, error } => {
                write!(f, "i/o error (status {:#04x}, error {:#04x})", status, error)
            }
            Error::Wedged => write!(f, "drive wedged"),
            Error::MalformedTable => write!(f, "malformed table"),
            Error::Interrupted => write!(f, "interrupted"),
            Error::NoDrive => write!(f, "no such drive"),
            Error::NoPartition => write!(f, "no such partition"),
            Error::BadGeometry => write!(f, "unusable drive geometry"),
            Error::BadConfig => write!(f, "bad configuration"),
        }
    }
}

impl core::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display() {
        let err = Error::HardwareError { status: 0x51, error: 0x40 };
        assert_eq!(err.to_string(), "i/o error (status 0x51, error 0x40)");
        assert_eq!(Error::Timeout.to_string(), "ata drive timeout");
    }
}
