//! definition of the general error type of this crate

use std::sync::Arc;
use core::fmt;
use crate::registry::ServiceKey;

/// the remote item an error is about, so that a caller can tell the user which one failed
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Target {
    /// a SERCOS attribute
    Idn(u16),
    /// a CANopen object as a whole
    Object(u16),
    /// a CANopen object sub-element
    Element(u16, u8),
    /// a remote service not bound to a particular attribute
    Service(ServiceKey),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idn(idn) => write!(f, "IDN {}", idn),
            Self::Object(index) => write!(f, "object 0x{:04x}", index),
            Self::Element(index, sub) => write!(f, "element 0x{:04x}:{}", index, sub),
            Self::Service(key) => write!(f, "service {:?}", key),
        }
    }
}

/**
    general object reporting an unexpected result regarding dictionary access or firmware files

    Its variants are meant to help finding the cause responsible for the problem and how to deal with it.
*/
#[derive(Clone, Debug)]
pub enum DictError {
    /// error caused by the file system
    ///
    /// these errors are exterior to this library
    Io(Arc<std::io::Error>),

    /// error reported by the remote call middleware or the device behind it
    ///
    /// these errors can generally be fixed by retrying the operation
    Remote(Target, String),

    /// the device answered with data that cannot be decoded to the expected type
    Malformed(Target, &'static str),

    /// too much time elapsed waiting for the device, the operation can be retried
    Timeout(Target),

    /// an Intel-HEX record has a wrong checksum
    Checksum {
        /// 1-based line number in the source text
        line: usize,
        /// checksum computed from the record content
        expected: u8,
        /// checksum stored in the record
        found: u8,
    },

    /// a file does not follow its expected syntax
    Format {
        /// 1-based line number in the source text
        line: usize,
        message: &'static str,
    },

    /// a backup or definition file cannot be serialized or deserialized
    Backup(String),

    /// the library is used in a way that cannot succeed, the user code has to be fixed
    Client(&'static str),
}

/// convenient alias to simplify return annotations
pub type DictResult<T=()> = core::result::Result<T, DictError>;

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io: {}", error),
            Self::Remote(target, message) => write!(f, "remote call failed on {}: {}", target, message),
            Self::Malformed(target, message) => write!(f, "malformed response for {}: {}", target, message),
            Self::Timeout(target) => write!(f, "no response for {} in time", target),
            Self::Checksum {line, expected, found} => write!(f,
                "checksum mismatch line {}: computed {:02X}, stored {:02X}",
                line, expected, found),
            Self::Format {line, message} => write!(f, "bad format line {}: {}", line, message),
            Self::Backup(message) => write!(f, "backup file: {}", message),
            Self::Client(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for DictError {}

impl DictError {
    /// the remote item this error is about, if any
    pub fn target(&self) -> Option<Target> {
        match self {
            Self::Remote(target, _) | Self::Malformed(target, _) | Self::Timeout(target) => Some(*target),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DictError {
    fn from(src: std::io::Error) -> Self {
        DictError::Io(Arc::new(src))
    }
}

impl From<serde_yaml::Error> for DictError {
    fn from(src: serde_yaml::Error) -> Self {
        DictError::Backup(src.to_string())
    }
}

impl From<tempfile::PersistError> for DictError {
    fn from(src: tempfile::PersistError) -> Self {
        DictError::Io(Arc::new(src.error))
    }
}
