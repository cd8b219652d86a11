use std::{error, fmt, io};

use crate::device::DeviceId;

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by sonant.
///
/// Structural errors (`DeviceNotFound`, `PortOutOfRange`, `CyclicGraph`) are detected while
/// building connection graphs or signal plans, before any audio renders. `OutOfMemory` and
/// `ThreadError` are construction-time failures of the host machine, kept distinct from
/// composition errors so embedders can tell "this machine can't run the engine" apart from
/// "this composition is invalid".
#[derive(Debug)]
pub enum Error {
    /// A connection references a device id that is not present in the owning device table.
    DeviceNotFound(DeviceId),
    /// A connection references a port index beyond the device's declared port count.
    PortOutOfRange {
        device: DeviceId,
        port: usize,
        port_count: usize,
    },
    /// The connection graph contains a cycle through the given device.
    CyclicGraph(DeviceId),
    /// A bounded resource limit was exceeded at construction time.
    LimitExceeded(String),
    /// An invalid parameter or parameter value was passed to a device or the player.
    ParameterError(String),
    /// A buffer or table allocation failed at player construction time.
    OutOfMemory,
    /// A render worker thread or synchronization primitive could not be created.
    ThreadError(String),
    /// A channel or queue message could not be delivered.
    SendError(String),
    /// A file operation failed, e.g. while writing rendered audio.
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound(device) => {
                write!(f, "Device with id {device} does not exist")
            }
            Self::PortOutOfRange {
                device,
                port,
                port_count,
            } => write!(
                f,
                "Port {port} is out of range for device {device} with {port_count} ports"
            ),
            Self::CyclicGraph(device) => {
                write!(f, "Connection graph contains a cycle through device {device}")
            }
            Self::LimitExceeded(str) => write!(f, "Resource limit exceeded: {str}"),
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::ThreadError(str) => write!(f, "Failed to set up render threads: {str}"),
            Self::SendError(str) => write!(f, "Failed to send channel message: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_err: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}
