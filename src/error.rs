//! Error taxonomy for the kernel core.
//!
//! Framing failures never reach this module: the [`crate::io`] layer drops
//! malformed bytes and logs a warning (spec §4.1/§7). Only the error
//! categories that must cross an API boundary are typed here.

use thiserror::Error;

/// A malformed or inconsistent wire frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: got {got} bytes, opcode requires at least {want}")]
    TooShort { got: usize, want: usize },
    #[error("checksum mismatch: computed {computed:#04x}, frame has {found:#04x}")]
    BadChecksum { computed: u8, found: u8 },
    #[error("byte {index} has the high bit set outside the opcode position")]
    HighBitSet { index: usize },
    #[error("unknown opcode {opcode:#04x}")]
    UnknownOpcode { opcode: u8 },
}

/// Transport-level failure. Terminal: the owning [`crate::interface::Interface`]
/// transitions to `Error` and does not retry (spec §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Open(#[source] std::io::Error),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("outgoing buffer is full")]
    BufferFull,
}

/// Core-visible error codes (spec §6). Returned by value from
/// `Train`/`DecoderController` operations; never thrown across the
/// kernel boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TrainError {
    #[error("throttle value is not in [0, 1]")]
    InvalidThrottle,
    #[error("train is already acquired by another throttle")]
    AlreadyAcquired,
    #[error("cannot activate train: a vehicle is assigned elsewhere")]
    CanNotActivateTrain,
    #[error("train must be stopped to change direction")]
    TrainMustBeStoppedToChangeDirection,
    #[error("no decoder is known at this address")]
    UnknownDecoderAddress,
    #[error("decoder is not assigned to a vehicle")]
    DecoderNotAssignedToAVehicle,
    #[error("vehicle is not assigned to a train")]
    VehicleNotAssignedToATrain,
}

/// Errors returned while a kernel's LNCV programming session is active.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LncvError {
    #[error("a programming session is already active")]
    SessionActive,
    #[error("no programming session is active")]
    NoSession,
    #[error("module rejected the request (LONG_ACK reject)")]
    Rejected,
    #[error("response timed out")]
    Timeout,
}
