//! Transport layer: byte-stream/datagram I/O behind a common handler
//! trait, grounded in the teacher's `Z21Station` (owns the socket,
//! fans incoming frames out over a `broadcast::Sender`, spawns one
//! background receive task) and in
//! `original_source/.../loconet/iohandler/iohandler.cpp` (the
//! `started()`/`error()` lifecycle callbacks into the kernel).
//!
//! `IoHandler` is generic over [`crate::message::MessageFamily`] so the
//! same handler code serves LocoNet and XpressNet frames; stream
//! transports reuse [`frame_next`] in a read loop, datagram transports
//! treat one packet as one frame.

pub mod lbserver;
pub mod simulation;

use crate::error::{CodecError, TransportError};
use crate::message::MessageFamily;
use tokio::sync::mpsc;

/// Events an [`IoHandler`] pushes to the kernel that owns it.
#[derive(Debug)]
pub enum IoEvent<M> {
    /// Transport finished its open/connect handshake.
    Started,
    /// A complete, successfully-decoded frame arrived.
    Frame(M),
    /// A malformed leading byte was dropped (spec §4.1 maximal munch).
    InvalidByte(u8),
    /// The transport failed and will not retry (spec §7).
    Error(TransportError),
}

/// A running transport. `Interface` owns one through a `Kernel` and
/// talks to it only through `send`/`events`/`shutdown` (Design Notes:
/// "scoped resource lifetimes bracketed by Kernel ownership").
pub trait IoHandler<M: MessageFamily + Send + 'static>: Send {
    /// Begin the transport's connect/listen sequence. Must eventually
    /// push exactly one [`IoEvent::Started`] or [`IoEvent::Error`].
    async fn start(&mut self) -> Result<(), TransportError>;

    /// Queue `message` for transmission. Non-blocking: returns
    /// `TransportError::BufferFull` rather than awaiting drain.
    fn send(&mut self, message: M) -> Result<(), TransportError>;

    /// The channel the owning kernel polls for inbound events.
    fn events(&mut self) -> &mut mpsc::Receiver<IoEvent<M>>;

    /// Stop the transport. Idempotent.
    async fn stop(&mut self);
}

/// Maximal-munch framing for stream transports (spec §4.1): parse the
/// next complete frame out of `buf`. On a malformed leading byte,
/// returns the byte to skip so the caller can retry from `buf[1..]`
/// without losing any other pending frames.
pub enum FrameStep<M> {
    /// Not enough bytes buffered yet.
    NeedMore,
    /// A frame was decoded; it occupies the first `len` bytes of `buf`.
    Frame(M, usize),
    /// `buf[0]` cannot start a valid frame; drop it and retry.
    Invalid(u8),
}

pub fn frame_next<M: MessageFamily>(buf: &[u8]) -> FrameStep<M> {
    match M::parse(buf) {
        Ok(Some((msg, len))) => FrameStep::Frame(msg, len),
        Ok(None) => FrameStep::NeedMore,
        Err(_) => FrameStep::Invalid(buf[0]),
    }
}

/// Drains as many complete frames as `buf` holds, invoking `on_frame`
/// for each and `on_invalid` for each skipped byte, shrinking `buf` in
/// place to the unconsumed remainder. Used by stream-oriented handlers
/// (serial/TCP) whose reads don't align with frame boundaries.
pub fn drain_frames<M, F, G>(buf: &mut Vec<u8>, mut on_frame: F, mut on_invalid: G)
where
    M: MessageFamily,
    F: FnMut(M),
    G: FnMut(u8),
{
    let mut consumed = 0;
    loop {
        match frame_next::<M>(&buf[consumed..]) {
            FrameStep::NeedMore => break,
            FrameStep::Frame(msg, len) => {
                on_frame(msg);
                consumed += len;
            }
            FrameStep::Invalid(byte) => {
                on_invalid(byte);
                consumed += 1;
            }
        }
    }
    buf.drain(..consumed);
}

/// A decode error surfaced once per malformed frame, for handlers that
/// want to log before falling back to byte-skip.
pub fn describe_invalid<M: MessageFamily>(buf: &[u8]) -> Option<CodecError> {
    match M::parse(buf) {
        Err(e) => Some(e),
        _ => None,
    }
}
