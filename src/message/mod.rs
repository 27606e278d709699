//! Message overlays: immutable, typed views over wire-frame byte buffers.
//!
//! Design Notes call for explicit constructors and accessor functions
//! rather than union-casting raw bytes; [`LnMessage`] follows that
//! pattern, grounded in the teacher's `Packet`/`XBusMessage`
//! (`TryFrom<&[u8]>` / `Into<Vec<u8>>`, invariants enforced on
//! construction) and in `original_source/.../loconet/messages.hpp`
//! for the concrete opcode catalogue.

pub mod loconet;
pub mod xpressnet;

pub use loconet::LnMessage;
pub use xpressnet::XnMessage;

/// A decoded opcode family, shared by every concrete message type so the
/// kernel can be generic over "LocoNet-shaped" protocols (spec §4.2).
pub trait MessageFamily: Sized + Clone + std::fmt::Debug {
    /// Number of bytes this frame occupies, including the checksum byte.
    fn size(&self) -> usize;

    /// `true` if the checksum is correct, the size is non-zero, and every
    /// non-opcode byte has bit 7 clear.
    fn is_valid(&self) -> bool;

    /// `true` if this message is expected to elicit a command-station reply.
    fn has_response(&self) -> bool;

    /// Strict request/response pairing (spec §4.2).
    fn is_valid_response(request: &Self, response: &Self) -> bool;

    /// Recompute and store the checksum byte in place.
    fn update_checksum(&mut self);

    /// Parse the next complete frame from `buf`, if any is present.
    ///
    /// Returns `Ok(None)` when `buf` holds only a partial frame (the
    /// caller should wait for more bytes). Returns `Err(_)` when the
    /// leading byte cannot start a valid frame; the caller drops
    /// exactly one byte and retries (spec §4.1's "maximal munch with
    /// invalid-prefix skip").
    fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>, crate::error::CodecError>;

    /// Serialize to wire bytes.
    fn to_bytes(&self) -> Vec<u8>;
}
