//! # traintastic_kernel
//!
//! Layered command-station core for a model-railway control server:
//! wire-level codecs for LocoNet and XpressNet, an async transmit
//! kernel that arbitrates priority-queued commands against a single
//! half-duplex interface, and an object model (decoders, rail
//! vehicles, trains, blocks, zones) that turns logical operations into
//! kernel commands and kernel events back into object-state updates.
//!
//! ## Features
//! - Asynchronous transport handling using Tokio, pluggable through
//!   [`io::IoHandler`] (a loopback simulator and a lbserver-style TCP
//!   bridge ship with this crate).
//! - Multi-locomotive trains driven through a shared, auto-derived
//!   speed table, with decoder-originating throttle changes folded
//!   back in.
//! - LNCV module programming as a bounded request/response session.
//! - Zone-based mute/no-smoke/speed-limit policy, aggregated up
//!   through the blocks a train currently occupies.
//! - Input/Output/Identification endpoints: tri-state sensors,
//!   address-mapped accessory/DCCext outputs, and RFID/LISSY
//!   identification events.
//! - Fast-clock mirroring through the command station's dedicated slot,
//!   with support detection.

pub mod block;
pub mod decoder;
pub mod error;
pub mod identification;
pub mod ids;
pub mod input;
pub mod interface;
pub mod io;
pub mod kernel;
pub mod message;
pub mod output;
pub mod train;
pub mod vehicle;
pub mod world;
pub mod zone;

pub use decoder::Decoder;
pub use identification::Identification;
pub use input::Input;
pub use interface::Interface;
pub use output::Output;
pub use train::Train;
pub use vehicle::RailVehicle;
pub use world::World;
pub use zone::Zone;
