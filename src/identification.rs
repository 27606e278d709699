//! Identification event endpoint (spec §3 "Identification", §6),
//! grounded in the `MULTI_SENSE`/`E4` (LISSY) frames `message/
//! loconet.rs` already decodes and in `original_source/server/src/
//! hardware/protocol/loconet/kernel.hpp`'s `IdentificationController`
//! forward declaration.

use crate::ids::{IdentificationId, InterfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationCategory {
    /// Uhlenbrock `MULTI_SENSE` RFID/mfx-style report.
    Rfid,
    /// Uhlenbrock LISSY (`E4`) occupancy-direction detector.
    Lissy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentificationDirection {
    Forward,
    Reverse,
}

/// One reported event: category, identifier (e.g. an RFID tag or loco
/// address), and an optional direction (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentificationEvent {
    pub category: IdentificationCategory,
    pub identifier: u32,
    pub direction: Option<IdentificationDirection>,
}

#[derive(Debug, Clone)]
pub struct Identification {
    pub id: IdentificationId,
    pub name: String,
    pub interface: Option<InterfaceId>,
    pub address: u16,
    last_event: Option<IdentificationEvent>,
}

impl Identification {
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self { id: IdentificationId::new(), name: name.into(), interface: None, address, last_event: None }
    }

    pub fn last_event(&self) -> Option<IdentificationEvent> {
        self.last_event
    }

    pub fn record(&mut self, event: IdentificationEvent) {
        self.last_event = Some(event);
    }
}
