//! Address→slot resolution (spec §4.3.2), grounded in
//! `original_source/.../loconet/kernel.hpp`'s `LocoSlot`/`m_addressToSlot`/
//! `m_pendingSlotMessages` triple.
//!
//! A slot is acquired lazily: the first outbound message for an
//! unknown address is buffered and a `LOCO_ADR` request goes out; once
//! `SL_RD_DATA` answers, every buffered message gets its slot byte
//! rewritten and is released to the send queue.

use std::collections::HashMap;

use crate::message::loconet::{Direction, LnMessage};

#[derive(Debug, Clone, Copy)]
pub struct LocoSlotState {
    pub address: u16,
    pub speed: u8,
    pub direction: Direction,
    pub functions: u16,
    /// `false` once a `SLOT_STAT1` free transition is observed
    /// (spec §4.3.2 point 3).
    pub busy: bool,
}

#[derive(Default)]
pub struct SlotTable {
    address_to_slot: HashMap<u16, u8>,
    slots: HashMap<u8, LocoSlotState>,
    /// Addresses with an outstanding `LOCO_ADR` request, so a second
    /// outbound message for the same unresolved address doesn't send a
    /// duplicate request.
    resolving: std::collections::HashSet<u16>,
    pending: HashMap<u16, Vec<LnMessage>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_for_address(&self, address: u16) -> Option<u8> {
        self.address_to_slot.get(&address).copied()
    }

    pub fn slot_state(&self, slot: u8) -> Option<&LocoSlotState> {
        self.slots.get(&slot)
    }

    /// Record a resolved `SL_RD_DATA`/`WR_SL_DATA` reply and return the
    /// buffered messages that were waiting on this address, each with
    /// its slot byte filled in and ready to send.
    pub fn resolve(
        &mut self,
        slot: u8,
        address: u16,
        speed: u8,
        direction: Direction,
        functions: u16,
    ) -> Vec<LnMessage> {
        self.address_to_slot.insert(address, slot);
        self.slots.insert(
            slot,
            LocoSlotState {
                address,
                speed,
                direction,
                functions,
                busy: true,
            },
        );
        self.resolving.remove(&address);
        self.pending
            .remove(&address)
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.with_slot(slot))
            .collect()
    }

    /// A `SLOT_STAT1` report for `slot`. `free` mirrors the "free" bit
    /// pattern; a free transition drops the address mapping (spec
    /// §4.3.2 point 3) since the command station may reassign the slot.
    pub fn note_stat(&mut self, slot: u8, free: bool) {
        if free {
            if let Some(state) = self.slots.get(&slot) {
                self.address_to_slot.remove(&state.address);
            }
            self.slots.remove(&slot);
        } else if let Some(state) = self.slots.get_mut(&slot) {
            state.busy = true;
        }
    }

    pub fn update_speed(&mut self, slot: u8, speed: u8) {
        if let Some(s) = self.slots.get_mut(&slot) {
            s.speed = speed;
        }
    }

    pub fn update_direction(&mut self, slot: u8, direction: Direction) {
        if let Some(s) = self.slots.get_mut(&slot) {
            s.direction = direction;
        }
    }

    /// Resolve `address` to a slot if known, otherwise buffer `message`
    /// and report whether a fresh `LOCO_ADR` request must be sent (the
    /// address wasn't already being resolved).
    pub fn send_for_address(&mut self, address: u16, message: LnMessage) -> SendForAddress {
        if let Some(slot) = self.address_to_slot.get(&address) {
            return SendForAddress::Resolved(message.with_slot(*slot));
        }
        self.pending.entry(address).or_default().push(message);
        if self.resolving.insert(address) {
            SendForAddress::RequestSlot
        } else {
            SendForAddress::Buffered
        }
    }

    pub fn slot_exhausted(&mut self, address: u16) -> Vec<LnMessage> {
        self.resolving.remove(&address);
        self.pending.remove(&address).unwrap_or_default()
    }
}

pub enum SendForAddress {
    /// The address already has a slot; the message is ready to send.
    Resolved(LnMessage),
    /// The message was buffered and a new `LOCO_ADR(address)` must go out.
    RequestSlot,
    /// The message was buffered; a `LOCO_ADR(address)` is already in flight.
    Buffered,
}
