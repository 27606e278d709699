//! In-process fake transport (spec §4.3.7), grounded in
//! `original_source/.../loconet/iohandler/simulationiohandler.cpp`.
//!
//! Maintains its own slot array and a small set of LNCV-programmable
//! virtual modules, and echoes every inbound message back with zero
//! delay before synthesizing whatever response the real command
//! station would have sent. This is the fake the crate's own
//! integration tests drive directly; there is no separate mock layer.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::loconet::{Direction, LnMessage, LncvPayload, SLOT_LOCO_MAX, SLOT_LOCO_MIN};
use crate::message::MessageFamily;

use super::{IoEvent, IoHandler};

#[derive(Debug, Clone, Copy)]
struct LocoSlot {
    slot: u8,
    busy: bool,
    address: u16,
    speed: u8,
    direction: Direction,
    /// Bit 0..4 = F0..F4, bits 5..8 = F5..F8, matching [`LnMessage::SlRdData`].
    functions: u16,
}

impl LocoSlot {
    fn empty(slot: u8) -> Self {
        Self {
            slot,
            busy: false,
            address: 0,
            speed: 0,
            direction: Direction::Forward,
            functions: 0,
        }
    }
}

/// A virtual Uhlenbrock LNCV module, pre-seeded the way the teacher's
/// simulator seeds the USB LocoNet interface (module 6312) and the S88
/// adaptor (module 6388).
#[derive(Debug, Clone)]
struct LncvModule {
    id: u16,
    address: u16,
    programming_active: bool,
    lncvs: HashMap<u16, u16>,
}

const LNCV_BROADCAST_ADDRESS: u16 = 0xFFFF;

pub struct SimulationIoHandler {
    slots: Vec<LocoSlot>,
    modules: Vec<LncvModule>,
    tx: mpsc::Sender<IoEvent<LnMessage>>,
    rx: mpsc::Receiver<IoEvent<LnMessage>>,
}

impl Default for SimulationIoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationIoHandler {
    pub fn new() -> Self {
        let slots = (SLOT_LOCO_MIN..=SLOT_LOCO_MAX).map(LocoSlot::empty).collect();

        let modules = vec![
            LncvModule {
                id: 6312,
                address: 0,
                programming_active: false,
                lncvs: HashMap::from([(0, 1), (1, 0), (2, 4), (4, 0)]),
            },
            LncvModule {
                id: 6388,
                address: 0,
                programming_active: false,
                lncvs: HashMap::from([(0, 1), (1, 0), (2, 20), (3, 31), (4, 1)]),
            },
        ];

        let (tx, rx) = mpsc::channel(256);
        Self {
            slots,
            modules,
            tx,
            rx,
        }
    }

    fn find_slot(&self, address: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.busy && s.address == address)
    }

    fn free_slot(&mut self) -> Option<usize> {
        self.slots.iter().position(|s| !s.busy)
    }

    fn slot_read_data(slot: &LocoSlot) -> LnMessage {
        LnMessage::sl_rd_data(slot.slot, slot.address, slot.speed, slot.direction, slot.functions)
    }

    /// Post the reply with some delay, matching the teacher's comment
    /// in `simulationiohandler.cpp::reply` about simulating bus latency.
    fn reply(&self, message: LnMessage) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(IoEvent::Frame(message)).await;
        });
    }

    fn handle_lncv(&mut self, payload: &LncvPayload) {
        match *payload {
            LncvPayload::Start { module_id, module_address } => {
                for module in &mut self.modules {
                    if module.id == module_id
                        && (module_address == module.address
                            || module_address == LNCV_BROADCAST_ADDRESS)
                    {
                        module.programming_active = true;
                        self.reply(LnMessage::Lncv(LncvPayload::ReadResponse {
                            module_id: module.id,
                            lncv: 0,
                            value: module.address,
                        }));
                    }
                }
            }
            LncvPayload::Read { module_id, lncv } => {
                for module in &self.modules {
                    if module.id == module_id && module.programming_active {
                        if let Some(value) = module.lncvs.get(&lncv) {
                            self.reply(LnMessage::Lncv(LncvPayload::ReadResponse {
                                module_id: module.id,
                                lncv,
                                value: *value,
                            }));
                        }
                    }
                }
            }
            LncvPayload::Write { module_id, lncv, value } => {
                for module in &mut self.modules {
                    if module.id == module_id && module.programming_active {
                        if let Some(slot) = module.lncvs.get_mut(&lncv) {
                            *slot = value;
                            self.reply(LnMessage::long_ack(0xED, 0x7F));
                        }
                    }
                }
            }
            LncvPayload::Stop { module_id, .. } => {
                for module in &mut self.modules {
                    if module.id == module_id {
                        module.programming_active = false;
                    }
                }
            }
            LncvPayload::ReadResponse { .. } => {}
        }
    }
}

impl IoHandler<LnMessage> for SimulationIoHandler {
    async fn start(&mut self) -> Result<(), TransportError> {
        let _ = self.tx.send(IoEvent::Started).await;
        Ok(())
    }

    fn send(&mut self, message: LnMessage) -> Result<(), TransportError> {
        // Echo every outbound message back, exactly like the real
        // command station's bus loopback (spec §4.3.7).
        self.reply(message.clone());

        match &message {
            LnMessage::LocoAdr { address } => {
                if let Some(idx) = self.find_slot(*address) {
                    self.reply(Self::slot_read_data(&self.slots[idx]));
                } else if let Some(idx) = self.free_slot() {
                    self.slots[idx].busy = true;
                    self.slots[idx].address = *address;
                    self.reply(Self::slot_read_data(&self.slots[idx]));
                } else {
                    self.reply(LnMessage::long_ack(message.opcode(), 0));
                }
            }
            LnMessage::RqSlData { slot } => {
                if let Some(idx) = self.slots.iter().position(|s| s.slot == *slot && s.busy) {
                    self.reply(Self::slot_read_data(&self.slots[idx]));
                }
            }
            LnMessage::LocoSpd { slot, speed } => {
                if let Some(s) = self.slots.iter_mut().find(|s| s.slot == *slot) {
                    s.speed = *speed;
                }
            }
            LnMessage::LocoDirf { slot, direction, f0, f1, f2, f3, f4 } => {
                if let Some(s) = self.slots.iter_mut().find(|s| s.slot == *slot) {
                    s.direction = *direction;
                    let bits = [*f0, *f1, *f2, *f3, *f4];
                    for (i, set) in bits.iter().enumerate() {
                        if *set {
                            s.functions |= 1 << i;
                        } else {
                            s.functions &= !(1 << i);
                        }
                    }
                }
            }
            LnMessage::LocoSnd { slot, f5, f6, f7, f8 } => {
                if let Some(s) = self.slots.iter_mut().find(|s| s.slot == *slot) {
                    let bits = [*f5, *f6, *f7, *f8];
                    for (i, set) in bits.iter().enumerate() {
                        if *set {
                            s.functions |= 1 << (5 + i);
                        } else {
                            s.functions &= !(1 << (5 + i));
                        }
                    }
                }
            }
            LnMessage::Lncv(payload) => self.handle_lncv(payload),
            LnMessage::WrSlData { .. } => {
                self.reply(LnMessage::long_ack(message.opcode(), 0x7F));
            }
            _ => {}
        }
        Ok(())
    }

    fn events(&mut self) -> &mut mpsc::Receiver<IoEvent<LnMessage>> {
        &mut self.rx
    }

    async fn stop(&mut self) {}
}
