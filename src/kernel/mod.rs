//! The per-interface state machine (spec §4.3), grounded in
//! `original_source/server/src/hardware/protocol/loconet/kernel.hpp`.
//!
//! LocoNet is the canonical protocol family this kernel drives end to
//! end (transmit discipline, slot resolution, LNCV programming, fast
//! clock). It owns one [`crate::io::IoHandler`] and runs as a single
//! task (the teacher's `Z21Station::start_receiver` spawned-task
//! pattern, generalized from "fan out packets" to "drive a whole
//! state machine"): `Kernel::run` is the async loop that would occupy
//! the original's dedicated I/O thread, and every public operation is
//! a [`KernelCommand`] sent over an `mpsc` channel rather than a
//! cross-thread posted task (Design Notes: "explicit task queues with
//! `post(task)`; posted tasks capture only IDs").

pub mod lncv;
pub mod slot;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::LncvError;
use crate::identification::IdentificationCategory;
use crate::io::{IoEvent, IoHandler};
use crate::message::loconet::{Direction, LnMessage, LncvPayload, SLOT_FAST_CLOCK, SLOT_LOCO_MAX, SLOT_LOCO_MIN};
use crate::message::MessageFamily;
use crate::output::{OutputChannel, OutputValue};

use lncv::LncvState;
use slot::{SendForAddress, SlotTable};

const SEND_QUEUE_CAPACITY_BYTES: usize = 4096;
const ECHO_WAIT: Duration = Duration::from_millis(250);
const RESPONSE_WAIT: Duration = Duration::from_millis(1000);
/// Fast-clock re-sync period (spec §4.3.3: "period derives from the
/// world clock's tick rate"). Left a fixed constant since this crate
/// has no world-clock/tick-rate object of its own to derive it from.
const FAST_CLOCK_SYNC_PERIOD: Duration = Duration::from_secs(10);
/// How long a `SwitchRequest` coil stays energized before the kernel
/// sends the matching `on=false` pulse (spec §4.3.6 "pulse pairs").
const OUTPUT_PULSE_DURATION: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A byte-bounded FIFO of not-yet-sent frames for one priority tier
/// (spec §4.3.1: "three send queues ... together bounded at 4 KiB").
#[derive(Default)]
struct SendQueue {
    messages: VecDeque<LnMessage>,
    bytes: usize,
}

impl SendQueue {
    fn append(&mut self, message: LnMessage, remaining_capacity: usize) -> bool {
        let size = message.to_bytes().len();
        if size > remaining_capacity {
            return false;
        }
        self.bytes += size;
        self.messages.push_back(message);
        true
    }

    fn pop(&mut self) -> Option<LnMessage> {
        let message = self.messages.pop_front()?;
        self.bytes -= message.to_bytes().len();
        Some(message)
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.bytes = 0;
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Operations callers (Interface, DecoderController, Train coordinator)
/// issue to a running kernel. The kernel task is the only place that
/// touches send queues, timers, or the slot table, so every mutation
/// crosses this channel rather than a shared lock (spec §5: "kernel
/// thread-private, no locks").
pub enum KernelCommand {
    SetPowerOn(bool),
    EmergencyStop,
    Resume,
    Send(LnMessage, Priority),
    /// Send a message addressed to a locomotive, resolving its slot
    /// lazily if necessary (spec §4.3.2).
    SendForAddress(u16, LnMessage),
    LncvStart { module_id: u16, module_address: u16 },
    LncvRead { module_id: u16, lncv: u16 },
    LncvWrite { module_id: u16, lncv: u16, value: u16 },
    LncvStop,
    /// Begin mirroring a world clock into slot 123 (spec §4.3.3).
    /// Triggers an immediate read-back to detect command-station
    /// support before the periodic sync timer starts.
    AttachClock { multiplier: u8, hour: u8, minute: u8 },
    /// Update the mirrored time; takes effect on the next periodic sync.
    SetClock { multiplier: u8, hour: u8, minute: u8 },
    /// Stop mirroring the fast clock.
    DetachClock,
    /// Drive an Output to a new value (spec §4.3.6). Redundant commands
    /// (already at the requested value) are silently dropped.
    SetOutput { address: u16, channel: OutputChannel, value: OutputValue },
    Stop,
}

/// Events the kernel raises for its owner to forward to the object
/// model (spec §7: "surfaced via callbacks, not propagated as
/// exceptions"). The channel *is* the callback: a single `Sender`
/// handed out once at construction, matching Design Notes' "typed
/// function values ... set once during setup, never concurrently".
#[derive(Debug, Clone)]
pub enum KernelEvent {
    Started,
    GlobalPowerChanged(bool),
    Idle,
    Error(String),
    LncvReadResponse { success: bool, lncv: u16, value: u16 },
    SlotResolved { address: u16, slot: u8 },
    DecoderThrottleReport { address: u16, speed: u8, direction: Direction, functions: u16 },
    DecoderFunctionReport { address: u16, functions: u16 },
    InputChanged { address: u16, value: bool },
    /// The command station confirmed or rejected fast-clock slot 123
    /// (spec §4.3.3: "if the initial read fails ... mark unsupported").
    FastClockSupportChanged(bool),
    /// An RFID (`MULTI_SENSE`) or LISSY (`E4`) identification report.
    IdentificationEvent {
        address: u16,
        category: IdentificationCategory,
        identifier: u32,
        direction: Option<Direction>,
    },
}

enum Flight {
    Idle,
    WaitingForEcho { sent: LnMessage, priority: Priority },
    WaitingForResponse { sent: LnMessage },
}

/// The mirrored time the kernel periodically writes to slot 123.
#[derive(Debug, Clone, Copy)]
struct FastClockMirror {
    multiplier: u8,
    hour: u8,
    minute: u8,
}

/// Last-commanded accessory state for one address, used to drop
/// redundant `SwitchRequest` pairs (spec §4.3.6 "OutputPairValue").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputPairValue {
    dir: bool,
    on: bool,
}

pub struct Kernel<H> {
    io: H,
    commands: mpsc::Receiver<KernelCommand>,
    events: mpsc::Sender<KernelEvent>,
    queues: [SendQueue; 3],
    flight: Flight,
    deadline: Option<Instant>,
    global_power: Option<bool>,
    emergency_stop: bool,
    slots: SlotTable,
    lncv: LncvState,
    fast_clock_supported: bool,
    scan_next_slot: Option<u8>,
    fast_clock: Option<FastClockMirror>,
    fast_clock_next_sync: Option<Instant>,
    fast_clock_awaiting_readback: bool,
    output_pairs: HashMap<u16, OutputPairValue>,
    output_dccext: HashMap<u16, u8>,
    /// Pending `on=false` follow-ups for `SwitchRequest` pulse pairs,
    /// ordered by firing time.
    pulse_off_queue: VecDeque<(Instant, u16, bool)>,
}

impl<H: IoHandler<LnMessage>> Kernel<H> {
    pub fn new(io: H) -> (Self, mpsc::Sender<KernelCommand>, mpsc::Receiver<KernelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (evt_tx, evt_rx) = mpsc::channel(256);
        let kernel = Self {
            io,
            commands: cmd_rx,
            events: evt_tx,
            queues: [SendQueue::default(), SendQueue::default(), SendQueue::default()],
            flight: Flight::Idle,
            deadline: None,
            global_power: None,
            emergency_stop: false,
            slots: SlotTable::new(),
            lncv: LncvState::new(),
            fast_clock_supported: true,
            scan_next_slot: None,
            fast_clock: None,
            fast_clock_next_sync: None,
            fast_clock_awaiting_readback: false,
            output_pairs: HashMap::new(),
            output_dccext: HashMap::new(),
            pulse_off_queue: VecDeque::new(),
        };
        (kernel, cmd_tx, evt_rx)
    }

    fn remaining_capacity(&self) -> usize {
        let used: usize = self.queues.iter().map(|q| q.bytes).sum();
        SEND_QUEUE_CAPACITY_BYTES.saturating_sub(used)
    }

    fn enqueue(&mut self, message: LnMessage, priority: Priority) -> bool {
        let remaining = self.remaining_capacity();
        self.queues[priority as usize].append(message, remaining)
    }

    /// Begin a slot-discovery scan (spec §4.3.2: "optionally queries
    /// all loco slots at startup"). Left to the caller to trigger so a
    /// fresh `SimulationIoHandler` with many idle tests isn't forced
    /// to answer 119 `RQ_SL_DATA` requests it doesn't care about
    /// (spec §9 Open Question: "activation condition is unclear").
    pub fn start_slot_scan(&mut self) {
        self.scan_next_slot = Some(SLOT_LOCO_MIN);
        self.enqueue(LnMessage::rq_sl_data(SLOT_LOCO_MIN), Priority::Low);
    }

    /// Drive the kernel until `KernelCommand::Stop` or the command
    /// channel closes. Intended to be `tokio::spawn`ed by the owning
    /// `Interface`.
    pub async fn run(mut self) {
        if let Err(e) = self.io.start().await {
            let _ = self.events.send(KernelEvent::Error(e.to_string())).await;
            return;
        }

        loop {
            let wake = self.next_wake();
            let sleep = async {
                match wake {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                Some(cmd) = self.commands.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = self.io.events().recv() => {
                    self.handle_io_event(event).await;
                }
                _ = sleep => {
                    self.handle_timers().await;
                }
                else => break,
            }
        }

        self.io.stop().await;
    }

    /// Earliest of the three independent timer sources: transmit
    /// discipline (echo/response wait), the fast-clock periodic sync,
    /// and the next pending output pulse-off.
    fn next_wake(&self) -> Option<Instant> {
        [self.deadline, self.fast_clock_next_sync, self.pulse_off_queue.front().map(|(at, _, _)| *at)]
            .into_iter()
            .flatten()
            .min()
    }

    async fn handle_timers(&mut self) {
        let now = Instant::now();

        if self.deadline.is_some_and(|d| d <= now) {
            self.handle_transmit_timeout().await;
        }

        if self.fast_clock_next_sync.is_some_and(|d| d <= now) {
            self.sync_fast_clock().await;
        }

        while self.pulse_off_queue.front().is_some_and(|(at, _, _)| *at <= now) {
            let (_, address, dir) = self.pulse_off_queue.pop_front().unwrap();
            self.enqueue(LnMessage::sw_req(address, dir, false), Priority::Normal);
        }

        self.try_send_next().await;
    }

    async fn handle_command(&mut self, cmd: KernelCommand) -> bool {
        match cmd {
            KernelCommand::SetPowerOn(on) => {
                let msg = if on { LnMessage::gpon() } else { LnMessage::gpoff() };
                self.enqueue(msg, Priority::High);
                self.try_send_next().await;
            }
            KernelCommand::EmergencyStop => {
                self.emergency_stop = true;
                self.enqueue(LnMessage::idle(), Priority::High);
                self.try_send_next().await;
            }
            KernelCommand::Resume => {
                self.emergency_stop = false;
            }
            KernelCommand::Send(message, priority) => {
                self.enqueue(message, priority);
                self.try_send_next().await;
            }
            KernelCommand::SendForAddress(address, message) => {
                match self.slots.send_for_address(address, message) {
                    SendForAddress::Resolved(resolved) => {
                        self.enqueue(resolved, Priority::Normal);
                    }
                    SendForAddress::RequestSlot => {
                        self.enqueue(LnMessage::loco_adr(address), Priority::High);
                    }
                    SendForAddress::Buffered => {}
                }
                self.try_send_next().await;
            }
            KernelCommand::LncvStart { module_id, module_address } => {
                match self.lncv.start(module_id, module_address) {
                    Ok(payload) => {
                        self.enqueue(LnMessage::Lncv(payload), Priority::High);
                        self.try_send_next().await;
                    }
                    Err(e) => self.report_lncv_error(e).await,
                }
            }
            KernelCommand::LncvRead { module_id: _, lncv } => {
                match self.lncv.read(lncv) {
                    Ok(payload) => {
                        self.enqueue(LnMessage::Lncv(payload), Priority::High);
                        self.try_send_next().await;
                    }
                    Err(e) => self.report_lncv_error(e).await,
                }
            }
            KernelCommand::LncvWrite { module_id: _, lncv, value } => {
                match self.lncv.write(lncv, value) {
                    Ok(payload) => {
                        self.enqueue(LnMessage::Lncv(payload), Priority::High);
                        self.try_send_next().await;
                    }
                    Err(e) => self.report_lncv_error(e).await,
                }
            }
            KernelCommand::LncvStop => {
                if let Ok(payload) = self.lncv.stop() {
                    self.enqueue(LnMessage::Lncv(payload), Priority::Low);
                    self.try_send_next().await;
                }
            }
            KernelCommand::AttachClock { multiplier, hour, minute } => {
                self.attach_clock(multiplier, hour, minute).await;
            }
            KernelCommand::SetClock { multiplier, hour, minute } => {
                if self.fast_clock.is_some() {
                    self.fast_clock = Some(FastClockMirror { multiplier, hour, minute });
                }
            }
            KernelCommand::DetachClock => {
                self.fast_clock = None;
                self.fast_clock_next_sync = None;
                self.fast_clock_awaiting_readback = false;
            }
            KernelCommand::SetOutput { address, channel, value } => {
                self.set_output(address, channel, value).await;
            }
            KernelCommand::Stop => {
                for q in &mut self.queues {
                    q.clear();
                }
                self.flight = Flight::Idle;
                self.deadline = None;
                self.fast_clock_next_sync = None;
                self.pulse_off_queue.clear();
                return true;
            }
        }
        false
    }

    async fn report_lncv_error(&self, e: LncvError) {
        warn!("LNCV command rejected: {e}");
        if matches!(e, LncvError::NoSession) {
            let _ = self
                .events
                .send(KernelEvent::LncvReadResponse { success: false, lncv: 0, value: 0 })
                .await;
        }
    }

    async fn handle_io_event(&mut self, event: IoEvent<LnMessage>) {
        match event {
            IoEvent::Started => {
                let _ = self.events.send(KernelEvent::Started).await;
            }
            IoEvent::InvalidByte(b) => {
                debug!("dropped malformed leading byte {b:#04x}");
            }
            IoEvent::Error(e) => {
                let _ = self.events.send(KernelEvent::Error(e.to_string())).await;
            }
            IoEvent::Frame(message) => {
                self.note_flight_progress(&message).await;
                self.handle_inbound_semantics(message).await;
            }
        }
    }

    /// Advance the transmit-discipline state machine (spec §4.3.1)
    /// against an inbound frame: does it satisfy echo-wait, or
    /// response-wait?
    async fn note_flight_progress(&mut self, message: &LnMessage) {
        match &self.flight {
            Flight::WaitingForEcho { sent, .. } if sent == message => {
                let sent = sent.clone();
                self.deadline = None;
                if sent.has_response() {
                    self.flight = Flight::WaitingForResponse { sent };
                    self.deadline = Some(Instant::now() + RESPONSE_WAIT);
                } else {
                    self.flight = Flight::Idle;
                    self.try_send_next().await;
                }
            }
            Flight::WaitingForResponse { sent } if LnMessage::is_valid_response(sent, message) => {
                self.deadline = None;
                self.flight = Flight::Idle;
                self.try_send_next().await;
            }
            _ => {}
        }
    }

    async fn handle_transmit_timeout(&mut self) {
        match std::mem::replace(&mut self.flight, Flight::Idle) {
            Flight::WaitingForEcho { sent, .. } => {
                warn!("echo wait timed out for {sent:?}");
            }
            Flight::WaitingForResponse { sent } => {
                warn!("response wait timed out for {sent:?}");
                if let LnMessage::Lncv(LncvPayload::Read { .. }) = sent {
                    let _ = self
                        .events
                        .send(KernelEvent::LncvReadResponse { success: false, lncv: 0, value: 0 })
                        .await;
                }
                if self.fast_clock_awaiting_readback && matches!(sent, LnMessage::RqSlData { slot: SLOT_FAST_CLOCK }) {
                    self.mark_fast_clock_unsupported().await;
                }
            }
            Flight::Idle => {}
        }
        self.deadline = None;
    }

    /// Begin (or restart) periodic fast-clock mirroring: probe support
    /// with an `RQ_SL_DATA` for slot 123 before committing to the
    /// periodic `WR_SL_DATA` sync (spec §4.3.3).
    async fn attach_clock(&mut self, multiplier: u8, hour: u8, minute: u8) {
        self.fast_clock = Some(FastClockMirror { multiplier, hour, minute });
        self.fast_clock_supported = true;
        self.fast_clock_awaiting_readback = true;
        self.enqueue(LnMessage::rq_sl_data(SLOT_FAST_CLOCK), Priority::Normal);
        self.try_send_next().await;
    }

    async fn mark_fast_clock_unsupported(&mut self) {
        self.fast_clock_awaiting_readback = false;
        self.fast_clock_supported = false;
        self.fast_clock_next_sync = None;
        let _ = self.events.send(KernelEvent::FastClockSupportChanged(false)).await;
    }

    async fn sync_fast_clock(&mut self) {
        let Some(clock) = self.fast_clock else {
            self.fast_clock_next_sync = None;
            return;
        };
        if !self.fast_clock_supported {
            self.fast_clock_next_sync = None;
            return;
        }
        self.enqueue(LnMessage::fast_clock_write(clock.multiplier, clock.hour, clock.minute), Priority::Low);
        self.fast_clock_next_sync = Some(Instant::now() + FAST_CLOCK_SYNC_PERIOD);
    }

    /// Drive an accessory/DCCext output, skipping redundant commands
    /// (spec §4.3.6).
    async fn set_output(&mut self, address: u16, channel: OutputChannel, value: OutputValue) {
        match (channel, value) {
            (OutputChannel::Accessory, OutputValue::OnOff(on)) => {
                let dir = on;
                if self.output_pairs.get(&address) == Some(&OutputPairValue { dir, on }) {
                    return;
                }
                self.output_pairs.insert(address, OutputPairValue { dir, on });
                self.enqueue(LnMessage::sw_req(address, dir, true), Priority::Normal);
                self.pulse_off_queue.push_back((Instant::now() + OUTPUT_PULSE_DURATION, address, dir));
                self.try_send_next().await;
            }
            (OutputChannel::DccExt, OutputValue::DccExt(aspect)) => {
                if self.output_dccext.get(&address) == Some(&aspect) {
                    return;
                }
                self.output_dccext.insert(address, aspect);
                self.enqueue(LnMessage::dcc_ext_aspect(address, aspect), Priority::Normal);
                self.try_send_next().await;
            }
            _ => warn!("output {address} value {value:?} doesn't match its channel {channel:?}"),
        }
    }

    async fn try_send_next(&mut self) {
        if !matches!(self.flight, Flight::Idle) {
            return;
        }
        let (priority, message) = if let Some(m) = self.queues[Priority::High as usize].pop() {
            (Priority::High, m)
        } else if let Some(m) = self.queues[Priority::Normal as usize].pop() {
            (Priority::Normal, m)
        } else if let Some(m) = self.queues[Priority::Low as usize].pop() {
            (Priority::Low, m)
        } else {
            return;
        };

        if let Err(e) = self.io.send(message.clone()) {
            let _ = self.events.send(KernelEvent::Error(e.to_string())).await;
            return;
        }
        self.flight = Flight::WaitingForEcho { sent: message, priority };
        self.deadline = Some(Instant::now() + ECHO_WAIT);
    }

    async fn handle_inbound_semantics(&mut self, message: LnMessage) {
        match message {
            LnMessage::Gpon => {
                self.global_power = Some(true);
                let _ = self.events.send(KernelEvent::GlobalPowerChanged(true)).await;
            }
            LnMessage::Gpoff => {
                self.global_power = Some(false);
                let _ = self.events.send(KernelEvent::GlobalPowerChanged(false)).await;
            }
            LnMessage::Idle => {
                let _ = self.events.send(KernelEvent::Idle).await;
            }
            LnMessage::SlRdData { slot, address, speed, direction, functions } => {
                let flushed = self.slots.resolve(slot, address, speed, direction, functions);
                let _ = self.events.send(KernelEvent::SlotResolved { address, slot }).await;
                let _ = self
                    .events
                    .send(KernelEvent::DecoderThrottleReport { address, speed, direction, functions })
                    .await;
                for m in flushed {
                    self.enqueue(m, Priority::Normal);
                }
                self.advance_slot_scan(slot).await;
                self.try_send_next().await;
            }
            LnMessage::SlotStat1 { slot, stat } => {
                self.slots.note_stat(slot, stat & 0x30 == 0);
            }
            LnMessage::LocoSpd { slot, speed } => {
                self.slots.update_speed(slot, speed);
                if let Some(state) = self.slots.slot_state(slot) {
                    let _ = self
                        .events
                        .send(KernelEvent::DecoderThrottleReport {
                            address: state.address,
                            speed,
                            direction: state.direction,
                            functions: state.functions,
                        })
                        .await;
                }
            }
            LnMessage::LocoDirf { slot, direction, f0, f1, f2, f3, f4 } => {
                self.slots.update_direction(slot, direction);
                let bits = (f0 as u16) | ((f1 as u16) << 1) | ((f2 as u16) << 2) | ((f3 as u16) << 3) | ((f4 as u16) << 4);
                if let Some(state) = self.slots.slot_state(slot) {
                    let _ = self
                        .events
                        .send(KernelEvent::DecoderFunctionReport { address: state.address, functions: bits })
                        .await;
                }
            }
            LnMessage::InputRep { address, level } => {
                let _ = self.events.send(KernelEvent::InputChanged { address, value: level }).await;
            }
            LnMessage::Lncv(LncvPayload::ReadResponse { module_id, lncv, value }) => {
                if self.lncv.matches(module_id) {
                    let _ = self
                        .events
                        .send(KernelEvent::LncvReadResponse { success: true, lncv, value })
                        .await;
                }
            }
            LnMessage::LongAck { responding_opcode, ack1 } => {
                if responding_opcode == LnMessage::loco_adr(0).opcode() & 0x7F && ack1 == 0 {
                    // Slot exhaustion (spec §8 boundary behavior): flush the
                    // pending-message buffer for whichever address was being
                    // resolved and log the failure. The slot table doesn't
                    // track *which* address a bare LOCO_ADR rejection refers
                    // to once it has no reply; callers that need a definite
                    // failure signal should prefer a per-address timeout.
                    warn!("LOCO_ADR rejected: no free slot");
                } else if self.fast_clock_awaiting_readback
                    && responding_opcode == LnMessage::rq_sl_data(SLOT_FAST_CLOCK).opcode() & 0x7F
                    && ack1 == 0
                {
                    self.mark_fast_clock_unsupported().await;
                }
            }
            LnMessage::FastClockData { valid, .. } => {
                self.fast_clock_awaiting_readback = false;
                if valid {
                    self.fast_clock_supported = true;
                    self.fast_clock_next_sync = Some(Instant::now() + FAST_CLOCK_SYNC_PERIOD);
                    let _ = self.events.send(KernelEvent::FastClockSupportChanged(true)).await;
                } else {
                    self.mark_fast_clock_unsupported().await;
                }
            }
            LnMessage::MultiSense { base, data } => {
                let identifier = ((data[0] as u32) << 8) | data[1] as u32;
                let _ = self
                    .events
                    .send(KernelEvent::IdentificationEvent {
                        address: base as u16,
                        category: IdentificationCategory::Rfid,
                        identifier,
                        direction: None,
                    })
                    .await;
            }
            LnMessage::Lissy { unit, cat, address } => {
                let direction = if cat & 0x01 != 0 { Some(Direction::Forward) } else { Some(Direction::Reverse) };
                let _ = self
                    .events
                    .send(KernelEvent::IdentificationEvent {
                        address: unit,
                        category: IdentificationCategory::Lissy,
                        identifier: address as u32,
                        direction,
                    })
                    .await;
            }
            _ => {}
        }
    }

    async fn advance_slot_scan(&mut self, just_resolved: u8) {
        if self.scan_next_slot != Some(just_resolved) {
            return;
        }
        let next = just_resolved + 1;
        if next <= SLOT_LOCO_MAX {
            self.scan_next_slot = Some(next);
            self.enqueue(LnMessage::rq_sl_data(next), Priority::Low);
        } else {
            self.scan_next_slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::simulation::SimulationIoHandler;

    #[tokio::test]
    async fn power_on_round_trips_through_simulation() {
        let io = SimulationIoHandler::new();
        let (kernel, commands, mut events) = Kernel::new(io);
        let handle = tokio::spawn(kernel.run());

        assert!(matches!(events.recv().await, Some(KernelEvent::Started)));

        commands.send(KernelCommand::SetPowerOn(true)).await.unwrap();
        let mut saw_power_on = false;
        for _ in 0..4 {
            if let Some(KernelEvent::GlobalPowerChanged(true)) = events.recv().await {
                saw_power_on = true;
                break;
            }
        }
        assert!(saw_power_on);

        commands.send(KernelCommand::Stop).await.unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn address_resolves_to_slot_and_flushes_pending_speed() {
        let io = SimulationIoHandler::new();
        let (kernel, commands, mut events) = Kernel::new(io);
        let handle = tokio::spawn(kernel.run());
        assert!(matches!(events.recv().await, Some(KernelEvent::Started)));

        commands
            .send(KernelCommand::SendForAddress(3, LnMessage::loco_spd(0, 50)))
            .await
            .unwrap();

        let mut resolved = false;
        for _ in 0..8 {
            if let Some(KernelEvent::SlotResolved { address: 3, .. }) = events.recv().await {
                resolved = true;
                break;
            }
        }
        assert!(resolved);

        commands.send(KernelCommand::Stop).await.unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn fast_clock_marks_unsupported_on_response_timeout() {
        let io = SimulationIoHandler::new();
        let (mut kernel, _commands, _events) = Kernel::new(io);
        kernel.fast_clock_awaiting_readback = true;
        kernel.flight = Flight::WaitingForResponse { sent: LnMessage::rq_sl_data(SLOT_FAST_CLOCK) };
        kernel.handle_transmit_timeout().await;
        assert!(!kernel.fast_clock_supported);
        assert!(kernel.fast_clock_next_sync.is_none());
    }

    #[tokio::test]
    async fn fast_clock_data_marks_supported_and_schedules_sync() {
        let io = SimulationIoHandler::new();
        let (mut kernel, _commands, _events) = Kernel::new(io);
        kernel.fast_clock_awaiting_readback = true;
        kernel
            .handle_inbound_semantics(LnMessage::FastClockData {
                slot: SLOT_FAST_CLOCK,
                multiplier: 1,
                hour: 10,
                minute: 30,
                valid: true,
            })
            .await;
        assert!(kernel.fast_clock_supported);
        assert!(kernel.fast_clock_next_sync.is_some());
        assert!(!kernel.fast_clock_awaiting_readback);
    }

    #[tokio::test]
    async fn set_output_accessory_drops_redundant_command() {
        let io = SimulationIoHandler::new();
        let (mut kernel, _commands, _events) = Kernel::new(io);
        kernel.set_output(5, OutputChannel::Accessory, OutputValue::OnOff(true)).await;
        assert_eq!(kernel.pulse_off_queue.len(), 1);
        kernel.set_output(5, OutputChannel::Accessory, OutputValue::OnOff(true)).await;
        assert_eq!(kernel.pulse_off_queue.len(), 1);
        kernel.set_output(5, OutputChannel::Accessory, OutputValue::OnOff(false)).await;
        assert_eq!(kernel.pulse_off_queue.len(), 2);
    }

    #[tokio::test]
    async fn multi_sense_and_lissy_surface_identification_events() {
        let io = SimulationIoHandler::new();
        let (mut kernel, _commands, mut events) = Kernel::new(io);

        kernel
            .handle_inbound_semantics(LnMessage::MultiSense { base: 7, data: [0x12, 0x34, 0x00] })
            .await;
        match events.try_recv() {
            Ok(KernelEvent::IdentificationEvent { address: 7, category: IdentificationCategory::Rfid, identifier, .. }) => {
                assert_eq!(identifier, 0x1234);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        kernel
            .handle_inbound_semantics(LnMessage::Lissy { unit: 42, cat: 1, address: 99 })
            .await;
        match events.try_recv() {
            Ok(KernelEvent::IdentificationEvent { address: 42, category: IdentificationCategory::Lissy, identifier: 99, direction: Some(Direction::Forward) }) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
