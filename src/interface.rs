//! Adapts a running [`crate::kernel::Kernel`] to the object model (spec
//! §4.4), grounded in the teacher's `Z21Station` (owns the transport,
//! exposes `voltage_on`/`voltage_off`/subscriptions) generalized from
//! one fixed transport to the `{Simulator, LbServer}` choice spec §4.1
//! requires.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::decoder::{Decoder, DecoderChanges, DecoderController, Direction as DecoderDirection, Protocol};
use crate::ids::{DecoderId, IdentificationId, InputId, InterfaceId, OutputId};
use crate::io::lbserver::LbServerIoHandler;
use crate::io::simulation::SimulationIoHandler;
use crate::kernel::{Kernel, KernelCommand, KernelEvent, Priority};
use crate::message::loconet::{Direction as LnDirection, LnMessage};
use crate::output::{Output, OutputChannel, OutputController};

#[derive(Debug, Clone)]
pub enum TransportConfig {
    Simulator,
    LbServer { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceState {
    Offline,
    Initializing,
    Online,
    Error(String),
}

pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    transport: TransportConfig,
    state: InterfaceState,
    commands: Option<mpsc::Sender<KernelCommand>>,
    events: Option<mpsc::Receiver<KernelEvent>>,
    kernel_task: Option<JoinHandle<()>>,
    decoders_by_address: HashMap<u16, DecoderId>,
    inputs_by_address: HashMap<u16, InputId>,
    outputs_by_address: HashMap<(OutputChannel, u16), OutputId>,
    identifications_by_address: HashMap<u16, IdentificationId>,
}

impl Interface {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: InterfaceId::new(),
            name: name.into(),
            transport,
            state: InterfaceState::Offline,
            commands: None,
            events: None,
            kernel_task: None,
            decoders_by_address: HashMap::new(),
            inputs_by_address: HashMap::new(),
            outputs_by_address: HashMap::new(),
            identifications_by_address: HashMap::new(),
        }
    }

    pub fn state(&self) -> &InterfaceState {
        &self.state
    }

    pub fn register_decoder(&mut self, decoder: &Decoder) {
        self.decoders_by_address.insert(decoder.address, decoder.id);
    }

    pub fn decoder_for_address(&self, address: u16) -> Option<DecoderId> {
        self.decoders_by_address.get(&address).copied()
    }

    pub fn register_input(&mut self, input: &crate::input::Input) {
        self.inputs_by_address.insert(input.address, input.id);
    }

    pub fn input_for_address(&self, address: u16) -> Option<InputId> {
        self.inputs_by_address.get(&address).copied()
    }

    pub fn register_output(&mut self, output: &Output) {
        self.outputs_by_address.insert((output.channel, output.address), output.id);
    }

    pub fn output_for_address(&self, channel: OutputChannel, address: u16) -> Option<OutputId> {
        self.outputs_by_address.get(&(channel, address)).copied()
    }

    pub fn register_identification(&mut self, identification: &crate::identification::Identification) {
        self.identifications_by_address.insert(identification.address, identification.id);
    }

    pub fn identification_for_address(&self, address: u16) -> Option<IdentificationId> {
        self.identifications_by_address.get(&address).copied()
    }

    /// `setOnline(bool, bool simulation)` (spec §4.4): validates the
    /// transport, starts a kernel bound to the matching IO handler, and
    /// transitions state. Errors transition to `Error` and return
    /// `false`, mirroring the teacher's fallible `Z21Station::new`.
    pub async fn set_online(&mut self, online: bool, simulation: bool) -> bool {
        if !online {
            self.shut_down().await;
            self.state = InterfaceState::Offline;
            return true;
        }

        self.state = InterfaceState::Initializing;
        let (commands, events, task) = if simulation || matches!(self.transport, TransportConfig::Simulator) {
            let io = SimulationIoHandler::new();
            let (kernel, commands, events) = Kernel::new(io);
            (commands, events, tokio::spawn(kernel.run()))
        } else {
            match &self.transport {
                TransportConfig::LbServer { host, port } => {
                    let io = LbServerIoHandler::<LnMessage>::new(host.clone(), *port);
                    let (kernel, commands, events) = Kernel::new(io);
                    (commands, events, tokio::spawn(kernel.run()))
                }
                TransportConfig::Simulator => unreachable!(),
            }
        };

        self.commands = Some(commands);
        self.events = Some(events);
        self.kernel_task = Some(task);
        self.state = InterfaceState::Online;
        true
    }

    async fn shut_down(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(KernelCommand::Stop).await;
        }
        if let Some(task) = self.kernel_task.take() {
            let _ = task.await;
        }
        self.events = None;
    }

    /// The next event the kernel raised, or `None` once the interface
    /// goes offline.
    pub async fn next_event(&mut self) -> Option<KernelEvent> {
        self.events.as_mut()?.recv().await
    }

    /// World event `PowerOn`/`PowerOff` (spec §4.4).
    pub async fn set_power_on(&self, on: bool) {
        self.send(KernelCommand::SetPowerOn(on)).await;
    }

    /// World event `Stop` (spec §4.4).
    pub async fn emergency_stop(&self) {
        self.send(KernelCommand::EmergencyStop).await;
    }

    /// World event `Run` (spec §4.4).
    pub async fn resume(&self) {
        self.send(KernelCommand::Resume).await;
    }

    /// `kernel.lncvStart(moduleId, broadcast)` (spec §4.3.4/§8 scenario 3).
    pub async fn lncv_start(&self, module_id: u16, module_address: u16) {
        self.send(KernelCommand::LncvStart { module_id, module_address }).await;
    }

    pub async fn lncv_read(&self, module_id: u16, lncv: u16) {
        self.send(KernelCommand::LncvRead { module_id, lncv }).await;
    }

    pub async fn lncv_write(&self, module_id: u16, lncv: u16, value: u16) {
        self.send(KernelCommand::LncvWrite { module_id, lncv, value }).await;
    }

    pub async fn lncv_stop(&self) {
        self.send(KernelCommand::LncvStop).await;
    }

    /// `Clock::attach` binding to this interface's fast-clock mirror
    /// (spec §4.3.3).
    pub async fn attach_clock(&self, multiplier: u8, hour: u8, minute: u8) {
        self.send(KernelCommand::AttachClock { multiplier, hour, minute }).await;
    }

    pub async fn set_clock(&self, multiplier: u8, hour: u8, minute: u8) {
        self.send(KernelCommand::SetClock { multiplier, hour, minute }).await;
    }

    pub async fn detach_clock(&self) {
        self.send(KernelCommand::DetachClock).await;
    }

    async fn send(&self, command: KernelCommand) {
        if let Some(tx) = &self.commands {
            let _ = tx.send(command).await;
        }
    }
}

fn function_group(decoder: &Decoder, lo: u8, hi: u8) -> [bool; 4] {
    let mut out = [false; 4];
    for (i, n) in (lo..=hi).enumerate() {
        out[i] = decoder.function(n).unwrap_or(false);
    }
    out
}

impl DecoderController for Interface {
    fn decoder_protocols(&self) -> &[Protocol] {
        &[Protocol::LocoNet]
    }

    fn decoder_address_min_max(&self, protocol: Protocol) -> (u16, u16) {
        match protocol {
            Protocol::LocoNet => (1, 9999),
            Protocol::XpressNet => (1, 9999),
        }
    }

    /// Translates a logical change into the wire message family spec
    /// §4.3.5 names, addressed lazily through
    /// [`KernelCommand::SendForAddress`] so the kernel resolves the
    /// slot if it isn't known yet.
    fn decoder_changed(&self, decoder: &Decoder, changes: DecoderChanges, function_number: Option<u8>) {
        let Some(tx) = &self.commands else { return };
        let address = decoder.address;

        if changes.intersects(DecoderChanges::THROTTLE | DecoderChanges::EMERGENCY_STOP) {
            let speed = crate::decoder::throttle_to_speed_step(decoder.throttle(), decoder.emergency_stop());
            let _ = tx.try_send(KernelCommand::SendForAddress(address, LnMessage::loco_spd(0, speed)));
        }

        let touches_group1 = changes.contains(DecoderChanges::DIRECTION)
            || matches!(function_number, Some(n) if n <= 4);
        if touches_group1 {
            let direction = match decoder.direction() {
                DecoderDirection::Reverse => LnDirection::Reverse,
                _ => LnDirection::Forward,
            };
            let f = function_group(decoder, 0, 4);
            let _ = tx.try_send(KernelCommand::SendForAddress(address, LnMessage::loco_dirf(0, direction, f)));
        }

        if matches!(function_number, Some(n) if (5..=8).contains(&n)) {
            let f = function_group(decoder, 5, 8);
            let _ = tx.try_send(KernelCommand::SendForAddress(address, LnMessage::loco_snd(0, f)));
        }

        if matches!(function_number, Some(n) if (9..=12).contains(&n)) {
            let f = function_group(decoder, 9, 12);
            let _ = tx.try_send(KernelCommand::SendForAddress(address, LnMessage::loco_f9f12(0, f)));
        }

        if let Some(n) = function_number {
            if (13..=28).contains(&n) {
                let base = if n <= 20 { 13 } else { 21 };
                let mut bits = 0u8;
                for (i, f) in (base..base + 8).enumerate() {
                    if decoder.function(f).unwrap_or(false) {
                        bits |= 1 << i;
                    }
                }
                let _ = tx.try_send(KernelCommand::SendForAddress(
                    address,
                    LnMessage::LocoFnGroup { slot: 0, base_function: base, bits },
                ));
            }
        }
    }
}

impl OutputController for Interface {
    /// `setOutput(channel, address, value)` (spec §4.3.6), addressed
    /// straight through since outputs don't need slot resolution the
    /// way decoders do.
    fn output_changed(&self, output: &Output) {
        let Some(tx) = &self.commands else { return };
        let (channel, value) = (output.channel, output.value());
        let _ = tx.try_send(KernelCommand::SetOutput { address: output.address, channel, value });
    }
}

/// `try_send` to a priority queue other than Normal, for callers (e.g.
/// global power, emergency stop) that want a non-default tier. Kept
/// separate from [`DecoderController::decoder_changed`] since decoder
/// traffic is always Normal priority in this kernel (spec §4.3.1 gives
/// priority only to power/e-stop/slot-acquisition control frames).
pub async fn send_priority(tx: &mpsc::Sender<KernelCommand>, message: LnMessage, priority: Priority) {
    let _ = tx.send(KernelCommand::Send(message, priority)).await;
}
