//! Logical accessory/aspect endpoint (spec §3 "Output", §4.3.6),
//! grounded in `original_source/server/src/hardware/protocol/loconet/
//! kernel.hpp`'s `OutputPairValue`/`OutputController` forward
//! declarations and `.../hardware/protocol/loconet/
//! loconetoutputkeyboard.cpp`'s address-mapped `SwitchRequest` sends.

use crate::ids::{InterfaceId, OutputId};

/// Which wire channel an output is addressed through (spec §4.3.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    /// `SwitchRequest(address, dir, on)` pulse pairs.
    Accessory,
    /// `IMM_PACKET` extended-accessory aspect byte.
    DccExt,
}

/// Channel-specific output value (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputValue {
    OnOff(bool),
    Aspect(u8),
    DccExt(u8),
}

/// Binds an [`Output`] to the interface that drives it, mirroring
/// [`crate::decoder::DecoderController`]. Implemented by
/// [`crate::interface::Interface`].
pub trait OutputController {
    fn output_changed(&self, output: &Output);
}

#[derive(Debug, Clone)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub interface: Option<InterfaceId>,
    pub channel: OutputChannel,
    pub address: u16,
    value: OutputValue,
}

impl Output {
    pub fn new(name: impl Into<String>, channel: OutputChannel, address: u16) -> Self {
        let value = match channel {
            OutputChannel::Accessory => OutputValue::OnOff(false),
            OutputChannel::DccExt => OutputValue::DccExt(0),
        };
        Self { id: OutputId::new(), name: name.into(), interface: None, channel, address, value }
    }

    pub fn value(&self) -> OutputValue {
        self.value
    }

    pub fn set_value(&mut self, value: OutputValue) {
        self.value = value;
    }
}
