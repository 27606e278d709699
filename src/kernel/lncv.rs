//! LNCV programming session state machine (spec §4.3.4), grounded in
//! `original_source/.../loconet/kernel.hpp`'s `m_lncvActive` /
//! `m_lncvModuleId` / `m_lncvModuleAddress` / `OnLNCVReadResponse` trio.

use crate::error::LncvError;
use crate::message::loconet::LncvPayload;

#[derive(Debug, Clone, Copy)]
pub struct LncvSession {
    pub module_id: u16,
    pub module_address: u16,
}

#[derive(Default)]
pub struct LncvState {
    active: Option<LncvSession>,
}

impl LncvState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self, module_id: u16, module_address: u16) -> Result<LncvPayload, LncvError> {
        if self.active.is_some() {
            return Err(LncvError::SessionActive);
        }
        self.active = Some(LncvSession { module_id, module_address });
        Ok(LncvPayload::Start { module_id, module_address })
    }

    pub fn read(&self, lncv: u16) -> Result<LncvPayload, LncvError> {
        let session = self.active.ok_or(LncvError::NoSession)?;
        Ok(LncvPayload::Read { module_id: session.module_id, lncv })
    }

    pub fn write(&self, lncv: u16, value: u16) -> Result<LncvPayload, LncvError> {
        let session = self.active.ok_or(LncvError::NoSession)?;
        Ok(LncvPayload::Write { module_id: session.module_id, lncv, value })
    }

    pub fn stop(&mut self) -> Result<LncvPayload, LncvError> {
        let session = self.active.take().ok_or(LncvError::NoSession)?;
        Ok(LncvPayload::Stop { module_id: session.module_id, module_address: session.module_address })
    }

    pub fn matches(&self, module_id: u16) -> bool {
        self.active.map(|s| s.module_id == module_id).unwrap_or(false)
    }
}
