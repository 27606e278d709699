//! Track-segment reservation state machine (spec §3 "Block", §4.7),
//! grounded in `original_source/server/src/train/trainblockstatus.cpp`'s
//! occupancy state transitions, generalized from a tile-bound type to a
//! plain arena object addressed by [`BlockId`].

use crate::ids::{BlockId, TrainId, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Unknown,
    Free,
    Reserved,
    Occupied,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainBlockStatus {
    pub train: TrainId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEvent {
    Reserved { train: TrainId },
    Entered { train: TrainId },
    Left { train: TrainId },
    Removed { train: TrainId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    NotFree,
    NotReservedByTrain,
    NotOccupied,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    state: BlockState,
    trains: Vec<TrainBlockStatus>,
    pub zones: Vec<ZoneId>,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(),
            name: name.into(),
            state: BlockState::Unknown,
            trains: Vec::new(),
            zones: Vec::new(),
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn trains(&self) -> &[TrainBlockStatus] {
        &self.trains
    }

    pub fn set_state_free(&mut self) {
        self.state = BlockState::Free;
    }

    /// `Free --assignTrain(t)--> Reserved` (spec §4.7).
    pub fn assign_train(&mut self, train: TrainId) -> Result<BlockEvent, BlockError> {
        if self.state != BlockState::Free {
            return Err(BlockError::NotFree);
        }
        self.state = BlockState::Reserved;
        self.trains.push(TrainBlockStatus { train });
        Ok(BlockEvent::Reserved { train })
    }

    /// `Reserved --(sensor reports)--> Occupied` (spec §4.7).
    pub fn train_entered(&mut self, train: TrainId) -> Result<BlockEvent, BlockError> {
        if self.state != BlockState::Reserved || !self.trains.iter().any(|t| t.train == train) {
            return Err(BlockError::NotReservedByTrain);
        }
        self.state = BlockState::Occupied;
        Ok(BlockEvent::Entered { train })
    }

    /// `Occupied --(sensor clears)--> Free` (spec §4.7).
    pub fn train_left(&mut self, train: TrainId) -> Result<BlockEvent, BlockError> {
        if self.state != BlockState::Occupied {
            return Err(BlockError::NotOccupied);
        }
        self.trains.retain(|t| t.train != train);
        self.state = BlockState::Free;
        Ok(BlockEvent::Left { train })
    }

    /// `any --removeTrain(t)--> previous state without t` (spec §4.7).
    pub fn remove_train(&mut self, train: TrainId) -> Option<BlockEvent> {
        let had = self.trains.iter().any(|t| t.train == train);
        if !had {
            return None;
        }
        self.trains.retain(|t| t.train != train);
        if self.trains.is_empty() {
            self.state = BlockState::Free;
        }
        Some(BlockEvent::Removed { train })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_matches_diagram() {
        let mut block = Block::new("B1");
        block.set_state_free();
        let train = TrainId::new();

        assert_eq!(block.assign_train(train), Ok(BlockEvent::Reserved { train }));
        assert_eq!(block.state(), BlockState::Reserved);

        assert_eq!(block.train_entered(train), Ok(BlockEvent::Entered { train }));
        assert_eq!(block.state(), BlockState::Occupied);

        assert_eq!(block.train_left(train), Ok(BlockEvent::Left { train }));
        assert_eq!(block.state(), BlockState::Free);
        assert!(block.trains().is_empty());
    }

    #[test]
    fn assigning_an_already_reserved_block_fails() {
        let mut block = Block::new("B1");
        block.set_state_free();
        block.assign_train(TrainId::new()).unwrap();
        assert_eq!(block.assign_train(TrainId::new()), Err(BlockError::NotFree));
    }
}
