//! Virtual Stack Management
//!
//! Maps every position of the abstract stack to a physical location chosen
//! at compile time. Positions are renamed rather than moved: `swap` exchanges
//! two entries and `pop` releases one, neither emits code.
//!
//! Registers are handed out before frame slots. Freed locations are reused
//! most-recently-freed first, so a register is only taken once every register
//! before it in the pool is live. That bounds the callee-saved registers a
//! program can touch by its maximum stack depth.

use super::CodeGenError;
use super::x86_64::Reg;

/// Where an abstract stack value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Location {
    Reg(Reg),
    /// Index of an 8-byte frame slot.
    Slot(u32),
}

pub(super) struct VirtualStack {
    /// Location of each abstract position, bottom first.
    positions: Vec<Location>,
    /// Free registers; the next allocation takes the last one.
    free_regs: Vec<Reg>,
    free_slots: Vec<u32>,
    next_slot: u32,
    slot_limit: u32,
}

impl VirtualStack {
    /// `pool` lists usable registers in preference order; at most
    /// `slot_limit` distinct frame slots may be created.
    pub(super) fn new(pool: &[Reg], slot_limit: u32) -> Self {
        VirtualStack {
            positions: Vec::new(),
            free_regs: pool.iter().rev().copied().collect(),
            free_slots: Vec::new(),
            next_slot: 0,
            slot_limit,
        }
    }

    pub(super) fn depth(&self) -> usize {
        self.positions.len()
    }

    /// Frame slots created so far.
    pub(super) fn slots_used(&self) -> u32 {
        self.next_slot
    }

    /// Claim a specific free register, e.g. the one an argument arrives in.
    pub(super) fn claim(&mut self, reg: Reg) -> bool {
        match self.free_regs.iter().position(|&r| r == reg) {
            Some(at) => {
                self.free_regs.remove(at);
                true
            }
            None => false,
        }
    }

    /// Take a free location, preferring registers.
    pub(super) fn allocate(&mut self) -> Result<Location, CodeGenError> {
        if let Some(reg) = self.free_regs.pop() {
            return Ok(Location::Reg(reg));
        }
        if let Some(slot) = self.free_slots.pop() {
            return Ok(Location::Slot(slot));
        }
        if self.next_slot >= self.slot_limit {
            return Err(CodeGenError::FrameExhausted {
                limit: self.slot_limit,
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(Location::Slot(slot))
    }

    pub(super) fn release(&mut self, location: Location) {
        match location {
            Location::Reg(reg) => self.free_regs.push(reg),
            Location::Slot(slot) => self.free_slots.push(slot),
        }
    }

    pub(super) fn push(&mut self, location: Location) {
        self.positions.push(location);
    }

    pub(super) fn pop(&mut self) -> Result<Location, CodeGenError> {
        self.positions
            .pop()
            .ok_or_else(|| CodeGenError::Logic("pop from an empty virtual stack".to_string()))
    }

    /// Location `index` positions below the top.
    pub(super) fn peek(&self, index: usize) -> Result<Location, CodeGenError> {
        index
            .checked_add(1)
            .and_then(|needed| self.positions.len().checked_sub(needed))
            .map(|at| self.positions[at])
            .ok_or_else(|| {
                CodeGenError::Logic(format!(
                    "index {} out of range for virtual stack of depth {}",
                    index,
                    self.positions.len()
                ))
            })
    }

    /// Rebind the top position to another location.
    pub(super) fn replace_top(&mut self, location: Location) -> Result<(), CodeGenError> {
        match self.positions.last_mut() {
            Some(top) => {
                *top = location;
                Ok(())
            }
            None => Err(CodeGenError::Logic(
                "replace on an empty virtual stack".to_string(),
            )),
        }
    }

    pub(super) fn swap_top(&mut self) -> Result<(), CodeGenError> {
        let len = self.positions.len();
        if len < 2 {
            return Err(CodeGenError::Logic(format!(
                "swap on virtual stack of depth {}",
                len
            )));
        }
        self.positions.swap(len - 1, len - 2);
        Ok(())
    }

    /// Live values held in registers a call may clobber, bottom first.
    pub(super) fn live_caller_saved(&self) -> Vec<Reg> {
        self.positions
            .iter()
            .filter_map(|location| match location {
                Location::Reg(reg) if !reg.is_callee_saved() => Some(*reg),
                _ => None,
            })
            .collect()
    }
}
