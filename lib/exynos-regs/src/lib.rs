// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register access for the Exynos power-management unit.
//!
//! Everything above this crate talks to hardware through the
//! [`RegisterFile`] trait: 32-bit registers addressed by symbolic name. Names
//! are resolved to [`Reg`] handles once, when a driver is configured, so that
//! a typo in a board file is a [`MappingFailure`] at init and never a silent
//! misread at runtime.
//!
//! The crate also carries the two pieces of plumbing every sequencing loop
//! needs: a [`Timebase`] (so the loops can be driven by virtual time in
//! tests and in the simulator) and [`poll_until`], the one bounded polling
//! loop everything uses.

mod map;
mod poll;
mod sim;
mod time;

pub use map::{MappingFailure, RegDesc, RegisterMap};
pub use poll::{poll_until, PollBudget, PollOutcome};
pub use sim::{SimRegisterFile, WriteObserver};
pub use time::{SystemTimebase, Timebase, VirtualTimebase};

/// Handle to a register that has been resolved against a [`RegisterMap`].
///
/// Handles are only meaningful for the register file that produced them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u16);

impl Reg {
    pub(crate) fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// A bank of 32-bit registers, standing in for a memory-mapped IP block.
///
/// Accesses have no error conditions: the hardware never faults, and every
/// `Reg` was validated when it was resolved. Writers are expected to be
/// serialized by whoever owns the block; the trait itself only promises that
/// each individual access is atomic.
pub trait RegisterFile: Send + Sync {
    /// Looks up a register by name.
    fn resolve(&self, name: &str) -> Option<Reg>;

    /// Returns the symbolic name of `reg`.
    fn name(&self, reg: Reg) -> &str;

    fn read(&self, reg: Reg) -> u32;

    fn write(&self, reg: Reg, value: u32);

    /// Resolves `name`, failing with [`MappingFailure::UnknownRegister`].
    fn require(&self, name: &str) -> Result<Reg, MappingFailure> {
        self.resolve(name)
            .ok_or_else(|| MappingFailure::UnknownRegister(name.to_string()))
    }

    /// Read-modify-write: ORs `mask` into `reg`.
    fn set_bits(&self, reg: Reg, mask: u32) {
        let v = self.read(reg);
        self.write(reg, v | mask);
    }

    /// Read-modify-write: clears the bits of `mask` in `reg`.
    fn clear_bits(&self, reg: Reg, mask: u32) {
        let v = self.read(reg);
        self.write(reg, v & !mask);
    }

    /// Read-modify-write: replaces the bits of `mask` in `reg` with the
    /// corresponding bits of `value`.
    fn modify(&self, reg: Reg, mask: u32, value: u32) {
        let v = self.read(reg);
        self.write(reg, (v & !mask) | (value & mask));
    }
}
