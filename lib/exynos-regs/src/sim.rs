// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory register file with just enough hardware behavior to exercise
//! the sequencing code.

use std::sync::Arc;

use spin::Mutex;

use crate::{Reg, RegisterFile, RegisterMap};

/// Called after every software write, with the register and the value
/// written.
pub type WriteObserver = Arc<dyn Fn(Reg, u32) + Send + Sync>;

/// A register file backed by memory.
///
/// Registers start at their `reset` value. Status registers can be
/// [linked](SimRegisterFile::link) to a control register, in which case they
/// follow what software writes there after a configurable number of reads;
/// a status register that is not linked never changes on its own, which is
/// how a wedged power domain is modelled.
pub struct SimRegisterFile {
    map: RegisterMap,
    state: Mutex<SimState>,
    observer: Mutex<Option<WriteObserver>>,
}

struct SimState {
    values: Vec<u32>,
    reads: Vec<u64>,
    writes: Vec<u64>,
    links: Vec<Link>,
}

struct Link {
    ctrl: Reg,
    status: Reg,
    mask: u32,
    settle_reads: u32,
    /// Value the status field is heading to, and reads left until it gets
    /// there.
    pending: Option<(u32, u32)>,
}

impl SimRegisterFile {
    pub fn new(map: RegisterMap) -> Self {
        let values = map.map.values().map(|d| d.reset).collect::<Vec<_>>();
        let n = values.len();
        Self {
            map,
            state: Mutex::new(SimState {
                values,
                reads: vec![0; n],
                writes: vec![0; n],
                links: Vec::new(),
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Makes the `mask` field of `status` follow writes to the same field of
    /// `ctrl`. The new value becomes visible on the `settle_reads`-th read of
    /// `status` after the write; zero means immediately.
    ///
    /// Linking a status register again replaces its previous link.
    pub fn link(&self, ctrl: Reg, status: Reg, mask: u32, settle_reads: u32) {
        let mut st = self.state.lock();
        st.links.retain(|l| l.status != status);
        st.links.push(Link {
            ctrl,
            status,
            mask,
            settle_reads,
            pending: None,
        });
    }

    /// Removes any link driving `status`, leaving it stuck at its current
    /// value.
    pub fn unlink(&self, status: Reg) {
        self.state.lock().links.retain(|l| l.status != status);
    }

    /// Sets a register from the hardware side: no write is counted and no
    /// link or observer fires.
    pub fn poke(&self, reg: Reg, value: u32) {
        if let Some(v) = self.state.lock().values.get_mut(reg.index()) {
            *v = value;
        }
    }

    /// Reads a register without counting the access or advancing any link.
    pub fn peek(&self, reg: Reg) -> u32 {
        self.state
            .lock()
            .values
            .get(reg.index())
            .copied()
            .unwrap_or(0)
    }

    pub fn reads(&self, reg: Reg) -> u64 {
        self.state.lock().reads.get(reg.index()).copied().unwrap_or(0)
    }

    pub fn writes(&self, reg: Reg) -> u64 {
        self.state.lock().writes.get(reg.index()).copied().unwrap_or(0)
    }

    pub fn set_observer(&self, observer: Option<WriteObserver>) {
        *self.observer.lock() = observer;
    }
}

impl SimState {
    fn store(&mut self, reg: Reg, value: u32) {
        if let Some(v) = self.values.get_mut(reg.index()) {
            *v = value;
        }
    }

    fn load(&self, reg: Reg) -> u32 {
        self.values.get(reg.index()).copied().unwrap_or(0)
    }
}

impl RegisterFile for SimRegisterFile {
    fn resolve(&self, name: &str) -> Option<Reg> {
        self.map.resolve(name)
    }

    fn name(&self, reg: Reg) -> &str {
        self.map.name(reg).unwrap_or("?")
    }

    fn read(&self, reg: Reg) -> u32 {
        let mut st = self.state.lock();
        if let Some(r) = st.reads.get_mut(reg.index()) {
            *r += 1;
        }

        let mut settled = None;
        for link in st.links.iter_mut().filter(|l| l.status == reg) {
            if let Some((target, left)) = link.pending {
                let left = left.saturating_sub(1);
                if left == 0 {
                    link.pending = None;
                    settled = Some((link.mask, target));
                } else {
                    link.pending = Some((target, left));
                }
            }
        }
        if let Some((mask, target)) = settled {
            let v = st.load(reg);
            st.store(reg, (v & !mask) | target);
        }

        st.load(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        {
            let mut st = self.state.lock();
            if let Some(w) = st.writes.get_mut(reg.index()) {
                *w += 1;
            }
            st.store(reg, value);

            let mut immediate = Vec::new();
            for link in st.links.iter_mut().filter(|l| l.ctrl == reg) {
                let target = value & link.mask;
                if link.settle_reads == 0 {
                    link.pending = None;
                    immediate.push((link.status, link.mask, target));
                } else {
                    link.pending = Some((target, link.settle_reads));
                }
            }
            for (status, mask, target) in immediate {
                let v = st.load(status);
                st.store(status, (v & !mask) | target);
            }
        }

        // Run the observer outside the register lock so it may read
        // registers itself.
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer(reg, value);
        }
    }
}
