// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated SoC assembled from a board file.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use drv_exynos_cpuidle::{
    CpuOps, IdleStateMachine, SuspendOutcome, SuspendTarget,
};
use drv_exynos_pd::{
    CallbackTable, DomainController, PowerDomains, SecureMonitor, SmcCommand,
    SmcError,
};
use exynos_regs::{Reg, RegisterFile, SimRegisterFile, VirtualTimebase};

use crate::board::BoardConfig;

pub struct Soc {
    pub regs: Arc<SimRegisterFile>,
    pub timebase: Arc<VirtualTimebase>,
    pub monitor: Arc<SimMonitor>,
    pub cpu: Arc<SimCpu>,
    pub controller: Arc<DomainController>,
    pub domains: PowerDomains,
    pub idle: IdleStateMachine,
}

impl Soc {
    pub fn build(board: &BoardConfig) -> Result<Self> {
        let regs = Arc::new(SimRegisterFile::new(board.registers.clone()));
        let timebase = Arc::new(VirtualTimebase::new());

        for (name, pd) in &board.domains {
            let (Some(ctrl), Some(status)) = (&pd.ctrl, &pd.status) else {
                continue;
            };
            if board.sim.stuck.contains(name) {
                continue;
            }
            regs.link(
                regs.require(ctrl)?,
                regs.require(status)?,
                pd.mask,
                board.settle_reads(name),
            );
        }
        let idle = &board.idle;
        for (ctrl, status) in idle.core_config.iter().zip(&idle.core_status) {
            regs.link(
                regs.require(ctrl)?,
                regs.require(status)?,
                idle.local_pwr_value,
                board.sim.core_settle_reads,
            );
        }

        let callbacks = CallbackTable::from_config(&*regs, &board.callbacks)?;
        let domains =
            PowerDomains::build(regs.clone(), &board.domains, callbacks)?;

        let monitor = Arc::new(SimMonitor::default());
        let controller = Arc::new(
            DomainController::new(timebase.clone(), board.budget)
                .with_secure_monitor(monitor.clone()),
        );

        let lowpwr = 1u32
            .checked_shl(idle.sequencer.lowpwr_bit)
            .context("low-power bit out of range")?;
        let cpu = Arc::new(SimCpu {
            regs: regs.clone(),
            timebase: timebase.clone(),
            sequencer: regs.require(&idle.sequencer.reg)?,
            lowpwr,
            wakeup_stat: regs.require(&idle.wakeup_stat)?,
            wake_stat: board.sim.wake_stat,
            sleep_us: AtomicU64::new(0),
            abort: AtomicBool::new(false),
        });

        let machine = IdleStateMachine::build(
            regs.clone(),
            timebase.clone(),
            board.budget,
            cpu.clone(),
            controller.clone(),
            &domains,
            idle,
        )?;

        Ok(Self {
            regs,
            timebase,
            monitor,
            cpu,
            controller,
            domains,
            idle: machine,
        })
    }
}

/// CPU back end: sleeps by advancing the virtual clock, and plays the part
/// of the power sequencer on a system-wide wake.
pub struct SimCpu {
    regs: Arc<SimRegisterFile>,
    timebase: Arc<VirtualTimebase>,
    sequencer: Reg,
    lowpwr: u32,
    wakeup_stat: Reg,
    wake_stat: u32,
    sleep_us: AtomicU64,
    abort: AtomicBool,
}

impl SimCpu {
    /// How long the next idle period lasts before something wakes the CPU.
    pub fn set_sleep(&self, us: u64) {
        self.sleep_us.store(us, Ordering::Relaxed);
    }

    /// Makes every suspend attempt fail, as if an interrupt were already
    /// pending.
    pub fn set_abort(&self, abort: bool) {
        self.abort.store(abort, Ordering::Relaxed);
    }
}

impl CpuOps for SimCpu {
    fn wfi(&self, _cpu: usize) {
        self.timebase.advance(self.sleep_us.load(Ordering::Relaxed));
    }

    fn suspend(&self, _cpu: usize, target: SuspendTarget) -> SuspendOutcome {
        if self.abort.load(Ordering::Relaxed) {
            return SuspendOutcome::Aborted;
        }
        self.timebase.advance(self.sleep_us.load(Ordering::Relaxed));
        if let SuspendTarget::SystemOff(_) = target {
            self.regs.set_bits(self.sequencer, self.lowpwr);
            self.regs.poke(self.wakeup_stat, self.wake_stat);
        }
        SuspendOutcome::Resumed
    }
}

/// Secure monitor that logs every call and optionally refuses them.
#[derive(Default)]
pub struct SimMonitor {
    calls: Mutex<Vec<(SmcCommand, u32)>>,
    deny: AtomicBool,
}

impl SimMonitor {
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::Relaxed);
    }

    pub fn calls(&self) -> Vec<(SmcCommand, u32)> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl SecureMonitor for SimMonitor {
    fn call(&self, cmd: SmcCommand, arg: u32) -> Result<(), SmcError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((cmd, arg));
        if self.deny.load(Ordering::Relaxed) {
            return Err(SmcError::Denied);
        }
        Ok(())
    }
}
