// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exynos power-domain driver.
//!
//! A [`PowerDomain`] is a hardware-gateable block of the SoC with a control
//! register (write the on-value to power up, zero to power down), a status
//! register that follows it some time later, and four ordered hook lists run
//! around each transition. The [`DomainController`] drives transitions:
//!
//! ```text
//! power_on:   on_pre hooks -> write ctrl -> poll status -> [SMC restore] -> on_post hooks
//! power_off:  off_pre hooks -> [SMC save] -> write ctrl -> poll status -> off_post hooks
//! ```
//!
//! A transition whose status poll runs out of budget is reported as
//! [`PdError::Timeout`] and is not retried: the post hooks do not run, and
//! the domain's recorded status is whatever the status register last read.
//! Retrying is the caller's business.
//!
//! A power-on whose secure restore fails leaves the domain powered with the
//! restore still owed. The next `power_on` sees the domain already on and,
//! instead of reporting no change, retries the restore and then runs the
//! `on_post` hooks.
//!
//! Each domain has its own access lock, so different domains may be
//! transitioned concurrently, but two transitions of one domain never
//! overlap.

mod config;
mod hooks;
mod secure;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use enum_kinds::EnumKind;
use enum_map::Enum;
use indexmap::IndexMap;
use pm_trace::{count_entry, CountedRingbuf, RingbufEntry};

pub use config::{CallbackConfig, DomainConfig, HookConfig};
pub use drv_exynos_pm_api::{
    ConfigError, PdError, PowerStatus, RegSnapshot, SmcCommand, SmcError,
    Transition, TransitionFlags,
};
use exynos_regs::{
    poll_until, MappingFailure, PollBudget, Reg, RegisterFile, Timebase,
};
pub use hooks::{CallbackTable, HookChain, HookContext, HookPhase, PdHook, RegHook};
pub use secure::SecureMonitor;

const TRACE_DEPTH: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, EnumKind)]
#[enum_kind(TraceKind, derive(Enum))]
pub enum Trace {
    None,
    PowerOn(TransitionFlags),
    PowerOff(TransitionFlags),
    /// Status already matched the request.
    NoChange(PowerStatus),
    CtrlWrite(u32),
    PollDone { polls: u32, elapsed_us: u64 },
    /// The poll succeeded but took more than half of its budget.
    LongDelay { polls: u32, elapsed_us: u64 },
    Timeout {
        polls: u32,
        elapsed_us: u64,
        snapshot: RegSnapshot,
    },
    Secure(SmcCommand),
    SecureFailed(SmcCommand, SmcError),
    /// A domain without registers changed its software status.
    Registerless(PowerStatus),
    /// The domain is already on but its last secure restore failed.
    RestoreRetry,
}

/// Register handles of a domain that has hardware behind it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DomainRegs {
    pub ctrl: Reg,
    pub status: Reg,
    pub mask: u32,
    pub on_value: u32,
}

pub struct PowerDomain {
    name: String,
    id: u32,
    regs_file: Arc<dyn RegisterFile>,
    regs: Option<DomainRegs>,
    secure: bool,
    hooks: HookChain,
    state: Mutex<DomainState>,
}

struct DomainState {
    status: PowerStatus,
    snapshot: RegSnapshot,
    /// Set when the domain powered up but the secure restore after it
    /// failed. Cleared by a successful restore or by a power-off.
    restore_pending: bool,
    trace: CountedRingbuf<Trace, TraceKind, TRACE_DEPTH>,
}

impl PowerDomain {
    /// Creates a domain. If `regs` is present its current status is read
    /// once to seed the recorded status; a register-less domain starts off.
    pub fn new(
        name: &str,
        id: u32,
        regs_file: Arc<dyn RegisterFile>,
        regs: Option<DomainRegs>,
        secure: bool,
        hooks: HookChain,
    ) -> Self {
        let (status, snapshot) = match regs {
            Some(r) => {
                let raw = regs_file.read(r.status);
                let ctrl = regs_file.read(r.ctrl);
                (
                    PowerStatus::decode(raw, r.mask, r.on_value),
                    RegSnapshot { ctrl, status: raw },
                )
            }
            None => (PowerStatus::Off, RegSnapshot::default()),
        };
        Self {
            name: name.to_string(),
            id,
            regs_file,
            regs,
            secure,
            hooks,
            state: Mutex::new(DomainState {
                status,
                snapshot,
                restore_pending: false,
                trace: CountedRingbuf::new(Trace::None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn registers(&self) -> Option<DomainRegs> {
        self.regs
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Status as of the last register read (or software update, for a
    /// register-less domain). Use [`DomainController::status`] for a fresh
    /// read.
    pub fn recorded_status(&self) -> PowerStatus {
        self.lock().status
    }

    /// True if the domain is powered but still owes a secure restore; the
    /// next [`DomainController::power_on`] retries it.
    pub fn restore_pending(&self) -> bool {
        self.lock().restore_pending
    }

    /// Control/status values as last read or written.
    pub fn snapshot(&self) -> RegSnapshot {
        self.lock().snapshot
    }

    /// Recent trace entries, oldest first.
    pub fn trace_snapshot(&self) -> Vec<RingbufEntry<Trace>> {
        self.lock().trace.ring().snapshot()
    }

    /// How many events of `kind` this domain has recorded, ever.
    pub fn count(&self, kind: TraceKind) -> u32 {
        self.lock().trace.count(kind)
    }

    fn lock(&self) -> MutexGuard<'_, DomainState> {
        // A hook that panicked leaves nothing half-written in DomainState
        // that later transitions depend on.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_hooks(&self, phase: HookPhase) {
        self.hooks.run(&HookContext {
            domain: &self.name,
            phase,
            regs: &*self.regs_file,
        });
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    On,
    Off,
}

impl Direction {
    fn target(self) -> PowerStatus {
        match self {
            Direction::On => PowerStatus::On,
            Direction::Off => PowerStatus::Off,
        }
    }

    fn phases(self) -> (HookPhase, HookPhase) {
        match self {
            Direction::On => (HookPhase::OnPre, HookPhase::OnPost),
            Direction::Off => (HookPhase::OffPre, HookPhase::OffPost),
        }
    }
}

/// Drives power transitions. The controller itself holds no per-domain
/// state: only the timing budget, the clock, and an optional secure
/// monitor.
pub struct DomainController {
    timebase: Arc<dyn Timebase>,
    budget: PollBudget,
    monitor: Option<Arc<dyn SecureMonitor>>,
}

impl DomainController {
    pub fn new(timebase: Arc<dyn Timebase>, budget: PollBudget) -> Self {
        Self {
            timebase,
            budget,
            monitor: None,
        }
    }

    pub fn with_secure_monitor(mut self, monitor: Arc<dyn SecureMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn budget(&self) -> &PollBudget {
        &self.budget
    }

    pub fn power_on(
        &self,
        pd: &PowerDomain,
        flags: TransitionFlags,
    ) -> Result<Transition, PdError> {
        self.transition(pd, Direction::On, flags)
    }

    pub fn power_off(
        &self,
        pd: &PowerDomain,
        flags: TransitionFlags,
    ) -> Result<Transition, PdError> {
        self.transition(pd, Direction::Off, flags)
    }

    pub fn power_on_named(
        &self,
        domains: &PowerDomains,
        name: &str,
        flags: TransitionFlags,
    ) -> Result<Transition, PdError> {
        let pd = domains.get(name).ok_or(PdError::NoSuchDomain)?;
        self.power_on(pd, flags)
    }

    pub fn power_off_named(
        &self,
        domains: &PowerDomains,
        name: &str,
        flags: TransitionFlags,
    ) -> Result<Transition, PdError> {
        let pd = domains.get(name).ok_or(PdError::NoSuchDomain)?;
        self.power_off(pd, flags)
    }

    /// Re-reads the domain's status register and records what it says.
    pub fn status(&self, pd: &PowerDomain) -> PowerStatus {
        let mut st = pd.lock();
        if let Some(r) = pd.regs {
            let raw = pd.regs_file.read(r.status);
            st.status = PowerStatus::decode(raw, r.mask, r.on_value);
            st.snapshot.status = raw;
        }
        st.status
    }

    pub fn is_on(&self, pd: &PowerDomain) -> bool {
        self.status(pd) == PowerStatus::On
    }

    fn transition(
        &self,
        pd: &PowerDomain,
        dir: Direction,
        flags: TransitionFlags,
    ) -> Result<Transition, PdError> {
        let mut st = pd.lock();
        count_entry!(
            st.trace,
            match dir {
                Direction::On => Trace::PowerOn(flags),
                Direction::Off => Trace::PowerOff(flags),
            }
        );

        let (pre, post) = dir.phases();
        let target = dir.target();

        let Some(r) = pd.regs else {
            // No registers behind this domain: still run the hooks in order,
            // since clocks and resets hanging off it depend on that.
            if st.status == target && !flags.contains(TransitionFlags::FORCE) {
                count_entry!(st.trace, Trace::NoChange(target));
                return Ok(Transition::NoChange);
            }
            pd.run_hooks(pre);
            pd.run_hooks(post);
            st.status = target;
            count_entry!(st.trace, Trace::Registerless(target));
            return Ok(Transition::Done {
                polls: 0,
                elapsed_us: 0,
                long_delay: false,
            });
        };

        let regs = &*pd.regs_file;
        let raw = regs.read(r.status);
        st.status = PowerStatus::decode(raw, r.mask, r.on_value);
        st.snapshot.status = raw;
        if st.status == target && !flags.contains(TransitionFlags::FORCE) {
            if dir == Direction::On && st.restore_pending {
                count_entry!(st.trace, Trace::RestoreRetry);
                self.secure_call(pd, &mut st, SmcCommand::PdRestore, flags)?;
                st.restore_pending = false;
                pd.run_hooks(post);
                return Ok(Transition::Done {
                    polls: 0,
                    elapsed_us: 0,
                    long_delay: false,
                });
            }
            count_entry!(st.trace, Trace::NoChange(target));
            return Ok(Transition::NoChange);
        }

        pd.run_hooks(pre);

        if dir == Direction::Off {
            self.secure_call(pd, &mut st, SmcCommand::PdSave, flags)?;
        }

        let (value, expected) = match dir {
            Direction::On => (r.on_value, r.on_value & r.mask),
            Direction::Off => (0, 0),
        };
        regs.write(r.ctrl, value);
        st.snapshot.ctrl = value;
        st.restore_pending = false;
        count_entry!(st.trace, Trace::CtrlWrite(value));

        let out = poll_until(
            regs,
            &*self.timebase,
            r.status,
            r.mask,
            expected,
            &self.budget,
        );
        st.status = PowerStatus::decode(out.last, r.mask, r.on_value);
        st.snapshot.status = out.last;

        if !out.matched {
            st.snapshot.ctrl = regs.read(r.ctrl);
            let snapshot = st.snapshot;
            count_entry!(
                st.trace,
                Trace::Timeout {
                    polls: out.polls,
                    elapsed_us: out.elapsed_us,
                    snapshot,
                }
            );
            return Err(PdError::Timeout {
                polls: out.polls,
                elapsed_us: out.elapsed_us,
                snapshot,
            });
        }
        count_entry!(
            st.trace,
            Trace::PollDone {
                polls: out.polls,
                elapsed_us: out.elapsed_us,
            }
        );

        if dir == Direction::On {
            if let Err(e) =
                self.secure_call(pd, &mut st, SmcCommand::PdRestore, flags)
            {
                st.restore_pending = true;
                return Err(e);
            }
        }

        pd.run_hooks(post);

        if out.long_delay {
            count_entry!(
                st.trace,
                Trace::LongDelay {
                    polls: out.polls,
                    elapsed_us: out.elapsed_us,
                }
            );
        }

        Ok(Transition::Done {
            polls: out.polls,
            elapsed_us: out.elapsed_us,
            long_delay: out.long_delay,
        })
    }

    fn secure_call(
        &self,
        pd: &PowerDomain,
        st: &mut DomainState,
        cmd: SmcCommand,
        flags: TransitionFlags,
    ) -> Result<(), PdError> {
        if !pd.secure || flags.contains(TransitionFlags::SKIP_SECURE) {
            return Ok(());
        }
        let Some(monitor) = &self.monitor else {
            return Ok(());
        };
        match monitor.call(cmd, pd.id) {
            Ok(()) => {
                count_entry!(st.trace, Trace::Secure(cmd));
                Ok(())
            }
            Err(e) => {
                count_entry!(st.trace, Trace::SecureFailed(cmd, e));
                Err(PdError::Secure(e))
            }
        }
    }
}

/// All power domains of a board, in declaration order.
pub struct PowerDomains {
    domains: IndexMap<String, Arc<PowerDomain>>,
}

impl PowerDomains {
    /// Builds every configured domain, resolving its registers and taking its
    /// hook chain from `callbacks`.
    ///
    /// Fails if a register name does not resolve, if a domain has no entry
    /// in `callbacks`, or if `callbacks` has an entry for a domain that is
    /// not configured.
    pub fn build(
        regs_file: Arc<dyn RegisterFile>,
        configs: &IndexMap<String, DomainConfig>,
        mut callbacks: CallbackTable,
    ) -> Result<Self, ConfigError> {
        if let Some(orphan) = callbacks.names().find(|n| !configs.contains_key(*n)) {
            return Err(ConfigError::InvalidCallbackChain {
                domain: orphan.to_string(),
            });
        }

        let mut domains = IndexMap::new();
        for (id, (name, cfg)) in configs.iter().enumerate() {
            let regs = resolve_regs(&*regs_file, name, cfg)?;
            let hooks = callbacks.take(name).ok_or_else(|| {
                ConfigError::InvalidCallbackChain {
                    domain: name.clone(),
                }
            })?;
            let id = u32::try_from(id).map_err(|_| {
                ConfigError::Invalid("too many power domains".to_string())
            })?;
            let pd = PowerDomain::new(
                name,
                id,
                regs_file.clone(),
                regs,
                cfg.secure,
                hooks,
            );
            domains.insert(name.clone(), Arc::new(pd));
        }

        Ok(Self { domains })
    }

    /// Builds a set from domains constructed by hand.
    pub fn from_domains(
        list: impl IntoIterator<Item = PowerDomain>,
    ) -> Result<Self, ConfigError> {
        let mut domains = IndexMap::new();
        for pd in list {
            let name = pd.name.clone();
            if domains.insert(name.clone(), Arc::new(pd)).is_some() {
                return Err(ConfigError::DuplicateDomain(name));
            }
        }
        Ok(Self { domains })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PowerDomain>> {
        self.domains.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PowerDomain>> + '_ {
        self.domains.values()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

fn resolve_regs(
    regs_file: &dyn RegisterFile,
    name: &str,
    cfg: &DomainConfig,
) -> Result<Option<DomainRegs>, ConfigError> {
    let (ctrl, status) = match (&cfg.ctrl, &cfg.status) {
        (None, None) => return Ok(None),
        (Some(c), Some(s)) => (regs_file.require(c)?, regs_file.require(s)?),
        _ => {
            return Err(ConfigError::Invalid(format!(
                "domain {name:?}: ctrl and status must be given together"
            )))
        }
    };
    if cfg.mask == 0 {
        return Err(MappingFailure::EmptyMask(format!("domain {name:?}")).into());
    }
    let on_value = cfg.on_value.unwrap_or(cfg.mask);
    if on_value & cfg.mask != on_value || on_value == 0 {
        return Err(ConfigError::Invalid(format!(
            "domain {name:?}: on-value {on_value:#x} does not fit mask {:#x}",
            cfg.mask
        )));
    }
    Ok(Some(DomainRegs {
        ctrl,
        status,
        mask: cfg.mask,
        on_value,
    }))
}

#[cfg(test)]
mod tests;
