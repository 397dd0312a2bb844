// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exynos CPU idle and hotplug driver.
//!
//! The [`IdleStateMachine`] picks an idle level for a CPU that has nothing
//! to do and drives the register sequence around the low-level suspend
//! primitive:
//!
//! - `ClockGated`: a plain WFI, nothing else touched.
//! - `CoreOff`: the requesting core is powered down on its own. Allowed
//!   unless the core is the only one online and the hardware cannot power a
//!   lone core down. Only the core's own configuration register is touched;
//!   the shared save list and bus gates stay with whoever owns them.
//! - `SystemOff`: the whole SoC drops into retention. Allowed only with a
//!   single CPU online and every busy check reading clear; otherwise the
//!   machine falls back to `CoreOff`. Inside `SystemOff` the retention policy
//!   picks shallow or deep retention.
//!
//! The central sequencer register is shared by every core in the cluster.
//! The precondition checks run under one spin lock. A `SystemOff` entry,
//! with every other core offline, keeps holding it through the suspend and
//! the cleanup after it. A `CoreOff` entry releases it before suspending.
//!
//! If a `SystemOff` suspend comes back aborted (or the hardware left the
//! low-power bit clear, which means the same thing) the bit is set back to
//! normal operation before anything else happens. A clear bit with software
//! believing it is running makes the hardware drop the next wakeup.

mod busy;
mod config;
mod ops;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use enum_kinds::EnumKind;
use enum_map::Enum;
use pm_trace::{count_entry, CountedRingbuf, RingbufEntry};

use busy::BusyCheck;
pub use config::{
    BusyConfig, IdleConfig, RetentionConfig, SequencerConfig, SysPwrConfig,
    WakeupMaskConfig,
};
use drv_exynos_pd::{DomainController, PowerDomains};
pub use drv_exynos_pm_api::{
    ConfigError, HotplugError, IdleError, IdleLevel, IdleOutcome, IdleReport,
    IdleRequest, IdleState, SystemOffMode, EXYNOS_IDLE_STATES,
};
use exynos_regs::{poll_until, PollBudget, Reg, RegisterFile, Timebase};
pub use ops::{CpuOps, SuspendOutcome, SuspendTarget};

const TRACE_DEPTH: usize = 64;
const MAX_CPUS: usize = 32;

/// Why the machine entered a shallower level than the governor asked for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    /// System-wide power down needs exactly one CPU online; this many were.
    CpusOnline(u32),
    /// The busy check at this index (see [`IdleStateMachine::busy_name`])
    /// read busy.
    Busy(usize),
    /// The requesting CPU is the last one online and cores cannot be powered
    /// down on their own.
    SoleCpu,
}

#[derive(Copy, Clone, Debug, PartialEq, EnumKind)]
#[enum_kind(TraceKind, derive(Enum))]
pub enum Trace {
    None,
    Select {
        cpu: usize,
        level: IdleLevel,
    },
    Fallback {
        cpu: usize,
        from: IdleLevel,
        to: IdleLevel,
        reason: FallbackReason,
    },
    Retention(SystemOffMode),
    /// The hardware left the low-power bit clear across a suspend.
    LowPwrStillClear,
    /// Suspend was rejected; reported with zero residency.
    Aborted {
        cpu: usize,
        level: IdleLevel,
    },
    Woke {
        cpu: usize,
        level: IdleLevel,
        residency_us: u64,
    },
    WakeStat(u32),
    CpuDown(usize),
    CpuUp(usize),
    HotplugTimeout {
        cpu: usize,
        polls: u32,
        last: u32,
    },
}

/// Accumulated numbers for one idle level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub usage: u64,
    pub residency_us: u64,
    pub aborts: u64,
}

const LEVELS: [IdleLevel; 4] = [
    IdleLevel::Active,
    IdleLevel::ClockGated,
    IdleLevel::CoreOff,
    IdleLevel::SystemOff,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdleStats {
    levels: [LevelStats; 4],
}

impl IdleStats {
    pub fn level(&self, level: IdleLevel) -> LevelStats {
        self.levels[level_index(level)]
    }

    pub fn iter(&self) -> impl Iterator<Item = (IdleLevel, LevelStats)> + '_ {
        LEVELS.iter().copied().zip(self.levels.iter().copied())
    }

    fn record(&mut self, report: &IdleReport) {
        let s = &mut self.levels[level_index(report.entered)];
        s.usage += 1;
        s.residency_us = s.residency_us.saturating_add(report.residency_us);
        if report.outcome == IdleOutcome::Aborted {
            s.aborts += 1;
        }
    }
}

fn level_index(level: IdleLevel) -> usize {
    match level {
        IdleLevel::Active => 0,
        IdleLevel::ClockGated => 1,
        IdleLevel::CoreOff => 2,
        IdleLevel::SystemOff => 3,
    }
}

/// A register written with one of two values depending on the retention
/// mode.
#[derive(Copy, Clone, Debug)]
struct ModeValue {
    reg: Reg,
    shallow: u32,
    deep: u32,
}

impl ModeValue {
    fn resolve(
        regs: &dyn RegisterFile,
        name: &str,
        shallow: u32,
        deep: u32,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            reg: regs.require(name)?,
            shallow,
            deep,
        })
    }

    fn value(&self, mode: SystemOffMode) -> u32 {
        match mode {
            SystemOffMode::ShallowRetention => self.shallow,
            SystemOffMode::DeepRetention => self.deep,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct CpuRegs {
    config: Reg,
    status: Reg,
}

/// Register contents parked across a power-down entry. Lives inside the
/// central sequencer lock.
#[derive(Default)]
struct SaveArea {
    regs: Vec<u32>,
    gates: Vec<u32>,
    wake_mask: u32,
}

struct IdleLog {
    trace: CountedRingbuf<Trace, TraceKind, TRACE_DEPTH>,
    stats: IdleStats,
}

/// How one entry went, before it is turned into a report.
struct Exit {
    level: IdleLevel,
    mode: Option<SystemOffMode>,
    outcome: IdleOutcome,
    residency_us: u64,
    wake_reason: Option<String>,
}

impl Exit {
    fn instant(level: IdleLevel) -> Self {
        Self {
            level,
            mode: None,
            outcome: IdleOutcome::Woke,
            residency_us: 0,
            wake_reason: None,
        }
    }
}

pub struct IdleStateMachine {
    regs: Arc<dyn RegisterFile>,
    timebase: Arc<dyn Timebase>,
    budget: PollBudget,
    ops: Arc<dyn CpuOps>,
    controller: Arc<DomainController>,

    cpus: Vec<CpuRegs>,
    per_core_powerdown: bool,
    local_pwr_value: u32,
    sequencer: Reg,
    lowpwr: u32,
    wakeup_mask: ModeValue,
    wakeup_stat: Reg,
    wakeup_sources: Vec<(String, u32)>,
    busy: Vec<BusyCheck>,
    shallow_if_busy: Vec<BusyCheck>,
    save: Vec<Reg>,
    bus_gate: Vec<Reg>,
    sys_pwr: Vec<ModeValue>,

    online: AtomicU32,
    central: spin::Mutex<SaveArea>,
    hotplug: Mutex<()>,
    log: Mutex<IdleLog>,
}

impl IdleStateMachine {
    /// Builds the machine from an `[idle]` section. Every register and
    /// domain name is resolved here; all CPUs start online.
    pub fn build(
        regs: Arc<dyn RegisterFile>,
        timebase: Arc<dyn Timebase>,
        budget: PollBudget,
        ops: Arc<dyn CpuOps>,
        controller: Arc<DomainController>,
        domains: &PowerDomains,
        cfg: &IdleConfig,
    ) -> Result<Self, ConfigError> {
        let r = &*regs;

        if cfg.cpus == 0 || cfg.cpus > MAX_CPUS {
            return Err(ConfigError::Invalid(format!(
                "idle: cpus must be between 1 and {MAX_CPUS}, not {}",
                cfg.cpus
            )));
        }
        for (what, list) in [
            ("core-config", &cfg.core_config),
            ("core-status", &cfg.core_status),
        ] {
            if list.len() != cfg.cpus {
                return Err(ConfigError::BadCpuList {
                    what,
                    expected: cfg.cpus,
                    got: list.len(),
                });
            }
        }
        let cpus = cfg
            .core_config
            .iter()
            .zip(&cfg.core_status)
            .map(|(c, s)| -> Result<_, ConfigError> {
                Ok(CpuRegs {
                    config: r.require(c)?,
                    status: r.require(s)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        if cfg.local_pwr_value == 0 {
            return Err(ConfigError::Invalid(
                "idle: local-pwr-value must not be zero".to_string(),
            ));
        }
        let lowpwr = bit(cfg.sequencer.lowpwr_bit, "sequencer.lowpwr-bit")?;

        let wakeup_sources = cfg
            .wakeup_sources
            .iter()
            .map(|(name, &b)| Ok::<_, ConfigError>((name.clone(), bit(b, name)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let mut busy = cfg
            .busy
            .iter()
            .map(|b| BusyCheck::from_config(r, b))
            .collect::<Result<Vec<_>, _>>()?;
        for name in &cfg.busy_domains {
            busy.push(BusyCheck::domain(domains, name)?);
        }

        let mut shallow_if_busy = Vec::new();
        for name in &cfg.retention.shallow_if_busy {
            let check = match cfg.retention.busy.iter().find(|b| &b.name == name) {
                Some(b) => BusyCheck::from_config(r, b)?,
                None => BusyCheck::domain(domains, name)?,
            };
            shallow_if_busy.push(check);
        }

        let require_all = |names: &[String]| {
            names
                .iter()
                .map(|n| r.require(n))
                .collect::<Result<Vec<_>, _>>()
        };
        let save = require_all(&cfg.save)?;
        let bus_gate = require_all(&cfg.bus_gate)?;

        let sys_pwr = cfg
            .sys_pwr
            .iter()
            .map(|e| ModeValue::resolve(r, &e.reg, e.shallow, e.deep))
            .collect::<Result<Vec<_>, _>>()?;

        let all = all_cpus(cfg.cpus);
        Ok(Self {
            sequencer: r.require(&cfg.sequencer.reg)?,
            wakeup_mask: ModeValue::resolve(
                r,
                &cfg.wakeup_mask.reg,
                cfg.wakeup_mask.shallow,
                cfg.wakeup_mask.deep,
            )?,
            wakeup_stat: r.require(&cfg.wakeup_stat)?,
            lowpwr,
            cpus,
            per_core_powerdown: cfg.per_core_powerdown,
            local_pwr_value: cfg.local_pwr_value,
            wakeup_sources,
            busy,
            shallow_if_busy,
            save,
            bus_gate,
            sys_pwr,
            online: AtomicU32::new(all),
            central: spin::Mutex::new(SaveArea::default()),
            hotplug: Mutex::new(()),
            log: Mutex::new(IdleLog {
                trace: CountedRingbuf::new(Trace::None),
                stats: IdleStats::default(),
            }),
            regs,
            timebase,
            budget,
            ops,
            controller,
        })
    }

    pub fn cpus(&self) -> usize {
        self.cpus.len()
    }

    /// The deepest idle level the request permits, before any hardware
    /// preconditions are looked at.
    ///
    /// A state qualifies if the CPU is expected to stay idle at least its
    /// target residency and its exit latency is within the caller's limit.
    /// WFI always qualifies unless the caller capped the request at
    /// `Active`.
    pub fn select(&self, req: &IdleRequest) -> IdleLevel {
        if req.max_level == IdleLevel::Active {
            return IdleLevel::Active;
        }
        EXYNOS_IDLE_STATES
            .iter()
            .rev()
            .filter(|s| s.level <= req.max_level)
            .find(|s| {
                s.level == IdleLevel::ClockGated
                    || (s.target_residency_us <= req.predicted_us
                        && s.exit_latency_us <= req.latency_limit_us)
            })
            .map_or(IdleLevel::ClockGated, |s| s.level)
    }

    /// Idles `cpu` and returns once it is running again.
    ///
    /// This must be called on `cpu` itself. On real hardware the caller also
    /// has to keep interrupts masked from before this call until it returns;
    /// the internal lock only keeps other cores out of the central
    /// sequencer.
    pub fn enter(
        &self,
        cpu: usize,
        req: &IdleRequest,
    ) -> Result<IdleReport, IdleError> {
        let bit = self.cpu_bit(cpu).ok_or(IdleError::NoSuchCpu)?;
        if self.online.load(Ordering::Acquire) & bit == 0 {
            return Err(IdleError::CpuOffline);
        }

        let requested = self.select(req);
        count_entry!(
            self.log().trace,
            Trace::Select {
                cpu,
                level: requested,
            }
        );

        let exit = if requested >= IdleLevel::CoreOff {
            let mut central = self.central.lock();
            match self.check_preconditions(cpu, requested) {
                IdleLevel::SystemOff => self.system_off(cpu, &mut central),
                IdleLevel::CoreOff => {
                    drop(central);
                    self.core_off(cpu)
                }
                level => {
                    drop(central);
                    self.shallow(cpu, level)
                }
            }
        } else {
            self.shallow(cpu, requested)
        };

        let report = IdleReport {
            cpu,
            requested,
            entered: exit.level,
            mode: exit.mode,
            outcome: exit.outcome,
            residency_us: exit.residency_us,
            wake_reason: exit.wake_reason,
        };

        let mut log = self.log();
        match report.outcome {
            IdleOutcome::Aborted => count_entry!(
                log.trace,
                Trace::Aborted {
                    cpu,
                    level: report.entered,
                }
            ),
            IdleOutcome::Woke => count_entry!(
                log.trace,
                Trace::Woke {
                    cpu,
                    level: report.entered,
                    residency_us: report.residency_us,
                }
            ),
        }
        log.stats.record(&report);
        Ok(report)
    }

    /// Applies the hardware preconditions to the governor's choice, falling
    /// back one level at a time.
    fn check_preconditions(&self, cpu: usize, requested: IdleLevel) -> IdleLevel {
        let mut level = requested;
        let online = self.online.load(Ordering::Acquire);

        if level == IdleLevel::SystemOff {
            let reason = if online.count_ones() != 1 {
                Some(FallbackReason::CpusOnline(online.count_ones()))
            } else {
                self.first_busy(&self.busy).map(FallbackReason::Busy)
            };
            if let Some(reason) = reason {
                self.fallback(cpu, level, IdleLevel::CoreOff, reason);
                level = IdleLevel::CoreOff;
            }
        }

        if level == IdleLevel::CoreOff
            && !self.per_core_powerdown
            && Some(online) == self.cpu_bit(cpu)
        {
            self.fallback(
                cpu,
                level,
                IdleLevel::ClockGated,
                FallbackReason::SoleCpu,
            );
            level = IdleLevel::ClockGated;
        }

        level
    }

    fn fallback(
        &self,
        cpu: usize,
        from: IdleLevel,
        to: IdleLevel,
        reason: FallbackReason,
    ) {
        count_entry!(
            self.log().trace,
            Trace::Fallback {
                cpu,
                from,
                to,
                reason,
            }
        );
    }

    fn first_busy(&self, checks: &[BusyCheck]) -> Option<usize> {
        checks
            .iter()
            .position(|c| c.is_busy(&*self.regs, &self.controller))
    }

    fn shallow(&self, cpu: usize, level: IdleLevel) -> Exit {
        if level != IdleLevel::ClockGated {
            return Exit::instant(level);
        }
        let t0 = self.timebase.now_us();
        self.ops.wfi(cpu);
        let t1 = self.timebase.now_us();
        Exit {
            residency_us: t1.saturating_sub(t0),
            ..Exit::instant(level)
        }
    }

    fn core_off(&self, cpu: usize) -> Exit {
        let core = self.cpus[cpu];
        self.regs.write(core.config, 0);

        let t0 = self.timebase.now_us();
        let outcome = self.ops.suspend(cpu, SuspendTarget::CoreOff);
        let t1 = self.timebase.now_us();

        self.regs.write(core.config, self.local_pwr_value);

        match outcome {
            SuspendOutcome::Resumed => Exit {
                residency_us: t1.saturating_sub(t0),
                ..Exit::instant(IdleLevel::CoreOff)
            },
            SuspendOutcome::Aborted => Exit {
                outcome: IdleOutcome::Aborted,
                ..Exit::instant(IdleLevel::CoreOff)
            },
        }
    }

    fn system_off(&self, cpu: usize, central: &mut SaveArea) -> Exit {
        let mode = if self.first_busy(&self.shallow_if_busy).is_some() {
            SystemOffMode::ShallowRetention
        } else {
            SystemOffMode::DeepRetention
        };
        count_entry!(self.log().trace, Trace::Retention(mode));

        let regs = &*self.regs;
        self.save_regs(central);
        central.wake_mask = regs.read(self.wakeup_mask.reg);
        regs.write(self.wakeup_mask.reg, self.wakeup_mask.value(mode));
        for e in &self.sys_pwr {
            regs.write(e.reg, e.value(mode));
        }
        regs.clear_bits(self.sequencer, self.lowpwr);

        let t0 = self.timebase.now_us();
        let outcome = self.ops.suspend(cpu, SuspendTarget::SystemOff(mode));
        let t1 = self.timebase.now_us();

        let still_clear = regs.read(self.sequencer) & self.lowpwr == 0;
        let aborted = outcome == SuspendOutcome::Aborted || still_clear;
        if aborted {
            regs.set_bits(self.sequencer, self.lowpwr);
        }

        let stat = regs.read(self.wakeup_stat);
        let wake_reason = self.wake_reason(stat);
        if stat != 0 {
            regs.write(self.wakeup_stat, 0);
        }

        regs.write(self.wakeup_mask.reg, central.wake_mask);
        self.restore_regs(central);

        {
            let mut log = self.log();
            if still_clear {
                count_entry!(log.trace, Trace::LowPwrStillClear);
            }
            count_entry!(log.trace, Trace::WakeStat(stat));
        }

        Exit {
            level: IdleLevel::SystemOff,
            mode: Some(mode),
            outcome: if aborted {
                IdleOutcome::Aborted
            } else {
                IdleOutcome::Woke
            },
            residency_us: if aborted { 0 } else { t1.saturating_sub(t0) },
            wake_reason,
        }
    }

    fn wake_reason(&self, stat: u32) -> Option<String> {
        if stat == 0 {
            return None;
        }
        let name = self
            .wakeup_sources
            .iter()
            .find(|(_, mask)| stat & mask != 0)
            .map_or("unknown", |(name, _)| name.as_str());
        Some(name.to_string())
    }

    fn save_regs(&self, central: &mut SaveArea) {
        let regs = &*self.regs;
        central.regs.clear();
        central.regs.extend(self.save.iter().map(|&r| regs.read(r)));
        central.gates.clear();
        central.gates.extend(self.bus_gate.iter().map(|&r| regs.read(r)));
    }

    fn restore_regs(&self, central: &SaveArea) {
        for (&reg, &v) in self.save.iter().zip(&central.regs) {
            self.regs.write(reg, v);
        }
        for (&reg, &v) in self.bus_gate.iter().zip(&central.gates) {
            self.regs.write(reg, v);
        }
    }

    /// Takes `cpu` offline: its core is powered down and it leaves the
    /// online mask. The last online CPU cannot be taken down.
    pub fn cpu_down(&self, cpu: usize) -> Result<(), HotplugError> {
        let bit = self.cpu_bit(cpu).ok_or(HotplugError::NoSuchCpu)?;
        let _hp = self.hotplug.lock().unwrap_or_else(PoisonError::into_inner);

        let online = self.online.load(Ordering::Acquire);
        if online & bit == 0 {
            return Err(HotplugError::AlreadyOffline);
        }
        if online == bit {
            return Err(HotplugError::LastCpu);
        }

        self.switch_core(cpu, 0)?;
        {
            let _central = self.central.lock();
            self.online.fetch_and(!bit, Ordering::AcqRel);
        }
        count_entry!(self.log().trace, Trace::CpuDown(cpu));
        Ok(())
    }

    /// Powers `cpu`'s core back up and returns it to the online mask.
    pub fn cpu_up(&self, cpu: usize) -> Result<(), HotplugError> {
        let bit = self.cpu_bit(cpu).ok_or(HotplugError::NoSuchCpu)?;
        let _hp = self.hotplug.lock().unwrap_or_else(PoisonError::into_inner);

        if self.online.load(Ordering::Acquire) & bit != 0 {
            return Err(HotplugError::AlreadyOnline);
        }

        self.switch_core(cpu, self.local_pwr_value)?;
        {
            let _central = self.central.lock();
            self.online.fetch_or(bit, Ordering::AcqRel);
        }
        count_entry!(self.log().trace, Trace::CpuUp(cpu));
        Ok(())
    }

    fn switch_core(&self, cpu: usize, value: u32) -> Result<(), HotplugError> {
        let core = self.cpus[cpu];
        self.regs.write(core.config, value);
        let out = poll_until(
            &*self.regs,
            &*self.timebase,
            core.status,
            self.local_pwr_value,
            value,
            &self.budget,
        );
        if !out.matched {
            count_entry!(
                self.log().trace,
                Trace::HotplugTimeout {
                    cpu,
                    polls: out.polls,
                    last: out.last,
                }
            );
            return Err(HotplugError::Timeout {
                polls: out.polls,
                last: out.last,
            });
        }
        Ok(())
    }

    pub fn online_mask(&self) -> u32 {
        self.online.load(Ordering::Acquire)
    }

    pub fn online_count(&self) -> u32 {
        self.online_mask().count_ones()
    }

    /// Overwrites the online mask without touching any core. For bring-up
    /// and simulation, where CPUs are brought up outside this driver.
    pub fn set_online_mask(&self, mask: u32) -> Result<(), HotplugError> {
        let mask = mask & all_cpus(self.cpus.len());
        if mask == 0 {
            return Err(HotplugError::LastCpu);
        }
        let _central = self.central.lock();
        self.online.store(mask, Ordering::Release);
        Ok(())
    }

    /// Name of the busy check a [`FallbackReason::Busy`] refers to.
    pub fn busy_name(&self, index: usize) -> Option<&str> {
        self.busy.get(index).map(BusyCheck::name)
    }

    pub fn stats(&self) -> IdleStats {
        self.log().stats.clone()
    }

    /// Recent trace entries, oldest first.
    pub fn trace_snapshot(&self) -> Vec<RingbufEntry<Trace>> {
        self.log().trace.ring().snapshot()
    }

    pub fn count(&self, kind: TraceKind) -> u32 {
        self.log().trace.count(kind)
    }

    fn cpu_bit(&self, cpu: usize) -> Option<u32> {
        (cpu < self.cpus.len()).then(|| 1 << cpu)
    }

    fn log(&self) -> MutexGuard<'_, IdleLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn all_cpus(n: usize) -> u32 {
    if n >= MAX_CPUS {
        u32::MAX
    } else {
        (1 << n) - 1
    }
}

fn bit(n: u32, what: &str) -> Result<u32, ConfigError> {
    1u32.checked_shl(n).ok_or_else(|| {
        ConfigError::Invalid(format!("{what}: bit {n} is out of range"))
    })
}
