// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common definitions for Exynos power-domain and CPU-idle sequencing,
//! shared by the drivers and the tools that drive them.

use core::fmt;

use serde::Deserialize;

pub use exynos_regs::MappingFailure;

////////////////////////////////////////////////////////////////////////////////
// Power domains

/// What a power domain's status register says about it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PowerStatus {
    Off,
    On,
    /// The status field is neither all-on nor all-off; the hardware is still
    /// moving, or stopped halfway.
    Transitioning,
}

impl PowerStatus {
    /// Decodes a raw status register value. `on_value` is what the
    /// `mask` field reads when the domain is fully powered.
    pub fn decode(raw: u32, mask: u32, on_value: u32) -> Self {
        match raw & mask {
            v if v == on_value & mask => PowerStatus::On,
            0 => PowerStatus::Off,
            _ => PowerStatus::Transitioning,
        }
    }
}

bitflags::bitflags! {
    /// Modifiers for a single `power_on`/`power_off` request.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TransitionFlags: u32 {
        /// Drive the transition even if the status register already reads
        /// the requested state.
        const FORCE = 1 << 0;
        /// Do not issue the secure-monitor save/restore call for this
        /// transition.
        const SKIP_SECURE = 1 << 1;
    }
}

/// Indicates the result of a power domain transition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The domain reached the requested state.
    Done {
        polls: u32,
        elapsed_us: u64,
        /// The status poll succeeded but used more than half of its budget.
        long_delay: bool,
    },
    /// The domain was already in the requested state; nothing was written
    /// and no hooks were run.
    NoChange,
}

/// Control and status register values as last read, for diagnostics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RegSnapshot {
    pub ctrl: u32,
    pub status: u32,
}

/// Commands to the secure monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SmcCommand {
    /// Save the security configuration of a domain about to lose power.
    PdSave,
    /// Restore the security configuration of a domain that just got power.
    PdRestore,
}

/// Failure reported by the secure monitor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SmcError {
    NotSupported,
    InvalidParameter,
    Denied,
    Other(i32),
}

impl fmt::Display for SmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported => write!(f, "not supported"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::Denied => write!(f, "denied"),
            Self::Other(code) => write!(f, "error {code}"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PdError {
    /// The status register did not reach the requested state within the
    /// poll budget. The domain is left in whatever state it was observed in.
    Timeout {
        polls: u32,
        elapsed_us: u64,
        snapshot: RegSnapshot,
    },
    /// The secure monitor refused to save or restore the domain.
    Secure(SmcError),
    /// No domain with the requested name is registered.
    NoSuchDomain,
}

impl fmt::Display for PdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                polls,
                elapsed_us,
                snapshot,
            } => write!(
                f,
                "timed out after {polls} polls ({elapsed_us}us): \
                 ctrl={:#010x} status={:#010x}",
                snapshot.ctrl, snapshot.status
            ),
            Self::Secure(e) => write!(f, "secure monitor call failed: {e}"),
            Self::NoSuchDomain => write!(f, "no such power domain"),
        }
    }
}

impl std::error::Error for PdError {}

////////////////////////////////////////////////////////////////////////////////
// CPU idle

/// Idle depth. Ordering follows depth: `Active < ClockGated < CoreOff <
/// SystemOff`.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum IdleLevel {
    Active,
    /// WFI with the core clock gated.
    ClockGated,
    /// The requesting core is powered down; the rest of the cluster and its
    /// coherency stay up.
    CoreOff,
    /// The whole SoC goes to a low-power retention mode.
    SystemOff,
}

/// Which retention flavor a `SystemOff` entry used.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SystemOffMode {
    /// Some peripherals named by the retention policy stay powered.
    ShallowRetention,
    DeepRetention,
}

/// Static description of an idle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdleState {
    pub name: &'static str,
    pub level: IdleLevel,
    pub exit_latency_us: u32,
    pub target_residency_us: u32,
}

/// The idle states, shallowest first.
pub const EXYNOS_IDLE_STATES: [IdleState; 3] = [
    IdleState {
        name: "WFI",
        level: IdleLevel::ClockGated,
        exit_latency_us: 1,
        target_residency_us: 1,
    },
    IdleState {
        name: "C2",
        level: IdleLevel::CoreOff,
        exit_latency_us: 300,
        target_residency_us: 1_000,
    },
    IdleState {
        name: "LPA",
        level: IdleLevel::SystemOff,
        exit_latency_us: 5_000,
        target_residency_us: 10_000,
    },
];

/// What the caller of the idle loop knows about the coming idle period.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdleRequest {
    /// How long the CPU is expected to stay idle.
    pub predicted_us: u32,
    /// The worst wake-up latency the caller will tolerate.
    pub latency_limit_us: u32,
    /// Deepest level the caller allows.
    pub max_level: IdleLevel,
}

impl Default for IdleRequest {
    fn default() -> Self {
        Self {
            predicted_us: u32::MAX,
            latency_limit_us: u32::MAX,
            max_level: IdleLevel::SystemOff,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The CPU slept and woke up normally.
    Woke,
    /// The hardware rejected low-power entry (typically a wake source was
    /// already pending). Residency is reported as zero.
    Aborted,
}

/// Result of one idle entry, for the statistics collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdleReport {
    pub cpu: usize,
    /// Level chosen by the governor before preconditions were checked.
    pub requested: IdleLevel,
    /// Level actually entered.
    pub entered: IdleLevel,
    pub mode: Option<SystemOffMode>,
    pub outcome: IdleOutcome,
    pub residency_us: u64,
    /// Name of the wake source, when the hardware reported one.
    pub wake_reason: Option<String>,
}

/// Why an idle entry was refused outright.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdleError {
    NoSuchCpu,
    /// The requesting CPU is not in the online mask.
    CpuOffline,
}

impl fmt::Display for IdleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchCpu => write!(f, "no such CPU"),
            Self::CpuOffline => write!(f, "CPU is offline"),
        }
    }
}

impl std::error::Error for IdleError {}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HotplugError {
    NoSuchCpu,
    /// Refusing to take the last online CPU down.
    LastCpu,
    AlreadyOnline,
    AlreadyOffline,
    /// The core status register did not follow the configuration write.
    Timeout { polls: u32, last: u32 },
}

impl fmt::Display for HotplugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchCpu => write!(f, "no such CPU"),
            Self::LastCpu => write!(f, "cannot offline the last online CPU"),
            Self::AlreadyOnline => write!(f, "CPU is already online"),
            Self::AlreadyOffline => write!(f, "CPU is already offline"),
            Self::Timeout { polls, last } => write!(
                f,
                "core status did not settle after {polls} polls \
                 (last read {last:#x})"
            ),
        }
    }
}

impl std::error::Error for HotplugError {}

////////////////////////////////////////////////////////////////////////////////
// Configuration

/// Errors building the drivers from a configuration. All of these are fatal
/// at init; there is no partially-configured mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Mapping(MappingFailure),
    /// A domain has no callback entry, or a callback entry names a domain
    /// that does not exist.
    InvalidCallbackChain { domain: String },
    DuplicateDomain(String),
    UnknownDomain(String),
    /// A per-CPU list does not have one entry per CPU, or a CPU index is out
    /// of range.
    BadCpuList { what: &'static str, expected: usize, got: usize },
    /// Anything else that makes a configuration unusable.
    Invalid(String),
}

impl From<MappingFailure> for ConfigError {
    fn from(e: MappingFailure) -> Self {
        ConfigError::Mapping(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapping(e) => write!(f, "register mapping failed: {e}"),
            Self::InvalidCallbackChain { domain } => {
                write!(f, "invalid callback chain for domain {domain:?}")
            }
            Self::DuplicateDomain(d) => write!(f, "domain {d:?} defined twice"),
            Self::UnknownDomain(d) => write!(f, "unknown domain {d:?}"),
            Self::BadCpuList {
                what,
                expected,
                got,
            } => write!(f, "{what}: expected {expected} entries, got {got}"),
            Self::Invalid(why) => write!(f, "{why}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decoding() {
        assert_eq!(PowerStatus::decode(0xf, 0xf, 0xf), PowerStatus::On);
        assert_eq!(PowerStatus::decode(0x0, 0xf, 0xf), PowerStatus::Off);
        assert_eq!(
            PowerStatus::decode(0x3, 0xf, 0xf),
            PowerStatus::Transitioning
        );
        // Bits outside the mask are ignored.
        assert_eq!(PowerStatus::decode(0xf0, 0xf, 0xf), PowerStatus::Off);
        assert_eq!(PowerStatus::decode(0x31, 0x1, 0x1), PowerStatus::On);
    }

    #[test]
    fn idle_states_are_ordered_by_depth() {
        for pair in EXYNOS_IDLE_STATES.windows(2) {
            assert!(pair[0].level < pair[1].level);
            assert!(pair[0].exit_latency_us <= pair[1].exit_latency_us);
            assert!(pair[0].target_residency_us <= pair[1].target_residency_us);
        }
    }
}
