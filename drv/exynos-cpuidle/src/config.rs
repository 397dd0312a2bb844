// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use indexmap::IndexMap;
use serde::Deserialize;

/// The `[idle]` section of a board file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct IdleConfig {
    /// Number of CPUs in the cluster.
    pub cpus: usize,

    /// The hardware can power a core down on its own, even when it is the
    /// only one left running.
    #[serde(default)]
    pub per_core_powerdown: bool,

    /// Per-CPU core configuration registers, indexed by CPU number.
    pub core_config: Vec<String>,
    /// Per-CPU core status registers, indexed by CPU number.
    pub core_status: Vec<String>,
    /// What goes into a core configuration register to power the core up.
    #[serde(default = "default_local_pwr_value")]
    pub local_pwr_value: u32,

    pub sequencer: SequencerConfig,
    pub wakeup_mask: WakeupMaskConfig,
    pub wakeup_stat: String,
    /// Wake source names, mapped to their bit in `wakeup-stat`. When more
    /// than one bit is set the first listed source wins.
    #[serde(default)]
    pub wakeup_sources: IndexMap<String, u32>,

    /// Register busy checks gating system-wide power down.
    #[serde(default)]
    pub busy: Vec<BusyConfig>,
    /// Power domains that must read off before system-wide power down.
    #[serde(default)]
    pub busy_domains: Vec<String>,
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Registers saved before a power-down entry and restored on wake.
    #[serde(default)]
    pub save: Vec<String>,
    /// Bus gating registers; saved with the others, restored last.
    #[serde(default)]
    pub bus_gate: Vec<String>,
    /// System power-down table, written on system-wide entry.
    #[serde(default)]
    pub sys_pwr: Vec<SysPwrConfig>,
}

fn default_local_pwr_value() -> u32 {
    0xf
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SequencerConfig {
    pub reg: String,
    /// Bit number of the low-power enable. Set is normal operation; software
    /// clears it to allow the next suspend to take the system down.
    pub lowpwr_bit: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WakeupMaskConfig {
    pub reg: String,
    pub shallow: u32,
    pub deep: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BusyConfig {
    pub name: String,
    pub reg: String,
    pub mask: u32,
}

/// Retention sub-mode policy.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetentionConfig {
    /// Checks (by name, from `busy` below) or power domains (by name) that
    /// force shallow retention when they read busy. With nothing listed,
    /// system-wide power down always uses deep retention.
    #[serde(default)]
    pub shallow_if_busy: Vec<String>,
    /// Register checks that only steer the retention mode. Unlike the
    /// top-level `busy` list they never block system-wide power down.
    #[serde(default)]
    pub busy: Vec<BusyConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SysPwrConfig {
    pub reg: String,
    pub shallow: u32,
    pub deep: u32,
}
