// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use anyhow::{Context, Result};
use drv_exynos_cpuidle::IdleConfig;
use drv_exynos_pd::{CallbackConfig, DomainConfig};
use exynos_regs::{PollBudget, RegisterMap};
use indexmap::IndexMap;
use serde::Deserialize;

/// A board description: the register map and everything the drivers are
/// built from, plus knobs for the simulated hardware behind them.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BoardConfig {
    pub name: String,
    pub registers: RegisterMap,
    #[serde(default)]
    pub budget: PollBudget,
    #[serde(default)]
    pub domains: IndexMap<String, DomainConfig>,
    #[serde(default)]
    pub callbacks: IndexMap<String, CallbackConfig>,
    pub idle: IdleConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

/// How the simulated hardware behaves.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SimConfig {
    /// Status reads before a domain's status follows its control register.
    #[serde(default = "default_settle_reads")]
    pub settle_reads: u32,
    /// Per-domain overrides of `settle-reads`.
    #[serde(default)]
    pub settle: IndexMap<String, u32>,
    /// Domains whose status register never follows its control register.
    #[serde(default)]
    pub stuck: Vec<String>,
    #[serde(default = "default_core_settle_reads")]
    pub core_settle_reads: u32,
    /// Value the wakeup status register reads after a system-wide wake.
    #[serde(default)]
    pub wake_stat: u32,
}

fn default_settle_reads() -> u32 {
    3
}

fn default_core_settle_reads() -> u32 {
    2
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            settle_reads: default_settle_reads(),
            settle: IndexMap::new(),
            stuck: Vec::new(),
            core_settle_reads: default_core_settle_reads(),
            wake_stat: 0,
        }
    }
}

impl BoardConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let board: Self = toml::from_str(text)?;
        board.registers.validate()?;
        for name in board.sim.settle.keys().chain(&board.sim.stuck) {
            if !board.domains.contains_key(name) {
                anyhow::bail!("[sim] names unknown domain {name:?}");
            }
        }
        Ok(board)
    }

    /// Settle reads for the named domain.
    pub fn settle_reads(&self, domain: &str) -> u32 {
        self.sim
            .settle
            .get(domain)
            .copied()
            .unwrap_or(self.sim.settle_reads)
    }
}
