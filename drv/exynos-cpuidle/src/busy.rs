// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use drv_exynos_pd::{DomainController, PowerDomain, PowerDomains, PowerStatus};
use drv_exynos_pm_api::{ConfigError, MappingFailure};
use exynos_regs::{Reg, RegisterFile};

use crate::config::BusyConfig;

/// One condition that keeps the system out of system-wide power down.
#[derive(Clone)]
pub(crate) enum BusyCheck {
    /// Busy while any bit of `mask` reads set.
    Reg { name: String, reg: Reg, mask: u32 },
    /// Busy unless the domain's status register reads off.
    Domain(Arc<PowerDomain>),
}

impl BusyCheck {
    pub(crate) fn from_config(
        regs: &dyn RegisterFile,
        cfg: &BusyConfig,
    ) -> Result<Self, ConfigError> {
        if cfg.mask == 0 {
            return Err(MappingFailure::EmptyMask(cfg.name.clone()).into());
        }
        Ok(BusyCheck::Reg {
            name: cfg.name.clone(),
            reg: regs.require(&cfg.reg)?,
            mask: cfg.mask,
        })
    }

    pub(crate) fn domain(
        domains: &PowerDomains,
        name: &str,
    ) -> Result<Self, ConfigError> {
        domains
            .get(name)
            .map(|pd| BusyCheck::Domain(pd.clone()))
            .ok_or_else(|| ConfigError::UnknownDomain(name.to_string()))
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            BusyCheck::Reg { name, .. } => name,
            BusyCheck::Domain(pd) => pd.name(),
        }
    }

    /// Evaluates the check against the hardware as it is now.
    pub(crate) fn is_busy(
        &self,
        regs: &dyn RegisterFile,
        controller: &DomainController,
    ) -> bool {
        match self {
            BusyCheck::Reg { reg, mask, .. } => regs.read(*reg) & mask != 0,
            BusyCheck::Domain(pd) => controller.status(pd) != PowerStatus::Off,
        }
    }
}
