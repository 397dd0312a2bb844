// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordered callback chains run around a domain's power transitions.

use std::sync::Arc;

use drv_exynos_pm_api::ConfigError;
use exynos_regs::{Reg, RegisterFile};
use indexmap::IndexMap;

use crate::config::{CallbackConfig, HookConfig};

/// Where in a transition a hook runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before the control register is written to power on.
    OnPre,
    /// After the status register reports the domain on.
    OnPost,
    /// Before the control register is written to power off.
    OffPre,
    /// After the status register reports the domain off.
    OffPost,
}

/// What a hook gets to see.
pub struct HookContext<'a> {
    pub domain: &'a str,
    pub phase: HookPhase,
    pub regs: &'a dyn RegisterFile,
}

/// A callback attached to one phase of a domain transition.
///
/// Hooks run with the domain's access lock held: a hook must not start a
/// transition on the same domain.
pub trait PdHook: Send + Sync {
    fn call(&self, cx: &HookContext<'_>);
}

impl<F> PdHook for F
where
    F: Fn(&HookContext<'_>) + Send + Sync,
{
    fn call(&self, cx: &HookContext<'_>) {
        self(cx)
    }
}

/// A hook that pokes one register: the usual clock-gate or reset toggle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegHook {
    Set { reg: Reg, mask: u32 },
    Clear { reg: Reg, mask: u32 },
    Write { reg: Reg, value: u32 },
}

impl PdHook for RegHook {
    fn call(&self, cx: &HookContext<'_>) {
        match *self {
            RegHook::Set { reg, mask } => cx.regs.set_bits(reg, mask),
            RegHook::Clear { reg, mask } => cx.regs.clear_bits(reg, mask),
            RegHook::Write { reg, value } => cx.regs.write(reg, value),
        }
    }
}

impl RegHook {
    pub fn from_config(
        regs: &dyn RegisterFile,
        cfg: &HookConfig,
    ) -> Result<Self, ConfigError> {
        let reg = regs.require(&cfg.reg)?;
        match (cfg.set, cfg.clear, cfg.write) {
            (Some(mask), None, None) => Ok(RegHook::Set { reg, mask }),
            (None, Some(mask), None) => Ok(RegHook::Clear { reg, mask }),
            (None, None, Some(value)) => Ok(RegHook::Write { reg, value }),
            _ => Err(ConfigError::Invalid(format!(
                "hook on {:?} must have exactly one of set, clear, write",
                cfg.reg
            ))),
        }
    }
}

/// The four ordered hook lists of one domain.
#[derive(Clone, Default)]
pub struct HookChain {
    on_pre: Vec<Arc<dyn PdHook>>,
    on_post: Vec<Arc<dyn PdHook>>,
    off_pre: Vec<Arc<dyn PdHook>>,
    off_post: Vec<Arc<dyn PdHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `hook` to the list for `phase`. Hooks run in the order they
    /// were added.
    pub fn push(&mut self, phase: HookPhase, hook: Arc<dyn PdHook>) {
        self.list_mut(phase).push(hook);
    }

    pub fn on_pre(mut self, hook: impl PdHook + 'static) -> Self {
        self.push(HookPhase::OnPre, Arc::new(hook));
        self
    }

    pub fn on_post(mut self, hook: impl PdHook + 'static) -> Self {
        self.push(HookPhase::OnPost, Arc::new(hook));
        self
    }

    pub fn off_pre(mut self, hook: impl PdHook + 'static) -> Self {
        self.push(HookPhase::OffPre, Arc::new(hook));
        self
    }

    pub fn off_post(mut self, hook: impl PdHook + 'static) -> Self {
        self.push(HookPhase::OffPost, Arc::new(hook));
        self
    }

    pub fn len(&self, phase: HookPhase) -> usize {
        self.list(phase).len()
    }

    pub fn is_empty(&self) -> bool {
        self.on_pre.is_empty()
            && self.on_post.is_empty()
            && self.off_pre.is_empty()
            && self.off_post.is_empty()
    }

    pub(crate) fn run(&self, cx: &HookContext<'_>) {
        for hook in self.list(cx.phase) {
            hook.call(cx);
        }
    }

    fn list(&self, phase: HookPhase) -> &[Arc<dyn PdHook>] {
        match phase {
            HookPhase::OnPre => &self.on_pre,
            HookPhase::OnPost => &self.on_post,
            HookPhase::OffPre => &self.off_pre,
            HookPhase::OffPost => &self.off_post,
        }
    }

    fn list_mut(&mut self, phase: HookPhase) -> &mut Vec<Arc<dyn PdHook>> {
        match phase {
            HookPhase::OnPre => &mut self.on_pre,
            HookPhase::OnPost => &mut self.on_post,
            HookPhase::OffPre => &mut self.off_pre,
            HookPhase::OffPost => &mut self.off_post,
        }
    }

    fn from_config(
        regs: &dyn RegisterFile,
        cfg: &CallbackConfig,
    ) -> Result<Self, ConfigError> {
        let mut chain = HookChain::new();
        let lists = [
            (HookPhase::OnPre, &cfg.on_pre),
            (HookPhase::OnPost, &cfg.on_post),
            (HookPhase::OffPre, &cfg.off_pre),
            (HookPhase::OffPost, &cfg.off_post),
        ];
        for (phase, hooks) in lists {
            for h in hooks {
                chain.push(phase, Arc::new(RegHook::from_config(regs, h)?));
            }
        }
        Ok(chain)
    }
}

/// Hook chains keyed by domain name.
///
/// Every configured domain must have an entry, even if it is empty, and every
/// entry must name a configured domain; this is checked when the domains are
/// built, so a misspelled name fails at load time instead of silently
/// leaving a domain without its clock hooks.
#[derive(Clone, Default)]
pub struct CallbackTable {
    chains: IndexMap<String, HookChain>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, domain: &str, chain: HookChain) {
        self.chains.insert(domain.to_string(), chain);
    }

    pub fn with(mut self, domain: &str, chain: HookChain) -> Self {
        self.insert(domain, chain);
        self
    }

    pub fn from_config(
        regs: &dyn RegisterFile,
        cfg: &IndexMap<String, CallbackConfig>,
    ) -> Result<Self, ConfigError> {
        let mut table = CallbackTable::new();
        for (name, cb) in cfg {
            table.insert(name, HookChain::from_config(regs, cb)?);
        }
        Ok(table)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.chains.contains_key(domain)
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.chains.keys().map(String::as_str)
    }

    pub(crate) fn take(&mut self, domain: &str) -> Option<HookChain> {
        self.chains.shift_remove(domain)
    }
}
