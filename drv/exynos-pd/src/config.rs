// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;

/// One `[domains.<name>]` entry of a board file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DomainConfig {
    /// Control (configuration) register. Leave both `ctrl` and `status`
    /// out for a domain with no registers of its own.
    #[serde(default)]
    pub ctrl: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Bits of the status register that report power state.
    #[serde(default = "default_mask")]
    pub mask: u32,
    /// Value written to power on and expected back; defaults to `mask`.
    #[serde(default)]
    pub on_value: Option<u32>,
    /// The secure monitor must save/restore this domain's state.
    #[serde(default)]
    pub secure: bool,
}

fn default_mask() -> u32 {
    0xf
}

/// One `[callbacks.<name>]` entry.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CallbackConfig {
    #[serde(default)]
    pub on_pre: Vec<HookConfig>,
    #[serde(default)]
    pub on_post: Vec<HookConfig>,
    #[serde(default)]
    pub off_pre: Vec<HookConfig>,
    #[serde(default)]
    pub off_post: Vec<HookConfig>,
}

/// A register hook: `{ reg = "...", set = mask }`, `{ reg, clear = mask }`,
/// or `{ reg, write = value }`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HookConfig {
    pub reg: String,
    #[serde(default)]
    pub set: Option<u32>,
    #[serde(default)]
    pub clear: Option<u32>,
    #[serde(default)]
    pub write: Option<u32>,
}
