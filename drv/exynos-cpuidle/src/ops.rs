// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_exynos_pm_api::SystemOffMode;

/// What a suspend call is asked to do.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SuspendTarget {
    CoreOff,
    SystemOff(SystemOffMode),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SuspendOutcome {
    /// The CPU went down and has come back through the resume path.
    Resumed,
    /// Entry was rejected and the call returned without sleeping.
    Aborted,
}

/// The CPU-side primitives the idle machine cannot do with register
/// writes alone: the wait-for-interrupt instruction and the
/// firmware/assembly suspend path.
///
/// Both calls block for the length of the idle period.
pub trait CpuOps: Send + Sync {
    fn wfi(&self, cpu: usize);

    fn suspend(&self, cpu: usize, target: SuspendTarget) -> SuspendOutcome;
}
