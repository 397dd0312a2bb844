// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_exynos_pm_api::{SmcCommand, SmcError};

/// Calls into secure firmware.
///
/// Domains marked `secure` have protection state (TZPC and friends) that is
/// lost with power: the monitor is asked to save it before the domain goes
/// off and to restore it once the domain is back on. `arg` is the domain id.
pub trait SecureMonitor: Send + Sync {
    fn call(&self, cmd: SmcCommand, arg: u32) -> Result<(), SmcError>;
}
