// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::Deserialize;

use crate::{Reg, RegisterFile, Timebase};

/// How long a status poll may run.
///
/// A poll gives up after `max_polls` reads or once `deadline_us` of
/// wall-clock time has passed, whichever comes first. The iteration count
/// alone stretches and shrinks with CPU frequency; the deadline does not.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct PollBudget {
    pub max_polls: u32,
    pub interval_us: u32,
    pub deadline_us: u64,
}

impl Default for PollBudget {
    /// 5000 polls, 10us apart: about 50ms.
    fn default() -> Self {
        Self {
            max_polls: 5000,
            interval_us: 10,
            deadline_us: 50_000,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PollOutcome {
    pub matched: bool,
    /// Number of reads of the status register, including the last one.
    pub polls: u32,
    pub elapsed_us: u64,
    /// The last value read.
    pub last: u32,
    /// The poll succeeded but used more than half of its budget.
    pub long_delay: bool,
}

/// Reads `reg` until `value & mask == expected` or the budget runs out.
///
/// The first read happens immediately; there is a delay of
/// `budget.interval_us` between consecutive reads. At least one read is
/// always made.
pub fn poll_until(
    regs: &dyn RegisterFile,
    tb: &dyn Timebase,
    reg: Reg,
    mask: u32,
    expected: u32,
    budget: &PollBudget,
) -> PollOutcome {
    let start = tb.now_us();
    let mut polls = 0u32;

    loop {
        let last = regs.read(reg);
        polls = polls.saturating_add(1);
        let elapsed_us = tb.now_us().saturating_sub(start);

        if last & mask == expected {
            let long_delay = u64::from(polls) * 2 > u64::from(budget.max_polls)
                || elapsed_us * 2 > budget.deadline_us;
            return PollOutcome {
                matched: true,
                polls,
                elapsed_us,
                last,
                long_delay,
            };
        }

        if polls >= budget.max_polls || elapsed_us >= budget.deadline_us {
            return PollOutcome {
                matched: false,
                polls,
                elapsed_us,
                last,
                long_delay: false,
            };
        }

        tb.delay_us(budget.interval_us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegisterMap, SimRegisterFile, VirtualTimebase};

    fn setup() -> (SimRegisterFile, Reg, Reg) {
        let map = RegisterMap::new(0x100)
            .with("CONF", 0x0)
            .and_then(|m| m.with("STATUS", 0x4))
            .unwrap();
        let regs = SimRegisterFile::new(map);
        let conf = regs.resolve("CONF").unwrap();
        let status = regs.resolve("STATUS").unwrap();
        (regs, conf, status)
    }

    #[test]
    fn matches_on_first_read() {
        let (regs, _, status) = setup();
        let tb = VirtualTimebase::new();
        let out = poll_until(&regs, &tb, status, 0xf, 0, &PollBudget::default());
        assert!(out.matched);
        assert_eq!(out.polls, 1);
        assert_eq!(out.elapsed_us, 0);
        assert!(!out.long_delay);
    }

    #[test]
    fn stuck_register_exhausts_exact_budget() {
        let (regs, _, status) = setup();
        let tb = VirtualTimebase::new();
        let budget = PollBudget::default();

        let out = poll_until(&regs, &tb, status, 0xf, 0xf, &budget);
        assert!(!out.matched);
        assert_eq!(out.polls, budget.max_polls);
        assert_eq!(regs.reads(status), u64::from(budget.max_polls));
        assert_eq!(out.elapsed_us, u64::from(budget.max_polls - 1) * 10);
    }

    #[test]
    fn deadline_cuts_poll_short() {
        let (regs, _, status) = setup();
        let tb = VirtualTimebase::new();
        let budget = PollBudget {
            max_polls: 1000,
            interval_us: 100,
            deadline_us: 1000,
        };

        let out = poll_until(&regs, &tb, status, 0xf, 0xf, &budget);
        assert!(!out.matched);
        assert_eq!(out.polls, 11);
        assert_eq!(out.elapsed_us, 1000);
    }

    #[test]
    fn slow_match_is_flagged() {
        let (regs, conf, status) = setup();
        let tb = VirtualTimebase::new();
        let budget = PollBudget {
            max_polls: 10,
            interval_us: 10,
            deadline_us: 1_000,
        };
        regs.link(conf, status, 0xf, 7);
        regs.write(conf, 0xf);

        let out = poll_until(&regs, &tb, status, 0xf, 0xf, &budget);
        assert!(out.matched);
        assert_eq!(out.polls, 7);
        assert!(out.long_delay);
    }
}
