// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod board;
mod soc;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use drv_exynos_pd::HookPhase;
use drv_exynos_pm_api::{IdleLevel, IdleRequest, TransitionFlags};
use exynos_regs::{Reg, RegisterFile, Timebase};
use pm_trace::RingbufEntry;

use crate::board::BoardConfig;
use crate::soc::Soc;

const DEFAULT_BOARD: &str = include_str!("../exynos5433.toml");

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "Exynos power domain and CPU idle simulator"
)]
struct Args {
    /// Board description to load instead of the built-in Exynos 5433
    #[clap(short, long)]
    board: Option<PathBuf>,

    /// Online CPU mask to start from
    #[clap(long, parse(try_from_str = parse_int::parse))]
    online: Option<u32>,

    /// Have the secure monitor refuse every call
    #[clap(long)]
    deny_smc: bool,

    /// Print every register write
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the power domains and what their status registers say
    Domains,
    /// Power a domain on
    On {
        domain: String,
        /// Drive the transition even if the domain already reads on
        #[clap(long)]
        force: bool,
        /// Skip the secure monitor restore
        #[clap(long)]
        skip_secure: bool,
    },
    /// Power a domain off
    Off {
        domain: String,
        /// Drive the transition even if the domain already reads off
        #[clap(long)]
        force: bool,
        /// Skip the secure monitor save
        #[clap(long)]
        skip_secure: bool,
    },
    /// Run one idle entry on a CPU
    Idle {
        #[clap(long, default_value_t = 0)]
        cpu: usize,
        /// Predicted idle time handed to the governor
        #[clap(long, default_value_t = 20_000)]
        predicted_us: u32,
        /// Worst wake-up latency the caller tolerates
        #[clap(long)]
        latency_us: Option<u32>,
        /// Deepest level to consider
        #[clap(long, parse(try_from_str = parse_level), default_value = "system-off")]
        max_level: IdleLevel,
        /// How long the CPU actually sleeps; defaults to the prediction
        #[clap(long)]
        sleep_us: Option<u64>,
        /// Make the suspend fail as if a wake-up were already pending
        #[clap(long)]
        abort: bool,
        /// Power these domains on first
        #[clap(long = "on")]
        on: Vec<String>,
        /// Power these domains off first
        #[clap(long = "off")]
        off: Vec<String>,
    },
    /// Take a CPU offline or bring it back
    Hotplug {
        #[clap(subcommand)]
        op: HotplugOp,
    },
}

#[derive(Debug, Subcommand)]
enum HotplugOp {
    /// Power a core up and mark it online
    Up { cpu: usize },
    /// Power a core down; the last online CPU stays up
    Down { cpu: usize },
}

fn parse_level(s: &str) -> Result<IdleLevel> {
    Ok(match s {
        "active" => IdleLevel::Active,
        "clock-gated" | "wfi" => IdleLevel::ClockGated,
        "core-off" => IdleLevel::CoreOff,
        "system-off" | "lpa" => IdleLevel::SystemOff,
        _ => bail!(
            "unknown idle level {s:?} \
             (expected active, clock-gated, core-off or system-off)"
        ),
    })
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    let board = match &args.board {
        Some(path) => BoardConfig::from_file(path)?,
        None => BoardConfig::parse(DEFAULT_BOARD)?,
    };
    let soc = Soc::build(&board)
        .with_context(|| format!("failed to build board {:?}", board.name))?;

    if let Some(mask) = args.online {
        soc.idle.set_online_mask(mask)?;
    }
    soc.monitor.set_deny(args.deny_smc);
    if args.verbose {
        let map = soc.regs.map().clone();
        soc.regs.set_observer(Some(Arc::new(move |reg: Reg, value: u32| {
            let name = map.name(reg).unwrap_or("?");
            println!("    write {name} <- {value:#010x}");
        })));
    }

    match args.cmd {
        Command::Domains => domains(&soc),
        Command::On {
            domain,
            force,
            skip_secure,
        } => transition(&soc, &domain, true, flags(force, skip_secure)),
        Command::Off {
            domain,
            force,
            skip_secure,
        } => transition(&soc, &domain, false, flags(force, skip_secure)),
        Command::Idle {
            cpu,
            predicted_us,
            latency_us,
            max_level,
            sleep_us,
            abort,
            on,
            off,
        } => {
            for domain in &on {
                transition(&soc, domain, true, TransitionFlags::empty())?;
            }
            for domain in &off {
                transition(&soc, domain, false, TransitionFlags::empty())?;
            }
            soc.cpu.set_sleep(sleep_us.unwrap_or(u64::from(predicted_us)));
            soc.cpu.set_abort(abort);
            let req = IdleRequest {
                predicted_us,
                latency_limit_us: latency_us.unwrap_or(u32::MAX),
                max_level,
            };
            idle(&soc, cpu, &req)
        }
        Command::Hotplug { op } => hotplug(&soc, op),
    }
}

fn flags(force: bool, skip_secure: bool) -> TransitionFlags {
    let mut f = TransitionFlags::empty();
    f.set(TransitionFlags::FORCE, force);
    f.set(TransitionFlags::SKIP_SECURE, skip_secure);
    f
}

fn domains(soc: &Soc) -> Result<()> {
    println!(
        "{:>2} {:<10} {:<14} {:<20} {:<20} {:>7}",
        "ID", "DOMAIN", "STATUS", "CTRL", "STATUS REG", "HOOKS"
    );
    for pd in soc.domains.iter() {
        let status = soc.controller.status(pd);
        let (ctrl, stat) = match pd.registers() {
            Some(r) => (soc.regs.name(r.ctrl), soc.regs.name(r.status)),
            None => ("-", "-"),
        };
        let hooks = pd.hooks();
        let counts = [
            HookPhase::OnPre,
            HookPhase::OnPost,
            HookPhase::OffPre,
            HookPhase::OffPost,
        ]
        .map(|phase| hooks.len(phase).to_string())
        .join("/");
        println!(
            "{:>2} {:<10} {:<14} {:<20} {:<20} {:>7}{}",
            pd.id(),
            pd.name(),
            format!("{status:?}"),
            ctrl,
            stat,
            counts,
            if pd.is_secure() { " secure" } else { "" },
        );
    }
    Ok(())
}

fn transition(
    soc: &Soc,
    domain: &str,
    on: bool,
    flags: TransitionFlags,
) -> Result<()> {
    let pd = soc
        .domains
        .get(domain)
        .with_context(|| format!("no such domain {domain:?}"))?;
    let verb = if on { "on" } else { "off" };

    let start = soc.timebase.now_us();
    let seen = soc.monitor.calls().len();
    let result = if on {
        soc.controller.power_on(pd, flags)
    } else {
        soc.controller.power_off(pd, flags)
    };
    println!("{domain} power {verb}:");
    print_trace(&pd.trace_snapshot());
    for (cmd, arg) in soc.monitor.calls().into_iter().skip(seen) {
        println!("    smc {cmd:?}({arg})");
    }

    let t = result.with_context(|| format!("{domain}: power {verb} failed"))?;
    println!(
        "{domain}: {t:?} in {}us, status {:?}",
        soc.timebase.now_us() - start,
        soc.controller.status(pd)
    );
    Ok(())
}

fn idle(soc: &Soc, cpu: usize, req: &IdleRequest) -> Result<()> {
    let chosen = soc.idle.select(req);
    println!("cpu{cpu}: governor picks {chosen:?}");

    let result = soc.idle.enter(cpu, req);
    print_trace(&soc.idle.trace_snapshot());
    let report = result.with_context(|| format!("cpu{cpu}: idle failed"))?;

    println!(
        "cpu{cpu}: entered {:?} ({:?} requested), {:?}, residency {}us",
        report.entered, report.requested, report.outcome, report.residency_us
    );
    if let Some(mode) = report.mode {
        println!("    retention {mode:?}");
    }
    if let Some(reason) = &report.wake_reason {
        println!("    woken by {reason}");
    }
    for (level, stats) in soc.idle.stats().iter() {
        if stats.usage != 0 {
            println!(
                "    {level:?}: usage {} residency {}us aborts {}",
                stats.usage, stats.residency_us, stats.aborts
            );
        }
    }
    Ok(())
}

fn hotplug(soc: &Soc, op: HotplugOp) -> Result<()> {
    let before = soc.idle.online_mask();
    let result = match op {
        HotplugOp::Up { cpu } => soc.idle.cpu_up(cpu),
        HotplugOp::Down { cpu } => soc.idle.cpu_down(cpu),
    };
    print_trace(&soc.idle.trace_snapshot());
    result.with_context(|| format!("{op:?} failed"))?;
    println!(
        "online mask {before:#x} -> {:#x}",
        soc.idle.online_mask()
    );
    Ok(())
}

fn print_trace<T: Copy + PartialEq + Debug>(entries: &[RingbufEntry<T>]) {
    for ent in entries {
        println!("    {:>4} {:>3}x {:?}", ent.line, ent.count, ent.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online(arg: &str) -> Option<u32> {
        Args::try_parse_from(["exynos-pm-sim", "--online", arg, "domains"])
            .unwrap()
            .online
    }

    #[test]
    fn online_mask_takes_any_radix() {
        assert_eq!(online("3"), Some(3));
        assert_eq!(online("0x0f"), Some(0xf));
        assert_eq!(online("0b0011"), Some(3));
        assert_eq!(online("0o17"), Some(0xf));
    }

    #[test]
    fn bad_online_mask_is_rejected() {
        assert!(Args::try_parse_from([
            "exynos-pm-sim",
            "--online",
            "0xfg",
            "domains"
        ])
        .is_err());
    }
}
