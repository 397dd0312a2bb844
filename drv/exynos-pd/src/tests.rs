// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU32, Ordering};

use exynos_regs::{RegisterMap, SimRegisterFile, VirtualTimebase};

use super::*;

struct Board {
    regs: Arc<SimRegisterFile>,
    tb: Arc<VirtualTimebase>,
    clk: Reg,
    mfc_conf: Reg,
    mfc_status: Reg,
}

fn board() -> Board {
    let mut map = RegisterMap::new(0x8000);
    map.insert("CLK_ENABLE_TOP", 0x0800, 0).unwrap();
    map.insert("MFC_CONFIGURATION", 0x4060, 0).unwrap();
    map.insert("MFC_STATUS", 0x4064, 0).unwrap();
    map.insert("G3D_CONFIGURATION", 0x4080, 0).unwrap();
    map.insert("G3D_STATUS", 0x4084, 0).unwrap();
    let regs = Arc::new(SimRegisterFile::new(map));
    let clk = regs.resolve("CLK_ENABLE_TOP").unwrap();
    let mfc_conf = regs.resolve("MFC_CONFIGURATION").unwrap();
    let mfc_status = regs.resolve("MFC_STATUS").unwrap();
    regs.link(mfc_conf, mfc_status, 0x1, 3);
    let g3d_conf = regs.resolve("G3D_CONFIGURATION").unwrap();
    let g3d_status = regs.resolve("G3D_STATUS").unwrap();
    regs.link(g3d_conf, g3d_status, 0xf, 0);

    Board {
        regs,
        tb: Arc::new(VirtualTimebase::new()),
        clk,
        mfc_conf,
        mfc_status,
    }
}

impl Board {
    fn controller(&self) -> DomainController {
        DomainController::new(self.tb.clone(), PollBudget::default())
    }

    fn mfc(&self, hooks: HookChain) -> PowerDomain {
        PowerDomain::new(
            "pd-mfc",
            0,
            self.regs.clone(),
            Some(DomainRegs {
                ctrl: self.mfc_conf,
                status: self.mfc_status,
                mask: 0x1,
                on_value: 0x1,
            }),
            false,
            hooks,
        )
    }

    fn top_clock_hooks(&self) -> HookChain {
        HookChain::new()
            .on_pre(RegHook::Set {
                reg: self.clk,
                mask: 0x1,
            })
            .off_post(RegHook::Clear {
                reg: self.clk,
                mask: 0x1,
            })
    }
}

fn counter_hook(n: &Arc<AtomicU32>) -> impl PdHook + 'static {
    let n = n.clone();
    move |_: &HookContext<'_>| {
        n.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn mfc_top_clock_scenario() {
    let b = board();
    let ctl = b.controller();
    let pd = b.mfc(b.top_clock_hooks());
    assert_eq!(pd.recorded_status(), PowerStatus::Off);

    // Record every write along with what the status register said at the
    // time.
    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        let regs = b.regs.clone();
        let status = b.mfc_status;
        b.regs.set_observer(Some(Arc::new(move |reg: Reg, value: u32| {
            log.lock().unwrap().push((reg, value, regs.peek(status)));
        })));
    }

    let t = ctl.power_on(&pd, TransitionFlags::empty()).unwrap();
    assert!(matches!(t, Transition::Done { polls: 3, .. }));
    assert_eq!(b.regs.peek(b.mfc_status), 0x1);
    assert_eq!(pd.recorded_status(), PowerStatus::On);
    {
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            [(b.clk, 0x1, 0x0), (b.mfc_conf, 0x1, 0x0)],
            "top clock must be enabled before the domain is switched on"
        );
    }

    log.lock().unwrap().clear();
    let t = ctl.power_off(&pd, TransitionFlags::empty()).unwrap();
    assert!(matches!(t, Transition::Done { .. }));
    assert_eq!(pd.recorded_status(), PowerStatus::Off);
    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        [(b.mfc_conf, 0x0, 0x1), (b.clk, 0x0, 0x0)],
        "top clock must only be disabled once the domain reads off"
    );
}

#[test]
fn power_on_twice_does_not_rerun_hooks() {
    let b = board();
    let ctl = b.controller();
    let pre = Arc::new(AtomicU32::new(0));
    let post = Arc::new(AtomicU32::new(0));
    let pd = b.mfc(
        HookChain::new()
            .on_pre(counter_hook(&pre))
            .on_post(counter_hook(&post)),
    );

    assert!(matches!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Ok(Transition::Done { .. })
    ));
    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Ok(Transition::NoChange)
    );
    assert_eq!(pre.load(Ordering::SeqCst), 1);
    assert_eq!(post.load(Ordering::SeqCst), 1);
    assert_eq!(b.regs.writes(b.mfc_conf), 1);
    assert_eq!(pd.count(TraceKind::NoChange), 1);

    // FORCE re-drives the whole sequence.
    assert!(matches!(
        ctl.power_on(&pd, TransitionFlags::FORCE),
        Ok(Transition::Done { .. })
    ));
    assert_eq!(pre.load(Ordering::SeqCst), 2);
    assert_eq!(b.regs.writes(b.mfc_conf), 2);
}

#[test]
fn stuck_status_times_out_after_budget() {
    let b = board();
    b.regs.unlink(b.mfc_status);
    let ctl = b.controller();
    let post = Arc::new(AtomicU32::new(0));
    let pd = b.mfc(HookChain::new().on_post(counter_hook(&post)));

    let before = b.regs.reads(b.mfc_status);
    let err = ctl.power_on(&pd, TransitionFlags::empty()).unwrap_err();
    let polls = ctl.budget().max_polls;

    // One read for the short-circuit check, then the poll itself.
    assert_eq!(b.regs.reads(b.mfc_status) - before, 1 + u64::from(polls));
    assert_eq!(
        err,
        PdError::Timeout {
            polls,
            elapsed_us: u64::from(polls - 1) * 10,
            snapshot: RegSnapshot { ctrl: 0x1, status: 0x0 },
        }
    );
    assert_eq!(post.load(Ordering::SeqCst), 0);
    assert_eq!(pd.recorded_status(), PowerStatus::Off);
    assert_eq!(pd.count(TraceKind::Timeout), 1);
    assert!(matches!(
        pd.trace_snapshot().last().map(|e| e.payload),
        Some(Trace::Timeout { .. })
    ));
}

#[test]
fn stuck_power_off_times_out_without_post_hooks() {
    let b = board();
    let ctl = b.controller();
    let post = Arc::new(AtomicU32::new(0));
    let pd = b.mfc(HookChain::new().off_post(counter_hook(&post)));
    ctl.power_on(&pd, TransitionFlags::empty()).unwrap();

    // The status stays on whatever the control register says.
    b.regs.unlink(b.mfc_status);
    let before = b.regs.reads(b.mfc_status);
    let err = ctl.power_off(&pd, TransitionFlags::empty()).unwrap_err();
    let polls = ctl.budget().max_polls;

    assert_eq!(b.regs.reads(b.mfc_status) - before, 1 + u64::from(polls));
    assert_eq!(
        err,
        PdError::Timeout {
            polls,
            elapsed_us: u64::from(polls - 1) * 10,
            snapshot: RegSnapshot { ctrl: 0x0, status: 0x1 },
        }
    );
    assert_eq!(post.load(Ordering::SeqCst), 0);
    assert_eq!(pd.recorded_status(), PowerStatus::On);
    assert_eq!(pd.snapshot(), RegSnapshot { ctrl: 0x0, status: 0x1 });
}

#[test]
fn timeout_snapshot_reads_back_the_control_register() {
    let b = board();
    let ctl = b.controller();
    b.regs.unlink(b.mfc_status);
    // Something else on the bus rewrites the control field as soon as the
    // driver writes it.
    {
        let regs = b.regs.clone();
        let conf = b.mfc_conf;
        b.regs.set_observer(Some(Arc::new(move |reg: Reg, value: u32| {
            if reg == conf && value == 0x1 {
                regs.poke(conf, 0x3);
            }
        })));
    }
    let pd = b.mfc(HookChain::new());

    let Err(PdError::Timeout { snapshot, .. }) =
        ctl.power_on(&pd, TransitionFlags::empty())
    else {
        panic!("expected a timeout");
    };
    assert_eq!(snapshot.ctrl, 0x3);
    assert_eq!(snapshot.ctrl, b.regs.peek(b.mfc_conf));
    assert_eq!(pd.snapshot(), snapshot);
}

#[test]
fn timeout_leaves_observed_partial_status() {
    let b = board();
    let ctl = b.controller();
    let g3d_conf = b.regs.resolve("G3D_CONFIGURATION").unwrap();
    let g3d_status = b.regs.resolve("G3D_STATUS").unwrap();
    b.regs.unlink(g3d_status);
    b.regs.poke(g3d_status, 0x3);
    let pd = PowerDomain::new(
        "pd-g3d",
        1,
        b.regs.clone(),
        Some(DomainRegs {
            ctrl: g3d_conf,
            status: g3d_status,
            mask: 0xf,
            on_value: 0xf,
        }),
        false,
        HookChain::new(),
    );

    assert!(ctl.power_on(&pd, TransitionFlags::empty()).is_err());
    assert_eq!(pd.recorded_status(), PowerStatus::Transitioning);
    assert_eq!(ctl.status(&pd), PowerStatus::Transitioning);
}

#[test]
fn long_delay_is_recorded_but_succeeds() {
    let b = board();
    b.regs.link(b.mfc_conf, b.mfc_status, 0x1, 3000);
    let ctl = b.controller();
    let pd = b.mfc(HookChain::new());

    let t = ctl.power_on(&pd, TransitionFlags::empty()).unwrap();
    assert_eq!(
        t,
        Transition::Done {
            polls: 3000,
            elapsed_us: 29_990,
            long_delay: true,
        }
    );
    assert_eq!(pd.count(TraceKind::LongDelay), 1);
}

#[test]
fn registerless_domain_still_runs_hooks_in_order() {
    let b = board();
    let ctl = b.controller();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut hooks = HookChain::new();
    for phase in [
        HookPhase::OnPre,
        HookPhase::OnPost,
        HookPhase::OffPre,
        HookPhase::OffPost,
    ] {
        for i in 0..2 {
            let order = order.clone();
            hooks.push(
                phase,
                Arc::new(move |cx: &HookContext<'_>| {
                    order.lock().unwrap().push((cx.phase, i));
                }),
            );
        }
    }
    let pd = PowerDomain::new("pd-virt", 3, b.regs.clone(), None, false, hooks);

    ctl.power_on(&pd, TransitionFlags::empty()).unwrap();
    assert_eq!(pd.recorded_status(), PowerStatus::On);
    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Ok(Transition::NoChange)
    );
    ctl.power_off(&pd, TransitionFlags::empty()).unwrap();

    assert_eq!(
        *order.lock().unwrap(),
        [
            (HookPhase::OnPre, 0),
            (HookPhase::OnPre, 1),
            (HookPhase::OnPost, 0),
            (HookPhase::OnPost, 1),
            (HookPhase::OffPre, 0),
            (HookPhase::OffPre, 1),
            (HookPhase::OffPost, 0),
            (HookPhase::OffPost, 1),
        ]
    );
}

struct RecordingMonitor {
    calls: Mutex<Vec<(SmcCommand, u32)>>,
    fail: Mutex<Option<SmcError>>,
}

impl RecordingMonitor {
    fn new(fail: Option<SmcError>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(fail),
        })
    }

    fn fail_with(&self, fail: Option<SmcError>) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl SecureMonitor for RecordingMonitor {
    fn call(&self, cmd: SmcCommand, arg: u32) -> Result<(), SmcError> {
        self.calls.lock().unwrap().push((cmd, arg));
        match *self.fail.lock().unwrap() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[test]
fn secure_domain_saves_and_restores() {
    let b = board();
    let monitor = RecordingMonitor::new(None);
    let ctl = b.controller().with_secure_monitor(monitor.clone());
    let pd = PowerDomain::new(
        "pd-mfc",
        7,
        b.regs.clone(),
        b.mfc(HookChain::new()).registers(),
        true,
        HookChain::new(),
    );

    ctl.power_on(&pd, TransitionFlags::empty()).unwrap();
    ctl.power_off(&pd, TransitionFlags::empty()).unwrap();
    ctl.power_on(&pd, TransitionFlags::SKIP_SECURE).unwrap();
    assert_eq!(
        *monitor.calls.lock().unwrap(),
        [(SmcCommand::PdRestore, 7), (SmcCommand::PdSave, 7)]
    );
}

#[test]
fn failed_secure_save_blocks_power_off() {
    let b = board();
    let monitor = RecordingMonitor::new(Some(SmcError::Denied));
    let ctl = b.controller().with_secure_monitor(monitor);
    let pd = PowerDomain::new(
        "pd-mfc",
        0,
        b.regs.clone(),
        b.mfc(HookChain::new()).registers(),
        true,
        HookChain::new(),
    );
    ctl.power_on(&pd, TransitionFlags::SKIP_SECURE).unwrap();

    let writes = b.regs.writes(b.mfc_conf);
    assert_eq!(
        ctl.power_off(&pd, TransitionFlags::empty()),
        Err(PdError::Secure(SmcError::Denied))
    );
    assert_eq!(b.regs.writes(b.mfc_conf), writes);
    assert_eq!(ctl.status(&pd), PowerStatus::On);
}

#[test]
fn failed_secure_restore_is_retried_on_next_power_on() {
    let b = board();
    let monitor = RecordingMonitor::new(Some(SmcError::Denied));
    let ctl = b.controller().with_secure_monitor(monitor.clone());
    let post = Arc::new(AtomicU32::new(0));
    let pd = PowerDomain::new(
        "pd-mfc",
        4,
        b.regs.clone(),
        b.mfc(HookChain::new()).registers(),
        true,
        HookChain::new().on_post(counter_hook(&post)),
    );

    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Err(PdError::Secure(SmcError::Denied))
    );
    // The hardware came up; only the restore and the post hooks are owed.
    assert_eq!(ctl.status(&pd), PowerStatus::On);
    assert_eq!(post.load(Ordering::SeqCst), 0);
    assert!(pd.restore_pending());

    // Still refused: nothing is rewritten and the debt stays.
    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Err(PdError::Secure(SmcError::Denied))
    );
    assert!(pd.restore_pending());

    monitor.fail_with(None);
    let writes = b.regs.writes(b.mfc_conf);
    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Ok(Transition::Done {
            polls: 0,
            elapsed_us: 0,
            long_delay: false,
        })
    );
    assert_eq!(b.regs.writes(b.mfc_conf), writes);
    assert_eq!(post.load(Ordering::SeqCst), 1);
    assert!(!pd.restore_pending());
    assert_eq!(pd.count(TraceKind::RestoreRetry), 2);
    assert_eq!(
        *monitor.calls.lock().unwrap(),
        [
            (SmcCommand::PdRestore, 4),
            (SmcCommand::PdRestore, 4),
            (SmcCommand::PdRestore, 4),
        ]
    );

    // Settled now, so the usual short-circuit applies again.
    assert_eq!(
        ctl.power_on(&pd, TransitionFlags::empty()),
        Ok(Transition::NoChange)
    );
    assert_eq!(post.load(Ordering::SeqCst), 1);
}

#[test]
fn power_off_drops_an_owed_restore() {
    let b = board();
    let monitor = RecordingMonitor::new(Some(SmcError::Other(-16)));
    let ctl = b.controller().with_secure_monitor(monitor.clone());
    let pd = PowerDomain::new(
        "pd-mfc",
        5,
        b.regs.clone(),
        b.mfc(HookChain::new()).registers(),
        true,
        HookChain::new(),
    );

    assert!(ctl.power_on(&pd, TransitionFlags::empty()).is_err());
    assert!(pd.restore_pending());
    monitor.fail_with(None);
    ctl.power_off(&pd, TransitionFlags::empty()).unwrap();
    assert!(!pd.restore_pending());
    assert_eq!(ctl.status(&pd), PowerStatus::Off);
}

const BOARD: &str = r#"
[domains.pd-mfc]
ctrl = "MFC_CONFIGURATION"
status = "MFC_STATUS"
mask = 0x1

[domains.pd-g3d]
ctrl = "G3D_CONFIGURATION"
status = "G3D_STATUS"

[domains.pd-virt]

[callbacks.pd-mfc]
on-pre = [{ reg = "CLK_ENABLE_TOP", set = 0x1 }]
off-post = [{ reg = "CLK_ENABLE_TOP", clear = 0x1 }]

[callbacks.pd-g3d]

[callbacks.pd-virt]
"#;

#[derive(serde::Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TestBoard {
    domains: IndexMap<String, DomainConfig>,
    callbacks: IndexMap<String, CallbackConfig>,
}

#[test]
fn build_from_board_file() {
    let b = board();
    let cfg: TestBoard = toml::from_str(BOARD).unwrap();
    let table = CallbackTable::from_config(&*b.regs, &cfg.callbacks).unwrap();
    let domains = PowerDomains::build(b.regs.clone(), &cfg.domains, table).unwrap();

    assert_eq!(domains.len(), 3);
    let names: Vec<_> = domains.iter().map(|pd| pd.name()).collect();
    assert_eq!(names, ["pd-mfc", "pd-g3d", "pd-virt"]);

    let mfc = domains.get("pd-mfc").unwrap();
    assert_eq!(mfc.hooks().len(HookPhase::OnPre), 1);
    assert_eq!(mfc.hooks().len(HookPhase::OffPost), 1);
    assert_eq!(domains.get("pd-g3d").unwrap().registers().unwrap().mask, 0xf);
    assert!(domains.get("pd-virt").unwrap().registers().is_none());

    let ctl = b.controller();
    ctl.power_on_named(&domains, "pd-mfc", TransitionFlags::empty())
        .unwrap();
    assert_eq!(b.regs.peek(b.clk), 0x1);
    assert_eq!(
        ctl.power_on_named(&domains, "pd-isp", TransitionFlags::empty()),
        Err(PdError::NoSuchDomain)
    );
}

#[test]
fn missing_callback_entry_is_rejected() {
    let b = board();
    let mut cfg: TestBoard = toml::from_str(BOARD).unwrap();
    cfg.callbacks.shift_remove("pd-g3d");
    let table = CallbackTable::from_config(&*b.regs, &cfg.callbacks).unwrap();

    assert_eq!(
        PowerDomains::build(b.regs.clone(), &cfg.domains, table).err(),
        Some(ConfigError::InvalidCallbackChain {
            domain: "pd-g3d".into()
        })
    );
}

#[test]
fn orphaned_callback_entry_is_rejected() {
    let b = board();
    let cfg: TestBoard = toml::from_str(BOARD).unwrap();
    let table = CallbackTable::from_config(&*b.regs, &cfg.callbacks)
        .unwrap()
        .with("pd-mcf", HookChain::new());

    assert_eq!(
        PowerDomains::build(b.regs.clone(), &cfg.domains, table).err(),
        Some(ConfigError::InvalidCallbackChain {
            domain: "pd-mcf".into()
        })
    );
}

#[test]
fn hand_built_domains_must_have_unique_names() {
    let b = board();
    let domains = PowerDomains::from_domains([
        b.mfc(b.top_clock_hooks()),
        PowerDomain::new(
            "pd-virt",
            1,
            b.regs.clone(),
            None,
            false,
            HookChain::new(),
        ),
    ])
    .unwrap();
    assert_eq!(domains.len(), 2);
    assert_eq!(domains.get("pd-virt").map(|pd| pd.id()), Some(1));

    assert_eq!(
        PowerDomains::from_domains([
            b.mfc(HookChain::new()),
            b.mfc(b.top_clock_hooks()),
        ])
        .err(),
        Some(ConfigError::DuplicateDomain("pd-mfc".into()))
    );
}

#[test]
fn unknown_register_is_a_mapping_failure() {
    let b = board();
    let mut cfg: TestBoard = toml::from_str(BOARD).unwrap();
    cfg.domains["pd-g3d"].status = Some("G3D_STAT".into());
    let table = CallbackTable::from_config(&*b.regs, &cfg.callbacks).unwrap();

    assert_eq!(
        PowerDomains::build(b.regs.clone(), &cfg.domains, table).err(),
        Some(ConfigError::Mapping(MappingFailure::UnknownRegister(
            "G3D_STAT".into()
        )))
    );

    let mut cb = cfg.callbacks.clone();
    cb["pd-mfc"].on_pre[0].set = None;
    assert!(matches!(
        CallbackTable::from_config(&*b.regs, &cb).err(),
        Some(ConfigError::Invalid(_))
    ));
}

#[test]
fn independent_domains_transition_concurrently() {
    let b = board();
    let cfg: TestBoard = toml::from_str(BOARD).unwrap();
    let table = CallbackTable::from_config(&*b.regs, &cfg.callbacks).unwrap();
    let domains = PowerDomains::build(b.regs.clone(), &cfg.domains, table).unwrap();
    let ctl = b.controller();

    std::thread::scope(|s| {
        for pd in domains.iter() {
            let ctl = &ctl;
            s.spawn(move || {
                for _ in 0..50 {
                    ctl.power_on(pd, TransitionFlags::empty()).unwrap();
                    ctl.power_off(pd, TransitionFlags::empty()).unwrap();
                }
            });
        }
    });

    for pd in domains.iter() {
        assert_eq!(ctl.status(pd), PowerStatus::Off);
        assert_eq!(pd.count(TraceKind::PowerOn), 50);
        assert_eq!(pd.count(TraceKind::PowerOff), 50);
    }
}
