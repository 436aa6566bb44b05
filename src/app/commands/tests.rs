use super::*;

use std::fs;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::app::command_tree::{CommandTree, ExecPolicy};
use crate::app::config::AppConfig;
use crate::app::device_status::DeviceStatusMap;
use crate::app::models::DeviceState;
use crate::app::state::lock_recover;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    set_ups: AtomicUsize,
    tear_downs: AtomicUsize,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }
}

/// `stub <ok|fail|err|panic|slow> [words...]`
struct StubProcessor {
    recorder: Arc<Recorder>,
}

impl CommandProcessor for StubProcessor {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn description(&self) -> &'static str {
        "test stub"
    }

    fn help(&self) -> String {
        "stub <ok|fail|err|panic|slow>".to_string()
    }

    fn set_up(&self, _state: &ConsoleState) -> Result<(), AppError> {
        self.recorder.set_ups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        self.recorder.calls.lock().expect("calls").push(args.join(" "));
        match args.first().map(String::as_str) {
            Some("ok") => Ok(true),
            Some("fail") => Ok(false),
            Some("err") => Err(AppError::validation("stub failure", ctx.trace_id)),
            Some("panic") => panic!("stub panic"),
            Some("slow") => {
                let now = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.recorder.max_active.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(200));
                self.recorder.active.fetch_sub(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Err(AppError::validation("expected ok|fail|err|panic|slow", ctx.trace_id)),
        }
    }

    fn tear_down(&self, _state: &ConsoleState) {
        self.recorder.tear_downs.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("buf").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("buf").clone()).expect("utf8")
    }
}

struct Harness {
    console: Console,
    recorder: Arc<Recorder>,
    out: SharedBuf,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    fn with_config(config: AppConfig) -> Self {
        Self::with_policy(config, ExecPolicy::default())
    }

    fn with_policy(config: AppConfig, policy: ExecPolicy) -> Self {
        let recorder = Arc::new(Recorder::default());
        let mut registry = CommandRegistry::with_defaults().expect("registry");
        registry
            .register(Box::new(StubProcessor {
                recorder: Arc::clone(&recorder),
            }))
            .expect("register stub");
        let state = Arc::new(ConsoleState::new(
            config,
            "1.0".to_string(),
            Arc::new(DeviceStatusMap::in_memory()),
        ));
        let out = SharedBuf::default();
        let console = Console::new(registry, state)
            .with_output(Box::new(out.clone()))
            .with_policy(policy);
        console.set_up().expect("set up");
        Self {
            console,
            recorder,
            out,
        }
    }

    fn run(&self, tree: CommandTree) -> Option<bool> {
        self.console.onecmd(Some(&tree))
    }

    fn line(&self, line: &str) -> Option<bool> {
        self.run(CommandTree::from(line))
    }
}

fn tree(items: Vec<CommandTree>) -> CommandTree {
    CommandTree::from(items)
}

fn cmd(line: &str) -> CommandTree {
    CommandTree::from(line)
}

#[test]
fn registry_rejects_duplicates_and_builtins() {
    struct Named(&'static str);
    impl CommandProcessor for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn help(&self) -> String {
            String::new()
        }
        fn run(&self, _ctx: &CommandContext<'_>, _args: &[String]) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    let mut registry = CommandRegistry::with_defaults().expect("registry");
    let count = registry.len();
    let err = registry.register(Box::new(Named("adb"))).expect_err("duplicate");
    assert_eq!(err.code, "ERR_VALIDATION");
    assert!(registry.register(Box::new(Named("exit"))).is_err());
    assert!(registry.register(Box::new(Named("two words"))).is_err());
    registry.register(Box::new(Named("extra"))).expect("register");
    assert_eq!(registry.len(), count + 1);
    assert!(registry.get("extra").is_some());
}

#[test]
fn set_up_and_tear_down_run_once() {
    let harness = Harness::new();
    assert_eq!(harness.recorder.set_ups.load(Ordering::SeqCst), 1);
    harness.console.tear_down();
    harness.console.tear_down();
    assert_eq!(harness.recorder.tear_downs.load(Ordering::SeqCst), 1);
}

#[test]
fn parallel_list_is_false_iff_any_branch_fails() {
    let harness = Harness::new();
    assert_eq!(
        harness.run(tree(vec![cmd("stub ok"), tree(vec![cmd("stub ok")]), cmd("stub ok")])),
        Some(true)
    );
    assert_eq!(
        harness.run(tree(vec![
            cmd("stub ok"),
            tree(vec![cmd("stub ok"), tree(vec![cmd("stub fail")])]),
            cmd("stub ok"),
        ])),
        Some(false)
    );
    // Siblings of a failing branch still run to completion.
    assert_eq!(harness.recorder.calls().len(), 3 + 4);
}

#[test]
fn parallel_branches_overlap() {
    let harness = Harness::new();
    assert_eq!(
        harness.run(tree(vec![cmd("stub slow"), cmd("stub slow")])),
        Some(true)
    );
    assert_eq!(harness.recorder.max_active.load(Ordering::SeqCst), 2);
}

#[test]
fn sequential_list_stops_at_first_failure() {
    let harness = Harness::new();
    assert_eq!(
        harness.run(tree(vec![tree(vec![
            cmd("stub ok 1"),
            cmd("stub fail 2"),
            cmd("stub ok 3"),
        ])])),
        Some(false)
    );
    assert_eq!(harness.recorder.calls(), vec!["ok 1", "fail 2"]);
}

#[test]
fn sequential_policy_short_circuits_top_level() {
    let harness = Harness::with_policy(AppConfig::default(), ExecPolicy::sequential());
    assert_eq!(
        harness.run(tree(vec![cmd("stub ok"), cmd("stub fail"), cmd("stub ok")])),
        Some(false)
    );
    assert_eq!(harness.recorder.calls(), vec!["ok", "fail"]);
}

#[test]
fn empty_branches_count_as_success() {
    let harness = Harness::new();
    assert_eq!(
        harness.run(tree(vec![tree(Vec::new()), cmd(""), cmd("stub ok")])),
        Some(true)
    );
    assert_eq!(harness.recorder.calls(), vec!["ok"]);
}

#[test]
fn errors_print_kind_and_message() {
    let harness = Harness::new();
    assert_eq!(harness.line("stub err"), Some(false));
    assert_eq!(harness.line("stub panic"), Some(false));
    assert_eq!(harness.line("nope"), Some(false));
    let text = harness.out.text();
    assert!(text.contains("ValidationError: stub failure"));
    assert!(text.contains("Panic: stub panic"));
    assert!(text.contains("UnknownCommand: unknown command 'nope'"));
}

#[test]
fn parse_errors_are_validation_errors() {
    let harness = Harness::new();
    assert_eq!(harness.line("sleep"), Some(false));
    assert_eq!(harness.line("list nothing"), Some(false));
    let text = harness.out.text();
    assert_eq!(text.matches("ValidationError: ").count(), 2);
}

#[test]
fn processor_help_is_printed() {
    let harness = Harness::new();
    assert_eq!(harness.line("help"), Some(true));
    assert_eq!(harness.line("help device"), Some(true));
    assert_eq!(harness.line("fetch --help"), Some(true));
    let text = harness.out.text();
    assert!(text.contains("stub       test stub"));
    assert!(text.contains("--set_state"));
    assert!(text.contains("--path"));
}

#[test]
fn argument_buffers_feed_later_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("system.img"), b"img").expect("write");
    let harness = Harness::new();
    let path = dir.path().to_string_lossy().into_owned();

    assert_eq!(
        harness.line(&format!("fetch --path {path} --name main")),
        Some(true)
    );
    assert_eq!(harness.line("stub ok {fetch.name} {fetch.type} {fetch.missing}"), Some(true));
    assert_eq!(
        harness.recorder.calls(),
        vec!["ok main local {fetch.missing}"]
    );
    assert_eq!(
        harness.console.state().arg("fetch", "system.img"),
        Some(dir.path().join("system.img").to_string_lossy().into_owned())
    );

    assert_eq!(harness.line("list builds"), Some(true));
    assert!(harness.out.text().contains("system.img\tDeviceImage"));
    assert!(lock_recover(&harness.console.state().builds).get("main").is_some());
}

#[test]
fn fetch_rejects_unknown_provider_type() {
    let harness = Harness::new();
    assert_eq!(harness.line("fetch --type gcs --path /tmp"), Some(false));
    assert!(harness
        .out
        .text()
        .contains("ValidationError: unsupported build provider type 'gcs'"));
}

#[test]
fn device_set_state_uses_lock_discipline() {
    let harness = Harness::new();
    assert_eq!(harness.line("device --set_state A use"), Some(true));
    assert_eq!(harness.line("device --set_state A use"), Some(false));
    assert_eq!(harness.console.state().devices.get("A"), DeviceState::Use);
    assert_eq!(harness.line("device --set_state A ready"), Some(true));
    assert_eq!(harness.line("device --set_state A sideways"), Some(false));
    assert_eq!(harness.line("device --list"), Some(true));

    let text = harness.out.text();
    assert!(text.contains("A: could not change state to use"));
    assert!(text.contains("invalid device state 'sideways'"));
    assert!(text.contains("A\tready"));
}

#[test]
fn lease_needs_running_pool() {
    let harness = Harness::new();
    assert_eq!(harness.line("lease --count 2"), Some(false));
    assert!(harness
        .out
        .text()
        .contains("DependencyError: job pool is not running"));
}

#[test]
fn info_reports_version() {
    let harness = Harness::new();
    assert_eq!(harness.line("info"), Some(true));
    let text = harness.out.text();
    assert!(text.contains("version: 1.0"));
    assert!(text.contains("job pool: not started"));
}

#[test]
fn sleep_accepts_fractions() {
    let harness = Harness::new();
    assert_eq!(harness.line("sleep 0.01"), Some(true));
}

#[test]
fn sleep_rejects_out_of_range_duration() {
    let harness = Harness::new();
    assert_eq!(harness.line("sleep 1e300"), Some(false));
    assert_eq!(harness.line("sleep -1"), Some(false));
    let text = harness.out.text();
    assert!(text.contains("ValidationError: invalid sleep duration"));
    assert!(!text.contains("Panic:"));
}

#[test]
fn exit_inside_campaign_keeps_console_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("campaign.json");
    fs::write(&script, r#"["stub ok first", "exit"]"#).expect("write");
    let harness = Harness::new();
    let input = format!(
        "config --file {}\nstub ok second\n",
        script.to_string_lossy()
    );

    assert!(harness.console.start(io::Cursor::new(input)));
    assert_eq!(harness.recorder.calls(), vec!["ok first", "ok second"]);
}

#[test]
fn config_runs_campaign_with_overrides() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("campaign.json");
    fs::write(
        &script,
        r#"{"defaults": {"word": "default", "mode": "ok"},
            "commands": [["stub {mode} {word}", "stub ok after"]]}"#,
    )
    .expect("write");
    let harness = Harness::new();
    let path = script.to_string_lossy().into_owned();

    assert_eq!(
        harness.line(&format!("config --file {path} --arg word=override")),
        Some(true)
    );
    assert_eq!(harness.recorder.calls(), vec!["ok override", "ok after"]);

    assert_eq!(
        harness.line(&format!("config --file {path} --arg mode=fail")),
        Some(false)
    );
    assert_eq!(harness.recorder.calls().len(), 3);

    assert_eq!(harness.line(&format!("config --file {path} --arg novalue")), Some(false));
    assert!(harness.out.text().contains("ValidationError: expected key=value"));
}

#[test]
fn hook_dry_run_expands_placeholders() {
    let harness = Harness::new();
    assert_eq!(
        harness.line(
            "hook --file a.c --file b.c --repo-root /src --dry-run -- lint --file=${PREUPLOAD_FILES_PREFIXED} ${REPO_ROOT}"
        ),
        Some(true)
    );
    assert!(harness.out.text().contains("lint --file=a.c --file=b.c /src"));

    assert_eq!(
        harness.line("hook --file a.c --dry-run -- ${PREUPLOAD_FILES_PREFIXED}"),
        Some(false)
    );
    assert!(harness
        .out
        .text()
        .contains("ValidationError: PREUPLOAD_FILES_PREFIXED cannot be the 1st or 2nd argument"));
}

#[cfg(unix)]
#[test]
fn hook_runs_expanded_command() {
    let harness = Harness::new();
    assert_eq!(
        harness.line("hook --file x.txt --file y.txt -- echo ${PREUPLOAD_FILES}"),
        Some(true)
    );
    assert!(harness.out.text().contains("x.txt y.txt"));
    assert_eq!(harness.line("hook -- sh -c \"exit 3\""), Some(false));
}

#[cfg(unix)]
#[test]
fn adb_records_output_for_placeholders() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let fake_adb = dir.path().join("adb");
    fs::write(&fake_adb, "#!/bin/sh\necho \"$@\"\n").expect("write");
    fs::set_permissions(&fake_adb, fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut config = AppConfig::default();
    config.device.adb_path = fake_adb.to_string_lossy().into_owned();
    let harness = Harness::with_config(config);

    assert_eq!(harness.line("adb --serial SER1 shell getprop"), Some(true));
    assert_eq!(
        harness.console.state().arg("adb", "stdout").as_deref(),
        Some("-s SER1 shell getprop")
    );
    assert_eq!(
        harness.console.state().arg("adb", "exit_code").as_deref(),
        Some("0")
    );
    assert_eq!(harness.line("stub ok {adb.serial}"), Some(true));
    assert_eq!(harness.recorder.calls(), vec!["ok SER1"]);
}
