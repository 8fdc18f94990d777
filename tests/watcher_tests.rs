use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::Level;
use nix::sys::signal::{self, Signal};
use nix::unistd::Uid;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

use wspr_watch::{
    Action, ActionInitiator, Cli, CommandRunner, Exit, FileConfig, FileTriggerMonitor,
    GpioMonitor, MockGpioBackend, PinConfig, Stream, Trigger, WatchError, WatchState, Watcher,
    WatcherConfig, ensure_privileged, stream_for, termination_signal,
};

const BUTTON: u32 = 19;

#[derive(Clone, Default)]
struct RecordingRunner {
    scripts: Arc<Mutex<Vec<String>>>,
    fail: bool,
    recreate: Option<PathBuf>,
}

impl RecordingRunner {
    /// Puts `path` back on disk every time a command is spawned.
    fn recreating(path: PathBuf) -> Self {
        Self {
            recreate: Some(path),
            ..Self::default()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn spawn_detached(&self, script: &str) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "sh: not found"));
        }
        self.scripts.lock().push(script.to_string());
        if let Some(path) = &self.recreate {
            touch(path);
        }
        Ok(())
    }
}

fn sample_config(dir: &Path, gpio: Option<u32>, debug: bool) -> WatcherConfig {
    WatcherConfig {
        gpio: gpio.map(PinConfig::new),
        debug,
        poll_interval: Duration::from_millis(10),
        shutdown_file: dir.join("shutdown.semaphore"),
        reboot_file: dir.join("reboot.semaphore"),
        action_delay_secs: 1,
        once: false,
    }
}

fn touch(path: &Path) {
    fs::write(path, b"").expect("create semaphore");
}

#[test]
fn poll_without_semaphores_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut files = FileTriggerMonitor::new(dir.path().join("shutdown"), dir.path().join("reboot"));

    assert_eq!(files.poll(), None);
    assert_eq!(files.poll(), None);
}

#[test]
fn poll_consumes_shutdown_before_reboot() {
    let dir = TempDir::new().unwrap();
    let shutdown = dir.path().join("shutdown.semaphore");
    let reboot = dir.path().join("reboot.semaphore");
    touch(&shutdown);
    touch(&reboot);

    let mut files = FileTriggerMonitor::new(shutdown.clone(), reboot.clone());

    assert_eq!(files.poll(), Some(Trigger::ShutdownFile(shutdown.clone())));
    assert!(!shutdown.exists());
    assert!(reboot.exists());
    assert_eq!(files.poll(), Some(Trigger::RebootFile(reboot.clone())));
    assert!(!reboot.exists());
    assert_eq!(files.poll(), None);
}

#[test]
fn clear_stale_removes_leftovers() {
    let dir = TempDir::new().unwrap();
    let shutdown = dir.path().join("shutdown.semaphore");
    touch(&shutdown);

    let mut files = FileTriggerMonitor::new(shutdown.clone(), dir.path().join("reboot.semaphore"));
    files.clear_stale();

    assert!(!shutdown.exists());
    assert_eq!(files.poll(), None);
}

#[test]
fn unremovable_semaphore_never_fires() {
    let dir = TempDir::new().unwrap();
    let shutdown = dir.path().join("shutdown.semaphore");
    fs::create_dir(&shutdown).unwrap();

    let mut files = FileTriggerMonitor::new(shutdown.clone(), dir.path().join("reboot.semaphore"));

    assert_eq!(files.poll(), None);
    assert!(files.is_stuck(&shutdown));
    assert_eq!(files.poll(), None);
    assert!(files.is_stuck(&shutdown));

    fs::remove_dir(&shutdown).unwrap();
    touch(&shutdown);
    assert_eq!(files.poll(), Some(Trigger::ShutdownFile(shutdown.clone())));
    assert!(!files.is_stuck(&shutdown));
}

#[test]
fn each_trigger_selects_one_command() {
    let runner = RecordingRunner::default();
    let initiator = ActionInitiator::new(false, 1, runner.clone());

    let cases = [
        (
            Trigger::GpioPress { line: BUTTON },
            Action::Shutdown,
            "sleep 1 && shutdown -h now",
        ),
        (
            Trigger::ShutdownFile("/tmp/shutdown.semaphore".into()),
            Action::Shutdown,
            "sleep 1 && shutdown -h now",
        ),
        (
            Trigger::RebootFile("/tmp/reboot.semaphore".into()),
            Action::Reboot,
            "sleep 1 && reboot",
        ),
    ];

    for (trigger, action, script) in cases {
        assert_eq!(trigger.action(), action);
        initiator.initiate(&trigger, None).unwrap();
        assert_eq!(runner.scripts().last().map(String::as_str), Some(script));
    }
    assert_eq!(runner.scripts().len(), 3);
}

#[test]
fn debug_mode_never_spawns() {
    let runner = RecordingRunner::default();
    let initiator = ActionInitiator::new(true, 1, runner.clone());

    for trigger in [
        Trigger::GpioPress { line: BUTTON },
        Trigger::ShutdownFile("/tmp/shutdown.semaphore".into()),
        Trigger::RebootFile("/tmp/reboot.semaphore".into()),
    ] {
        initiator.initiate(&trigger, None).unwrap();
    }
    assert!(runner.scripts().is_empty());
}

#[test]
fn spawn_failure_is_reported() {
    let initiator = ActionInitiator::new(false, 1, RecordingRunner::failing());
    let err = initiator
        .initiate(&Trigger::RebootFile("/tmp/reboot.semaphore".into()), None)
        .unwrap_err();

    assert!(matches!(err, WatchError::Spawn(_)));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn spawn_failure_is_not_reported_as_unhandled() {
    assert!(WatchError::Spawn("sh: not found".into()).is_anticipated());
    assert!(WatchError::Privilege("not root".into()).is_anticipated());
    assert!(!WatchError::Terminal("tcsetattr".into()).is_anticipated());
}

#[test]
fn only_errors_go_to_stderr() {
    assert_eq!(stream_for(Level::Error), Stream::Stderr);
    for level in [Level::Warn, Level::Info, Level::Debug, Level::Trace] {
        assert_eq!(stream_for(level), Stream::Stdout);
    }
}

#[test]
fn busy_pin_is_reported_not_raised() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.claim_externally(BUTTON);
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = GpioMonitor::new(backend.clone()).start(&PinConfig::new(BUTTON), tx);

    assert!(matches!(result, Err(WatchError::GpioBusy(BUTTON))));
    assert!(!backend.is_watching(BUTTON));
}

#[test]
fn press_is_forwarded_once_until_rearmed() {
    let backend = Arc::new(MockGpioBackend::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watch = GpioMonitor::new(backend.clone())
        .start(&PinConfig::new(BUTTON), tx)
        .unwrap();

    backend.press(BUTTON).unwrap();
    backend.press(BUTTON).unwrap();
    assert_eq!(rx.try_recv().ok(), Some(Trigger::GpioPress { line: BUTTON }));
    assert!(rx.try_recv().is_err());

    watch.handler().rearm();
    backend.press(BUTTON).unwrap();
    assert_eq!(rx.try_recv().ok(), Some(Trigger::GpioPress { line: BUTTON }));
}

#[test]
fn dropping_watch_releases_line() {
    let backend = Arc::new(MockGpioBackend::default());
    let (tx, _rx) = mpsc::unbounded_channel();
    let watch = GpioMonitor::new(backend.clone())
        .start(&PinConfig::new(BUTTON), tx)
        .unwrap();
    assert_eq!(watch.line(), BUTTON);
    assert!(backend.is_watching(BUTTON));

    drop(watch);
    assert!(!backend.is_watching(BUTTON));
}

#[test]
fn root_is_required() {
    assert!(matches!(
        ensure_privileged(Uid::from_raw(1000)),
        Err(WatchError::Privilege(_))
    ));
    assert!(ensure_privileged(Uid::from_raw(0)).is_ok());
}

#[test]
fn handled_signals_exit_cleanly() {
    assert_eq!(Exit::Signal(Signal::SIGTERM).code(), 0);
    assert_eq!(Exit::Signal(Signal::SIGHUP).code(), 0);
    assert_eq!(Exit::Signal(Signal::SIGINT).code(), 0);
    assert_eq!(Exit::Completed.code(), 0);
}

#[test]
fn cli_overrides_file_config() {
    let file: FileConfig = serde_json::from_str(
        r#"
        {
            "semaphore_dir": "/run/wspr",
            "poll_interval_ms": 250,
            "gpio": { "chip": "/dev/gpiochip4", "line": 17 }
        }
        "#,
    )
    .expect("valid sample config");
    let cli = Cli::try_parse_from(["wspr-watch", "-w", "-d", "-p", "19"]).unwrap();

    let config = WatcherConfig::merge(file, &cli).unwrap();

    assert!(config.debug);
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.shutdown_file, Path::new("/run/wspr/shutdown.semaphore"));
    assert_eq!(config.reboot_file, Path::new("/run/wspr/reboot.semaphore"));
    let gpio = config.gpio.unwrap();
    assert_eq!(gpio.chip, "/dev/gpiochip4");
    assert_eq!(gpio.line, 19);
    assert_eq!(gpio.debounce_ms, 50);
}

#[test]
fn zero_poll_interval_is_rejected() {
    let file = FileConfig {
        poll_interval_ms: 0,
        ..FileConfig::default()
    };
    let cli = Cli::try_parse_from(["wspr-watch", "--watch"]).unwrap();

    assert!(matches!(
        WatcherConfig::merge(file, &cli),
        Err(WatchError::Config(_))
    ));
}

#[test]
fn legacy_flag_spellings_are_accepted() {
    let cli = Cli::try_parse_from(["wspr-watch", "-w", "--daemon", "--once"]).unwrap();
    assert!(cli.date_time);
    assert!(cli.once);

    let cli = Cli::try_parse_from(["wspr-watch", "-w", "--date_time"]).unwrap();
    assert!(cli.date_time);
}

#[test]
fn busy_pin_leaves_file_watching_intact() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockGpioBackend::default());
    backend.claim_externally(BUTTON);
    let runner = RecordingRunner::default();
    let config = Arc::new(sample_config(dir.path(), Some(BUTTON), false));

    let mut watcher = Watcher::new(config.clone(), backend, runner.clone());
    assert!(watcher.gpio().is_none());

    touch(&config.reboot_file);
    assert!(watcher.poll_files().unwrap());
    assert!(!config.reboot_file.exists());
    assert_eq!(runner.scripts(), vec!["sleep 1 && reboot".to_string()]);
}

#[test]
fn recreated_semaphore_waits_for_next_tick() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(sample_config(dir.path(), None, false));
    let runner = RecordingRunner::recreating(config.shutdown_file.clone());
    let mut watcher = Watcher::new(
        config.clone(),
        Arc::new(MockGpioBackend::default()),
        runner.clone(),
    );

    touch(&config.shutdown_file);
    assert!(watcher.poll_files().unwrap());

    assert_eq!(runner.scripts(), vec!["sleep 1 && shutdown -h now".to_string()]);
    assert!(config.shutdown_file.exists());
}

#[test]
fn file_action_disables_button() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockGpioBackend::default());
    let config = Arc::new(sample_config(dir.path(), Some(BUTTON), false));
    let mut watcher = Watcher::new(config.clone(), backend, RecordingRunner::default());

    touch(&config.shutdown_file);
    watcher.poll_files().unwrap();

    let gpio = watcher.gpio().expect("button watched");
    assert!(!gpio.handler().is_armed());
}

#[test]
fn debug_press_rearms_button() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockGpioBackend::default());
    let runner = RecordingRunner::default();
    let config = Arc::new(sample_config(dir.path(), Some(BUTTON), true));
    let mut watcher = Watcher::new(config, backend.clone(), runner.clone());

    backend.press(BUTTON).unwrap();
    assert!(!watcher.gpio().unwrap().handler().is_armed());

    assert!(watcher.handle(Trigger::GpioPress { line: BUTTON }).unwrap());
    assert!(watcher.gpio().unwrap().handler().is_armed());
    assert!(runner.scripts().is_empty());
    assert_eq!(watcher.state(), WatchState::Polling);
}

#[tokio::test]
async fn semaphore_while_running_spawns_shutdown_and_keeps_polling() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::default();
    let config = Arc::new(sample_config(dir.path(), None, false));
    let mut watcher = Watcher::new(
        config.clone(),
        Arc::new(MockGpioBackend::default()),
        runner.clone(),
    );

    let (stop_tx, stop_rx) = oneshot::channel();
    let shutdown_file = config.shutdown_file.clone();
    let observer = runner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        touch(&shutdown_file);
        while observer.scripts().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // still polling: give it a few more ticks before stopping
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = stop_tx.send(Signal::SIGTERM);
    });

    let exit = watcher
        .run(async move { stop_rx.await.unwrap_or(Signal::SIGTERM) })
        .await
        .unwrap();

    assert_eq!(exit, Exit::Signal(Signal::SIGTERM));
    assert_eq!(exit.code(), 0);
    assert_eq!(watcher.state(), WatchState::Terminated);
    assert!(!config.shutdown_file.exists());
    assert_eq!(runner.scripts(), vec!["sleep 1 && shutdown -h now".to_string()]);
}

#[tokio::test]
async fn button_press_while_running_spawns_shutdown() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockGpioBackend::default());
    let runner = RecordingRunner::default();
    let config = Arc::new(sample_config(dir.path(), Some(BUTTON), false));
    let mut watcher = Watcher::new(config, backend.clone(), runner.clone());

    backend.press(BUTTON).unwrap();
    backend.press(BUTTON).unwrap();

    let exit = watcher
        .run(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Signal::SIGINT
        })
        .await
        .unwrap();

    assert_eq!(exit, Exit::Signal(Signal::SIGINT));
    assert_eq!(exit.code(), 0);
    assert_eq!(runner.scripts(), vec!["sleep 1 && shutdown -h now".to_string()]);
}

#[tokio::test]
async fn once_mode_completes_after_first_action() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::default();
    let mut config = sample_config(dir.path(), None, false);
    config.once = true;
    let config = Arc::new(config);
    touch(&config.shutdown_file);
    touch(&config.reboot_file);

    let mut watcher = Watcher::new(
        config.clone(),
        Arc::new(MockGpioBackend::default()),
        runner.clone(),
    );
    let exit = watcher.run(std::future::pending()).await.unwrap();

    assert_eq!(exit, Exit::Completed);
    assert_eq!(runner.scripts(), vec!["sleep 1 && shutdown -h now".to_string()]);
    assert!(config.reboot_file.exists());
}

#[tokio::test]
async fn spawn_failure_stops_the_loop() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(sample_config(dir.path(), None, false));
    touch(&config.reboot_file);

    let mut watcher = Watcher::new(
        config,
        Arc::new(MockGpioBackend::default()),
        RecordingRunner::failing(),
    );
    let err = watcher.run(std::future::pending()).await.unwrap_err();

    assert!(matches!(err, WatchError::Spawn(_)));
    assert_eq!(watcher.state(), WatchState::Terminated);
}

#[tokio::test]
async fn delivered_signals_end_the_loop_cleanly() {
    // one test so that raised signals cannot reach another test's listener
    for sig in [Signal::SIGTERM, Signal::SIGHUP, Signal::SIGINT] {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let config = Arc::new(sample_config(dir.path(), None, false));
        let mut watcher = Watcher::new(
            config,
            Arc::new(MockGpioBackend::default()),
            runner.clone(),
        );

        let shutdown = termination_signal().expect("install signal handlers");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            signal::raise(sig).expect("raise signal");
        });

        let exit = watcher.run(shutdown).await.unwrap();

        assert_eq!(exit, Exit::Signal(sig));
        assert_eq!(exit.code(), 0);
        assert_eq!(watcher.state(), WatchState::Terminated);
        assert!(runner.scripts().is_empty());
    }
}
