//! Integration tests covering the single-instance PID-file guarantee end
//! to end, including the service-manager layer.

use std::{
    path::Path,
    thread,
    time::Duration,
};

use tempfile::tempdir;
use unilock::{
    config::ServiceConfig,
    control::{Backend, Command, ServiceManager},
    error::{PidFileError, ServiceControlError, ServiceManagerError},
    pidfile::PidFile,
};

struct NullBackend;

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn control(
        &self,
        _config: &ServiceConfig,
        _cmd: Command,
    ) -> Result<(), ServiceControlError> {
        Ok(())
    }
}

fn config_in(run_dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::new("worker");
    config.run_dir = run_dir.to_path_buf();
    config
}

#[test]
fn one_claim_wins_and_records_our_pid() {
    let temp = tempdir().expect("failed to create temp dir");

    let first = PidFile::claim(temp.path(), "worker").expect("first claim");
    assert_eq!(first.read_pid().expect("read pid"), std::process::id() as i32);
    assert!(first.is_running());

    let err = PidFile::claim(temp.path(), "worker").expect_err("second claim");
    assert!(matches!(err, PidFileError::AlreadyRunning { .. }));
}

#[test]
fn closing_releases_the_slot_for_the_next_claimant() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_path = temp.path().join("worker.pid");

    let mut first = PidFile::claim(temp.path(), "worker").expect("first claim");
    assert!(pid_path.exists());
    first.close();
    assert!(!pid_path.exists());

    let second = PidFile::claim(temp.path(), "worker").expect("reclaim after close");
    assert_eq!(
        second.read_pid().expect("read pid"),
        std::process::id() as i32
    );
}

#[test]
fn waiting_claim_takes_over_from_a_departing_holder() {
    let temp = tempdir().expect("failed to create temp dir");
    let run_dir = temp.path().to_path_buf();

    let holder = PidFile::claim(&run_dir, "worker").expect("holder claim");
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(80));
        drop(holder);
    });

    let ctx = unilock::cancel::WaitContext::with_timeout(Duration::from_secs(5));
    let taken = PidFile::claim_wait(&run_dir, "worker", &ctx, Duration::from_millis(10))
        .expect("claim_wait after holder departs");
    assert_eq!(taken.read_pid().expect("read pid"), std::process::id() as i32);

    releaser.join().expect("releaser thread");
}

#[test]
fn manager_start_stop_cycle_owns_the_pid_file() {
    let temp = tempdir().expect("failed to create temp dir");
    let pid_path = temp.path().join("worker.pid");

    let manager =
        ServiceManager::with_backend(config_in(temp.path()), Box::new(NullBackend));
    manager.start().expect("start");
    assert!(pid_path.exists());

    let rival =
        ServiceManager::with_backend(config_in(temp.path()), Box::new(NullBackend));
    match rival.start() {
        Err(ServiceManagerError::AlreadyRunning { service, path }) => {
            assert_eq!(service, "worker");
            assert_eq!(path, pid_path);
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    manager.stop().expect("stop");
    assert!(!pid_path.exists());

    rival.start().expect("rival start after stop");
    assert!(pid_path.exists());
    rival.shutdown();
    assert!(!pid_path.exists());
}

#[test]
fn absent_run_dir_disables_the_guarantee_quietly() {
    let temp = tempdir().expect("failed to create temp dir");
    let missing = temp.path().join("no-such-dir");

    let pidfile = PidFile::claim(&missing, "worker").expect("inactive claim");
    assert!(!missing.join("worker.pid").exists());
    assert!(matches!(
        pidfile.read_pid(),
        Err(PidFileError::NotClaimed { .. })
    ));

    // With the guarantee disabled, every start succeeds.
    let manager =
        ServiceManager::with_backend(config_in(&missing), Box::new(NullBackend));
    manager.start().expect("first start");
    let another =
        ServiceManager::with_backend(config_in(&missing), Box::new(NullBackend));
    another.start().expect("second start");
}
