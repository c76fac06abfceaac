//! Service-control dispatch.
//!
//! Maps an abstract [`Command`] onto whichever service manager the host
//! actually runs. Each backend is a thin shell-out sequence behind the
//! [`Backend`] trait; [`choose`] picks the first usable one in priority
//! order instead of compiling a single backend in.
use std::path::{Path, PathBuf};
use std::time::Duration;

use strum_macros::{AsRefStr, EnumString};
use tracing::{debug, info};

use crate::cancel::{CancelToken, WaitContext};
use crate::config::ServiceConfig;
use crate::error::{PidFileError, ServiceControlError, ServiceManagerError};
use crate::pidfile::PidFile;
use crate::registry::CloserRegistry;

/// Abstract service-control command, with lowercase string forms matching
/// the common control-tool vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Start,
    Stop,
    Restart,
    Status,
    Install,
    Uninstall,
}

/// A platform service-control backend.
pub trait Backend: Send + Sync {
    /// Short backend identifier for logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this backend can work on the current host.
    fn is_valid(&self) -> bool;

    /// Dispatches one control command for the given service.
    fn control(&self, config: &ServiceConfig, cmd: Command)
    -> Result<(), ServiceControlError>;
}

/// systemd backend: shells out to `systemctl` against `{name}.service`.
pub struct Systemd;

impl Backend for Systemd {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn is_valid(&self) -> bool {
        cfg!(target_os = "linux") && Path::new("/run/systemd/system").is_dir()
    }

    fn control(
        &self,
        config: &ServiceConfig,
        cmd: Command,
    ) -> Result<(), ServiceControlError> {
        let unit = format!("{}.service", config.name);
        let verb = match cmd {
            Command::Start | Command::Stop | Command::Restart | Command::Status => {
                cmd.as_ref()
            }
            Command::Install => "enable",
            Command::Uninstall => "disable",
        };
        run_tool("systemctl", &[verb, &unit], config, cmd)
    }
}

/// launchd backend: shells out to `launchctl` against a reverse-DNS label.
pub struct Launchd;

impl Launchd {
    fn label(config: &ServiceConfig) -> String {
        format!("com.unilock.{}", config.name)
    }

    fn plist_path(config: &ServiceConfig) -> PathBuf {
        PathBuf::from(format!(
            "/Library/LaunchDaemons/{}.plist",
            Self::label(config)
        ))
    }
}

impl Backend for Launchd {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn is_valid(&self) -> bool {
        cfg!(target_os = "macos") && Path::new("/bin/launchctl").exists()
    }

    fn control(
        &self,
        config: &ServiceConfig,
        cmd: Command,
    ) -> Result<(), ServiceControlError> {
        let label = Self::label(config);
        match cmd {
            Command::Start | Command::Stop => {
                run_tool("launchctl", &[cmd.as_ref(), &label], config, cmd)
            }
            Command::Restart => {
                run_tool("launchctl", &["stop", &label], config, cmd)?;
                run_tool("launchctl", &["start", &label], config, cmd)
            }
            Command::Status => run_tool("launchctl", &["list", &label], config, cmd),
            Command::Install => {
                let plist = Self::plist_path(config);
                run_tool(
                    "launchctl",
                    &["load", &plist.to_string_lossy()],
                    config,
                    cmd,
                )
            }
            Command::Uninstall => {
                let plist = Self::plist_path(config);
                run_tool(
                    "launchctl",
                    &["unload", &plist.to_string_lossy()],
                    config,
                    cmd,
                )
            }
        }
    }
}

/// sysvinit backend: shells out to `service` and `update-rc.d`. Lowest
/// priority; only chosen when no modern manager is present.
pub struct Sysvinit;

impl Backend for Sysvinit {
    fn name(&self) -> &'static str {
        "sysvinit"
    }

    fn is_valid(&self) -> bool {
        cfg!(unix) && Path::new("/etc/init.d").is_dir()
    }

    fn control(
        &self,
        config: &ServiceConfig,
        cmd: Command,
    ) -> Result<(), ServiceControlError> {
        match cmd {
            Command::Start | Command::Stop | Command::Restart | Command::Status => {
                run_tool("service", &[&config.name, cmd.as_ref()], config, cmd)
            }
            Command::Install => {
                run_tool("update-rc.d", &[&config.name, "defaults"], config, cmd)
            }
            Command::Uninstall => {
                run_tool("update-rc.d", &["-f", &config.name, "remove"], config, cmd)
            }
        }
    }
}

/// Backends in selection priority order.
pub fn backends() -> Vec<Box<dyn Backend>> {
    vec![Box::new(Systemd), Box::new(Launchd), Box::new(Sysvinit)]
}

/// Picks the first backend that reports itself usable on this host.
pub fn choose() -> Option<Box<dyn Backend>> {
    backends().into_iter().find(|backend| backend.is_valid())
}

fn run_tool(
    tool: &'static str,
    args: &[&str],
    config: &ServiceConfig,
    cmd: Command,
) -> Result<(), ServiceControlError> {
    debug!("Running {} {:?} for service '{}'", tool, args, config.name);

    let mut proc = std::process::Command::new(tool);
    proc.args(args);
    if let Some(env) = &config.env {
        proc.envs(env);
    }
    if let Some(dir) = &config.working_dir {
        proc.current_dir(dir);
    }

    let status = proc
        .status()
        .map_err(|source| ServiceControlError::SpawnError {
            tool,
            service: config.name.clone(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(ServiceControlError::CommandFailed {
            tool,
            command: cmd.as_ref().to_string(),
            service: config.name.clone(),
            status: status.code(),
        })
    }
}

/// Owns a service's configuration, the chosen backend, and the shutdown
/// registry its PID file is parked in.
pub struct ServiceManager {
    config: ServiceConfig,
    backend: Box<dyn Backend>,
    closers: CloserRegistry,
}

impl ServiceManager {
    /// Builds a manager with the host's first valid backend.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceManagerError> {
        let backend = choose().ok_or(ServiceControlError::NoBackend)?;
        info!(
            "Selected service-control backend '{}' for '{}'",
            backend.name(),
            config.name
        );
        Ok(Self::with_backend(config, backend))
    }

    /// Builds a manager around an explicit backend.
    pub fn with_backend(config: ServiceConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            closers: CloserRegistry::new(),
        }
    }

    /// The managed service's configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The chosen backend's identifier.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Claims the single-instance PID file, registers it for shutdown
    /// cleanup, then dispatches `start`. A contended claim surfaces as
    /// [`ServiceManagerError::AlreadyRunning`].
    pub fn start(&self) -> Result<(), ServiceManagerError> {
        let pidfile = PidFile::claim(&self.config.run_dir, &self.config.name);
        self.register_claim(pidfile)?;
        self.backend.control(&self.config, Command::Start)?;
        Ok(())
    }

    /// Like [`ServiceManager::start`], but waits up to `timeout` for a
    /// previous instance to let go of the PID file, polling every 100ms.
    /// An optional token (e.g. from
    /// [`cancel_on_ctrlc`](crate::cancel::cancel_on_ctrlc)) aborts the
    /// wait early.
    pub fn start_waiting(
        &self,
        timeout: Duration,
        token: Option<CancelToken>,
    ) -> Result<(), ServiceManagerError> {
        let mut ctx = WaitContext::with_timeout(timeout);
        if let Some(token) = token {
            ctx = ctx.token(token);
        }

        let pidfile = PidFile::claim_wait(
            &self.config.run_dir,
            &self.config.name,
            &ctx,
            Duration::from_millis(100),
        );
        self.register_claim(pidfile)?;
        self.backend.control(&self.config, Command::Start)?;
        Ok(())
    }

    fn register_claim(
        &self,
        claim: Result<PidFile, PidFileError>,
    ) -> Result<(), ServiceManagerError> {
        match claim {
            Ok(pidfile) => {
                self.closers.register(Box::new(pidfile));
                Ok(())
            }
            Err(PidFileError::AlreadyRunning { path }) => {
                Err(ServiceManagerError::AlreadyRunning {
                    service: self.config.name.clone(),
                    path,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Dispatches `stop` and tears down registered peripherals.
    pub fn stop(&self) -> Result<(), ServiceManagerError> {
        self.backend.control(&self.config, Command::Stop)?;
        self.closers.close_all();
        Ok(())
    }

    /// Dispatches `restart`.
    pub fn restart(&self) -> Result<(), ServiceManagerError> {
        self.backend.control(&self.config, Command::Restart)?;
        Ok(())
    }

    /// Dispatches `status`.
    pub fn status(&self) -> Result<(), ServiceManagerError> {
        self.backend.control(&self.config, Command::Status)?;
        Ok(())
    }

    /// Dispatches an arbitrary command without touching the PID file.
    pub fn dispatch(&self, cmd: Command) -> Result<(), ServiceManagerError> {
        self.backend.control(&self.config, cmd)?;
        Ok(())
    }

    /// Closes registered peripherals (PID file removal included) without
    /// dispatching anything.
    pub fn shutdown(&self) {
        self.closers.close_all();
    }
}
