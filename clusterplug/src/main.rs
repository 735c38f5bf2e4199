//! Clusterplug - Load-driven big.LITTLE core hotplug daemon for DaemonOS
//!
//! Provides:
//! - Vote-based core add/remove from aggregate load
//! - Low power and screen-off power modes (LITTLE cluster only)
//! - Backlight-driven display events
//! - Runtime tunables over IPC

use anyhow::Result;
use chrono::{DateTime, Local};
use clap::Parser;
use clusterplug::config::ClusterPlugConfig;
use clusterplug::controller::Controller;
use clusterplug::display::BacklightWatcher;
use clusterplug::hotplug::SysfsHotplug;
use clusterplug::ipc::{DaemonStatus, IpcHandler, IpcServer};
use clusterplug::params::{Parameter, ParameterValue};
use clusterplug::policy::DisplayEvent;
use clusterplug::sampler::ProcStatSource;
use clusterplug::scheduler::{Driver, DriverHandle};
use clusterplug::topology::Topology;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Clusterplug - core hotplug daemon
#[derive(Parser, Debug)]
#[command(name = "clusterplugd", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/grimoire/system/clusterplug.yaml")]
    config: PathBuf,

    /// Socket path (overrides daemon.socket_path)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Debug mode
    #[arg(short, long)]
    debug: bool,
}

/// Daemon state
struct ClusterPlugDaemon {
    handle: DriverHandle,
    started_at: DateTime<Local>,
}

impl IpcHandler for ClusterPlugDaemon {
    fn get_daemon_status(&self) -> Result<DaemonStatus> {
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            controller: self.handle.status(),
        })
    }

    fn get_parameter(&self, name: Parameter) -> ParameterValue {
        self.handle.get_parameter(name)
    }

    fn set_parameter(&self, name: Parameter, value: ParameterValue) -> Result<()> {
        self.handle.set_parameter(name, value)?;
        Ok(())
    }

    fn display_event(&self, event: DisplayEvent) -> Result<()> {
        self.handle.display_event(event);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ClusterPlugConfig::load(&args.config)?;

    let log_level = if args.debug {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .init();

    info!("Clusterplug v{} starting", env!("CARGO_PKG_VERSION"));

    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root, core hotplug writes will likely fail");
    }

    let topology = Topology::from_config(&config.topology)?;
    info!(
        "Topology: {} big, {} LITTLE, {:?}",
        topology.num_big(),
        topology.num_little(),
        topology.layout()
    );

    let hotplug = Arc::new(SysfsHotplug::new(&config.hotplug.cpu_sysfs_path));
    let times = Arc::new(ProcStatSource::new(&config.hotplug.proc_stat_path));
    let controller = Arc::new(Controller::new(topology, config.tunables, hotplug, times)?);

    let (driver, handle) = Driver::new(controller);
    let driver_task = tokio::spawn(driver.run());

    // Mode flags first so the first tick already sees them
    let policy = &config.policy;
    for (param, on) in [
        (Parameter::LowPowerMode, policy.low_power_mode),
        (Parameter::ScreenOffPowerMode, policy.screen_off_power_mode),
        (Parameter::Enabled, policy.enabled),
    ] {
        if on {
            handle.set_parameter(param, ParameterValue::Bool(true))?;
        }
    }

    // Start display watcher
    if let Some(device) = &config.display.backlight_device {
        let watcher = BacklightWatcher::new(
            device,
            Duration::from_millis(config.display.poll_interval_ms),
        );
        tokio::spawn(watcher.run(handle.clone()));
    }

    // Start IPC server
    let socket_path = match &args.socket {
        Some(path) => path.to_string_lossy().to_string(),
        None => config.daemon.socket_path.clone(),
    };
    let daemon = Arc::new(ClusterPlugDaemon {
        handle: handle.clone(),
        started_at: Local::now(),
    });
    let server = IpcServer::new(socket_path.clone(), daemon);

    let mut sigterm = signal(SignalKind::terminate())?;

    info!("Clusterplug ready");
    let outcome = tokio::select! {
        res = server.run() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!("IPC server failed: {}", e);
    }

    // Leave every core online behind us
    let disable = handle.clone();
    match tokio::task::spawn_blocking(move || {
        disable.set_parameter(Parameter::Enabled, ParameterValue::Bool(false))
    })
    .await
    {
        Ok(Err(e)) => warn!("Failed to disable controller: {}", e),
        Err(e) => warn!("Failed to disable controller: {}", e),
        Ok(Ok(())) => {}
    }
    handle.shutdown();
    if let Err(e) = driver_task.await {
        warn!("Driver task ended abnormally: {}", e);
    }
    let _ = std::fs::remove_file(&socket_path);

    info!("Clusterplug stopped");
    outcome
}
