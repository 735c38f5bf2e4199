//! Driver loop: owns the re-arming tick and the display-event channel
//!
//! The driver is a single task. It waits on its command channel and on the
//! pending tick deadline; a tick runs on the blocking pool and is awaited
//! before anything else is handled, so ticks never overlap.

use crate::controller::{Controller, ControllerStatus};
use crate::error::Result;
use crate::params::{Parameter, ParameterValue};
use crate::policy::{DisplayEvent, Schedule};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Messages consumed by the driver
#[derive(Debug)]
pub enum DriverCommand {
    /// Display power transition from the notifier side
    Display(DisplayEvent),
    /// Reschedule after a parameter write
    Apply(Schedule),
    /// Stop the loop
    Shutdown,
}

/// Cloneable front end used by IPC, the display watcher and the daemon
#[derive(Clone)]
pub struct DriverHandle {
    controller: Arc<Controller>,
    tx: mpsc::UnboundedSender<DriverCommand>,
}

impl DriverHandle {
    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn post(&self, command: DriverCommand) {
        if self.tx.send(command).is_err() {
            warn!("Driver loop is not running");
        }
    }

    /// Queue a display event for the driver
    pub fn display_event(&self, event: DisplayEvent) {
        self.post(DriverCommand::Display(event));
    }

    /// Apply a parameter write under the controller lock, then let the driver
    /// re-arm or cancel its tick
    pub fn set_parameter(&self, param: Parameter, value: ParameterValue) -> Result<()> {
        let schedule = self.controller.set_parameter(param, value)?;
        if schedule != Schedule::Keep {
            self.post(DriverCommand::Apply(schedule));
        }
        Ok(())
    }

    pub fn get_parameter(&self, param: Parameter) -> ParameterValue {
        self.controller.get_parameter(param)
    }

    pub fn status(&self) -> ControllerStatus {
        self.controller.status()
    }

    pub fn shutdown(&self) {
        self.post(DriverCommand::Shutdown);
    }
}

/// The periodic task
pub struct Driver {
    controller: Arc<Controller>,
    rx: mpsc::UnboundedReceiver<DriverCommand>,
    deadline: Option<Instant>,
}

impl Driver {
    pub fn new(controller: Arc<Controller>) -> (Self, DriverHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DriverHandle {
            controller: Arc::clone(&controller),
            tx,
        };
        let driver = Self {
            controller,
            rx,
            deadline: None,
        };
        (driver, handle)
    }

    fn apply(&mut self, schedule: Schedule) {
        match schedule {
            Schedule::Keep => {}
            Schedule::Immediate => self.deadline = Some(Instant::now()),
            Schedule::After(delay) => self.deadline = Some(Instant::now() + delay),
            Schedule::Cancel => self.deadline = None,
        }
    }

    pub async fn run(mut self) {
        info!("Driver loop started");

        loop {
            let deadline = self.deadline;

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(DriverCommand::Display(event)) => {
                        let schedule = self.controller.handle_display(event);
                        self.apply(schedule);
                    }
                    Some(DriverCommand::Apply(schedule)) => self.apply(schedule),
                    Some(DriverCommand::Shutdown) | None => break,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    let controller = Arc::clone(&self.controller);
                    match tokio::task::spawn_blocking(move || controller.tick()).await {
                        Ok(schedule) => {
                            debug!("Tick done, next: {:?}", schedule);
                            self.apply(schedule);
                        }
                        Err(e) => error!("Tick failed: {}", e),
                    }
                }
            }
        }

        info!("Driver loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tunables;
    use crate::policy::Mode;
    use crate::testing::{FakeHotplug, FakeTimes};
    use crate::topology::Topology;
    use std::time::Duration;

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    fn start(
        hw: Arc<FakeHotplug>,
        times: Arc<FakeTimes>,
    ) -> (DriverHandle, tokio::task::JoinHandle<()>) {
        let tunables = Tunables {
            sampling_period_ms: 2,
            ..Tunables::default()
        };
        let controller =
            Arc::new(Controller::new(Topology::default(), tunables, hw, times).unwrap());
        let (driver, handle) = Driver::new(controller);
        (handle, tokio::spawn(driver.run()))
    }

    #[tokio::test]
    async fn test_driver_adds_cores_under_load() {
        let hw = Arc::new(FakeHotplug::with_states(&[
            true, false, false, false, false, false, false, true,
        ]));
        let times = Arc::new(FakeTimes::new(8));
        times.set_load(50);
        let (handle, task) = start(hw.clone(), times.clone());

        handle
            .set_parameter(Parameter::Enabled, ParameterValue::Bool(true))
            .unwrap();
        // the first tick restores every core
        assert!(wait_for(|| hw.online_cores().len() == 8).await);

        times.set_load(0);
        assert!(wait_for(|| hw.online_cores().len() < 8).await);

        times.set_load(100);
        assert!(wait_for(|| hw.online_cores().len() == 8).await);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_suspends_and_resumes_with_display() {
        let hw = Arc::new(FakeHotplug::all_online(8));
        let times = Arc::new(FakeTimes::new(8));
        times.set_load(50);
        let (handle, task) = start(hw.clone(), times);

        handle
            .set_parameter(Parameter::Enabled, ParameterValue::Bool(true))
            .unwrap();
        assert!(wait_for(|| handle.status().mode == Mode::Sampling).await);

        handle.display_event(DisplayEvent::OffComplete);
        assert!(wait_for(|| handle.status().mode == Mode::ScreenOffPower).await);
        assert_eq!(hw.online_cores(), vec![0]);

        // suspended: no further ticks
        let ticks = handle.status().stats.ticks;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handle.status().stats.ticks, ticks);

        handle.display_event(DisplayEvent::OnBegin);
        assert!(wait_for(|| hw.online_cores().len() == 8).await);
        assert!(wait_for(|| handle.status().stats.ticks > ticks + 2).await);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disable_stops_ticking() {
        let hw = Arc::new(FakeHotplug::all_online(8));
        let times = Arc::new(FakeTimes::new(8));
        let (handle, task) = start(hw.clone(), times);

        handle
            .set_parameter(Parameter::Enabled, ParameterValue::Bool(true))
            .unwrap();
        assert!(wait_for(|| handle.status().stats.ticks > 3).await);

        handle
            .set_parameter(Parameter::Enabled, ParameterValue::Bool(false))
            .unwrap();
        assert_eq!(hw.online_cores().len(), 8);

        let switches = hw.switch_count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hw.switch_count(), switches);
        assert_eq!(handle.status().mode, Mode::Disabled);

        handle.shutdown();
        task.await.unwrap();
    }
}
