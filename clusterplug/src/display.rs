//! Display power detection through the backlight bl_power attribute

use crate::policy::DisplayEvent;
use crate::scheduler::DriverHandle;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Events emitted for a panel power change, in delivery order
pub fn transition_events(was_on: bool, is_on: bool) -> &'static [DisplayEvent] {
    match (was_on, is_on) {
        (true, false) => &[DisplayEvent::OffBegin, DisplayEvent::OffComplete],
        (false, true) => &[DisplayEvent::OnBegin, DisplayEvent::OnComplete],
        _ => &[],
    }
}

/// Polls a backlight device and forwards display transitions to the driver
pub struct BacklightWatcher {
    bl_power: PathBuf,
    poll_interval: Duration,
}

impl BacklightWatcher {
    pub fn new(device: impl AsRef<Path>, poll_interval: Duration) -> Self {
        Self {
            bl_power: device.as_ref().join("bl_power"),
            poll_interval,
        }
    }

    /// Panel state; bl_power is 0 when unblanked
    pub fn read_screen_on(&self) -> io::Result<bool> {
        let raw = fs::read_to_string(&self.bl_power)?;
        let value: u32 = raw
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(value == 0)
    }

    pub async fn run(self, handle: DriverHandle) {
        let mut last = match self.read_screen_on() {
            Ok(on) => on,
            Err(e) => {
                warn!("Cannot read {}: {}, display watcher stopped", self.bl_power.display(), e);
                return;
            }
        };
        info!(
            "Watching {} (screen {})",
            self.bl_power.display(),
            if last { "on" } else { "off" }
        );

        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;

            let now = match self.read_screen_on() {
                Ok(on) => on,
                Err(e) => {
                    debug!("bl_power read failed: {}", e);
                    continue;
                }
            };

            for event in transition_events(last, now) {
                handle.display_event(*event);
            }
            last = now;
        }
    }
}
