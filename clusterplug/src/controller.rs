//! The core-count controller
//!
//! All mutable state sits in one `ControllerState` behind one mutex. Ticks,
//! display events and parameter writes each take that lock for their whole
//! duration, so they are serialized against each other. Core switches take the
//! per-core device lock inside it.

use crate::config::Tunables;
use crate::error::{ClusterPlugError, Result};
use crate::hotplug::{CoreSwitcher, CpuHotplug, SwitchTally};
use crate::params::{Parameter, ParameterValue};
use crate::policy::{ClusterState, DisplayEvent, Mode, Schedule};
use crate::sampler::{CpuTimeSource, LoadReport, LoadSampler};
use crate::topology::{CoreId, Topology};
use crate::vote::{Action, VoteCounters};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// In-memory counters, reset on restart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    pub ticks: u64,
    pub decisions: u64,
    pub cores_onlined: u64,
    pub cores_offlined: u64,
    pub switch_failures: u64,
    pub last_load: Option<LoadReport>,
    pub last_action: Option<Action>,
    pub last_action_at: Option<DateTime<Local>>,
}

impl ControllerStats {
    fn record_tally(&mut self, tally: SwitchTally) {
        self.cores_onlined += tally.onlined as u64;
        self.cores_offlined += tally.offlined as u64;
        self.switch_failures += tally.failed as u64;
    }

    fn record_action(&mut self, action: Action) {
        self.last_action = Some(action);
        self.last_action_at = Some(Local::now());
    }
}

/// Everything guarded by the controller lock
#[derive(Debug, Clone)]
struct ControllerState {
    enabled: bool,
    cluster: ClusterState,
    votes: VoteCounters,
    tunables: Tunables,
    stats: ControllerStats,
}

/// Snapshot for status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub mode: Mode,
    pub cluster: ClusterState,
    pub votes: VoteCounters,
    pub tunables: Tunables,
    pub topology: Topology,
    pub online_cores: Vec<CoreId>,
    pub stats: ControllerStats,
}

/// Load-driven core-count controller
pub struct Controller {
    state: Mutex<ControllerState>,
    switcher: CoreSwitcher,
    sampler: LoadSampler,
}

impl Controller {
    pub fn new(
        topology: Topology,
        tunables: Tunables,
        hotplug: Arc<dyn CpuHotplug>,
        times: Arc<dyn CpuTimeSource>,
    ) -> Result<Self> {
        tunables.validate(&topology)?;

        Ok(Self {
            state: Mutex::new(ControllerState {
                enabled: false,
                cluster: ClusterState::default(),
                votes: VoteCounters::default(),
                tunables,
                stats: ControllerStats::default(),
            }),
            switcher: CoreSwitcher::new(hotplug, topology),
            sampler: LoadSampler::new(times, &topology),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn topology(&self) -> &Topology {
        self.switcher.topology()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn mode(&self) -> Mode {
        let state = self.lock();
        state.cluster.mode(state.enabled)
    }

    /// One run of the periodic task
    pub fn tick(&self) -> Schedule {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.stats.ticks += 1;

        if state.cluster.force_online_all {
            self.restore_all_cores(state);
            return if state.enabled {
                Schedule::After(state.tunables.sampling_period())
            } else {
                Schedule::Cancel
            };
        }

        if !state.enabled {
            return Schedule::Cancel;
        }

        if state.cluster.power_save_required() {
            self.enter_power_save(state);
            return Schedule::Cancel;
        }

        match self.decide(state) {
            Ok(_) => {}
            Err(ClusterPlugError::AggregationDegenerate) => {
                error!("No online cores observed, restoring all cores on the next tick");
                state.cluster.force_online_all = true;
            }
            Err(e) if e.is_transient() => warn!("Decision cycle failed: {}", e),
            Err(e) => error!("Decision cycle failed: {}", e),
        }

        Schedule::After(state.tunables.sampling_period())
    }

    /// Aggregate, vote, and switch at most one core
    fn decide(&self, state: &mut ControllerState) -> Result<Action> {
        let topology = *self.switcher.topology();
        let report = self
            .sampler
            .aggregate(&topology, |cpu| self.switcher.is_online(cpu))?;

        let action = state.votes.observe(report.average, &state.tunables);
        state.stats.decisions += 1;
        state.stats.last_load = Some(report);
        debug!("vote_up {} vote_down {}", state.votes.up, state.votes.down);

        let switched = match action {
            Action::None => return Ok(action),
            Action::AddCore => self.switcher.add_one_core(),
            Action::RemoveCore => self.switcher.remove_one_core(),
        };

        match switched {
            Ok(Some(_)) if action == Action::AddCore => state.stats.cores_onlined += 1,
            Ok(Some(_)) => state.stats.cores_offlined += 1,
            Ok(None) => {}
            Err(e) => {
                if e.is_transient() {
                    warn!("{}", e);
                } else {
                    error!("{}", e);
                }
                state.stats.switch_failures += 1;
            }
        }
        state.stats.record_action(action);

        Ok(action)
    }

    fn restore_all_cores(&self, state: &mut ControllerState) {
        let tally = self.switcher.online_all();
        state.stats.record_tally(tally);
        state.cluster.big_enabled = true;
        state.cluster.little_enabled = true;
        state.cluster.force_online_all = false;
    }

    fn enter_power_save(&self, state: &mut ControllerState) {
        let limit = state.cluster.little_limit(&state.tunables);

        let mut tally = self.switcher.enable_little_cluster(limit);
        tally.merge(self.switcher.disable_big_cluster());
        state.stats.record_tally(tally);

        state.cluster.little_enabled = true;
        state.cluster.big_enabled = false;
        state.cluster.suspended = true;
        state.votes.reset();

        info!("Entered {} mode, sampling suspended", state.cluster.mode(state.enabled));
    }

    /// React to a display power transition
    pub fn handle_display(&self, event: DisplayEvent) -> Schedule {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.enabled {
            debug!("Ignoring {:?}, controller disabled", event);
            return Schedule::Keep;
        }

        match event {
            DisplayEvent::OffBegin | DisplayEvent::OnComplete => {
                debug!("Display {:?}", event);
                Schedule::Keep
            }
            DisplayEvent::OffComplete => {
                info!("Display off");
                state.cluster.screen_on = false;
                // let the tick re-apply the power-save action and re-suspend
                if state.cluster.suspended {
                    state.cluster.suspended = false;
                    Schedule::Immediate
                } else {
                    Schedule::Keep
                }
            }
            DisplayEvent::OnBegin => {
                info!("Display on");
                state.cluster.screen_on = true;
                if state.cluster.suspended {
                    state.cluster.force_online_all = true;
                    state.cluster.suspended = false;
                    state.votes.reset();
                    Schedule::Immediate
                } else {
                    Schedule::Keep
                }
            }
        }
    }

    /// Start or stop the controller. Stopping restores every core before
    /// returning and leaves no tick armed.
    pub fn set_enabled(&self, on: bool) -> Schedule {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.enabled == on {
            return Schedule::Keep;
        }

        state.enabled = on;
        state.votes.reset();
        state.cluster.suspended = false;

        if on {
            info!("Controller enabled");
            state.cluster.force_online_all = true;
            Schedule::Immediate
        } else {
            self.restore_all_cores(state);
            info!("Controller disabled");
            Schedule::Cancel
        }
    }

    pub fn set_low_power_mode(&self, on: bool) -> Schedule {
        self.set_power_mode(on, ClusterState::set_low_power_mode)
    }

    pub fn set_screen_off_power_mode(&self, on: bool) -> Schedule {
        self.set_power_mode(on, ClusterState::set_screen_off_power_mode)
    }

    fn set_power_mode(&self, on: bool, apply: fn(&mut ClusterState, bool) -> bool) -> Schedule {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !apply(&mut state.cluster, on) {
            return Schedule::Keep;
        }
        state.votes.reset();
        debug!(
            "low_power_mode={} screen_off_power_mode={}",
            state.cluster.low_power_mode, state.cluster.screen_off_power_mode
        );

        if !state.enabled {
            return Schedule::Keep;
        }

        if state.cluster.suspended && !state.cluster.power_save_required() {
            state.cluster.force_online_all = true;
        }
        state.cluster.suspended = false;
        Schedule::Immediate
    }

    /// Validate and apply a parameter write; rejected writes change nothing
    pub fn set_parameter(&self, param: Parameter, value: ParameterValue) -> Result<Schedule> {
        match param {
            Parameter::Enabled => Ok(self.set_enabled(value.expect_bool(param)?)),
            Parameter::LowPowerMode => Ok(self.set_low_power_mode(value.expect_bool(param)?)),
            Parameter::ScreenOffPowerMode => {
                Ok(self.set_screen_off_power_mode(value.expect_bool(param)?))
            }
            Parameter::LoadThresholdUp => {
                self.update_tunables(param, value, |t, v| t.load_threshold_up = v)
            }
            Parameter::LoadThresholdDown => {
                self.update_tunables(param, value, |t, v| t.load_threshold_down = v)
            }
            Parameter::SamplingPeriodMs => {
                self.update_tunables(param, value, |t, v| t.sampling_period_ms = v)
            }
            Parameter::VoteThresholdUp => {
                self.update_tunables(param, value, |t, v| t.vote_threshold_up = v)
            }
            Parameter::VoteThresholdDown => {
                self.update_tunables(param, value, |t, v| t.vote_threshold_down = v)
            }
            Parameter::MaxCoresWhenScreenOff => {
                self.update_tunables(param, value, |t, v| t.max_cores_when_screen_off = v)
            }
        }
    }

    fn update_tunables(
        &self,
        param: Parameter,
        value: ParameterValue,
        apply: impl FnOnce(&mut Tunables, u32),
    ) -> Result<Schedule> {
        let value = value.expect_uint(param)?;
        let mut state = self.lock();
        let mut candidate = state.tunables;
        apply(&mut candidate, value);
        candidate.validate(self.switcher.topology())?;
        state.tunables = candidate;
        info!("{} set to {}", param, value);
        // a new sampling period takes effect when the tick re-arms
        Ok(Schedule::Keep)
    }

    pub fn get_parameter(&self, param: Parameter) -> ParameterValue {
        let state = self.lock();
        let t = &state.tunables;
        match param {
            Parameter::Enabled => ParameterValue::Bool(state.enabled),
            Parameter::LowPowerMode => ParameterValue::Bool(state.cluster.low_power_mode),
            Parameter::ScreenOffPowerMode => {
                ParameterValue::Bool(state.cluster.screen_off_power_mode)
            }
            Parameter::LoadThresholdUp => ParameterValue::Uint(t.load_threshold_up),
            Parameter::LoadThresholdDown => ParameterValue::Uint(t.load_threshold_down),
            Parameter::SamplingPeriodMs => ParameterValue::Uint(t.sampling_period_ms),
            Parameter::VoteThresholdUp => ParameterValue::Uint(t.vote_threshold_up),
            Parameter::VoteThresholdDown => ParameterValue::Uint(t.vote_threshold_down),
            Parameter::MaxCoresWhenScreenOff => ParameterValue::Uint(t.max_cores_when_screen_off),
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.lock().clone();
        ControllerStatus {
            enabled: state.enabled,
            mode: state.cluster.mode(state.enabled),
            cluster: state.cluster,
            votes: state.votes,
            tunables: state.tunables,
            topology: *self.switcher.topology(),
            online_cores: self.switcher.online_cores(),
            stats: state.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHotplug, FakeTimes};
    use std::time::Duration;

    struct Harness {
        hw: Arc<FakeHotplug>,
        times: Arc<FakeTimes>,
        ctl: Controller,
    }

    fn harness(tunables: Tunables) -> Harness {
        let topo = Topology::default();
        let hw = Arc::new(FakeHotplug::all_online(8));
        let times = Arc::new(FakeTimes::new(8));
        let ctl = Controller::new(topo, tunables, hw.clone(), times.clone()).unwrap();
        Harness { hw, times, ctl }
    }

    /// Enabled and through the initial force-online tick
    fn running(tunables: Tunables) -> Harness {
        let h = harness(tunables);
        assert_eq!(h.ctl.set_enabled(true), Schedule::Immediate);
        assert_eq!(h.ctl.mode(), Mode::ForceOnlineAll);
        h.ctl.tick();
        assert_eq!(h.ctl.mode(), Mode::Sampling);
        h
    }

    fn period(ms: u32) -> Schedule {
        Schedule::After(Duration::from_millis(ms as u64))
    }

    #[test]
    fn test_high_load_adds_core_on_third_tick() {
        let h = running(Tunables::default());
        h.hw.force(6, false);
        h.times.set_load(85);

        assert_eq!(h.ctl.tick(), period(50));
        assert_eq!(h.ctl.tick(), period(50));
        assert!(!h.hw.is_on(6));
        h.ctl.tick();
        assert!(h.hw.is_on(6));

        let status = h.ctl.status();
        assert_eq!(status.votes, VoteCounters::default());
        assert_eq!(status.stats.cores_onlined, 1);
        assert_eq!(status.stats.last_action, Some(Action::AddCore));
    }

    #[test]
    fn test_low_load_sheds_cores_but_keeps_anchors() {
        let h = running(Tunables::default());
        h.times.set_load(0);

        for _ in 0..200 {
            h.ctl.tick();
        }
        assert_eq!(h.hw.online_cores(), vec![0, 7]);
        assert_eq!(h.ctl.status().stats.cores_offlined, 6);
    }

    #[test]
    fn test_dead_band_keeps_topology() {
        let h = running(Tunables::default());
        h.times.set_load(50);
        for _ in 0..50 {
            h.ctl.tick();
        }
        assert_eq!(h.hw.online_cores().len(), 8);
        assert_eq!(h.ctl.status().votes, VoteCounters::default());
    }

    #[test]
    fn test_screen_off_drops_to_capped_little_cluster() {
        let h = running(Tunables {
            max_cores_when_screen_off: 2,
            ..Tunables::default()
        });
        h.times.set_load(50);

        assert_eq!(h.ctl.handle_display(DisplayEvent::OffComplete), Schedule::Keep);
        assert_eq!(h.ctl.tick(), Schedule::Cancel);

        assert_eq!(h.hw.online_cores(), vec![0, 1]);
        let status = h.ctl.status();
        assert_eq!(status.mode, Mode::ScreenOffPower);
        assert!(!status.cluster.big_enabled);
        assert!(status.cluster.suspended);
    }

    #[test]
    fn test_screen_off_power_mode_keeps_sampling() {
        let h = running(Tunables::default());
        h.times.set_load(50);
        assert_eq!(h.ctl.set_screen_off_power_mode(true), Schedule::Immediate);
        assert_eq!(h.ctl.tick(), period(50));

        assert_eq!(h.ctl.handle_display(DisplayEvent::OffComplete), Schedule::Keep);
        assert_eq!(h.ctl.tick(), period(50));
        assert_eq!(h.ctl.mode(), Mode::Sampling);
        assert_eq!(h.hw.online_cores().len(), 8);
    }

    #[test]
    fn test_screen_off_power_mode_set_while_suspended_resumes() {
        let h = running(Tunables::default());
        h.ctl.handle_display(DisplayEvent::OffComplete);
        assert_eq!(h.ctl.tick(), Schedule::Cancel);
        assert_eq!(h.hw.online_cores(), vec![0]);

        assert_eq!(h.ctl.set_screen_off_power_mode(true), Schedule::Immediate);
        assert_eq!(h.ctl.mode(), Mode::ForceOnlineAll);
        assert_eq!(h.ctl.tick(), period(50));
        assert_eq!(h.hw.online_cores().len(), 8);
        assert_eq!(h.ctl.mode(), Mode::Sampling);
    }

    #[test]
    fn test_resume_forces_all_online_then_samples() {
        let h = running(Tunables::default());
        h.ctl.handle_display(DisplayEvent::OffComplete);
        h.ctl.tick();
        assert_eq!(h.hw.online_cores(), vec![0]);

        assert_eq!(h.ctl.handle_display(DisplayEvent::OnBegin), Schedule::Immediate);
        assert_eq!(h.ctl.mode(), Mode::ForceOnlineAll);

        assert_eq!(h.ctl.tick(), period(50));
        assert_eq!(h.hw.online_cores().len(), 8);
        let status = h.ctl.status();
        assert!(status.cluster.big_enabled && status.cluster.little_enabled);
        assert_eq!(status.mode, Mode::Sampling);

        h.times.set_load(90);
        h.ctl.tick();
        assert_eq!(h.ctl.status().votes, VoteCounters { up: 1, down: 0 });
    }

    #[test]
    fn test_screen_off_while_suspended_restarts_once() {
        let h = running(Tunables::default());
        h.ctl.set_low_power_mode(true);
        assert_eq!(h.ctl.tick(), Schedule::Cancel);
        // screen on: LITTLE cluster unbounded
        assert_eq!(h.hw.online_cores(), vec![0, 1, 2, 3]);

        h.hw.force(5, true);
        assert_eq!(h.ctl.handle_display(DisplayEvent::OffComplete), Schedule::Immediate);
        assert_eq!(h.ctl.tick(), Schedule::Cancel);
        assert_eq!(h.hw.online_cores(), vec![0]);
        assert_eq!(h.ctl.mode(), Mode::LowPower);
    }

    #[test]
    fn test_clearing_low_power_mode_forces_online() {
        let h = running(Tunables::default());
        h.ctl.set_low_power_mode(true);
        h.ctl.tick();
        assert_eq!(h.ctl.mode(), Mode::LowPower);

        assert_eq!(h.ctl.set_low_power_mode(false), Schedule::Immediate);
        assert_eq!(h.ctl.mode(), Mode::ForceOnlineAll);
        h.ctl.tick();
        assert_eq!(h.hw.online_cores().len(), 8);
    }

    #[test]
    fn test_disable_restores_cores_and_stops_ticks() {
        let h = running(Tunables::default());
        h.ctl.set_low_power_mode(true);
        h.ctl.tick();
        assert_eq!(h.hw.online_cores().len(), 4);

        assert_eq!(h.ctl.set_enabled(false), Schedule::Cancel);
        assert_eq!(h.hw.online_cores().len(), 8);
        assert_eq!(h.ctl.mode(), Mode::Disabled);

        let switches = h.hw.switch_count();
        h.times.set_load(0);
        assert_eq!(h.ctl.tick(), Schedule::Cancel);
        assert_eq!(h.hw.switch_count(), switches);
    }

    #[test]
    fn test_display_events_ignored_while_disabled() {
        let h = harness(Tunables::default());
        assert_eq!(h.ctl.handle_display(DisplayEvent::OffComplete), Schedule::Keep);
        assert!(h.ctl.status().cluster.screen_on);
    }

    #[test]
    fn test_enable_is_idempotent() {
        let h = running(Tunables::default());
        assert_eq!(h.ctl.set_enabled(true), Schedule::Keep);
        assert_eq!(h.ctl.mode(), Mode::Sampling);
    }

    #[test]
    fn test_parameter_writes_validated() {
        let h = harness(Tunables::default());

        let err = h
            .ctl
            .set_parameter(Parameter::LoadThresholdDown, ParameterValue::Uint(90))
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(
            h.ctl.get_parameter(Parameter::LoadThresholdDown),
            ParameterValue::Uint(20)
        );

        assert!(h
            .ctl
            .set_parameter(Parameter::MaxCoresWhenScreenOff, ParameterValue::Uint(0))
            .is_err());
        assert!(h
            .ctl
            .set_parameter(Parameter::SamplingPeriodMs, ParameterValue::Bool(true))
            .is_err());

        h.ctl
            .set_parameter(Parameter::SamplingPeriodMs, ParameterValue::Uint(100))
            .unwrap();
        assert_eq!(
            h.ctl.get_parameter(Parameter::SamplingPeriodMs),
            ParameterValue::Uint(100)
        );
    }

    #[test]
    fn test_power_mode_writes_exclusive() {
        let h = harness(Tunables::default());
        h.ctl
            .set_parameter(Parameter::LowPowerMode, ParameterValue::Bool(true))
            .unwrap();
        h.ctl
            .set_parameter(Parameter::ScreenOffPowerMode, ParameterValue::Uint(1))
            .unwrap();
        assert_eq!(
            h.ctl.get_parameter(Parameter::LowPowerMode),
            ParameterValue::Bool(false)
        );
        assert_eq!(
            h.ctl.get_parameter(Parameter::ScreenOffPowerMode),
            ParameterValue::Bool(true)
        );
    }

    #[test]
    fn test_failed_switch_retried_next_cycle() {
        let h = running(Tunables::default());
        h.hw.force(6, false);
        h.hw.fail_on(6);
        h.times.set_load(95);

        for _ in 0..3 {
            h.ctl.tick();
        }
        assert!(!h.hw.is_on(6));
        assert_eq!(h.ctl.status().stats.switch_failures, 1);

        h.hw.clear_failures();
        for _ in 0..3 {
            h.ctl.tick();
        }
        assert!(h.hw.is_on(6));
    }

    #[test]
    fn test_unreadable_counters_skip_the_cycle() {
        let h = running(Tunables::default());
        h.times.set_load(100);
        h.times.set_unreadable(true);
        h.hw.force(6, false);

        for _ in 0..5 {
            assert_eq!(h.ctl.tick(), period(50));
        }
        let status = h.ctl.status();
        assert_eq!(status.stats.decisions, 0);
        assert_eq!(status.mode, Mode::Sampling);
        assert!(!h.hw.is_on(6));

        h.times.set_unreadable(false);
        for _ in 0..3 {
            h.ctl.tick();
        }
        assert!(h.hw.is_on(6));
    }

    #[test]
    fn test_zero_online_cores_triggers_restore() {
        let h = running(Tunables::default());
        for cpu in 0..8 {
            h.hw.force(cpu, false);
        }
        assert_eq!(h.ctl.tick(), period(50));
        assert_eq!(h.ctl.mode(), Mode::ForceOnlineAll);
        h.ctl.tick();
        assert_eq!(h.hw.online_cores().len(), 8);
    }
}
