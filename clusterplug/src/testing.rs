//! In-memory hotplug and time backends for tests

use crate::hotplug::CpuHotplug;
use crate::sampler::{CpuTimeSource, CpuTimes};
use crate::topology::CoreId;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Hotplug backend holding core states in memory
#[derive(Default)]
pub struct FakeHotplug {
    states: Mutex<Vec<bool>>,
    failing: Mutex<HashSet<CoreId>>,
    switches: AtomicUsize,
}

impl FakeHotplug {
    pub fn with_states(states: &[bool]) -> Self {
        Self {
            states: Mutex::new(states.to_vec()),
            ..Self::default()
        }
    }

    pub fn all_online(n: usize) -> Self {
        Self::with_states(&vec![true; n])
    }

    pub fn is_on(&self, cpu: CoreId) -> bool {
        self.states.lock().unwrap()[cpu]
    }

    /// Change a core behind the switcher's back
    pub fn force(&self, cpu: CoreId, online: bool) {
        self.states.lock().unwrap()[cpu] = online;
    }

    pub fn fail_on(&self, cpu: CoreId) {
        self.failing.lock().unwrap().insert(cpu);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn online_cores(&self) -> Vec<CoreId> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(cpu, _)| cpu)
            .collect()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }
}

impl CpuHotplug for FakeHotplug {
    fn is_online(&self, cpu: CoreId) -> io::Result<bool> {
        self.states
            .lock()
            .unwrap()
            .get(cpu)
            .copied()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn set_online(&self, cpu: CoreId, online: bool) -> io::Result<()> {
        if self.failing.lock().unwrap().contains(&cpu) {
            return Err(io::Error::new(io::ErrorKind::Other, "device busy"));
        }
        let mut states = self.states.lock().unwrap();
        let state = states
            .get_mut(cpu)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        *state = online;
        self.switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Time source that advances every core by a fixed load per refresh
pub struct FakeTimes {
    times: Mutex<Vec<CpuTimes>>,
    load: Mutex<u32>,
    unreadable: AtomicBool,
}

impl FakeTimes {
    pub fn new(n: usize) -> Self {
        Self {
            times: Mutex::new(vec![CpuTimes::default(); n]),
            load: Mutex::new(0),
            unreadable: AtomicBool::new(false),
        }
    }

    /// Load reported by every core from the next refresh on
    pub fn set_load(&self, load: u32) {
        *self.load.lock().unwrap() = load.min(100);
    }

    /// Make every refresh fail like a garbled /proc/stat
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }
}

impl CpuTimeSource for FakeTimes {
    fn refresh(&self) -> crate::error::Result<()> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(crate::error::ClusterPlugError::Parse("cpu3: bad field".into()));
        }
        let load = *self.load.lock().unwrap() as u64;
        for t in self.times.lock().unwrap().iter_mut() {
            t.wall += 100;
            t.idle += 100 - load;
        }
        Ok(())
    }

    fn cpu_times(&self, cpu: CoreId) -> Option<CpuTimes> {
        self.times.lock().unwrap().get(cpu).copied()
    }
}
