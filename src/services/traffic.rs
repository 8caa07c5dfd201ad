//! Per-interface traffic counters.
//!
//! A tracker records the cumulative byte counters of one interface when it is
//! created and reports the difference on every read.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::Networks;

use crate::error::{DiagError, DiagResult};

/// Unit a byte delta is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageUnit {
    #[default]
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
}

impl StorageUnit {
    pub fn divisor(&self) -> f64 {
        match self {
            StorageUnit::B => 1.0,
            StorageUnit::KB => 1e3,
            StorageUnit::MB => 1e6,
            StorageUnit::GB => 1e9,
            StorageUnit::TB => 1e12,
            StorageUnit::PB => 1e15,
        }
    }

    /// Divisor for a unit name, falling back to bytes for anything unknown.
    pub fn divisor_for(name: &str) -> f64 {
        name.parse::<StorageUnit>().map(|u| u.divisor()).unwrap_or(1.0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageUnit::B => "B",
            StorageUnit::KB => "kB",
            StorageUnit::MB => "MB",
            StorageUnit::GB => "GB",
            StorageUnit::TB => "TB",
            StorageUnit::PB => "PB",
        }
    }
}

impl FromStr for StorageUnit {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" => Ok(StorageUnit::B),
            "kB" => Ok(StorageUnit::KB),
            "MB" => Ok(StorageUnit::MB),
            "GB" => Ok(StorageUnit::GB),
            "TB" => Ok(StorageUnit::TB),
            "PB" => Ok(StorageUnit::PB),
            other => Err(DiagError::InvalidRequest(format!(
                "Invalid storage unit '{}': expected one of B, kB, MB, GB, TB, PB",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative byte counters of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Where interface names and counters come from.
pub trait CounterSource: Send + Sync {
    /// Current cumulative counters, or `None` if the interface is unknown.
    fn counters(&self, interface: &str) -> Option<InterfaceCounters>;

    /// Names of all interfaces currently known to the OS.
    fn interface_names(&self) -> BTreeSet<String>;
}

/// Counters read from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCounters;

impl CounterSource for SystemCounters {
    fn counters(&self, interface: &str) -> Option<InterfaceCounters> {
        let networks = Networks::new_with_refreshed_list();
        networks.list().get(interface).map(|data| InterfaceCounters {
            bytes_sent: data.total_transmitted(),
            bytes_recv: data.total_received(),
        })
    }

    fn interface_names(&self) -> BTreeSet<String> {
        list_interfaces()
    }
}

/// Enumerate the names of all network interfaces.
pub fn list_interfaces() -> BTreeSet<String> {
    pnet::datalink::interfaces()
        .into_iter()
        .map(|iface| iface.name)
        .collect()
}

/// Baseline captured when a tracker is created.
#[derive(Debug, Clone)]
pub struct TrafficSample {
    pub interface: String,
    pub baseline_sent: u64,
    pub baseline_recv: u64,
    pub baseline_time: DateTime<Utc>,
    baseline_instant: Instant,
}

/// Traffic since the baseline, converted to the requested unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficDelta {
    pub bytes_sent: f64,
    pub bytes_recv: f64,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub elapsed_ms: u64,
}

pub struct InterfaceStatsTracker {
    source: Arc<dyn CounterSource>,
    sample: TrafficSample,
}

impl InterfaceStatsTracker {
    /// Record the current counters of `interface` as the baseline.
    pub fn new(source: Arc<dyn CounterSource>, interface: &str) -> DiagResult<Self> {
        let counters = source
            .counters(interface)
            .ok_or_else(|| DiagError::InterfaceNotFound(interface.to_string()))?;

        let sample = TrafficSample {
            interface: interface.to_string(),
            baseline_sent: counters.bytes_sent,
            baseline_recv: counters.bytes_recv,
            baseline_time: Utc::now(),
            baseline_instant: Instant::now(),
        };
        tracing::debug!("Traffic baseline for {}: {:?}", interface, counters);

        Ok(Self { source, sample })
    }

    pub fn sample(&self) -> &TrafficSample {
        &self.sample
    }

    /// Read the current counters and report `baseline - current` in `unit`.
    ///
    /// The delta keeps the historical sign: traffic since the baseline shows
    /// up as a negative number.
    pub fn read(&self, unit: StorageUnit) -> DiagResult<TrafficDelta> {
        let current = self
            .source
            .counters(&self.sample.interface)
            .ok_or_else(|| DiagError::InterfaceNotFound(self.sample.interface.clone()))?;

        let sent = self.sample.baseline_sent as i128 - current.bytes_sent as i128;
        let recv = self.sample.baseline_recv as i128 - current.bytes_recv as i128;

        Ok(TrafficDelta {
            bytes_sent: convert(sent, unit),
            bytes_recv: convert(recv, unit),
            begin_time: self.sample.baseline_time,
            end_time: Utc::now(),
            elapsed_ms: self.sample.baseline_instant.elapsed().as_millis() as u64,
        })
    }
}

/// Divide by the unit and round to one decimal place.
fn convert(bytes: i128, unit: StorageUnit) -> f64 {
    let value = bytes as f64 / unit.divisor();
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCounters {
        counters: Mutex<HashMap<String, InterfaceCounters>>,
    }

    impl FakeCounters {
        fn set(&self, name: &str, bytes_sent: u64, bytes_recv: u64) {
            self.counters.lock().unwrap().insert(
                name.to_string(),
                InterfaceCounters { bytes_sent, bytes_recv },
            );
        }

        fn remove(&self, name: &str) {
            self.counters.lock().unwrap().remove(name);
        }
    }

    impl CounterSource for FakeCounters {
        fn counters(&self, interface: &str) -> Option<InterfaceCounters> {
            self.counters.lock().unwrap().get(interface).copied()
        }

        fn interface_names(&self) -> BTreeSet<String> {
            self.counters.lock().unwrap().keys().cloned().collect()
        }
    }

    fn fake_with(name: &str, sent: u64, recv: u64) -> Arc<FakeCounters> {
        let fake = Arc::new(FakeCounters::default());
        fake.set(name, sent, recv);
        fake
    }

    #[test]
    fn test_storage_unit_parse() {
        assert_eq!("kB".parse::<StorageUnit>().unwrap(), StorageUnit::KB);
        assert_eq!("PB".parse::<StorageUnit>().unwrap(), StorageUnit::PB);
        assert!("KB".parse::<StorageUnit>().is_err());
        assert!("asB".parse::<StorageUnit>().is_err());
        assert!("".parse::<StorageUnit>().is_err());
    }

    #[test]
    fn test_divisor_for_falls_back_to_bytes() {
        assert_eq!(StorageUnit::divisor_for("GB"), 1e9);
        assert_eq!(StorageUnit::divisor_for("asB"), 1.0);
    }

    #[test]
    fn test_read_reports_baseline_minus_current() {
        let fake = fake_with("eth0", 1_000, 5_000);
        let tracker = InterfaceStatsTracker::new(fake.clone(), "eth0").unwrap();

        fake.set("eth0", 2_235_000, 5_000);
        let delta = tracker.read(StorageUnit::B).unwrap();

        assert_eq!(delta.bytes_sent, -2_234_000.0);
        assert_eq!(delta.bytes_recv, 0.0);
    }

    #[test]
    fn test_read_divides_and_rounds_for_every_unit() {
        let fake = fake_with("eth0", 0, 0);
        let tracker = InterfaceStatsTracker::new(fake.clone(), "eth0").unwrap();
        fake.set("eth0", 1_234_567_890_123_456_789, 987_654_321);

        for unit in [
            StorageUnit::B,
            StorageUnit::KB,
            StorageUnit::MB,
            StorageUnit::GB,
            StorageUnit::TB,
            StorageUnit::PB,
        ] {
            let delta = tracker.read(unit).unwrap();
            let expected_sent = (-1_234_567_890_123_456_789f64 / unit.divisor() * 10.0).round() / 10.0;
            let expected_recv = (-987_654_321f64 / unit.divisor() * 10.0).round() / 10.0;
            assert_eq!(delta.bytes_sent, expected_sent, "unit {}", unit);
            assert_eq!(delta.bytes_recv, expected_recv, "unit {}", unit);
        }

        assert_eq!(tracker.read(StorageUnit::MB).unwrap().bytes_recv, -987.7);
        assert_eq!(tracker.read(StorageUnit::GB).unwrap().bytes_recv, -1.0);
        assert_eq!(tracker.read(StorageUnit::TB).unwrap().bytes_recv, -0.0);
    }

    #[test]
    fn test_read_immediately_after_construction() {
        let fake = fake_with("lo", 42, 42);
        let tracker = InterfaceStatsTracker::new(fake, "lo").unwrap();

        let delta = tracker.read(StorageUnit::B).unwrap();

        assert_eq!(delta.bytes_sent, 0.0);
        assert_eq!(delta.bytes_recv, 0.0);
        assert!(delta.begin_time <= delta.end_time);
        assert_eq!(delta.begin_time, tracker.sample().baseline_time);
    }

    #[test]
    fn test_unknown_interface() {
        let fake = fake_with("eth0", 0, 0);
        let result = InterfaceStatsTracker::new(fake, "eth9");
        assert!(matches!(result, Err(DiagError::InterfaceNotFound(ref name)) if name == "eth9"));
    }

    #[test]
    fn test_interface_removed_after_baseline() {
        let fake = fake_with("usb0", 10, 10);
        let tracker = InterfaceStatsTracker::new(fake.clone(), "usb0").unwrap();
        fake.remove("usb0");
        assert!(matches!(tracker.read(StorageUnit::B), Err(DiagError::InterfaceNotFound(_))));
    }

    #[test]
    fn test_trackers_keep_independent_baselines() {
        let fake = fake_with("eth0", 100, 100);
        let first = InterfaceStatsTracker::new(fake.clone(), "eth0").unwrap();
        fake.set("eth0", 300, 100);
        let second = InterfaceStatsTracker::new(fake.clone(), "eth0").unwrap();
        fake.set("eth0", 600, 100);

        assert_eq!(first.read(StorageUnit::B).unwrap().bytes_sent, -500.0);
        assert_eq!(second.read(StorageUnit::B).unwrap().bytes_sent, -300.0);
    }

    #[test]
    fn test_list_interfaces_includes_loopback() {
        let names = list_interfaces();
        assert!(!names.is_empty());
        #[cfg(target_os = "linux")]
        assert!(names.contains("lo"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_counters_read_loopback() {
        assert!(SystemCounters.counters("lo").is_some());
    }

    #[test]
    fn test_system_counters_unknown_interface() {
        assert!(SystemCounters.counters("netmon-none0").is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_tracker_on_system_counters() {
        let tracker = InterfaceStatsTracker::new(Arc::new(SystemCounters), "lo").unwrap();
        assert!(tracker.read(StorageUnit::KB).is_ok());
    }
}
