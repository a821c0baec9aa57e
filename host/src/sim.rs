//! Simulated hardware for running the node on a desktop.

use farm_node_common::connectivity::{
    AuthSession, ConnectivityError, NetworkLink, SessionCredentials, WifiCredentials,
};
use farm_node_common::sensor::{
    AnalogInput, Barometer, BarometerSample, DhtDriver, OneWireThermometer, SensorReadError,
    ADC_MAX, DEVICE_DISCONNECTED_C,
};
use farm_node_common::{MemoryTreeStore, TreeStore, WriteError};
use log::{debug, info};

/// Returns true on every `period`-th call when a period is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailureInjector {
    period: Option<u32>,
    calls: u32,
}

impl FailureInjector {
    pub fn every(period: Option<u32>) -> Self {
        Self {
            period: period.filter(|period| *period > 0),
            calls: 0,
        }
    }

    fn fails(&mut self) -> bool {
        self.calls = self.calls.wrapping_add(1);
        self.period.is_some_and(|period| self.calls % period == 0)
    }
}

/// Slow daily-like swing, `step` counts reads.
fn wave(step: u32, period: f32) -> f32 {
    (step as f32 * core::f32::consts::TAU / period).sin()
}

pub struct SimDht {
    step: u32,
    failures: FailureInjector,
}

impl SimDht {
    pub fn new(failures: FailureInjector) -> Self {
        Self { step: 0, failures }
    }
}

impl DhtDriver for SimDht {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        info!("Simulated DHT11 initialized");
        Ok(())
    }

    fn read(&mut self) -> Result<(f32, f32), SensorReadError> {
        self.step += 1;
        if self.failures.fails() {
            return Ok((f32::NAN, f32::NAN));
        }
        let temperature = 22.0 + 4.0 * wave(self.step, 90.0);
        let humidity = 60.0 - 12.0 * wave(self.step, 90.0);
        Ok((temperature, humidity))
    }
}

pub struct SimSoilProbe {
    step: u32,
    failures: FailureInjector,
}

impl SimSoilProbe {
    pub fn new(failures: FailureInjector) -> Self {
        Self { step: 0, failures }
    }
}

impl OneWireThermometer for SimSoilProbe {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        info!("Simulated DS18B20 soil temperature initialized");
        Ok(())
    }

    fn request_temperatures(&mut self) -> Result<(), SensorReadError> {
        self.step += 1;
        Ok(())
    }

    fn temperature_c(&mut self, index: usize) -> Result<f32, SensorReadError> {
        if index > 0 || self.failures.fails() {
            return Ok(DEVICE_DISCONNECTED_C);
        }
        Ok(18.5 + 1.5 * wave(self.step, 180.0))
    }
}

/// Soil drying out between waterings.
pub struct SimMoisture {
    raw: u16,
}

impl SimMoisture {
    const WET: u16 = 3200;
    const DRY: u16 = 1400;

    pub fn new() -> Self {
        Self { raw: Self::WET }
    }
}

impl AnalogInput for SimMoisture {
    fn read_raw(&mut self) -> Result<u16, SensorReadError> {
        self.raw = if self.raw <= Self::DRY {
            debug!("Simulated watering");
            Self::WET
        } else {
            self.raw - 37
        };
        Ok(self.raw.min(ADC_MAX))
    }
}

pub struct SimBarometer {
    step: u32,
}

impl SimBarometer {
    pub fn new() -> Self {
        Self { step: 0 }
    }
}

impl Barometer for SimBarometer {
    fn read(&mut self) -> Result<BarometerSample, SensorReadError> {
        self.step += 1;
        Ok(BarometerSample {
            temperature_c: 21.0 + 3.0 * wave(self.step, 90.0),
            pressure_pa: 100_800.0 + 150.0 * wave(self.step, 300.0),
            humidity_pct: 58.0,
        })
    }
}

/// A WiFi link that is up right after `begin`.
#[derive(Default)]
pub struct SimLink {
    connected: bool,
}

impl NetworkLink for SimLink {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError> {
        info!("Simulated WiFi joining {}", credentials.ssid);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }
}

/// Cloud session backed by a [`MemoryTreeStore`].
///
/// Becomes ready after `warmup_polls` readiness checks and expires after
/// `ttl_writes` writes, which exercises the reinitialization path.
pub struct SimCloud {
    store: MemoryTreeStore,
    warmup_polls: u32,
    ttl_writes: Option<u32>,
    polls: u32,
    writes: u32,
    started: bool,
}

impl SimCloud {
    pub fn new(warmup_polls: u32, ttl_writes: Option<u32>) -> Self {
        Self {
            store: MemoryTreeStore::new(),
            warmup_polls,
            ttl_writes,
            polls: 0,
            writes: 0,
            started: false,
        }
    }

    pub fn store(&self) -> &MemoryTreeStore {
        &self.store
    }

    fn check_session(&mut self) -> Result<(), WriteError> {
        if !self.started {
            return Err(WriteError::new("session not started"));
        }
        if self.ttl_writes.is_some_and(|ttl| self.writes >= ttl) {
            return Err(WriteError::new("auth token expired"));
        }
        self.writes += 1;
        Ok(())
    }
}

impl AuthSession for SimCloud {
    fn begin_session(&mut self, credentials: &SessionCredentials) -> Result<(), ConnectivityError> {
        info!("Simulated sign-up against {}", credentials.database_url);
        self.started = true;
        self.polls = 0;
        self.writes = 0;
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        if !self.started {
            return false;
        }
        self.polls = self.polls.saturating_add(1);
        let expired = self.ttl_writes.is_some_and(|ttl| self.writes >= ttl);
        self.polls > self.warmup_polls && !expired
    }
}

impl TreeStore for SimCloud {
    fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), WriteError> {
        self.check_session()?;
        self.store.set_scalar(path, value)
    }

    fn set_record(&mut self, path: &str, record: &serde_json::Value) -> Result<(), WriteError> {
        self.check_session()?;
        self.store.set_record(path, record)
    }
}
