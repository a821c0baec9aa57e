//! Sensor sources.
//!
//! A [`SensorSource`] turns one physical sensor into one named [`Group`] of
//! the reading. The hardware itself sits behind small driver traits so the
//! same sources run on the device and against simulated drivers.

use core::fmt;

use crate::reading::Group;
use crate::time::Delay;

/// Value reported by one-wire thermometers when no device answers.
pub const DEVICE_DISCONNECTED_C: f32 = -127.0;

/// Full scale of the 12-bit ADC used by the moisture probe.
pub const ADC_MAX: u16 = 4095;

pub const DHT_GROUP: &str = "dht11";
pub const SOIL_TEMPERATURE_GROUP: &str = "soilTemperature";
pub const SOIL_MOISTURE_GROUP: &str = "soilMoisture";
pub const ENVIRONMENT_GROUP: &str = "bme280";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorReadError {
    /// The driver produced a not-a-number value.
    NotANumber,
    /// The device did not answer on its bus.
    Disconnected,
    /// The device did not respond in time.
    Timeout,
    /// The transferred data failed its checksum.
    ChecksumMismatch,
    /// The device could not be set up.
    NotInitialized,
    /// Bus or peripheral error reported by the platform.
    Hardware,
}

impl fmt::Display for SensorReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotANumber => f.write_str("sensor returned NaN"),
            Self::Disconnected => f.write_str("sensor disconnected"),
            Self::Timeout => f.write_str("sensor timed out"),
            Self::ChecksumMismatch => f.write_str("sensor data checksum mismatch"),
            Self::NotInitialized => f.write_str("sensor not initialized"),
            Self::Hardware => f.write_str("sensor hardware error"),
        }
    }
}

impl std::error::Error for SensorReadError {}

/// Rejects the NaN sentinel.
fn finite(value: f32) -> Result<f32, SensorReadError> {
    if value.is_nan() {
        Err(SensorReadError::NotANumber)
    } else {
        Ok(value)
    }
}

/// Produces the group of one physical sensor.
pub trait SensorSource {
    /// Name of the group this source fills in.
    fn name(&self) -> &'static str;

    /// One-time setup at boot.
    fn begin(&mut self) -> Result<(), SensorReadError> {
        Ok(())
    }

    /// Takes one measurement. `delay` is available for conversion settling.
    fn read(&mut self, delay: &mut dyn Delay) -> Result<Group, SensorReadError>;
}

/// Air temperature and humidity sensor of the DHT family.
pub trait DhtDriver {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        Ok(())
    }

    /// Returns `(temperature °C, relative humidity %)`.
    fn read(&mut self) -> Result<(f32, f32), SensorReadError>;
}

/// Digital thermometers on a one-wire bus.
pub trait OneWireThermometer {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        Ok(())
    }

    /// Starts a conversion on every device of the bus.
    fn request_temperatures(&mut self) -> Result<(), SensorReadError>;

    /// Temperature of the device at `index`, or [`DEVICE_DISCONNECTED_C`].
    fn temperature_c(&mut self, index: usize) -> Result<f32, SensorReadError>;
}

/// A single analog input channel.
pub trait AnalogInput {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        Ok(())
    }

    /// Raw conversion result in `0..=ADC_MAX`.
    fn read_raw(&mut self) -> Result<u16, SensorReadError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarometerSample {
    pub temperature_c: f32,
    pub pressure_pa: f32,
    pub humidity_pct: f32,
}

/// Combined temperature, pressure and humidity sensor.
pub trait Barometer {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        Ok(())
    }

    fn read(&mut self) -> Result<BarometerSample, SensorReadError>;
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 1.8 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) / 1.8
}

/// Heat index in °C using the Rothfusz regression with Steadman's
/// approximation below 80 °F, including the NWS low and high humidity
/// adjustments.
pub fn heat_index_c(temperature_c: f64, humidity: f64) -> f64 {
    let t = celsius_to_fahrenheit(temperature_c);
    let mut hi = 0.5 * (t + 61.0 + ((t - 68.0) * 1.2) + (humidity * 0.094));

    if hi > 79.0 {
        hi = -42.379 + 2.04901523 * t + 10.14333127 * humidity
            - 0.22475541 * t * humidity
            - 0.00683783 * t.powi(2)
            - 0.05481717 * humidity.powi(2)
            + 0.00122874 * t.powi(2) * humidity
            + 0.00085282 * t * humidity.powi(2)
            - 0.00000199 * t.powi(2) * humidity.powi(2);

        if humidity < 13.0 && (80.0..=112.0).contains(&t) {
            hi -= ((13.0 - humidity) * 0.25) * ((17.0 - (t - 95.0).abs()) * 0.05882).sqrt();
        } else if humidity > 85.0 && (80.0..=87.0).contains(&t) {
            hi += ((humidity - 85.0) * 0.1) * ((87.0 - t) * 0.2);
        }
    }

    fahrenheit_to_celsius(hi)
}

/// Linear rescale of a raw ADC value to a percentage with integer division.
/// No calibration and no clamping.
pub fn moisture_percentage(raw: u16) -> i64 {
    i64::from(raw) * 100 / i64::from(ADC_MAX)
}

/// Barometric altitude in meters for `pressure_hpa` relative to the given
/// sea-level pressure.
pub fn altitude_m(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903))
}

/// DHT11/DHT22 air sensor: `temperature`, `humidity` and `heatIndex`.
pub struct DhtSource<D> {
    driver: D,
}

impl<D: DhtDriver> DhtSource<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }
}

impl<D: DhtDriver> SensorSource for DhtSource<D> {
    fn name(&self) -> &'static str {
        DHT_GROUP
    }

    fn begin(&mut self) -> Result<(), SensorReadError> {
        self.driver.begin()
    }

    fn read(&mut self, _delay: &mut dyn Delay) -> Result<Group, SensorReadError> {
        let (temperature, humidity) = self.driver.read()?;
        let temperature = f64::from(finite(temperature)?);
        let humidity = f64::from(finite(humidity)?);

        Ok(Group::new()
            .with_float("temperature", temperature)
            .with_float("humidity", humidity)
            .with_float("heatIndex", heat_index_c(temperature, humidity)))
    }
}

/// DS18B20 style soil probe: `celsius` and `fahrenheit`.
pub struct SoilTemperatureSource<T> {
    driver: T,
    index: usize,
    settle_ms: u32,
}

impl<T: OneWireThermometer> SoilTemperatureSource<T> {
    pub const DEFAULT_SETTLE_MS: u32 = 50;

    pub fn new(driver: T) -> Self {
        Self {
            driver,
            index: 0,
            settle_ms: Self::DEFAULT_SETTLE_MS,
        }
    }

    /// Waits `settle_ms` between requesting a conversion and reading it.
    pub fn with_settle_ms(mut self, settle_ms: u32) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Reads the device at `index` on the bus instead of the first one.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

impl<T: OneWireThermometer> SensorSource for SoilTemperatureSource<T> {
    fn name(&self) -> &'static str {
        SOIL_TEMPERATURE_GROUP
    }

    fn begin(&mut self) -> Result<(), SensorReadError> {
        self.driver.begin()
    }

    fn read(&mut self, delay: &mut dyn Delay) -> Result<Group, SensorReadError> {
        self.driver.request_temperatures()?;
        delay.delay_ms(self.settle_ms);

        let celsius = finite(self.driver.temperature_c(self.index)?)?;
        if celsius == DEVICE_DISCONNECTED_C {
            return Err(SensorReadError::Disconnected);
        }
        let celsius = f64::from(celsius);

        Ok(Group::new()
            .with_float("celsius", celsius)
            .with_float("fahrenheit", celsius_to_fahrenheit(celsius)))
    }
}

/// Capacitive or resistive moisture probe on an ADC pin: `raw` and
/// `percentage`.
pub struct SoilMoistureSource<A> {
    input: A,
}

impl<A: AnalogInput> SoilMoistureSource<A> {
    pub fn new(input: A) -> Self {
        Self { input }
    }
}

impl<A: AnalogInput> SensorSource for SoilMoistureSource<A> {
    fn name(&self) -> &'static str {
        SOIL_MOISTURE_GROUP
    }

    fn begin(&mut self) -> Result<(), SensorReadError> {
        self.input.begin()
    }

    fn read(&mut self, _delay: &mut dyn Delay) -> Result<Group, SensorReadError> {
        let raw = self.input.read_raw()?;

        Ok(Group::new()
            .with_int("raw", i64::from(raw))
            .with_int("percentage", moisture_percentage(raw)))
    }
}

/// BME280 style environmental sensor: `temperature`, `pressure` (hPa),
/// `humidity` and `altitude`.
pub struct EnvironmentalSource<B> {
    driver: B,
    sea_level_hpa: f64,
}

impl<B: Barometer> EnvironmentalSource<B> {
    pub const STANDARD_SEA_LEVEL_HPA: f64 = 1013.25;

    pub fn new(driver: B) -> Self {
        Self {
            driver,
            sea_level_hpa: Self::STANDARD_SEA_LEVEL_HPA,
        }
    }

    pub fn with_sea_level_hpa(mut self, sea_level_hpa: f64) -> Self {
        self.sea_level_hpa = sea_level_hpa;
        self
    }
}

impl<B: Barometer> SensorSource for EnvironmentalSource<B> {
    fn name(&self) -> &'static str {
        ENVIRONMENT_GROUP
    }

    fn begin(&mut self) -> Result<(), SensorReadError> {
        self.driver.begin()
    }

    fn read(&mut self, _delay: &mut dyn Delay) -> Result<Group, SensorReadError> {
        let sample = self.driver.read()?;
        let temperature = f64::from(finite(sample.temperature_c)?);
        let pressure_hpa = f64::from(finite(sample.pressure_pa)?) / 100.0;
        let humidity = f64::from(finite(sample.humidity_pct)?);

        Ok(Group::new()
            .with_float("temperature", temperature)
            .with_float("pressure", pressure_hpa)
            .with_float("humidity", humidity)
            .with_float("altitude", altitude_m(pressure_hpa, self.sea_level_hpa)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Field;
    use crate::time::testing::ManualClock;

    struct FixedDht(Result<(f32, f32), SensorReadError>);

    impl DhtDriver for FixedDht {
        fn read(&mut self) -> Result<(f32, f32), SensorReadError> {
            self.0
        }
    }

    struct Probe {
        value: f32,
        requested: bool,
    }

    impl OneWireThermometer for Probe {
        fn request_temperatures(&mut self) -> Result<(), SensorReadError> {
            self.requested = true;
            Ok(())
        }

        fn temperature_c(&mut self, _index: usize) -> Result<f32, SensorReadError> {
            assert!(self.requested, "read before conversion request");
            Ok(self.value)
        }
    }

    struct Adc(u16);

    impl AnalogInput for Adc {
        fn read_raw(&mut self) -> Result<u16, SensorReadError> {
            Ok(self.0)
        }
    }

    struct Bme(BarometerSample);

    impl Barometer for Bme {
        fn read(&mut self) -> Result<BarometerSample, SensorReadError> {
            Ok(self.0)
        }
    }

    #[test]
    fn dht_group_has_rounded_values_and_heat_index() {
        let clock = ManualClock::default();
        let mut source = DhtSource::new(FixedDht(Ok((19.86, 61.98))));
        let group = source.read(&mut clock.delay()).unwrap();

        assert_eq!(group.get("temperature"), Some(Field::Float(19.86)));
        assert_eq!(group.get("humidity"), Some(Field::Float(61.98)));
        assert_eq!(group.get("heatIndex"), Some(Field::Float(19.52)));
    }

    #[test]
    fn dht_nan_is_an_error() {
        let clock = ManualClock::default();
        let mut source = DhtSource::new(FixedDht(Ok((f32::NAN, 40.0))));
        assert_eq!(
            source.read(&mut clock.delay()),
            Err(SensorReadError::NotANumber)
        );

        let mut source = DhtSource::new(FixedDht(Err(SensorReadError::Timeout)));
        assert_eq!(
            source.read(&mut clock.delay()),
            Err(SensorReadError::Timeout)
        );
    }

    #[test]
    fn heat_index_uses_regression_above_80f() {
        // 32 °C at 70 % is about 40.4 °C on the NWS chart.
        let hi = heat_index_c(32.0, 70.0);
        assert!((hi - 40.4).abs() < 0.3, "heat index was {hi}");
    }

    #[test]
    fn heat_index_adjusts_for_dry_air() {
        // 95 °F at 10 %: 0.75 °F below the plain regression
        let hi = heat_index_c(35.0, 10.0);
        assert!((hi - 31.92).abs() < 0.01, "heat index was {hi}");
    }

    #[test]
    fn heat_index_adjusts_for_humid_air() {
        // 86 °F at 90 %: 0.1 °F above the plain regression
        let hi = heat_index_c(30.0, 90.0);
        assert!((hi - 40.77).abs() < 0.01, "heat index was {hi}");
    }

    #[test]
    fn soil_temperature_waits_for_conversion() {
        let clock = ManualClock::default();
        let mut delay = clock.delay();
        let mut source = SoilTemperatureSource::new(Probe {
            value: 19.29,
            requested: false,
        })
        .with_settle_ms(100);

        let group = source.read(&mut delay).unwrap();
        assert_eq!(delay.total, 100);
        assert_eq!(group.get("celsius"), Some(Field::Float(19.29)));
        assert_eq!(group.get("fahrenheit"), Some(Field::Float(66.72)));
    }

    #[test]
    fn soil_temperature_disconnected_sentinel_is_an_error() {
        let clock = ManualClock::default();
        let mut source = SoilTemperatureSource::new(Probe {
            value: DEVICE_DISCONNECTED_C,
            requested: false,
        });
        assert_eq!(
            source.read(&mut clock.delay()),
            Err(SensorReadError::Disconnected)
        );
    }

    #[test]
    fn moisture_is_rescaled_with_integer_division() {
        assert_eq!(moisture_percentage(0), 0);
        assert_eq!(moisture_percentage(2047), 49);
        assert_eq!(moisture_percentage(4094), 99);
        assert_eq!(moisture_percentage(ADC_MAX), 100);

        let clock = ManualClock::default();
        let group = SoilMoistureSource::new(Adc(1825))
            .read(&mut clock.delay())
            .unwrap();
        assert_eq!(group.get("raw"), Some(Field::Int(1825)));
        assert_eq!(group.get("percentage"), Some(Field::Int(44)));
    }

    #[test]
    fn environment_group_converts_pressure_and_altitude() {
        let clock = ManualClock::default();
        let mut source = EnvironmentalSource::new(Bme(BarometerSample {
            temperature_c: 21.5,
            pressure_pa: 101_325.0,
            humidity_pct: 48.25,
        }));

        let group = source.read(&mut clock.delay()).unwrap();
        assert_eq!(group.get("pressure"), Some(Field::Float(1013.25)));
        assert_eq!(group.get("altitude"), Some(Field::Float(0.0)));
        assert_eq!(group.get("humidity"), Some(Field::Float(48.25)));
    }

    #[test]
    fn altitude_drops_with_pressure() {
        let altitude = altitude_m(900.0, 1013.25);
        assert!((altitude - 988.0).abs() < 5.0, "altitude was {altitude}");
    }

    #[test]
    fn environment_nan_is_an_error() {
        let clock = ManualClock::default();
        let mut source = EnvironmentalSource::new(Bme(BarometerSample {
            temperature_c: 21.5,
            pressure_pa: f32::NAN,
            humidity_pct: 48.25,
        }));

        assert_eq!(
            source.read(&mut clock.delay()),
            Err(SensorReadError::NotANumber)
        );
    }
}
