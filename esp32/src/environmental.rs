use bme280::i2c::BME280;
use esp_idf_svc::hal::delay;
use esp_idf_svc::hal::i2c::I2cDriver;
use log::warn;

use farm_node_common::sensor::{Barometer, BarometerSample, SensorReadError};

pub struct Bme280 {
    sensor: BME280<I2cDriver<'static>>,
    initialized: bool,
}

impl Bme280 {
    pub fn new(i2c: I2cDriver<'static>, address: u8) -> Self {
        Self {
            sensor: BME280::new(i2c, address),
            initialized: false,
        }
    }
}

impl Barometer for Bme280 {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        self.sensor.init(&mut delay::Ets).map_err(|e| {
            warn!("Failed to init bme280: {:?}", e);
            SensorReadError::NotInitialized
        })?;
        self.initialized = true;
        Ok(())
    }

    fn read(&mut self) -> Result<BarometerSample, SensorReadError> {
        if !self.initialized {
            return Err(SensorReadError::NotInitialized);
        }

        let bme280::Measurements {
            temperature,
            pressure,
            humidity,
            ..
        } = self.sensor.measure(&mut delay::Ets).map_err(|e| {
            warn!("Failed to read bme280 sensor: {:?}", e);
            SensorReadError::Hardware
        })?;

        Ok(BarometerSample {
            temperature_c: temperature,
            pressure_pa: pressure,
            humidity_pct: humidity,
        })
    }
}
