use esp_idf_svc::sys::*;
use log::{info, warn};

use farm_node_common::sensor::{AnalogInput, SensorReadError, ADC_MAX};

/// Capacitive soil moisture probe on an ADC one-shot channel, 12 bit over
/// the full 0..3.3 V range.
pub struct MoistureProbe {
    pin: i32,
    unit: adc_oneshot_unit_handle_t,
    channel: adc_channel_t,
}

impl MoistureProbe {
    pub fn new(pin: i32) -> Self {
        Self {
            pin,
            unit: core::ptr::null_mut(),
            channel: 0,
        }
    }

    fn setup(&mut self) -> Result<(), EspError> {
        let mut unit_id: adc_unit_t = 0;
        let mut channel: adc_channel_t = 0;
        let mut unit: adc_oneshot_unit_handle_t = core::ptr::null_mut();

        unsafe {
            esp!(adc_oneshot_io_to_channel(self.pin, &mut unit_id, &mut channel))?;

            let unit_config = adc_oneshot_unit_init_cfg_t {
                unit_id,
                ..Default::default()
            };
            esp!(adc_oneshot_new_unit(&unit_config, &mut unit))?;

            let channel_config = adc_oneshot_chan_cfg_t {
                atten: adc_atten_t_ADC_ATTEN_DB_12,
                bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            // the unit is only kept once its channel is configured
            if let Err(e) = esp!(adc_oneshot_config_channel(unit, channel, &channel_config)) {
                adc_oneshot_del_unit(unit);
                return Err(e);
            }
        }

        self.unit = unit;
        self.channel = channel;
        info!("Soil moisture on GPIO{} (ADC{} channel {})", self.pin, unit_id + 1, channel);
        Ok(())
    }
}

impl AnalogInput for MoistureProbe {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        if !self.unit.is_null() {
            return Ok(());
        }
        self.setup().map_err(|e| {
            warn!("Soil moisture ADC setup failed: {}", e);
            SensorReadError::NotInitialized
        })
    }

    fn read_raw(&mut self) -> Result<u16, SensorReadError> {
        if self.unit.is_null() {
            return Err(SensorReadError::NotInitialized);
        }

        let mut raw: i32 = 0;
        unsafe { esp!(adc_oneshot_read(self.unit, self.channel, &mut raw)) }
            .map_err(|_| SensorReadError::Hardware)?;

        Ok((raw.max(0) as u16).min(ADC_MAX))
    }
}

impl Drop for MoistureProbe {
    fn drop(&mut self) {
        if !self.unit.is_null() {
            unsafe {
                adc_oneshot_del_unit(self.unit);
            }
        }
    }
}
