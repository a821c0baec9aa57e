use farm_node_common::sensor::{DhtDriver, SensorReadError};

/// The two members of the DHT family differ in wake-up time and in how the
/// five data bytes are decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhtModel {
    Dht11,
    Dht22,
}

impl DhtModel {
    /// How long the host holds the line low to wake the sensor up.
    fn start_us(self) -> u32 {
        match self {
            Self::Dht11 => 18_000,
            Self::Dht22 => 3_000,
        }
    }

    /// Decodes `(temperature °C, relative humidity %)`.
    fn decode(self, data: &[u8; 5]) -> (f32, f32) {
        match self {
            Self::Dht11 => {
                let humidity = data[0] as f32 + data[1] as f32 * 0.1;
                let mut temperature = data[2] as f32;
                if data[3] & 0x80 != 0 {
                    temperature = -1.0 - temperature;
                }
                temperature += (data[3] & 0x0F) as f32 * 0.1;
                (temperature, humidity)
            }
            Self::Dht22 => {
                // == get humidity from Data[0] and Data[1] ==========================
                let humidity = ((data[0] as u16) << 8 | data[1] as u16) as f32 / 10.0;

                // == get temp from Data[2] and Data[3]
                let mut temperature =
                    (((data[2] & 0x7F) as u16) << 8 | data[3] as u16) as f32 / 10.0;
                if data[2] & 0x80 != 0 {
                    // negative temp, brrr it's freezing
                    temperature *= -1.0;
                }
                (temperature, humidity)
            }
        }
    }
}

/// Bit-banged DHT driver on a raw GPIO number.
pub struct Dht {
    pin: i32,
    model: DhtModel,
}

impl Dht {
    pub fn new(pin: i32, model: DhtModel) -> Self {
        Self { pin, model }
    }

    /// Microseconds the line stays at `state`, or `None` after `max_wait`.
    fn signal_level(&self, max_wait: u32, state: i32) -> Option<u32> {
        use esp_idf_svc::sys::*;

        let mut u_sec = 0;
        unsafe {
            while gpio_get_level(self.pin) == state {
                u_sec += 1;
                if u_sec > max_wait {
                    return None;
                }
                ets_delay_us(1);
            }
        }

        Some(u_sec)
    }

    fn read_frame(&self) -> Result<[u8; 5], SensorReadError> {
        use esp_idf_svc::sys::*;

        let mut data = [0u8; 5];

        unsafe {
            gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_OUTPUT);

            // pull down to wake the sensor up
            gpio_set_level(self.pin, 0);
            ets_delay_us(self.model.start_us());

            // pull up for 25 us to ask for data
            gpio_set_level(self.pin, 1);
            ets_delay_us(25);

            gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_INPUT);
        }

        // == DHT keeps the line low for 80 us and then high for 80 us ====
        self.signal_level(85, 0).ok_or(SensorReadError::Timeout)?;
        self.signal_level(85, 1).ok_or(SensorReadError::Timeout)?;

        // == No errors, read the 40 data bits ================
        for bit in 0..40 {
            // -- every bit starts with a >50 us low signal
            self.signal_level(56, 0).ok_or(SensorReadError::Timeout)?;

            // -- a high phase longer than ~28 us is a "1"
            let u_sec = self.signal_level(75, 1).ok_or(SensorReadError::Timeout)?;
            if u_sec > 40 {
                data[bit / 8] |= 1 << (7 - bit % 8);
            }
        }

        // Checksum is the sum of Data 8 bits masked out 0xFF
        let sum = data[..4].iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if sum != data[4] {
            return Err(SensorReadError::ChecksumMismatch);
        }

        Ok(data)
    }
}

impl DhtDriver for Dht {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        unsafe {
            esp_idf_svc::sys::gpio_reset_pin(self.pin);
            esp_idf_svc::sys::gpio_set_pull_mode(
                self.pin,
                esp_idf_svc::sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY,
            );
        }
        Ok(())
    }

    fn read(&mut self) -> Result<(f32, f32), SensorReadError> {
        let data = self.read_frame()?;
        Ok(self.model.decode(&data))
    }
}
