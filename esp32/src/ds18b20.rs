use esp_idf_svc::sys::*;

use farm_node_common::sensor::{OneWireThermometer, SensorReadError, DEVICE_DISCONNECTED_C};

const SKIP_ROM: u8 = 0xCC;
const CONVERT_T: u8 = 0x44;
const READ_SCRATCHPAD: u8 = 0xBE;

/// 12-bit conversions take up to 750 ms.
const CONVERSION_TIMEOUT_MS: u32 = 750;

/// Dallas/Maxim CRC8, polynomial x^8 + x^5 + x^4 + 1.
fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, byte| {
        let mut crc = crc;
        let mut byte = *byte;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
        crc
    })
}

/// Raw scratchpad bytes 0 and 1 to degrees Celsius.
fn scratchpad_celsius(scratchpad: &[u8; 9]) -> f32 {
    i16::from_le_bytes([scratchpad[0], scratchpad[1]]) as f32 / 16.0
}

/// A single DS18B20 on a bit-banged 1-Wire bus, addressed with SKIP ROM.
pub struct Ds18b20 {
    pin: i32,
    converted: bool,
}

impl Ds18b20 {
    pub fn new(pin: i32) -> Self {
        Self {
            pin,
            converted: false,
        }
    }

    fn release(&self) {
        unsafe {
            gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_INPUT);
        }
    }

    fn pull_low(&self) {
        unsafe {
            gpio_set_direction(self.pin, gpio_mode_t_GPIO_MODE_OUTPUT);
            gpio_set_level(self.pin, 0);
        }
    }

    fn level(&self) -> bool {
        unsafe { gpio_get_level(self.pin) != 0 }
    }

    /// Reset pulse, true when a device answered with a presence pulse.
    fn reset(&self) -> bool {
        self.pull_low();
        unsafe { ets_delay_us(480) };
        self.release();
        unsafe { ets_delay_us(70) };
        let present = !self.level();
        unsafe { ets_delay_us(410) };
        present
    }

    fn write_bit(&self, bit: bool) {
        self.pull_low();
        if bit {
            unsafe { ets_delay_us(6) };
            self.release();
            unsafe { ets_delay_us(64) };
        } else {
            unsafe { ets_delay_us(60) };
            self.release();
            unsafe { ets_delay_us(10) };
        }
    }

    fn read_bit(&self) -> bool {
        self.pull_low();
        unsafe { ets_delay_us(3) };
        self.release();
        unsafe { ets_delay_us(10) };
        let bit = self.level();
        unsafe { ets_delay_us(53) };
        bit
    }

    fn write_byte(&self, byte: u8) {
        for i in 0..8 {
            self.write_bit(byte & (1 << i) != 0);
        }
    }

    fn read_byte(&self) -> u8 {
        (0..8).fold(0u8, |byte, i| if self.read_bit() { byte | 1 << i } else { byte })
    }

    fn command(&self, command: u8) -> Result<(), SensorReadError> {
        if !self.reset() {
            return Err(SensorReadError::Disconnected);
        }
        self.write_byte(SKIP_ROM);
        self.write_byte(command);
        Ok(())
    }
}

impl OneWireThermometer for Ds18b20 {
    fn begin(&mut self) -> Result<(), SensorReadError> {
        unsafe {
            gpio_reset_pin(self.pin);
            gpio_set_pull_mode(self.pin, gpio_pull_mode_t_GPIO_PULLUP_ONLY);
        }
        self.release();
        if self.reset() {
            Ok(())
        } else {
            Err(SensorReadError::Disconnected)
        }
    }

    fn request_temperatures(&mut self) -> Result<(), SensorReadError> {
        self.converted = false;
        self.command(CONVERT_T)?;

        // the bus reads 0 while the conversion runs
        for _ in 0..CONVERSION_TIMEOUT_MS {
            if self.read_bit() {
                self.converted = true;
                return Ok(());
            }
            unsafe { ets_delay_us(1000) };
        }
        Err(SensorReadError::Timeout)
    }

    fn temperature_c(&mut self, index: usize) -> Result<f32, SensorReadError> {
        if index > 0 || !self.converted {
            return Ok(DEVICE_DISCONNECTED_C);
        }
        if self.command(READ_SCRATCHPAD).is_err() {
            return Ok(DEVICE_DISCONNECTED_C);
        }

        let mut scratchpad = [0u8; 9];
        for byte in scratchpad.iter_mut() {
            *byte = self.read_byte();
        }

        // a missing device reads all ones, which fails the CRC as well
        if scratchpad.iter().all(|byte| *byte == 0xFF) {
            return Ok(DEVICE_DISCONNECTED_C);
        }
        if crc8(&scratchpad[..8]) != scratchpad[8] {
            return Err(SensorReadError::ChecksumMismatch);
        }

        Ok(scratchpad_celsius(&scratchpad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_datasheet_scratchpad() {
        // +25.0625 °C from the DS18B20 datasheet, resolution 12 bit
        let scratchpad = [0x91, 0x01, 0x4B, 0x46, 0x7F, 0xFF, 0x0F, 0x10, 0x25];
        assert_eq!(crc8(&scratchpad[..8]), scratchpad[8]);
        assert_eq!(scratchpad_celsius(&scratchpad), 25.0625);
    }

    #[test]
    fn negative_temperatures_are_sign_extended() {
        let scratchpad = [0x5E, 0xFF, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(scratchpad_celsius(&scratchpad), -10.125);
    }
}
