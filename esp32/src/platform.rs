use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::sntp::{EspSntp, SyncStatus};

use farm_node_common::time::{Clock, Delay};

/// Milliseconds since boot, truncated to the 32-bit counter the node uses.
pub fn uptime_ms() -> u32 {
    // Get microseconds since boot-up
    let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    (micros / 1000) as u32
}

/// Uptime from the ESP timer, wall time from SNTP once it synchronized.
pub struct EspClock {
    sntp: Option<EspSntp<'static>>,
}

impl EspClock {
    pub fn new(sntp: Option<EspSntp<'static>>) -> Self {
        Self { sntp }
    }
}

impl Clock for EspClock {
    fn uptime_ms(&self) -> u32 {
        uptime_ms()
    }

    fn epoch_ms(&self) -> Option<u64> {
        let sntp = self.sntp.as_ref()?;
        if sntp.get_sync_status() != SyncStatus::Completed {
            return None;
        }
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .and_then(|since| u64::try_from(since.as_millis()).ok())
    }
}

/// Blocking delay that yields to FreeRTOS.
#[derive(Clone, Copy, Default)]
pub struct EspDelay;

impl Delay for EspDelay {
    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }
}
