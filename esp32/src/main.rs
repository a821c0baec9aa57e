mod dht;
mod ds18b20;
mod environmental;
mod firebase;
mod moisture;
mod platform;
mod wifi;

use anyhow::Context;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver, I2C0};
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::EspSntp;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{info, warn};

use farm_node_common::connectivity::{ConnectivityManager, SessionCredentials, WifiCredentials};
use farm_node_common::sensor::{
    DhtSource, EnvironmentalSource, SoilMoistureSource, SoilTemperatureSource,
};
use farm_node_common::{
    CycleScheduler, NodeConfig, NodePath, SamplingOrchestrator, Schedule, UploadGateway,
};

use dht::{Dht, DhtModel};
use ds18b20::Ds18b20;
use environmental::Bme280;
use firebase::FirebaseSession;
use moisture::MoistureProbe;
use platform::{EspClock, EspDelay};
use wifi::EspLink;

const SSID: &str = env!("WIFI_SSID");
const PASSWORD: &str = env!("WIFI_PASS");
const FIREBASE_API_KEY: &str = env!("FIREBASE_API_KEY");
const FIREBASE_DATABASE_URL: &str = env!("FIREBASE_DATABASE_URL");

/// Node configuration baked into the firmware.
const CONFIG: &str = include_str!("../node.json");

/// Builds the sources selected in the configuration.
fn orchestrator(config: &NodeConfig, i2c: I2C0) -> anyhow::Result<SamplingOrchestrator> {
    let pins = &config.pins;
    let mut orchestrator = SamplingOrchestrator::from_sources(Vec::new());

    if config.sensors.bme280 {
        let i2c = I2cDriver::new(
            i2c,
            unsafe { AnyIOPin::new(pins.i2c_sda) },
            unsafe { AnyIOPin::new(pins.i2c_scl) },
            &I2cConfig::new().baudrate(100_000.Hz()),
        )
        .context("I2C for the BME280")?;
        orchestrator.push(Box::new(
            EnvironmentalSource::new(Bme280::new(i2c, pins.bme280_address))
                .with_sea_level_hpa(config.sea_level_hpa),
        ));
    }
    if config.sensors.dht11 {
        orchestrator.push(Box::new(DhtSource::new(Dht::new(pins.dht, DhtModel::Dht11))));
    }
    if config.sensors.soil_temperature {
        orchestrator.push(Box::new(
            SoilTemperatureSource::new(Ds18b20::new(pins.one_wire))
                .with_settle_ms(config.soil_temperature_settle_ms),
        ));
    }
    if config.sensors.soil_moisture {
        orchestrator.push(Box::new(SoilMoistureSource::new(MoistureProbe::new(
            pins.soil_moisture,
        ))));
    }

    Ok(orchestrator)
}

fn main() -> anyhow::Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    let config = NodeConfig::from_json_str(CONFIG)?;
    info!("Farm node {}/{}", config.owner, config.node);

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;

    // wall-clock record keys once the time is synchronized, uptime until then
    let sntp = match EspSntp::new_default() {
        Ok(sntp) => Some(sntp),
        Err(e) => {
            warn!("SNTP unavailable, records are keyed by uptime: {}", e);
            None
        }
    };

    let connectivity = ConnectivityManager::new(
        EspLink::new(wifi),
        FirebaseSession::new()?,
        WifiCredentials {
            ssid: SSID.into(),
            password: PASSWORD.into(),
        },
        SessionCredentials {
            api_key: FIREBASE_API_KEY.into(),
            database_url: FIREBASE_DATABASE_URL.into(),
        },
    )
    .with_retry(config.wifi_retry, config.session_retry);

    let mut node = CycleScheduler::new(
        orchestrator(&config, peripherals.i2c0)?,
        UploadGateway::new(NodePath::new(&config.owner, &config.node)),
        connectivity,
        EspClock::new(sntp),
        EspDelay,
        Schedule::from(&config),
    );

    if let Err(e) = node.start() {
        warn!("Startup incomplete, the loop will retry: {}", e);
    }

    node.run()
}
