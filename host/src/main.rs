//! Runs the farm node on a desktop with simulated sensors and an in-memory
//! database.
//!
//! Usage: `farm-node-host [config.json]`
//!
//! Environment:
//! - `FARM_NODE_CONFIG`: configuration file, if none is given as argument
//! - `FARM_NODE_CYCLES`: stop after this many upload or reinitialization cycles
//! - `FARM_NODE_SENSOR_FAILURE_EVERY`: make every n-th sensor read fail
//! - `FARM_NODE_SESSION_TTL`: expire the simulated session after n writes
//! - `RUST_LOG`: log filter, `info` by default

mod sim;

use anyhow::Context;
use farm_node_common::connectivity::{ConnectivityManager, SessionCredentials, WifiCredentials};
use farm_node_common::sensor::{
    DhtSource, EnvironmentalSource, SoilMoistureSource, SoilTemperatureSource,
};
use farm_node_common::time::{Delay, StdDelay, SystemClock};
use farm_node_common::{
    CycleOutcome, CycleScheduler, NodeConfig, NodePath, SamplingOrchestrator, Schedule,
    UploadGateway,
};
use log::{info, warn};

use sim::{FailureInjector, SimBarometer, SimCloud, SimDht, SimLink, SimMoisture, SimSoilProbe};

type Node = CycleScheduler<SimLink, SimCloud, SystemClock, StdDelay>;

/// Reads an optional numeric environment variable.
fn env_number(name: &str) -> anyhow::Result<Option<u32>> {
    match std::env::var(name) {
        Ok(value) => Ok(Some(
            value
                .parse()
                .with_context(|| format!("{name} must be a number, got {value:?}"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn load_config() -> anyhow::Result<NodeConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FARM_NODE_CONFIG").ok());

    match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading configuration {path}"))?;
            let config = NodeConfig::from_json_str(&json)?;
            info!("Configuration loaded from {}", path);
            Ok(config)
        }
        None => {
            info!("Using default configuration");
            Ok(NodeConfig::default())
        }
    }
}

/// Builds the sources selected in the configuration.
fn orchestrator(config: &NodeConfig, failure_every: Option<u32>) -> SamplingOrchestrator {
    let mut orchestrator = SamplingOrchestrator::from_sources(Vec::new());

    if config.sensors.bme280 {
        orchestrator.push(Box::new(
            EnvironmentalSource::new(SimBarometer::new()).with_sea_level_hpa(config.sea_level_hpa),
        ));
    }
    if config.sensors.dht11 {
        orchestrator.push(Box::new(DhtSource::new(SimDht::new(
            FailureInjector::every(failure_every),
        ))));
    }
    if config.sensors.soil_temperature {
        orchestrator.push(Box::new(
            SoilTemperatureSource::new(SimSoilProbe::new(FailureInjector::every(
                failure_every.map(|every| every + 1),
            )))
            .with_settle_ms(config.soil_temperature_settle_ms),
        ));
    }
    if config.sensors.soil_moisture {
        orchestrator.push(Box::new(SoilMoistureSource::new(SimMoisture::new())));
    }

    orchestrator
}

fn build(config: &NodeConfig) -> anyhow::Result<Node> {
    let failure_every = env_number("FARM_NODE_SENSOR_FAILURE_EVERY")?;
    let session_ttl = env_number("FARM_NODE_SESSION_TTL")?;

    let wifi = WifiCredentials {
        ssid: std::env::var("WIFI_SSID").unwrap_or_else(|_| "simulated".into()),
        password: std::env::var("WIFI_PASS").unwrap_or_default(),
    };
    let cloud = SessionCredentials {
        api_key: std::env::var("FIREBASE_API_KEY").unwrap_or_default(),
        database_url: std::env::var("FIREBASE_DATABASE_URL")
            .unwrap_or_else(|_| "memory://farm-node".into()),
    };

    let connectivity =
        ConnectivityManager::new(SimLink::default(), SimCloud::new(2, session_ttl), wifi, cloud)
            .with_retry(config.wifi_retry, config.session_retry);

    Ok(CycleScheduler::new(
        orchestrator(config, failure_every),
        UploadGateway::new(NodePath::new(&config.owner, &config.node)),
        connectivity,
        SystemClock::new().with_wall_time(),
        StdDelay,
        Schedule::from(config),
    ))
}

/// Runs until `cycles` uploads or reinitializations happened.
fn run_cycles(node: &mut Node, config: &NodeConfig, cycles: u32) {
    let mut done = 0;
    let mut delay = StdDelay;

    while done < cycles {
        match node.tick() {
            CycleOutcome::NotDue => {}
            CycleOutcome::Uploaded(report) => {
                done += 1;
                let at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                info!(
                    "Cycle {}/{} at {}: {} writes, success: {}",
                    done,
                    cycles,
                    at,
                    report.attempted.len(),
                    report.success()
                );
            }
            CycleOutcome::Reinitialized { ready } => {
                done += 1;
                info!("Cycle {}/{}: reinitialized, ready: {}", done, cycles, ready);
            }
        }
        delay.delay_ms(config.loop_delay_ms);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Farm node simulator");
    let config = load_config()?;
    let cycles = env_number("FARM_NODE_CYCLES")?;
    let mut node = build(&config)?;

    if let Err(e) = node.start() {
        warn!("Startup incomplete, the loop will retry: {}", e);
    }

    let Some(cycles) = cycles else {
        node.run();
    };
    run_cycles(&mut node, &config, cycles);

    let tree = node.connectivity_mut().session_mut().store().root();
    println!("{}", serde_json::to_string_pretty(tree)?);

    Ok(())
}
