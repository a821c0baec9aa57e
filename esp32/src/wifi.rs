use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{debug, info};

use farm_node_common::connectivity::{ConnectivityError, NetworkLink, WifiCredentials};

type Wifi = BlockingWifi<EspWifi<'static>>;

/// Station-mode WiFi. `begin` only starts the association, the connectivity
/// manager polls `is_connected` until the interface is up.
pub struct EspLink {
    wifi: Wifi,
}

impl EspLink {
    pub fn new(wifi: Wifi) -> Self {
        Self { wifi }
    }

    fn configure(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let wifi_configuration = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::Link("SSID too long".into()))?,
            bssid: None,
            auth_method,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| ConnectivityError::Link("password too long".into()))?,
            channel: None,
            ..Default::default()
        });

        self.wifi
            .set_configuration(&wifi_configuration)
            .map_err(|e| ConnectivityError::Link(e.to_string()))
    }
}

impl NetworkLink for EspLink {
    fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), ConnectivityError> {
        self.configure(credentials)?;

        let started = self.wifi.is_started().unwrap_or(false);
        if !started {
            self.wifi
                .start()
                .map_err(|e| ConnectivityError::Link(e.to_string()))?;
            info!("Wifi started");
        }

        // non-blocking, association and DHCP continue in the background
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(|e| ConnectivityError::Link(e.to_string()))?;
        info!("Connecting to {}", credentials.ssid);

        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let up = self.wifi.is_up().unwrap_or(false);
        if up {
            match self.wifi.wifi().sta_netif().get_ip_info() {
                Ok(ip_info) => debug!("Wifi DHCP info: {:?}", ip_info),
                Err(e) => debug!("Wifi up without IP info: {}", e),
            }
        }
        up
    }
}
