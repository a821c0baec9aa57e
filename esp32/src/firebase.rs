//! Firebase Realtime Database over REST with an anonymous identity.

use embedded_svc::http::client::Client as HttpClient;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::io::EspIOError;
use log::{debug, info, warn};
use serde::Deserialize;

use farm_node_common::connectivity::{AuthSession, ConnectivityError, SessionCredentials};
use farm_node_common::{TreeStore, WriteError};

use crate::platform::uptime_ms;

const SIGN_UP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signUp";
const REFRESH_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_MS: u32 = 60_000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

struct Token {
    id_token: String,
    refresh_token: String,
    issued_at_ms: u32,
    lifetime_ms: u32,
}

impl Token {
    fn new(id_token: String, refresh_token: String, expires_in: &str) -> Self {
        let lifetime_s: u32 = expires_in.trim().parse().unwrap_or(3600);
        Self {
            id_token,
            refresh_token,
            issued_at_ms: uptime_ms(),
            lifetime_ms: lifetime_s.saturating_mul(1000),
        }
    }

    fn needs_refresh(&self) -> bool {
        let age = uptime_ms().wrapping_sub(self.issued_at_ms);
        age.saturating_add(REFRESH_MARGIN_MS) >= self.lifetime_ms
    }
}

pub struct FirebaseSession {
    client: HttpClient<EspHttpConnection>,
    credentials: SessionCredentials,
    token: Option<Token>,
}

impl FirebaseSession {
    pub fn new() -> anyhow::Result<Self> {
        let connection = EspHttpConnection::new(&Configuration {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })?;

        Ok(Self {
            client: HttpClient::wrap(connection),
            credentials: SessionCredentials::default(),
            token: None,
        })
    }

    /// Sends `body` and returns the status with the full response body.
    fn send(
        &mut self,
        method: Method,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<(u16, Vec<u8>), EspIOError> {
        let length = body.len().to_string();
        let headers = [
            ("content-type", content_type),
            ("content-length", length.as_str()),
        ];

        let mut request = self.client.request(method, url, &headers)?;
        request.write_all(body)?;
        request.flush()?;
        let mut response = request.submit()?;

        let status = response.status();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            match response.read(&mut chunk)? {
                0 => break,
                n => buf.extend_from_slice(&chunk[..n]),
            }
        }

        Ok((status, buf))
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &mut self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ConnectivityError> {
        let body = serde_json::to_vec(body).map_err(|e| ConnectivityError::Session(e.to_string()))?;
        let (status, response) = self
            .send(Method::Post, url, "application/json", &body)
            .map_err(|e| ConnectivityError::Session(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(ConnectivityError::Session(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&response)
            )));
        }

        serde_json::from_slice(&response).map_err(|e| ConnectivityError::Session(e.to_string()))
    }

    fn sign_up(&mut self) -> Result<Token, ConnectivityError> {
        let url = format!("{}?key={}", SIGN_UP_URL, self.credentials.api_key);
        let response: SignUpResponse =
            self.post_json(&url, &serde_json::json!({ "returnSecureToken": true }))?;
        Ok(Token::new(
            response.id_token,
            response.refresh_token,
            &response.expires_in,
        ))
    }

    fn refresh(&mut self, refresh_token: &str) -> Result<Token, ConnectivityError> {
        let url = format!("{}?key={}", REFRESH_URL, self.credentials.api_key);
        let response: RefreshResponse = self.post_json(
            &url,
            &serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }),
        )?;
        Ok(Token::new(
            response.id_token,
            response.refresh_token,
            &response.expires_in,
        ))
    }

    /// `{database}/{path}.json?auth={token}`
    fn url(&self, path: &str) -> Result<String, WriteError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| WriteError::new("not signed in"))?;
        Ok(format!(
            "{}/{}.json?auth={}",
            self.credentials.database_url.trim_end_matches('/'),
            path.trim_start_matches('/'),
            token.id_token
        ))
    }

    fn put(&mut self, path: &str, body: &[u8]) -> Result<(), WriteError> {
        let url = self.url(path)?;
        let (status, response) = self
            .send(Method::Put, &url, "application/json", body)
            .map_err(|e| WriteError::new(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(WriteError::new(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&response)
            )));
        }

        debug!("PUT {} -> {}", path, status);
        Ok(())
    }
}

impl AuthSession for FirebaseSession {
    fn begin_session(&mut self, credentials: &SessionCredentials) -> Result<(), ConnectivityError> {
        self.credentials = credentials.clone();
        self.token = None;

        let token = self.sign_up()?;
        info!("Firebase anonymous sign-up complete");
        self.token = Some(token);
        Ok(())
    }

    fn is_ready(&mut self) -> bool {
        let Some(refresh_token) = self
            .token
            .as_ref()
            .filter(|token| token.needs_refresh())
            .map(|token| token.refresh_token.clone())
        else {
            return self.token.is_some();
        };

        match self.refresh(&refresh_token) {
            Ok(token) => {
                info!("Firebase token refreshed");
                self.token = Some(token);
                true
            }
            Err(e) => {
                warn!("Firebase token refresh failed: {}", e);
                self.token = None;
                false
            }
        }
    }
}

impl TreeStore for FirebaseSession {
    fn set_scalar(&mut self, path: &str, value: f64) -> Result<(), WriteError> {
        let body = serde_json::to_vec(&value).map_err(|e| WriteError::new(e.to_string()))?;
        self.put(path, &body)
    }

    fn set_record(&mut self, path: &str, record: &serde_json::Value) -> Result<(), WriteError> {
        let body = serde_json::to_vec(record).map_err(|e| WriteError::new(e.to_string()))?;
        self.put(path, &body)
    }
}
