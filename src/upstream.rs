//! Client for the remote session REST API
//!
//! The upstream API owns all session data. This module only fetches and
//! forwards; it maps transport failures and unsuccessful responses onto
//! [`ServiceError`] variants the handlers can return directly.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::types::{DateListing, SessionListing, UpstreamDates, UpstreamSessions};

/// Source of session data
///
/// Calls block; async callers run them on the blocking pool.
pub trait SessionSource: Send + Sync {
    /// List the dates that have sessions
    fn fetch_dates(&self) -> Result<DateListing, ServiceError>;

    /// List the sessions recorded on `date`
    fn fetch_sessions(&self, date: &str) -> Result<SessionListing, ServiceError>;

    /// Forward a validated session update and return the upstream reply
    fn update_session(&self, payload: &Value) -> Result<Value, ServiceError>;
}

/// [`SessionSource`] backed by the remote REST API
pub struct RemoteSessionApi {
    base_url: String,
    agent: ureq::Agent,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RemoteSessionApi {
    pub fn new(base_url: &str, read_timeout: Duration, write_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(read_timeout)
            .build();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            read_timeout,
            write_timeout,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            &config.upstream_base_url,
            config.read_timeout(),
            config.write_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let url = self.url(path);
        debug!(url = %url, "upstream GET");

        let response = self
            .agent
            .get(&url)
            .timeout(self.read_timeout)
            .call()
            .map_err(|e| map_transport_error(&url, e))?;

        response
            .into_json::<T>()
            .map_err(|e| ServiceError::UpstreamPayload(e.to_string()))
    }
}

impl SessionSource for RemoteSessionApi {
    fn fetch_dates(&self) -> Result<DateListing, ServiceError> {
        let dates: UpstreamDates = self.get_json("data/dates")?;
        if !dates.success {
            warn!("upstream dates request reported failure");
            return Err(ServiceError::UpstreamUnsuccessful);
        }

        Ok(DateListing {
            fechas: dates.dates,
            total: dates.total_dates,
            success: true,
        })
    }

    fn fetch_sessions(&self, date: &str) -> Result<SessionListing, ServiceError> {
        let path = format!("data/{}", urlencoding::encode(date));
        let sessions: UpstreamSessions = self.get_json(&path)?;
        if !sessions.success {
            warn!(date, "upstream sessions request reported failure");
            return Err(ServiceError::UpstreamUnsuccessful);
        }

        Ok(SessionListing {
            fecha: sessions.date.unwrap_or_else(|| date.to_string()),
            sessions: sessions.sessions,
            total_sessions: sessions.total_sessions,
            success: true,
        })
    }

    fn update_session(&self, payload: &Value) -> Result<Value, ServiceError> {
        let url = self.url("update-session");
        debug!(url = %url, "upstream POST");

        let response = self
            .agent
            .post(&url)
            .timeout(self.write_timeout)
            .send_json(payload)
            .map_err(|e| map_transport_error(&url, e))?;

        response
            .into_json::<Value>()
            .map_err(|e| ServiceError::UpstreamPayload(e.to_string()))
    }
}

fn map_transport_error(url: &str, err: ureq::Error) -> ServiceError {
    let detail = match err {
        ureq::Error::Status(code, response) => {
            format!("{} returned HTTP {} {}", url, code, response.status_text())
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    };
    warn!(error = %detail, "upstream request failed");
    ServiceError::UpstreamUnavailable(detail)
}

/// Probe the upstream API by listing dates
pub fn check_upstream(source: &dyn SessionSource) -> Result<usize, ServiceError> {
    source.fetch_dates().map(|listing| listing.fechas.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_base_url_is_trimmed() {
        let api = RemoteSessionApi::new(
            "http://localhost:9000/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(api.base_url(), "http://localhost:9000");
        assert_eq!(api.url("data/dates"), "http://localhost:9000/data/dates");
    }

    #[test]
    fn test_unreachable_upstream_maps_to_unavailable() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let api = RemoteSessionApi::new(
            "http://127.0.0.1:9",
            Duration::from_millis(500),
            Duration::from_millis(500),
        );
        match api.fetch_dates() {
            Err(ServiceError::UpstreamUnavailable(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
