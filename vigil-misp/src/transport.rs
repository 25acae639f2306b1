//! Feed transport - the network seam of the sync engine
//!
//! `FeedTransport` is what the sync controller talks to; `MispTransport`
//! implements it against the MISP REST API.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;

use crate::{
    create_client, MispEndpoint, OrganisationEnvelope, RawEvent, RestSearchResponse,
    TransportConfig, TransportError,
};

/// Source of raw events and organisation names
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Fetch published events dated within `[from, to]`
    async fn fetch_window(
        &self,
        endpoint: &MispEndpoint,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawEvent>, TransportError>;

    /// Fetch the organisation id → name map
    async fn fetch_organisations(
        &self,
        endpoint: &MispEndpoint,
    ) -> Result<HashMap<String, String>, TransportError>;
}

/// HTTP transport for MISP instances
pub struct MispTransport {
    client: Client,
    timeout_secs: u64,
}

impl MispTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        Ok(Self {
            client: create_client(config)?,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else {
            TransportError::Request(e)
        }
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl FeedTransport for MispTransport {
    async fn fetch_window(
        &self,
        endpoint: &MispEndpoint,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RawEvent>, TransportError> {
        let url = endpoint.api_url("/events/restSearch")?;
        let body = serde_json::json!({
            "from": from.to_string(),
            "to": to.to_string(),
            "returnFormat": "json",
            "published": true,
            "enforceWarninglist": true,
        });

        debug!("Fetching {} events from {} to {}", endpoint.name, from, to);

        let response = self
            .client
            .post(url)
            .header("Authorization", &endpoint.key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let search: RestSearchResponse = self.read_json(response).await?;
        Ok(search.response.into_iter().map(|e| e.event).collect())
    }

    async fn fetch_organisations(
        &self,
        endpoint: &MispEndpoint,
    ) -> Result<HashMap<String, String>, TransportError> {
        let url = endpoint.api_url("/organisations/index/scope:all")?;

        let response = self
            .client
            .get(url)
            .header("Authorization", &endpoint.key)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let orgs: Vec<OrganisationEnvelope> = self.read_json(response).await?;
        Ok(orgs
            .into_iter()
            .map(|o| (o.organisation.id, o.organisation.name))
            .collect())
    }
}
