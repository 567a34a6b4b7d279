//! reqwest-backed Octavia v2 client.
//!
//! # API Endpoints Used
//!
//! - `GET /v2.0/lbaas/loadbalancers/{id}`
//! - `GET /v2.0/lbaas/listeners?loadbalancer_id={id}`, `GET|PUT /v2.0/lbaas/listeners/{id}`
//! - `GET|POST /v2.0/lbaas/pools`, `DELETE /v2.0/lbaas/pools/{id}`
//! - `GET|PUT /v2.0/lbaas/pools/{id}/members`
//! - `GET|POST /v2.0/lbaas/healthmonitors`
//!
//! List responses are paginated through `<resource>_links` entries with
//! `rel: "next"`; the client follows them until exhausted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::LoadBalancerApi;
use crate::auth::{endpoint_from_catalog, AuthMethod, AuthOptions, TokenResponse};
use crate::error::{ApiError, ApiResult};
use crate::types::{
    BatchMemberUpdate, Listener, LoadBalancer, Member, Monitor, MonitorCreate, Pool, PoolCreate,
};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Upper bound on pages followed for one list call.
const MAX_PAGES: usize = 1000;

/// Octavia fault body: `{"faultcode": ..., "faultstring": ..., "debuginfo": ...}`.
#[derive(Debug, Deserialize)]
struct Fault {
    faultstring: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

/// Octavia API client.
#[derive(Debug, Clone)]
pub struct OctaviaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OctaviaClient {
    /// Creates a client for `endpoint` using an already-issued token.
    ///
    /// `endpoint` is the catalog URL of the load-balancer service, with or
    /// without the `/v2.0` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the token is not a valid header value
    /// or the HTTP client cannot be built.
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> ApiResult<Self> {
        let mut token_value = HeaderValue::from_str(token)
            .map_err(|_| ApiError::Config("token contains invalid characters".to_string()))?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_TOKEN_HEADER, token_value);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: api_base(endpoint),
        })
    }

    /// Authenticates against Keystone and locates the Octavia endpoint in
    /// the returned service catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`] if Keystone rejects the credentials and
    /// [`ApiError::Config`] if the catalog has no matching endpoint.
    pub async fn authenticate(opts: &AuthOptions, timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

        let url = opts.tokens_url();
        debug!(url = %url, method = ?opts.method, "Requesting Keystone token");

        let request = match (&opts.method, opts.token_request_body()) {
            (AuthMethod::Token(token), _) => http
                .get(&url)
                .header(AUTH_TOKEN_HEADER, token)
                .header(SUBJECT_TOKEN_HEADER, token),
            (_, Some(body)) => http.post(&url).json(&body),
            (_, None) => {
                return Err(ApiError::Config(
                    "no token request could be built from the credentials".to_string(),
                ))
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "Keystone returned {}: {}",
                status.as_u16(),
                fault_message(&body)
            )));
        }

        let token = match &opts.method {
            AuthMethod::Token(token) => token.clone(),
            _ => response
                .headers()
                .get(SUBJECT_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    ApiError::Auth(format!("response has no {} header", SUBJECT_TOKEN_HEADER))
                })?,
        };

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(format!("token response: {}", e)))?;
        let endpoint = endpoint_from_catalog(
            &body.token.catalog,
            &opts.interface,
            opts.region.as_deref(),
        )?;

        info!(endpoint = %endpoint, "Authenticated against Keystone");
        Self::new(&endpoint, &token, timeout)
    }

    /// Returns the versioned API base URL (e.g. `https://lb:9876/v2.0`).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/lbaas/{}", self.base_url, path)
    }

    /// Sends a request and maps non-success statuses onto [`ApiError`].
    async fn send(&self, request: RequestBuilder, resource: &str, id: &str) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(status, &body, resource, id))
    }

    /// Sends a request and extracts `key` from the JSON response envelope.
    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        key: &str,
        resource: &str,
        id: &str,
    ) -> ApiResult<T> {
        let value: Value = self.send(request, resource, id).await?.json().await?;
        unwrap_envelope(value, key)
    }

    /// Fetches every page of a list call.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        key: &str,
        parent: &str,
    ) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut request = self.http.get(self.url(path)).query(query);
        let links_key = format!("{}_links", key);

        for page in 1..=MAX_PAGES {
            let mut value: Value = self.send(request, key, parent).await?.json().await?;
            let next = next_link(&mut value, &links_key)?;
            let batch: Vec<T> = unwrap_envelope(value, key)?;
            debug!(resource = key, page, count = batch.len(), "Fetched page");
            items.extend(batch);

            match next {
                Some(href) => request = self.http.get(href),
                None => return Ok(items),
            }
        }

        Err(ApiError::Parse(format!(
            "{} listing did not terminate after {} pages",
            key, MAX_PAGES
        )))
    }
}

#[async_trait]
impl LoadBalancerApi for OctaviaClient {
    async fn get_load_balancer(&self, id: &str) -> ApiResult<LoadBalancer> {
        let request = self.http.get(self.url(&format!("loadbalancers/{}", id)));
        self.fetch(request, "loadbalancer", "load balancer", id).await
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> ApiResult<Vec<Listener>> {
        self.list_all(
            "listeners",
            &[("loadbalancer_id", load_balancer_id)],
            "listeners",
            load_balancer_id,
        )
        .await
    }

    async fn get_listener(&self, id: &str) -> ApiResult<Listener> {
        let request = self.http.get(self.url(&format!("listeners/{}", id)));
        self.fetch(request, "listener", "listener", id).await
    }

    async fn update_listener_default_pool(
        &self,
        listener_id: &str,
        pool_id: &str,
    ) -> ApiResult<Listener> {
        debug!(listener_id, pool_id, "Updating listener default pool");
        let request = self
            .http
            .put(self.url(&format!("listeners/{}", listener_id)))
            .json(&json!({ "listener": { "default_pool_id": pool_id } }));
        self.fetch(request, "listener", "listener", listener_id)
            .await
    }

    async fn list_pools(&self, load_balancer_id: &str) -> ApiResult<Vec<Pool>> {
        self.list_all(
            "pools",
            &[("loadbalancer_id", load_balancer_id)],
            "pools",
            load_balancer_id,
        )
        .await
    }

    async fn create_pool(&self, request: &PoolCreate) -> ApiResult<Pool> {
        debug!(name = %request.name, protocol = %request.protocol, "Creating pool");
        let builder = self
            .http
            .post(self.url("pools"))
            .json(&json!({ "pool": request }));
        self.fetch(builder, "pool", "pool", &request.name).await
    }

    async fn delete_pool(&self, id: &str) -> ApiResult<()> {
        debug!(pool_id = id, "Deleting pool");
        let request = self.http.delete(self.url(&format!("pools/{}", id)));
        self.send(request, "pool", id).await?;
        Ok(())
    }

    async fn get_monitor(&self, id: &str) -> ApiResult<Monitor> {
        let request = self.http.get(self.url(&format!("healthmonitors/{}", id)));
        self.fetch(request, "healthmonitor", "health monitor", id)
            .await
    }

    async fn create_monitor(&self, request: &MonitorCreate) -> ApiResult<Monitor> {
        debug!(
            pool_id = %request.pool_id,
            monitor_type = %request.monitor_type,
            "Creating health monitor"
        );
        let builder = self
            .http
            .post(self.url("healthmonitors"))
            .json(&json!({ "healthmonitor": request }));
        self.fetch(builder, "healthmonitor", "pool", &request.pool_id)
            .await
    }

    async fn list_members(&self, pool_id: &str) -> ApiResult<Vec<Member>> {
        self.list_all(&format!("pools/{}/members", pool_id), &[], "members", pool_id)
            .await
    }

    async fn batch_update_members(
        &self,
        pool_id: &str,
        members: &[BatchMemberUpdate],
    ) -> ApiResult<()> {
        debug!(pool_id, count = members.len(), "Batch updating members");
        let request = self
            .http
            .put(self.url(&format!("pools/{}/members", pool_id)))
            .json(&json!({ "members": members }));
        self.send(request, "pool", pool_id).await?;
        Ok(())
    }
}

/// Appends the API version to a catalog endpoint unless already present.
fn api_base(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/v2.0") || base.ends_with("/v2") {
        base.to_string()
    } else {
        format!("{}/v2.0", base)
    }
}

fn unwrap_envelope<T: DeserializeOwned>(mut value: Value, key: &str) -> ApiResult<T> {
    let inner = value
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| ApiError::Parse(format!("response has no '{}' field", key)))?;
    serde_json::from_value(inner).map_err(|e| ApiError::Parse(format!("{}: {}", key, e)))
}

/// Extracts the `rel: "next"` href from a list response, if any.
fn next_link(value: &mut Value, links_key: &str) -> ApiResult<Option<String>> {
    let Some(raw) = value.get_mut(links_key).map(Value::take) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let links: Vec<Link> =
        serde_json::from_value(raw).map_err(|e| ApiError::Parse(format!("{}: {}", links_key, e)))?;
    Ok(links.into_iter().find(|l| l.rel == "next").map(|l| l.href))
}

fn fault_message(body: &str) -> String {
    serde_json::from_str::<Fault>(body)
        .map(|f| f.faultstring)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn error_for_status(status: StatusCode, body: &str, resource: &str, id: &str) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::not_found(resource, id),
        StatusCode::CONFLICT => ApiError::conflict(fault_message(body)),
        _ => ApiError::api(status.as_u16(), fault_message(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_api_base() {
        assert_eq!(api_base("https://lb:9876"), "https://lb:9876/v2.0");
        assert_eq!(api_base("https://lb:9876/"), "https://lb:9876/v2.0");
        assert_eq!(api_base("https://lb:9876/v2.0/"), "https://lb:9876/v2.0");
        assert_eq!(api_base("https://lb/load-balancer/v2"), "https://lb/load-balancer/v2");
    }

    #[test]
    fn test_error_for_status() {
        let fault = json!({
            "faultcode": "Client",
            "faultstring": "Load Balancer lb-1 is immutable and cannot be updated.",
            "debuginfo": null
        })
        .to_string();

        let err = error_for_status(StatusCode::CONFLICT, &fault, "pool", "p-1");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("immutable and cannot be updated"));

        let err = error_for_status(StatusCode::NOT_FOUND, "", "pool", "p-1");
        assert_eq!(err.to_string(), "pool 'p-1' not found");

        let err = error_for_status(StatusCode::BAD_GATEWAY, "upstream down\n", "pool", "p-1");
        assert_eq!(err.to_string(), "Octavia API error: 502 - upstream down");
    }

    #[test]
    fn test_next_link() {
        let mut value = json!({
            "pools": [],
            "pools_links": [
                {
                    "rel": "previous",
                    "href": "https://lb/v2.0/lbaas/pools?marker=a&page_reverse=True"
                },
                { "rel": "next", "href": "https://lb/v2.0/lbaas/pools?marker=b" }
            ]
        });
        assert_eq!(
            next_link(&mut value, "pools_links").unwrap().as_deref(),
            Some("https://lb/v2.0/lbaas/pools?marker=b")
        );

        let mut value = json!({ "pools": [], "pools_links": [] });
        assert_eq!(next_link(&mut value, "pools_links").unwrap(), None);

        let mut value = json!({ "pools": [] });
        assert_eq!(next_link(&mut value, "pools_links").unwrap(), None);
    }

    #[test]
    fn test_unwrap_envelope_missing_key() {
        let err = unwrap_envelope::<Pool>(json!({ "listener": {} }), "pool").unwrap_err();
        assert!(matches!(err, ApiError::Parse(_)));
    }

    #[test]
    fn test_new_rejects_bad_token() {
        let err =
            OctaviaClient::new("https://lb", "bad\ntoken", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }
}
