//! Keystone v3 authentication options.
//!
//! Options are read from the standard `OS_*` environment variables used by
//! the OpenStack CLI. [`AuthOptions::from_lookup`] takes any variable lookup
//! so the parsing can be tested without touching the process environment.
//! The HTTP exchange itself lives in [`crate::OctaviaClient::authenticate`].

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};

/// Catalog service type of the Octavia endpoint.
pub const LOAD_BALANCER_SERVICE_TYPE: &str = "load-balancer";

/// Default endpoint interface.
pub const DEFAULT_INTERFACE: &str = "public";

const PROJECT_DOMAIN_REQUIRED: &str =
    "OS_PROJECT_NAME requires OS_PROJECT_DOMAIN_NAME or OS_PROJECT_DOMAIN_ID";

/// A Keystone domain reference (by id or by name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRef {
    Id(String),
    Name(String),
}

impl DomainRef {
    fn to_json(&self) -> Value {
        match self {
            DomainRef::Id(id) => json!({ "id": id }),
            DomainRef::Name(name) => json!({ "name": name }),
        }
    }
}

/// How the user proves their identity.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Password authentication, by user id or by user name + domain.
    Password {
        user_id: Option<String>,
        user_name: Option<String>,
        user_domain: Option<DomainRef>,
        password: String,
    },
    /// Application credential (already project-scoped).
    ApplicationCredential { id: String, secret: String },
    /// A pre-issued token.
    Token(String),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password {
                user_id,
                user_name,
                user_domain,
                ..
            } => f
                .debug_struct("Password")
                .field("user_id", user_id)
                .field("user_name", user_name)
                .field("user_domain", user_domain)
                .field("password", &"<redacted>")
                .finish(),
            AuthMethod::ApplicationCredential { id, .. } => f
                .debug_struct("ApplicationCredential")
                .field("id", id)
                .field("secret", &"<redacted>")
                .finish(),
            AuthMethod::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Project scope of a password-authenticated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectScope {
    Id(String),
    Name { name: String, domain: DomainRef },
}

/// Everything needed to obtain a token and locate the Octavia endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOptions {
    /// Keystone URL, with or without the `/v3` suffix.
    pub auth_url: String,
    pub method: AuthMethod,
    pub scope: Option<ProjectScope>,
    /// Region to pick from the catalog; any region if unset.
    pub region: Option<String>,
    /// Endpoint interface to pick from the catalog.
    pub interface: String,
}

impl AuthOptions {
    /// Reads options from the process environment.
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads options through `lookup`, which maps a variable name to its value.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> ApiResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let first = |keys: &[&str]| keys.iter().find_map(|k| get(k));

        let auth_url = get("OS_AUTH_URL")
            .ok_or_else(|| ApiError::Config("OS_AUTH_URL is not set".to_string()))?;

        let fallback_domain = match (get("OS_DOMAIN_ID"), get("OS_DOMAIN_NAME")) {
            (Some(id), _) => Some(DomainRef::Id(id)),
            (None, Some(name)) => Some(DomainRef::Name(name)),
            (None, None) => None,
        };
        let domain = |id_key: &str, name_key: &str| match (get(id_key), get(name_key)) {
            (Some(id), _) => Some(DomainRef::Id(id)),
            (None, Some(name)) => Some(DomainRef::Name(name)),
            (None, None) => fallback_domain.clone(),
        };

        let method = if let (Some(id), Some(secret)) = (
            get("OS_APPLICATION_CREDENTIAL_ID"),
            get("OS_APPLICATION_CREDENTIAL_SECRET"),
        ) {
            AuthMethod::ApplicationCredential { id, secret }
        } else if let Some(password) = get("OS_PASSWORD") {
            let user_id = get("OS_USER_ID");
            let user_name = get("OS_USERNAME");
            let user_domain = domain("OS_USER_DOMAIN_ID", "OS_USER_DOMAIN_NAME");
            if user_id.is_none() && user_name.is_none() {
                return Err(ApiError::Config(
                    "OS_PASSWORD is set but neither OS_USERNAME nor OS_USER_ID is".to_string(),
                ));
            }
            if user_id.is_none() && user_domain.is_none() {
                return Err(ApiError::Config(
                    "OS_USERNAME requires OS_USER_DOMAIN_NAME or OS_USER_DOMAIN_ID".to_string(),
                ));
            }
            AuthMethod::Password {
                user_id,
                user_name,
                user_domain,
                password,
            }
        } else if let Some(token) = get("OS_TOKEN") {
            AuthMethod::Token(token)
        } else {
            return Err(ApiError::Config(
                "no credentials found: set OS_PASSWORD, OS_APPLICATION_CREDENTIAL_* or OS_TOKEN"
                    .to_string(),
            ));
        };

        let scope = match first(&["OS_PROJECT_ID", "OS_TENANT_ID"]) {
            Some(id) => Some(ProjectScope::Id(id)),
            None => match first(&["OS_PROJECT_NAME", "OS_TENANT_NAME"]) {
                Some(name) => {
                    let domain = domain("OS_PROJECT_DOMAIN_ID", "OS_PROJECT_DOMAIN_NAME")
                        .ok_or_else(|| ApiError::Config(PROJECT_DOMAIN_REQUIRED.to_string()))?;
                    Some(ProjectScope::Name { name, domain })
                }
                None => None,
            },
        };

        Ok(Self {
            auth_url,
            method,
            scope,
            region: get("OS_REGION_NAME"),
            interface: get("OS_INTERFACE")
                .map(|i| i.trim_end_matches("URL").to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
        })
    }

    /// Returns the `/v3/auth/tokens` URL.
    pub fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{}/auth/tokens", base)
        } else {
            format!("{}/v3/auth/tokens", base)
        }
    }

    /// Builds the `POST /v3/auth/tokens` request body.
    ///
    /// Returns `None` for [`AuthMethod::Token`], which is validated with a
    /// `GET` instead.
    pub fn token_request_body(&self) -> Option<Value> {
        let identity = match &self.method {
            AuthMethod::Password {
                user_id,
                user_name,
                user_domain,
                password,
            } => {
                let mut user = json!({ "password": password });
                if let Some(id) = user_id {
                    user["id"] = json!(id);
                } else if let Some(name) = user_name {
                    user["name"] = json!(name);
                    if let Some(domain) = user_domain {
                        user["domain"] = domain.to_json();
                    }
                }
                json!({ "methods": ["password"], "password": { "user": user } })
            }
            AuthMethod::ApplicationCredential { id, secret } => json!({
                "methods": ["application_credential"],
                "application_credential": { "id": id, "secret": secret }
            }),
            AuthMethod::Token(_) => return None,
        };

        let mut auth = json!({ "identity": identity });
        let scoped = !matches!(self.method, AuthMethod::ApplicationCredential { .. });
        if let (true, Some(scope)) = (scoped, &self.scope) {
            auth["scope"] = match scope {
                ProjectScope::Id(id) => json!({ "project": { "id": id } }),
                ProjectScope::Name { name, domain } => {
                    json!({ "project": { "name": name, "domain": domain.to_json() } })
                }
            };
        }
        Some(json!({ "auth": auth }))
    }
}

/// Body of a Keystone token response; only the catalog is read.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: TokenBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenBody {
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

/// Picks the load-balancer endpoint URL out of a service catalog.
pub(crate) fn endpoint_from_catalog(
    catalog: &[CatalogEntry],
    interface: &str,
    region: Option<&str>,
) -> ApiResult<String> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == LOAD_BALANCER_SERVICE_TYPE)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|ep| {
            ep.interface == interface
                && region.is_none_or(|r| {
                    ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r)
                })
        })
        .map(|ep| ep.url.clone())
        .ok_or_else(|| {
            ApiError::Config(format!(
                "no {} endpoint with interface '{}'{} in the service catalog",
                LOAD_BALANCER_SERVICE_TYPE,
                interface,
                region.map(|r| format!(" in region '{}'", r)).unwrap_or_default()
            ))
        })
}
