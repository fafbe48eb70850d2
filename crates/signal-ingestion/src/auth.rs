// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Credentials and the authentication headers derived from them.

use crate::errors;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::env;
use std::fmt::Debug;
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::OnceCell;

pub const SESSION_KEY_HEADER: &str = "x-session-key";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const APP_NAME_HEADER: &str = "x-app-name";

/// Credentials accepted by the ingestion backend.
///
/// A session key wins over an API key. The app name is only sent along with
/// an API key.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub app_name: Option<String>,
    pub session_key: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn session(session_key: &str) -> Self {
        Self {
            session_key: Some(session_key.to_string()),
            ..Self::default()
        }
    }

    /// Legacy per-application API key.
    #[must_use]
    pub fn api_key(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::default()
        }
    }

    /// Organization API key scoped to an application.
    #[must_use]
    pub fn app(api_key: &str, app_name: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            app_name: Some(app_name.to_string()),
            session_key: None,
        }
    }

    /// Reads `SIGNAL_API_KEY`, `SIGNAL_APP_NAME` and `SIGNAL_SESSION_KEY`.
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty("SIGNAL_API_KEY"),
            app_name: non_empty("SIGNAL_APP_NAME"),
            session_key: non_empty("SIGNAL_SESSION_KEY"),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("app_name", &self.app_name)
            .field("session_key", &self.session_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Derives the headers to attach to every request made with `credentials`.
///
/// At most one of the session-key header or the API-key headers is emitted.
pub fn auth_headers(credentials: &Credentials) -> Result<HeaderMap, errors::Config> {
    let mut headers = HeaderMap::new();
    if let Some(session_key) = &credentials.session_key {
        insert_sensitive(&mut headers, SESSION_KEY_HEADER, session_key)?;
    } else if let Some(api_key) = &credentials.api_key {
        insert_sensitive(&mut headers, API_KEY_HEADER, api_key)?;
        if let Some(app_name) = &credentials.app_name {
            let value = HeaderValue::from_str(app_name)
                .map_err(|_| errors::Config::InvalidHeader(APP_NAME_HEADER))?;
            headers.insert(HeaderName::from_static(APP_NAME_HEADER), value);
        }
    }
    Ok(headers)
}

fn insert_sensitive(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), errors::Config> {
    let mut value = HeaderValue::from_str(value).map_err(|_| errors::Config::InvalidHeader(name))?;
    value.set_sensitive(true);
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

pub type CredentialsResolverFn = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Credentials, String>> + Send>> + Send + Sync,
>;

/// Where credentials come from: fixed configuration or a resolver supplied by
/// the host process. A dynamic source is resolved once and cached.
#[derive(Clone)]
pub enum CredentialSource {
    Static(Credentials),
    Dynamic {
        resolver_fn: CredentialsResolverFn,
        credentials: Arc<OnceCell<Credentials>>,
    },
}

impl CredentialSource {
    pub fn new_from_resolver(resolver_fn: CredentialsResolverFn) -> Self {
        Self::Dynamic {
            resolver_fn,
            credentials: Arc::new(OnceCell::new()),
        }
    }

    pub async fn resolve(&self) -> Result<&Credentials, errors::Config> {
        match self {
            Self::Static(credentials) => Ok(credentials),
            Self::Dynamic {
                resolver_fn,
                credentials,
            } => {
                credentials
                    .get_or_try_init(|| async {
                        (resolver_fn)()
                            .await
                            .map_err(errors::Config::CredentialResolution)
                    })
                    .await
            }
        }
    }
}

impl From<Credentials> for CredentialSource {
    fn from(credentials: Credentials) -> Self {
        Self::Static(credentials)
    }
}

impl Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialSource")
    }
}
