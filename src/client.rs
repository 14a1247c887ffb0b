//! Client session layer: an explicit session object owned by the caller,
//! attached to requests, with a single silent refresh-and-retry on 401.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// The token pair (and role) a login or signup handed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub role: String,
}

/// Where the session lives between requests. No ambient global state: the
/// composition root picks a store and passes the client around.
pub trait SessionStore: Send + Sync + 'static {
    fn load(&self) -> Option<Session>;
    fn save(&self, session: &Session);
    fn clear(&self);
}

/// In-process store, good enough for CLIs and tests. Durable stores (a
/// keychain, a config file) implement the same trait.
#[derive(Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Option<Session> {
        self.session.lock().expect("session lock").clone()
    }

    fn save(&self, session: &Session) {
        *self.session.lock().expect("session lock") = Some(session.clone());
    }

    fn clear(&self) {
        *self.session.lock().expect("session lock") = None;
    }
}

#[derive(Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenPairBody {
    access_token: String,
    refresh_token: String,
    role: String,
}

#[derive(Deserialize)]
struct AccessTokenBody {
    access_token: String,
}

pub struct ApiClient<S: SessionStore> {
    http: reqwest::Client,
    base_url: String,
    store: S,
}

impl<S: SessionStore> ApiClient<S> {
    pub fn new(base_url: impl Into<String>, store: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&LoginBody { email, password })
            .send()
            .await
            .context("login request failed")?;

        let body: TokenPairBody = response
            .error_for_status()
            .context("login rejected")?
            .json()
            .await
            .context("malformed login response")?;

        let session = Session {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            role: body.role,
        };
        self.store.save(&session);
        Ok(session)
    }

    pub async fn logout(&self) -> Result<()> {
        let response = self.send(Method::POST, "/api/auth/logout", None).await?;
        response.error_for_status().context("logout rejected")?;
        self.store.clear();
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let body = serde_json::to_value(body).context("failed to serialize request body")?;
        self.send(Method::POST, path, Some(body)).await
    }

    /// Attaches the current access token; on a 401, silently refreshes once
    /// and retries the request exactly once. A second 401 (or a failed
    /// refresh) surfaces to the caller.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let first = self
            .build(method.clone(), path, body.as_ref())?
            .send()
            .await
            .context("request failed")?;

        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        // Without a stored session there is nothing to refresh with; hand
        // the server's 401 straight back.
        if self.store.load().is_none() {
            return Ok(first);
        }

        self.refresh_access_token().await?;

        self.build(method, path, body.as_ref())?
            .send()
            .await
            .context("retried request failed")
    }

    async fn refresh_access_token(&self) -> Result<()> {
        let session = self
            .store
            .load()
            .ok_or_else(|| anyhow!("no session to refresh"))?;

        let response = self
            .http
            .post(format!("{}/api/auth/refresh", self.base_url))
            .json(&RefreshBody {
                refresh_token: &session.refresh_token,
            })
            .send()
            .await
            .context("refresh request failed")?;

        let body: AccessTokenBody = response
            .error_for_status()
            .context("refresh rejected")?
            .json()
            .await
            .context("malformed refresh response")?;

        self.store.save(&Session {
            access_token: body.access_token,
            ..session
        });
        Ok(())
    }

    fn build(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RequestBuilder> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));

        if let Some(session) = self.store.load() {
            builder = builder.bearer_auth(&session.access_token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder)
    }
}
