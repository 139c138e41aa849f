//! Thin async HTTP client wrapper.
//!
//! The teacher hand-rolls its own `hyper`-based client with a custom
//! `Service<Uri>` connector (`src/tools/http.rs`) because it needs proxy
//! CONNECT tunnelling and raw TCP keepalive tuning for its backup
//! protocol. Chantal's needs are the generic "fetch an index, fetch a
//! blob, honour conditional-GET and basic/bearer auth" shape spec §1
//! explicitly calls an external collaborator's concern ("HTTP client
//! tuning and authentication plumbing"), so it reaches for `reqwest`
//! instead of reimplementing connection handling — the one deliberate
//! departure from the teacher's stack, noted in DESIGN.md.

use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::{ChantalError, Result};

pub const DEFAULT_USER_AGENT: &str = "chantal/0.1";

#[derive(Clone, Debug, Default)]
pub struct ConditionalHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

pub enum FetchOutcome {
    Unchanged,
    Fetched {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|err| ChantalError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    /// Default timeouts per spec §5: 30s connect, 300s per-request.
    pub fn with_defaults() -> Result<Self> {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }

    fn apply_auth(
        &self,
        mut req: reqwest::RequestBuilder,
        auth: Option<&AuthConfig>,
    ) -> reqwest::RequestBuilder {
        match auth {
            Some(AuthConfig::Basic { username, password }) => {
                req = req.basic_auth(username, Some(password));
            }
            Some(AuthConfig::Bearer { token }) => {
                req = req.bearer_auth(token);
            }
            Some(AuthConfig::Entitlement { .. }) | None => {}
        }
        req
    }

    /// Fetch `url`, honouring conditional-GET validators per spec §4.5
    /// step 1. Returns `Unchanged` on a 304 response.
    pub async fn fetch_conditional(
        &self,
        url: &str,
        auth: Option<&AuthConfig>,
        cond: &ConditionalHeaders,
    ) -> Result<FetchOutcome> {
        let mut req = self.client.get(url);
        req = self.apply_auth(req, auth);
        if let Some(etag) = &cond.etag {
            req = req.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(lm) = &cond.last_modified {
            req = req.header(reqwest::header::IF_MODIFIED_SINCE, lm);
        }

        let resp = req
            .send()
            .await
            .map_err(|err| ChantalError::Network(err.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::Unchanged);
        }
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ChantalError::Auth(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            return Err(ChantalError::Network(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }

        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());
        let last_modified = resp
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_owned());

        let body = resp
            .bytes()
            .await
            .map_err(|err| ChantalError::Network(err.to_string()))?
            .to_vec();

        Ok(FetchOutcome::Fetched {
            body,
            etag,
            last_modified,
        })
    }

    /// Fetch `url` unconditionally, for blob downloads.
    pub async fn fetch_bytes(&self, url: &str, auth: Option<&AuthConfig>) -> Result<Vec<u8>> {
        let mut req = self.client.get(url);
        req = self.apply_auth(req, auth);
        let resp = req
            .send()
            .await
            .map_err(|err| ChantalError::Network(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(ChantalError::Network(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|err| ChantalError::Network(err.to_string()))
    }
}
