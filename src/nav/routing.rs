//! Inter-map routes from the remote map explorer, memoized on disk per direction.

use crate::persistence::cache::{CacheStore, PATHFINDING};
use crate::world::position::MapId;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

pub type Route = Vec<MapId>;

pub fn route_key(from: MapId, to: MapId) -> String {
    format!("{from}_to_{to}")
}

/// Request/response context stored under `pathfinding/<from>_to_<to>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    #[serde(default)]
    pub from: Option<MapId>,
    #[serde(default)]
    pub to: Option<MapId>,
    #[serde(default)]
    pub path: Route,
}

/// Anything able to compute a route between two maps.
pub trait RouteSource {
    fn fetch_route(&self, from: MapId, to: MapId) -> Result<Route, RouteError>;
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("clearance credential rejected (HTTP {0}); refresh it and restart")]
    AuthExpired(u16),
    #[error("routing service answered HTTP {0}")]
    Status(u16),
    #[error("routing request failed: {0}")]
    Network(String),
    #[error("routing response malformed: {0}")]
    Malformed(String),
    #[error("routing client setup failed: {0}")]
    Client(String),
}

impl RouteError {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => RouteError::AuthExpired(status),
            _ => RouteError::Status(status),
        }
    }
}

pub struct RouteProvider<S> {
    cache: Arc<CacheStore>,
    source: S,
}

impl<S: RouteSource> RouteProvider<S> {
    pub fn new(cache: Arc<CacheStore>, source: S) -> Self {
        Self { cache, source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Cached route when present, otherwise asks the source. Failures yield an empty
    /// route and leave the cache untouched so a later call retries.
    pub fn get_route(&self, from: MapId, to: MapId) -> Route {
        let key = route_key(from, to);
        if let Some(record) = self.cache.get::<RouteRecord>(PATHFINDING, &key) {
            info!(from, to, hops = record.path.len(), "route from cache");
            return record.path;
        }

        info!(from, to, "requesting route");
        match self.source.fetch_route(from, to) {
            Ok(path) => {
                let record = RouteRecord {
                    from: Some(from),
                    to: Some(to),
                    path,
                };
                self.cache.set(PATHFINDING, &key, &record);
                info!(from, to, hops = record.path.len(), "route fetched and cached");
                record.path
            }
            Err(err @ RouteError::AuthExpired(_)) => {
                error!(from, to, error = %err, "routing credential expired");
                Vec::new()
            }
            Err(err) => {
                error!(from, to, error = %err, "routing failed");
                Vec::new()
            }
        }
    }
}

/// Time-limited anti-bot clearance cookie. Renewal is manual.
#[derive(Debug, Clone)]
pub struct ClearanceSession {
    cookie: String,
    created_at: Instant,
    lifetime: Duration,
}

impl ClearanceSession {
    pub fn new(cookie: impl Into<String>, lifetime: Duration) -> Self {
        Self::started_at(cookie, lifetime, Instant::now())
    }

    pub fn started_at(cookie: impl Into<String>, lifetime: Duration, created_at: Instant) -> Self {
        Self {
            cookie: cookie.into(),
            created_at,
            lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.lifetime
    }

    pub fn cookie_header(&self) -> String {
        format!("cf_clearance={}", self.cookie)
    }
}

#[derive(Debug, Clone)]
pub struct HttpRouteConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    path: Route,
}

/// Blocking client for `GET {base}/map-explorer/find/{from}/{to}`.
pub struct HttpRouteSource {
    http: Client,
    base_url: String,
    session: ClearanceSession,
}

impl HttpRouteSource {
    pub fn new(config: &HttpRouteConfig, session: ClearanceSession) -> Result<Self, RouteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|err| RouteError::Client(format!("user agent: {err}")))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json,text/html;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        let mut cookie = HeaderValue::from_str(&session.cookie_header())
            .map_err(|err| RouteError::Client(format!("clearance cookie: {err}")))?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| RouteError::Client(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &ClearanceSession {
        &self.session
    }

    pub fn find_url(&self, from: MapId, to: MapId) -> String {
        format!("{}/map-explorer/find/{from}/{to}", self.base_url)
    }
}

impl RouteSource for HttpRouteSource {
    fn fetch_route(&self, from: MapId, to: MapId) -> Result<Route, RouteError> {
        if self.session.is_expired() {
            warn!("clearance credential is probably expired; fetch a fresh one and restart");
        }
        let url = self.find_url(from, to);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|err| RouteError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status.into());
        }
        let body: FindResponse = response
            .json()
            .map_err(|err| RouteError::Malformed(err.to_string()))?;
        Ok(body.path)
    }
}

impl From<StatusCode> for RouteError {
    fn from(status: StatusCode) -> Self {
        RouteError::from_status(status.as_u16())
    }
}
