//! Route table: a `matchit` path router whose values list the endpoint bound to each method.

use std::collections::HashMap;

use http::Method;
use strand_http::websocket::Side;
use thiserror::Error;
use tracing::trace;

use crate::cgi::Script;

/// What answers a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The script output is sent in one piece with `Content-Length`.
    Fixed(Script),
    /// Every piece of script output is sent as one chunk.
    Stream(Script),
    /// WebSocket echo.
    Echo,
    /// One side of a WebSocket relay pair.
    Relay(Side),
    /// WebSocket stream of the current time.
    Ticker,
}

impl Endpoint {
    pub fn is_websocket(&self) -> bool {
        matches!(self, Endpoint::Echo | Endpoint::Relay(_) | Endpoint::Ticker)
    }
}

#[derive(Debug)]
pub struct Router {
    inner_router: matchit::Router<Vec<(Method, Endpoint)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteResult {
    Found(Endpoint),
    /// The path is known but not bound to this method.
    MethodNotAllowed,
    NotFound,
}

#[derive(Error, Debug)]
pub enum RouterBuildError {
    #[error("invalid route {path}: {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Path and method matching are case-sensitive.
    pub fn at(&self, method: &Method, path: &str) -> RouteResult {
        let Ok(matched) = self.inner_router.at(path) else {
            trace!(path, "no route matched");
            return RouteResult::NotFound;
        };

        matched
            .value
            .iter()
            .find(|(route_method, _)| route_method == method)
            .map_or(RouteResult::MethodNotAllowed, |(_, endpoint)| RouteResult::Found(*endpoint))
    }
}

#[derive(Debug, Default)]
pub struct RouterBuilder {
    data: HashMap<String, Vec<(Method, Endpoint)>>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Binds `endpoint` to `method` on `route`. A later binding of the same method replaces the
    /// earlier one.
    pub fn route(mut self, route: impl Into<String>, method: Method, endpoint: Endpoint) -> Self {
        let items = self.data.entry(route.into()).or_default();
        items.retain(|(existing, _)| *existing != method);
        items.push((method, endpoint));
        self
    }

    pub fn get(self, route: impl Into<String>, endpoint: Endpoint) -> Self {
        self.route(route, Method::GET, endpoint)
    }

    pub fn post(self, route: impl Into<String>, endpoint: Endpoint) -> Self {
        self.route(route, Method::POST, endpoint)
    }

    pub fn build(self) -> Result<Router, RouterBuildError> {
        let mut inner_router = matchit::Router::new();

        for (path, items) in self.data {
            if let Err(source) = inner_router.insert(path.clone(), items) {
                return Err(RouterBuildError::InvalidRoute { path, source });
            }
        }

        Ok(Router { inner_router })
    }
}
