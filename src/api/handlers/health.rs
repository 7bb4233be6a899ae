use crate::{
    cache::{MemoryCache, RedisCache},
    store::{memory::MemoryStore, postgres::PgStore},
    GIT_COMMIT_HASH,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

/// A dependency the health endpoint can check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl Probe for PgStore {
    async fn check(&self) -> Result<(), String> {
        self.ping().await.map_err(|err| err.to_string())
    }
}

#[async_trait]
impl Probe for RedisCache {
    async fn check(&self) -> Result<(), String> {
        self.ping().await.map_err(|err| err.to_string())
    }
}

#[async_trait]
impl Probe for MemoryCache {
    async fn check(&self) -> Result<(), String> {
        self.ping().map_err(|err| err.to_string())
    }
}

#[async_trait]
impl Probe for MemoryStore {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The durable store and the cache, as seen by `/health`.
#[derive(Clone)]
pub struct HealthProbes {
    database: Arc<dyn Probe>,
    cache: Arc<dyn Probe>,
}

impl HealthProbes {
    #[must_use]
    pub fn new(database: Arc<dyn Probe>, cache: Arc<dyn Probe>) -> Self {
        Self { database, cache }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    cache: String,
}

fn status(result: &Result<(), String>) -> String {
    if result.is_ok() {
        "ok".to_string()
    } else {
        "error".to_string()
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database and cache are healthy", body = [Health]),
        (status = 503, description = "Database or cache is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, probes: Extension<Arc<HealthProbes>>) -> impl IntoResponse {
    let (database, cache) = tokio::join!(probes.database.check(), probes.cache.check());

    if let Err(err) = &database {
        error!("Database health check failed: {err}");
    }
    if let Err(err) = &cache {
        error!("Cache health check failed: {err}");
    }

    let is_healthy = database.is_ok() && cache.is_ok();

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status(&database),
        cache: status(&cache),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(cache: Arc<MemoryCache>) -> Router {
        let probes = HealthProbes::new(Arc::new(MemoryStore::new()), cache);
        Router::new()
            .route("/health", get(health))
            .layer(Extension(Arc::new(probes)))
    }

    fn request(method: Method) -> Result<axum::http::Request<Body>> {
        Ok(axum::http::Request::builder()
            .method(method)
            .uri("/health")
            .body(Body::empty())?)
    }

    #[tokio::test]
    async fn healthy_get_reports_components() -> Result<()> {
        let response = app(Arc::new(MemoryCache::new()))
            .oneshot(request(Method::GET)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        assert!(x_app.is_some_and(|value| value.starts_with(env!("CARGO_PKG_NAME"))));

        let bytes = response.into_body().collect().await?.to_bytes();
        let health: Health = serde_json::from_slice(&bytes)?;
        assert_eq!(health.database, "ok");
        assert_eq!(health.cache, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        Ok(())
    }

    #[tokio::test]
    async fn cache_outage_is_unavailable() -> Result<()> {
        let cache = Arc::new(MemoryCache::new());
        cache.set_available(false);
        let response = app(cache).oneshot(request(Method::GET)?).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = response.into_body().collect().await?.to_bytes();
        let health: Health = serde_json::from_slice(&bytes)?;
        assert_eq!(health.cache, "error");
        Ok(())
    }

    #[tokio::test]
    async fn head_has_no_body() -> Result<()> {
        let response = app(Arc::new(MemoryCache::new()))
            .oneshot(request(Method::HEAD)?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await?.to_bytes();
        assert!(bytes.is_empty());
        Ok(())
    }
}
