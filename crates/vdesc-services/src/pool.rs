//! Bounded-concurrency broker for the inference services.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{ServiceError, ServiceResult};

/// The three logical inference services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Caption,
    Rating,
    Detect,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Caption, ServiceKind::Rating, ServiceKind::Detect];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Caption => "caption",
            ServiceKind::Rating => "rating",
            ServiceKind::Detect => "detect",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one service endpoint.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub kind: ServiceKind,
    /// Base URL, e.g. `http://localhost:8085`.
    pub base_url: String,
    /// Request path, e.g. `/upload`.
    pub endpoint: String,
    /// Semaphore size. The caption service is always 1.
    pub max_concurrency: usize,
    /// Access token sent with caption/rating requests.
    pub token: String,
}

impl ServiceConfig {
    /// Full request URL for this service.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint)
    }
}

/// Pool-wide configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub services: Vec<ServiceConfig>,
    /// Health probe interval.
    pub health_interval: Duration,
    /// Consecutive probe failures before a service is marked unhealthy.
    pub unhealthy_after: u32,
    /// Probe timeout.
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            services: vec![
                ServiceConfig {
                    kind: ServiceKind::Caption,
                    base_url: "http://localhost:8085".to_string(),
                    endpoint: "/upload".to_string(),
                    max_concurrency: 1,
                    token: String::new(),
                },
                ServiceConfig {
                    kind: ServiceKind::Rating,
                    base_url: "http://localhost:8082".to_string(),
                    endpoint: "/api".to_string(),
                    max_concurrency: 4,
                    token: String::new(),
                },
                ServiceConfig {
                    kind: ServiceKind::Detect,
                    base_url: "http://localhost:8087".to_string(),
                    endpoint: "/detect_multiple_files".to_string(),
                    max_concurrency: 2,
                    token: String::new(),
                },
            ],
            health_interval: Duration::from_secs(30),
            unhealthy_after: 3,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables. Ports follow the
    /// deployment convention; full URLs can override.
    pub fn from_env() -> Self {
        let token = std::env::var("INFERENCE_SERVICE_TOKEN").unwrap_or_default();

        let service = |kind: ServiceKind, port_var: &str, url_var: &str, default_port: u16, endpoint: &str, concurrency_var: &str, default_concurrency: usize| {
            let base_url = std::env::var(url_var).unwrap_or_else(|_| {
                let port = std::env::var(port_var)
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
                    .unwrap_or(default_port);
                format!("http://localhost:{port}")
            });
            let max_concurrency = match kind {
                // Single-flight is a hard contract, not configurable
                ServiceKind::Caption => 1,
                _ => std::env::var(concurrency_var)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default_concurrency),
            };
            ServiceConfig {
                kind,
                base_url,
                endpoint: endpoint.to_string(),
                max_concurrency,
                token: token.clone(),
            }
        };

        Self {
            services: vec![
                service(ServiceKind::Caption, "CAPTION_SERVICE_PORT", "CAPTION_SERVICE_URL", 8085, "/upload", "", 1),
                service(ServiceKind::Rating, "RATING_SERVICE_PORT", "RATING_SERVICE_URL", 8082, "/api", "RATING_MAX_CONCURRENCY", 4),
                service(ServiceKind::Detect, "DETECT_SERVICE_PORT", "DETECT_SERVICE_URL", 8087, "/detect_multiple_files", "DETECT_MAX_CONCURRENCY", 2),
            ],
            health_interval: Duration::from_secs(
                std::env::var("SERVICE_HEALTH_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            unhealthy_after: std::env::var("SERVICE_UNHEALTHY_AFTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

struct ServiceEntry {
    config: ServiceConfig,
    semaphore: Arc<Semaphore>,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
}

/// A held slot on one service. The permit is released when the handle
/// drops, so no code path can leak the caption slot.
#[derive(Debug)]
pub struct ServiceHandle {
    pub kind: ServiceKind,
    /// Full request URL of the service.
    pub url: String,
    /// Base URL (health probes, image URLs).
    pub base_url: String,
    /// Access token for caption/rating requests.
    pub token: String,
    _permit: OwnedSemaphorePermit,
}

/// Health-checked, semaphore-bounded access to the inference services.
pub struct ServicePool {
    entries: HashMap<ServiceKind, Arc<ServiceEntry>>,
    http: reqwest::Client,
    unhealthy_after: u32,
    probe_timeout: Duration,
}

impl ServicePool {
    pub fn new(config: PoolConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout.max(Duration::from_secs(2)))
            .build()?;

        let entries = config
            .services
            .into_iter()
            .map(|service| {
                let entry = Arc::new(ServiceEntry {
                    semaphore: Arc::new(Semaphore::new(service.max_concurrency)),
                    healthy: AtomicBool::new(true),
                    consecutive_failures: AtomicU32::new(0),
                    config: service,
                });
                (entry.config.kind, entry)
            })
            .collect();

        Ok(Self {
            entries,
            http,
            unhealthy_after: config.unhealthy_after,
            probe_timeout: config.probe_timeout,
        })
    }

    pub fn from_env() -> ServiceResult<Self> {
        Self::new(PoolConfig::from_env())
    }

    fn entry(&self, kind: ServiceKind) -> ServiceResult<&Arc<ServiceEntry>> {
        self.entries
            .get(&kind)
            .ok_or(ServiceError::Unconfigured(kind))
    }

    /// Whether the service is currently marked healthy.
    pub fn is_healthy(&self, kind: ServiceKind) -> bool {
        self.entry(kind)
            .map(|entry| entry.healthy.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Acquire a slot on a healthy service, waiting up to `deadline`.
    ///
    /// Returns [`ServiceError::Unhealthy`] when the deadline elapses with
    /// the health bit down, [`ServiceError::AcquireTimeout`] when the
    /// service is healthy but saturated.
    pub async fn acquire(
        &self,
        kind: ServiceKind,
        deadline: Duration,
    ) -> ServiceResult<ServiceHandle> {
        let entry = Arc::clone(self.entry(kind)?);

        let wait = async {
            loop {
                if !entry.healthy.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    continue;
                }
                match Arc::clone(&entry.semaphore).acquire_owned().await {
                    Ok(permit) => return Ok(permit),
                    Err(_) => return Err(ServiceError::AcquireTimeout(kind)),
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(Ok(permit)) => {
                debug!(service = %kind, "Acquired service slot");
                Ok(ServiceHandle {
                    kind,
                    url: entry.config.url(),
                    base_url: entry.config.base_url.clone(),
                    token: entry.config.token.clone(),
                    _permit: permit,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if self.is_healthy(kind) {
                    Err(ServiceError::AcquireTimeout(kind))
                } else {
                    Err(ServiceError::Unhealthy(kind))
                }
            }
        }
    }

    /// Probe one service right now and update its health bit.
    /// 200/404/405 all count as alive: some services only accept POST.
    pub async fn probe(&self, kind: ServiceKind) -> bool {
        let Ok(entry) = self.entry(kind) else {
            return false;
        };
        let entry = Arc::clone(entry);

        let alive = match self
            .http
            .get(format!("{}/", entry.config.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let code = response.status().as_u16();
                code == 200 || code == 404 || code == 405
            }
            Err(e) => {
                debug!(service = %kind, "Health probe error: {}", e);
                false
            }
        };

        if alive {
            let was_healthy = entry.healthy.swap(true, Ordering::SeqCst);
            entry.consecutive_failures.store(0, Ordering::SeqCst);
            if !was_healthy {
                info!(service = %kind, "Service recovered");
            }
        } else {
            let failures = entry.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.unhealthy_after && entry.healthy.swap(false, Ordering::SeqCst) {
                warn!(service = %kind, failures, "Service marked unhealthy");
            }
        }

        alive
    }

    /// Periodically probe every service until shutdown flips.
    pub async fn health_check_loop(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for kind in ServiceKind::ALL {
                        self.probe(kind).await;
                    }
                }
            }
        }
    }

    /// Currently available permits (used by tests and metrics).
    pub fn available_permits(&self, kind: ServiceKind) -> usize {
        self.entry(kind)
            .map(|entry| entry.semaphore.available_permits())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(caption_url: String) -> ServicePool {
        let mut config = PoolConfig::default();
        for service in &mut config.services {
            if service.kind == ServiceKind::Caption {
                service.base_url = caption_url.clone();
            }
        }
        config.unhealthy_after = 2;
        ServicePool::new(config).unwrap()
    }

    #[tokio::test]
    async fn caption_slot_is_single_flight() {
        let pool = test_pool("http://localhost:1".to_string());

        let first = pool
            .acquire(ServiceKind::Caption, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(pool.available_permits(ServiceKind::Caption), 0);

        // Second acquire must wait and time out while the slot is held
        let err = pool
            .acquire(ServiceKind::Caption, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AcquireTimeout(ServiceKind::Caption)));

        drop(first);
        assert_eq!(pool.available_permits(ServiceKind::Caption), 1);
        pool.acquire(ServiceKind::Caption, Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_service_goes_unhealthy_after_threshold() {
        let pool = test_pool("http://127.0.0.1:1".to_string());

        assert!(pool.is_healthy(ServiceKind::Caption));
        pool.probe(ServiceKind::Caption).await;
        assert!(pool.is_healthy(ServiceKind::Caption)); // one failure is tolerated
        pool.probe(ServiceKind::Caption).await;
        assert!(!pool.is_healthy(ServiceKind::Caption));

        let err = pool
            .acquire(ServiceKind::Caption, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unhealthy(ServiceKind::Caption)));
    }
}
