use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::RemoteConfig;

/// Answers whether the remote store is reachable right now.
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probes the backend's REST root. Any HTTP response counts as reachable.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            url: format!("{}/rest/v1/", config.http_base_url()),
            api_key: config.api_key.clone(),
            timeout: Self::DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connectivity for HttpProbe {
    async fn is_reachable(&self) -> bool {
        let result = self
            .client
            .get(&self.url)
            .header("apikey", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Remote store unreachable: {}", e);
                false
            }
        }
    }
}

/// Connectivity flag set by the host application (or a test).
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_reachable(&self) -> bool {
        self.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_connectivity_toggles() {
        let connectivity = StaticConnectivity::new(false);
        assert!(!connectivity.is_reachable().await);
        connectivity.set_online(true);
        assert!(connectivity.is_reachable().await);
    }

    #[tokio::test]
    async fn test_probe_any_status_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(&RemoteConfig::new(server.uri(), "anon"));
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_probe_unreachable_host() {
        // Nothing listens on port 1.
        let probe = HttpProbe::new(&RemoteConfig::new("http://127.0.0.1:1", "anon"))
            .with_timeout(Duration::from_millis(500));
        assert!(!probe.is_reachable().await);
    }
}
