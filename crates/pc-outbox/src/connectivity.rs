//! Connectivity Watcher
//!
//! Tracks whether the backend is reachable and requests a background sync on
//! every offline to online transition. Going offline is only logged.

use std::sync::Arc;
use std::time::Duration;

use pc_config::ApiSettings;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::scheduler::SyncTrigger;

pub struct ConnectivityWatcher {
    online: watch::Sender<bool>,
    trigger: Arc<dyn SyncTrigger>,
}

impl ConnectivityWatcher {
    /// `initially_online` is the platform's state when the watcher is built.
    pub fn new(initially_online: bool, trigger: Arc<dyn SyncTrigger>) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self { online, trigger }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record a platform signal. Returns true if it changed the state.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.send_replace(online);
        if was_online == online {
            return false;
        }

        if online {
            info!("Connectivity restored, requesting sync of offline queue");
            self.trigger.request();
        } else {
            warn!("Connectivity lost, writes will be queued offline");
        }
        true
    }

    pub fn on_online(&self) -> bool {
        self.set_online(true)
    }

    pub fn on_offline(&self) -> bool {
        self.set_online(false)
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Polls the backend health endpoint and feeds the result to a watcher.
pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    watcher: Arc<ConnectivityWatcher>,
}

impl ConnectivityProbe {
    pub fn new(
        settings: &ApiSettings,
        interval: Duration,
        watcher: Arc<ConnectivityWatcher>,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}{}", settings.base_url.trim_end_matches('/'), settings.health_path),
            interval,
            watcher,
        })
    }

    /// One probe. The backend counts as reachable only on a 2xx answer.
    pub async fn probe_once(&self) -> bool {
        let online = match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Connectivity probe to {} failed: {}", self.url, e);
                false
            }
        };
        self.watcher.set_online(online);
        online
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Connectivity probe shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingTrigger(AtomicUsize);

    impl SyncTrigger for CountingTrigger {
        fn request(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reconnect_requests_sync() {
        let trigger = Arc::new(CountingTrigger::default());
        let watcher = ConnectivityWatcher::new(false, trigger.clone());

        assert!(!watcher.is_online());
        assert!(watcher.on_online());
        assert!(watcher.is_online());
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_signals_are_ignored() {
        let trigger = Arc::new(CountingTrigger::default());
        let watcher = ConnectivityWatcher::new(true, trigger.clone());

        assert!(!watcher.on_online());
        assert!(watcher.on_offline());
        assert!(!watcher.on_offline());
        assert_eq!(trigger.0.load(Ordering::SeqCst), 0);

        watcher.on_online();
        watcher.on_online();
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let watcher = ConnectivityWatcher::new(true, Arc::new(CountingTrigger::default()));
        let mut rx = watcher.subscribe();

        watcher.on_offline();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_probe_marks_online_on_healthy_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let trigger = Arc::new(CountingTrigger::default());
        let watcher = Arc::new(ConnectivityWatcher::new(false, trigger.clone()));
        let settings = ApiSettings {
            base_url: server.uri(),
            ..Default::default()
        };
        let probe = ConnectivityProbe::new(&settings, Duration::from_secs(60), watcher.clone()).unwrap();

        assert!(probe.probe_once().await);
        assert!(watcher.is_online());
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_probe_marks_offline_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let watcher = Arc::new(ConnectivityWatcher::new(true, Arc::new(CountingTrigger::default())));
        let settings = ApiSettings {
            base_url: server.uri(),
            ..Default::default()
        };
        let probe = ConnectivityProbe::new(&settings, Duration::from_secs(60), watcher.clone()).unwrap();

        assert!(!probe.probe_once().await);
        assert!(!watcher.is_online());
    }
}
