//! Connectivity tracking consulted before every request

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tandem_realtime_client::ScheduledTask;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{HttpError, HttpResult};

/// Answers whether the process currently has a network path
///
/// Implementations must be cheap: the retry client asks once per call.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared online/offline flag updated in the background
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Update the flag; returns the previous value
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for ConnectivityFlag {
    /// Assume online until a monitor says otherwise
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProbe for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Periodically checks that the gateway host accepts TCP connections
///
/// The monitor stops when dropped.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    task: ScheduledTask,
}

impl ConnectivityMonitor {
    /// Start probing `target` (host:port) every `interval`
    pub fn spawn(
        flag: ConnectivityFlag,
        target: String,
        interval: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let task = ScheduledTask::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let attempt = TcpStream::connect(target.as_str());
                let online = matches!(
                    tokio::time::timeout(connect_timeout, attempt).await,
                    Ok(Ok(_))
                );
                let was_online = flag.set_online(online);

                match (was_online, online) {
                    (true, false) => {
                        warn!(addr = %target, "Gateway unreachable, marking offline")
                    }
                    (false, true) => info!(addr = %target, "Gateway reachable again"),
                    _ => debug!(addr = %target, online, "Connectivity probe"),
                }
            }
        });

        Self { task }
    }

    pub fn stop(self) {
        self.task.cancel();
    }
}

/// host:port to probe for a gateway base URL
///
/// IPv6 hosts keep their brackets so the result parses as a socket address.
pub fn probe_target(gateway_url: &str) -> HttpResult<String> {
    let invalid = |reason: &str| {
        HttpError::InvalidRequest(format!("gateway url {} {}", gateway_url, reason))
    };

    let url = Url::parse(gateway_url).map_err(|e| invalid(&format!("is invalid: {}", e)))?;
    let host = url.host().ok_or_else(|| invalid("has no host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("has no port"))?;

    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults_online() {
        let flag = ConnectivityFlag::default();
        assert!(flag.is_online());

        let shared = flag.clone();
        assert!(flag.set_online(false));
        assert!(!shared.is_online());
    }

    #[test]
    fn test_probe_target() {
        assert_eq!(probe_target("https://abc.example.co").unwrap(), "abc.example.co:443");
        assert_eq!(probe_target("http://127.0.0.1:54321/x").unwrap(), "127.0.0.1:54321");
        assert!(probe_target("nonsense").is_err());
    }

    #[test]
    fn test_probe_target_brackets_ipv6() {
        assert_eq!(probe_target("http://[::1]:54321").unwrap(), "[::1]:54321");
        assert_eq!(probe_target("https://[2001:db8::1]/").unwrap(), "[2001:db8::1]:443");

        let target = probe_target("http://[::1]:8080").unwrap();
        let addr: std::net::SocketAddr = target.parse().unwrap();
        assert!(addr.is_ipv6());
    }

    #[tokio::test]
    async fn test_monitor_tracks_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let flag = ConnectivityFlag::new(false);

        let monitor = ConnectivityMonitor::spawn(
            flag.clone(),
            target,
            Duration::from_millis(20),
            Duration::from_millis(200),
        );

        let mut online = false;
        for _ in 0..50 {
            if flag.is_online() {
                online = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(online);

        drop(listener);
        let mut offline = false;
        for _ in 0..50 {
            if !flag.is_online() {
                offline = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(offline);
        monitor.stop();
    }
}
