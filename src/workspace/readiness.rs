//! Readiness polling against the workspace's tooling server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::workspace::error::{Result, WorkspaceError};

/// Outcome of one readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The server answered 200.
    Ready,
    /// Nothing listening yet, or not answering 200 yet.
    NotReady,
}

/// One readiness check against an endpoint.
///
/// Returning `Err` aborts the wait; only `NotReady` is retried.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeStatus>;
}

/// `GET <url>` and expect 200.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<ProbeStatus> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => Ok(ProbeStatus::Ready),
            Ok(resp) => {
                tracing::trace!("Readiness probe {} returned {}", url, resp.status());
                Ok(ProbeStatus::NotReady)
            }
            // Refused, reset or dropped mid-request: the server is still coming up.
            // A read timeout on an accepted connection is not retried.
            Err(e) if e.is_connect() || (e.is_request() && !e.is_timeout()) => {
                tracing::trace!("Readiness probe {} not answering: {}", url, e);
                Ok(ProbeStatus::NotReady)
            }
            Err(e) => Err(WorkspaceError::Readiness {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// How long and how often to poll for readiness.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Sleep after the first failed probe.
    pub initial_interval: Duration,
    /// Upper bound for the sleep between probes.
    pub max_interval: Duration,
    /// Growth factor applied to the sleep after every failed probe.
    pub multiplier: f64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(60)),
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            multiplier: 1.5,
        }
    }
}

impl WaitPolicy {
    /// Fixed interval polling with no deadline.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            timeout: None,
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
        }
    }

    /// Same policy with a different deadline.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.multiplier.max(1.0))
            .min(self.max_interval.max(self.initial_interval))
    }
}

/// Poll `url` until the probe reports ready.
///
/// Returns the number of probes issued. Fails with `ReadinessTimeout` once the
/// policy deadline passes, `Cancelled` when `cancel` fires, or with whatever
/// error the probe raised.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    url: &str,
    policy: &WaitPolicy,
    cancel: &CancellationToken,
) -> Result<u32> {
    let started = Instant::now();
    // A timeout too large to represent as an instant means no deadline.
    let deadline = policy
        .timeout
        .and_then(|timeout| started.checked_add(timeout));
    let mut interval = policy.initial_interval;
    let mut attempts: u32 = 0;

    let timed_out = |attempts: u32| WorkspaceError::ReadinessTimeout {
        url: url.to_string(),
        timeout: policy.timeout.unwrap_or_default(),
        attempts,
    };
    let cancelled = || WorkspaceError::Cancelled {
        url: url.to_string(),
    };

    loop {
        attempts += 1;
        let probe_call = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, probe.probe(url))
                    .await
                    .map_err(|_| timed_out(attempts))?,
                None => probe.probe(url).await,
            }
        };
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            status = probe_call => status?,
        };

        if status == ProbeStatus::Ready {
            tracing::debug!(
                attempts,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Workspace at {} is ready",
                url
            );
            return Ok(attempts);
        }

        let mut pause = interval;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(attempts));
            }
            pause = pause.min(deadline - now);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(pause) => {}
        }
        interval = policy.next_interval(interval);
    }
}
