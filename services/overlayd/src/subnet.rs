//! Subnet lease allocator interface.
//!
//! The allocator is an external service. Backends reach it through
//! [`SubnetManager`]; [`HttpSubnetManager`] talks to a remote allocator and
//! [`MockSubnetManager`] hands out fixed leases for tests and dry runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};
use vlanet_networking::Ipv4Net;
use vlanet_subnet::{Lease, LeaseAttrs};

use crate::context::{Context, ContextError};

/// Lease acquisition errors.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Any other allocator failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ContextError> for LeaseError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => LeaseError::Cancelled,
            ContextError::DeadlineExceeded => LeaseError::DeadlineExceeded,
        }
    }
}

/// Subnet lease allocator.
#[async_trait]
pub trait SubnetManager: Send + Sync {
    /// Acquire (or renew) this host's lease in `network`.
    ///
    /// Must return [`LeaseError::Cancelled`] or
    /// [`LeaseError::DeadlineExceeded`] when `ctx` finishes first.
    async fn acquire_lease(
        &self,
        ctx: &Context,
        network: &str,
        attrs: &LeaseAttrs,
    ) -> Result<Lease, LeaseError>;
}

/// HTTP client for a remote allocator.
///
/// `POST {base}/v1/networks/{network}/leases` with the lease attributes as
/// the JSON body; a 2xx response carries the granted [`Lease`].
pub struct HttpSubnetManager {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpSubnetManager {
    /// Create a client for the allocator at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid allocator url: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("allocator url cannot be a base: {}", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// `{base}/v1/networks/{network}/leases`, with `network` escaped as a
    /// single path segment.
    fn leases_url(&self, network: &str) -> anyhow::Result<reqwest::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("allocator url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v1", "networks", network, "leases"]);
        Ok(url)
    }

    async fn request_lease(&self, network: &str, attrs: &LeaseAttrs) -> anyhow::Result<Lease> {
        let url = self.leases_url(network)?;
        debug!(url = %url, public_ip = %attrs.public_ip, "Requesting lease");

        let response = self.client.post(url).json(attrs).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to acquire lease");
            anyhow::bail!("allocator returned {} - {}", status, body);
        }

        let lease: Lease = response.json().await?;
        Ok(lease)
    }
}

#[async_trait]
impl SubnetManager for HttpSubnetManager {
    async fn acquire_lease(
        &self,
        ctx: &Context,
        network: &str,
        attrs: &LeaseAttrs,
    ) -> Result<Lease, LeaseError> {
        tokio::select! {
            err = ctx.done() => Err(err.into()),
            result = self.request_lease(network, attrs) => {
                let lease = result?;
                info!(network = %network, subnet = %lease.subnet, "Lease acquired");
                Ok(lease)
            }
        }
    }
}

#[derive(Debug)]
enum MockBehavior {
    Grant(Ipv4Net),
    Fail(String),
    Hang,
}

/// Allocator stand-in.
#[derive(Debug)]
pub struct MockSubnetManager {
    behavior: MockBehavior,
    requests: Mutex<Vec<(String, LeaseAttrs)>>,
    calls: AtomicU32,
}

impl MockSubnetManager {
    /// Grant `subnet` to every request.
    pub fn granting(subnet: Ipv4Net) -> Self {
        Self::with_behavior(MockBehavior::Grant(subnet))
    }

    /// Fail every request with `message`.
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(MockBehavior::Fail(message.to_string()))
    }

    /// Never answer; only the context ends the call.
    pub fn hanging() -> Self {
        Self::with_behavior(MockBehavior::Hang)
    }

    fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of acquire calls.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<(String, LeaseAttrs)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SubnetManager for MockSubnetManager {
    async fn acquire_lease(
        &self,
        ctx: &Context,
        network: &str,
        attrs: &LeaseAttrs,
    ) -> Result<Lease, LeaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((network.to_string(), attrs.clone()));

        match &self.behavior {
            MockBehavior::Grant(subnet) => {
                debug!(network = %network, subnet = %subnet, "[MOCK] Granting lease");
                Ok(Lease {
                    subnet: *subnet,
                    attrs: attrs.clone(),
                    expiration: None,
                })
            }
            MockBehavior::Fail(message) => Err(anyhow::anyhow!("{}", message).into()),
            MockBehavior::Hang => Err(ctx.done().await.into()),
        }
    }
}
