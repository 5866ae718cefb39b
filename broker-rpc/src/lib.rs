//! Outbound peer-to-peer HTTP client shared by the leadership, gossip and HTTP-surface
//! crates. One `reqwest::Client` is built once and reused for connection pooling, matching
//! the teacher's `eth2`/`execution_layer` pattern of a single shared client wrapped by a
//! small typed RPC struct (see `HttpJsonRpc` in the pack).

use broker_types::{
    BrokerId, ElectionRequest, ElectionResponse, ElectionVerdict, GossipPayload,
    LeaderAnnouncement, PeerAddress,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("transport error contacting {0}: {1}")]
    Transport(String, reqwest::Error),
    #[error("{0} returned non-success status {1}")]
    Status(String, reqwest::StatusCode),
    #[error("failed to decode response body from {0}: {1}")]
    Decode(String, reqwest::Error),
}

#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn post_json<B: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        addr: &PeerAddress,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, RpcError> {
        let url = format!("{}{}", addr.base_url(), path);
        let fut = self.client.post(&url).json(body).send();
        let resp = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| RpcError::Timeout(url.clone()))?
            .map_err(|e| RpcError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RpcError::Status(url, resp.status()));
        }
        resp.json::<R>()
            .await
            .map_err(|e| RpcError::Decode(url, e))
    }

    async fn post_json_no_body<B: serde::Serialize>(
        &self,
        addr: &PeerAddress,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let url = format!("{}{}", addr.base_url(), path);
        let fut = self.client.post(&url).json(body).send();
        let resp = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| RpcError::Timeout(url.clone()))?
            .map_err(|e| RpcError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RpcError::Status(url, resp.status()));
        }
        Ok(())
    }

    /// `POST /election` — sends a Bully challenge, 2s timeout per spec.md §4.2 step 3.
    pub async fn send_election(
        &self,
        addr: &PeerAddress,
        self_id: BrokerId,
    ) -> Result<ElectionVerdict, RpcError> {
        let resp: ElectionResponse = self
            .post_json(
                addr,
                "/election",
                &ElectionRequest { broker_id: self_id },
                Duration::from_secs(2),
            )
            .await?;
        Ok(resp.response)
    }

    /// `POST /leader` — announces the new leader, 2s timeout, failures logged not fatal by
    /// the caller.
    pub async fn announce_leader(
        &self,
        addr: &PeerAddress,
        leader_id: BrokerId,
    ) -> Result<(), RpcError> {
        self.post_json_no_body(
            addr,
            "/leader",
            &LeaderAnnouncement { leader_id },
            Duration::from_secs(2),
        )
        .await
    }

    /// `GET /ping` — liveness probe used by the health monitor, 2s timeout.
    pub async fn ping(&self, addr: &PeerAddress) -> Result<(), RpcError> {
        let url = format!("{}/ping", addr.base_url());
        let fut = self.client.get(&url).send();
        let resp = tokio::time::timeout(Duration::from_secs(2), fut)
            .await
            .map_err(|_| RpcError::Timeout(url.clone()))?
            .map_err(|e| RpcError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RpcError::Status(url, resp.status()));
        }
        Ok(())
    }

    /// `POST /gossip` — exchanges subscriber soft state, 3s timeout per spec.md §4.3.
    pub async fn send_gossip(
        &self,
        addr: &PeerAddress,
        payload: &GossipPayload,
    ) -> Result<(), RpcError> {
        self.post_json_no_body(addr, "/gossip", payload, Duration::from_secs(3))
            .await
    }

    /// `POST /publish` forwarded to the leader. Re-serializes the leader's typed response
    /// rather than piping raw bytes/headers through, per spec.md §9's explicit guidance
    /// (a pass-through would leak hop-by-hop headers). Returns the leader's status code and
    /// decoded JSON body (empty object on an empty body).
    pub async fn forward_publish(
        &self,
        addr: &PeerAddress,
        body: &serde_json::Value,
    ) -> Result<(reqwest::StatusCode, serde_json::Value), RpcError> {
        let url = format!("{}/publish", addr.base_url());
        let fut = self.client.post(&url).json(body).send();
        let resp = tokio::time::timeout(Duration::from_secs(2), fut)
            .await
            .map_err(|_| RpcError::Timeout(url.clone()))?
            .map_err(|e| RpcError::Transport(url.clone(), e))?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RpcError::Decode(url.clone(), e))?;
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        Ok((status, value))
    }
}
