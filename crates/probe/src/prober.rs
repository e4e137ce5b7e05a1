//! Deadline-bounded liveness prober.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace};

use slumber_core::{Error, Result};

use crate::codec::{self, PING_ID, STATUS_ID};
use crate::error::{ProbeError, ProbeResult};
use crate::types::{ProbeReport, StatusResponse};

/// Protocol version announced in the handshake.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 578;

/// Queries a service for reachability and connected players.
#[async_trait]
pub trait StatusProber: Send + Sync {
    /// Probe `host:port`, finishing within `timeout`.
    ///
    /// Transport failures and timeouts are reported as an unreachable
    /// [`ProbeReport`], never as errors.
    ///
    /// # Errors
    ///
    /// `InvalidProbeTarget` for an empty host, port 0 or a zero timeout.
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<ProbeReport>;
}

/// Reject invocations that can never succeed.
///
/// # Errors
///
/// `InvalidProbeTarget` describing the first problem found.
pub fn validate_target(host: &str, port: u16, timeout: Duration) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::invalid_probe_target("host is empty"));
    }
    if port == 0 {
        return Err(Error::invalid_probe_target("port is 0"));
    }
    if timeout.is_zero() {
        return Err(Error::invalid_probe_target("timeout is zero"));
    }
    Ok(())
}

/// Status-query prober over TCP.
#[derive(Debug, Clone, Copy)]
pub struct SlpProber {
    protocol_version: i32,
}

impl Default for SlpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl SlpProber {
    /// Create a prober announcing the default protocol version.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }

    /// Set the protocol version announced in the handshake.
    #[must_use]
    pub const fn with_protocol_version(mut self, protocol_version: i32) -> Self {
        self.protocol_version = protocol_version;
        self
    }

    async fn query_status(
        &self,
        stream: &mut TcpStream,
        host: &str,
        port: u16,
    ) -> ProbeResult<StatusResponse> {
        let mut request = codec::handshake(self.protocol_version, host, port);
        request.extend(codec::status_request());
        stream
            .write_all(&request)
            .await
            .map_err(|e| ProbeError::io(&e))?;

        let packet = codec::read_packet(stream).await?.expect_id(STATUS_ID)?;
        let json = packet.status_json()?;
        trace!(host, port, json = %json, "Status response");
        StatusResponse::parse(&json)
    }

    async fn measure_latency(stream: &mut TcpStream) -> ProbeResult<u64> {
        let token = Utc::now().timestamp_millis();
        let started = Instant::now();
        stream
            .write_all(&codec::ping(token))
            .await
            .map_err(|e| ProbeError::io(&e))?;

        let echoed = codec::read_packet(stream)
            .await?
            .expect_id(PING_ID)?
            .pong_token()?;
        if echoed != token {
            return Err(ProbeError::malformed("pong token mismatch"));
        }
        Ok(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl StatusProber for SlpProber {
    async fn probe(&self, host: &str, port: u16, limit: Duration) -> Result<ProbeReport> {
        validate_target(host, port, limit)?;
        let deadline = Instant::now() + limit;
        let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);

        let exchange = async {
            let mut stream = TcpStream::connect((host, port))
                .await
                .map_err(|e| ProbeError::io(&e))?;
            stream.set_nodelay(true).map_err(|e| ProbeError::io(&e))?;
            let status = self.query_status(&mut stream, host, port).await?;
            Ok::<_, ProbeError>((stream, status))
        };

        let (mut stream, status) = match timeout(limit, exchange).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "Probe failed");
                return Ok(ProbeReport::unreachable(e.to_string()));
            }
            Err(_) => {
                debug!(host, port, after_ms, "Probe timed out");
                return Ok(ProbeReport::unreachable(
                    ProbeError::Timeout { after_ms }.to_string(),
                ));
            }
        };

        // The status already proves reachability; latency is best effort.
        let latency_ms = match timeout_at(deadline, Self::measure_latency(&mut stream)).await {
            Ok(Ok(ms)) => Some(ms),
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "Ping failed");
                None
            }
            Err(_) => None,
        };

        let report = ProbeReport::from_status(&status, latency_ms);
        debug!(
            host,
            port,
            players = report.players.len(),
            online = report.online,
            latency_ms = ?report.latency_ms,
            "Probe succeeded"
        );
        Ok(report)
    }
}
