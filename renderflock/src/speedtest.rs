//! Two-phase mirror selection.
//!
//! Phase 1 ranks every candidate mirror by TCP connect latency; phase 2
//! downloads one payload from the most promising subset and measures
//! bandwidth, so the expensive transfers only hit mirrors that already
//! proved responsive.
//!
//! All probing is strictly sequential, one candidate at a time, so
//! simultaneous transfers never skew each other's measurements through
//! shared-link contention. Failures degrade or exclude the affected
//! candidate; they never abort the whole selection.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use reqwest::Url;
use thiserror::Error;
use tracing::warn;

/// Latency probes connect to the mirrors' HTTPS port.
pub const SPEEDTEST_PORT: u16 = 443;

/// Probe budget per candidate in phase 1; halves on every failed attempt.
const PING_ATTEMPTS: u64 = 12;

/// Connect timeout for one latency probe.
const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Synthetic latency recorded for a failed probe. Large enough to push any
/// partially failing mirror far down the latency ranking.
pub const SENTINEL_LATENCY_MS: u64 = u64::MAX;

#[derive(Debug, Clone, Error)]
pub enum SpeedtestError {
    #[error("failed to create HTTP client: {0}")]
    Client(String),
    #[error("invalid speedtest URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unable to connect to {0}")]
    Connect(String),
    #[error("unable to download speedtest payload from {url}: {reason}")]
    Download { url: String, reason: String },
}

/// Summary of one candidate's latency probes, in milliseconds.
///
/// Sentinel samples from failed probes are included in the statistics; a
/// candidate with zero successful probes is unreachable.
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    /// Number of samples taken (successes and sentinels).
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub average_ms: f64,
    /// Probes that actually connected.
    pub successes: u64,
}

impl PingStats {
    fn from_samples(samples: &[u64], successes: u64) -> Self {
        let count = samples.len() as u64;
        let sum: u128 = samples.iter().map(|&s| s as u128).sum();
        Self {
            count,
            min_ms: samples.iter().copied().min().unwrap_or(0),
            max_ms: samples.iter().copied().max().unwrap_or(0),
            average_ms: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            successes,
        }
    }

    /// Whether any probe reached the mirror at all.
    pub fn reachable(&self) -> bool {
        self.successes > 0
    }
}

/// One candidate mirror and everything measured about it.
#[derive(Debug, Clone)]
pub struct SpeedTestTarget {
    pub url: String,
    /// Measured bandwidth in bytes per second; present only after phase 2.
    pub bandwidth: Option<u64>,
    pub ping: PingStats,
}

/// One timed payload download.
#[derive(Debug, Clone, Copy)]
pub struct DownloadSample {
    pub bytes: usize,
    pub elapsed: Duration,
}

impl DownloadSample {
    /// Bytes per second, guarding against sub-millisecond measurements.
    pub fn bytes_per_second(&self) -> u64 {
        let millis = (self.elapsed.as_millis() as u64).max(1);
        (self.bytes as f64 / (millis as f64 / 1000.0)).round() as u64
    }
}

/// Phase-1 seam: one timed connection attempt to a mirror.
pub trait LatencyProbe {
    fn ping(&self, url: &str) -> Result<Duration, SpeedtestError>;
}

/// Phase-2 seam: one timed payload download from a mirror.
pub trait PayloadClient {
    fn download(&self, url: &str) -> Result<DownloadSample, SpeedtestError>;
}

/// Real latency probe: a TCP connect to [`SPEEDTEST_PORT`] with a 3 s
/// timeout, timed end to end including name resolution.
pub struct TcpLatencyProbe;

impl LatencyProbe for TcpLatencyProbe {
    fn ping(&self, url: &str) -> Result<Duration, SpeedtestError> {
        let start = Instant::now();

        let parsed = Url::parse(url).map_err(|e| SpeedtestError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| SpeedtestError::InvalidUrl {
            url: url.to_string(),
            reason: "no host".to_string(),
        })?;

        let addr = (host, SPEEDTEST_PORT)
            .to_socket_addrs()
            .map_err(|e| SpeedtestError::Connect(format!("{} ({})", host, e)))?
            .next()
            .ok_or_else(|| SpeedtestError::Connect(format!("{} resolved to nothing", host)))?;

        TcpStream::connect_timeout(&addr, PING_TIMEOUT)
            .map_err(|e| SpeedtestError::Connect(format!("{} (derived from {}): {}", addr, url, e)))?;

        Ok(start.elapsed())
    }
}

/// Real payload client backed by a blocking reqwest client.
pub struct ReqwestPayloadClient {
    client: reqwest::blocking::Client,
}

const USER_AGENT: &str = concat!("renderflock/", env!("CARGO_PKG_VERSION"));

impl ReqwestPayloadClient {
    pub fn new() -> Result<Self, SpeedtestError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SpeedtestError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl PayloadClient for ReqwestPayloadClient {
    fn download(&self, url: &str) -> Result<DownloadSample, SpeedtestError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| SpeedtestError::Download {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let body = response.bytes().map_err(|e| SpeedtestError::Download {
            url: url.to_string(),
            reason: format!("failed to read payload: {}", e),
        })?;

        Ok(DownloadSample {
            bytes: body.len(),
            elapsed: start.elapsed(),
        })
    }
}

/// The mirror selector itself, generic over its two probing seams.
pub struct Speedtest<P = TcpLatencyProbe, C = ReqwestPayloadClient> {
    probe: P,
    client: C,
}

impl Speedtest {
    pub fn new() -> Result<Self, SpeedtestError> {
        Ok(Self::with_parts(TcpLatencyProbe, ReqwestPayloadClient::new()?))
    }
}

impl<P: LatencyProbe, C: PayloadClient> Speedtest<P, C> {
    pub fn with_parts(probe: P, client: C) -> Self {
        Self { probe, client }
    }

    /// Rank the candidate mirrors and measure bandwidth over the best ones.
    ///
    /// Returns at most `min(result_count, urls.len())` targets, sorted
    /// descending by bandwidth. Unreachable candidates are dropped in phase
    /// 1; a failed download in phase 2 excludes that candidate and the
    /// next-best latency candidate is tried instead.
    pub fn do_speedtests(&self, urls: &[String], result_count: usize) -> Vec<SpeedTestTarget> {
        let mut ranked: Vec<SpeedTestTarget> = urls
            .iter()
            .map(|url| self.measure(url))
            .filter(|target| target.ping.reachable())
            .collect();
        ranked.sort_by(|a, b| {
            a.ping
                .average_ms
                .partial_cmp(&b.ping.average_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let wanted = result_count.min(urls.len());
        let mut result: Vec<SpeedTestTarget> = Vec::with_capacity(wanted);

        let mut i = 0;
        while result.len() < wanted && i < ranked.len() {
            let target = &ranked[i];
            match self.client.download(&target.url) {
                Ok(sample) => {
                    let mut chosen = target.clone();
                    chosen.bandwidth = Some(sample.bytes_per_second());
                    result.push(chosen);
                }
                Err(e) => {
                    warn!(url = %target.url, error = %e, "bandwidth measurement failed");
                }
            }
            i += 1;
        }

        result.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));
        result
    }

    /// Phase 1 measurement of one candidate.
    ///
    /// Up to [`PING_ATTEMPTS`] probes; every failure halves the remaining
    /// budget and records [`SENTINEL_LATENCY_MS`] instead of aborting the
    /// candidate.
    fn measure(&self, url: &str) -> SpeedTestTarget {
        let mut budget = PING_ATTEMPTS;
        let mut samples = Vec::with_capacity(PING_ATTEMPTS as usize);
        let mut successes = 0;

        let mut attempt = 0;
        while attempt < budget {
            match self.probe.ping(url) {
                Ok(elapsed) => {
                    samples.push(elapsed.as_millis() as u64);
                    successes += 1;
                }
                Err(e) => {
                    warn!(url, error = %e, "latency probe failed");
                    budget /= 2;
                    samples.push(SENTINEL_LATENCY_MS);
                }
            }
            attempt += 1;
        }

        SpeedTestTarget {
            url: url.to_string(),
            bandwidth: None,
            ping: PingStats::from_samples(&samples, successes),
        }
    }
}
