//! The speedtest session: server discovery, latency probing and throughput
//! measurement.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::{
    Server, SpeedtestError, SpeedtestResult, SpeedtestResults, Transport,
};

/// Nearest servers, sorted by distance, over https-capable hosts only.
pub const SERVER_LIST_URL: &str = "https://www.speedtest.net/api/js/servers?engine=js&limit=10&https_functional=true";

const PAYLOAD_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Tunables for one speedtest session.
#[derive(Debug, Clone)]
pub struct SpeedtestOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Rewrite server URLs to https.
    pub secure: bool,
    /// speedtest.net server-list endpoint.
    pub server_list_url: String,
    /// How many of the nearest servers get a latency probe.
    pub latency_candidates: usize,
    /// `latency.txt` requests per candidate; the mean is kept.
    pub latency_samples: usize,
    /// Edge lengths of the `random<N>x<N>.jpg` images to fetch.
    pub download_sizes: Vec<u32>,
    /// Times each download size is requested.
    pub download_repeats: usize,
    /// Concurrent download requests.
    pub download_threads: usize,
    /// Upload payload sizes in bytes.
    pub upload_sizes: Vec<usize>,
    /// Times each upload size is sent.
    pub upload_repeats: usize,
    /// Concurrent upload requests.
    pub upload_threads: usize,
    /// Requests that would start after this budget are skipped, and
    /// in-flight downloads stop reading once it is exhausted.
    pub test_length: Duration,
}

impl Default for SpeedtestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            secure: true,
            server_list_url: SERVER_LIST_URL.to_string(),
            latency_candidates: 5,
            latency_samples: 3,
            download_sizes: vec![350, 500, 750, 1000, 1500, 2000, 2500, 3000],
            download_repeats: 4,
            download_threads: 4,
            upload_sizes: vec![262_144, 524_288, 1_048_576],
            upload_repeats: 8,
            upload_threads: 2,
            test_length: Duration::from_secs(10),
        }
    }
}

/// One speedtest session bound to a [`Transport`].
#[derive(Debug)]
pub struct Speedtest {
    client: Client,
    options: SpeedtestOptions,
    servers: Vec<Server>,
    best: Option<Server>,
    results: SpeedtestResults,
}

impl Speedtest {
    /// Session whose requests all go through `transport`.
    pub fn new(
        transport: &Transport,
        options: SpeedtestOptions,
    ) -> SpeedtestResult<Self> {
        let client = transport.build_client(options.timeout)?;
        debug!(%transport, timeout = ?options.timeout, "speedtest client ready");
        Ok(Self {
            client,
            options,
            servers: Vec::new(),
            best: None,
            results: SpeedtestResults {
                timestamp: Utc::now(),
                ..Default::default()
            },
        })
    }

    /// Servers from the last [`get_servers`](Self::get_servers).
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Server chosen by [`get_best_server`](Self::get_best_server).
    pub fn best_server(&self) -> Option<&Server> {
        self.best.as_ref()
    }

    /// Results gathered so far.
    pub fn results(&self) -> &SpeedtestResults {
        &self.results
    }

    /// Consume the session, keeping its results.
    pub fn into_results(self) -> SpeedtestResults {
        self.results
    }

    /// Fetch the server list, nearest first.
    pub async fn get_servers(&mut self) -> SpeedtestResult<&[Server]> {
        let url = self.options.server_list_url.clone();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| SpeedtestError::Request {
                url: url.clone(),
                source,
            })?;
        let mut servers: Vec<Server> = response
            .json()
            .await
            .map_err(|source| SpeedtestError::Request { url, source })?;

        if servers.is_empty() {
            return Err(SpeedtestError::NoServers);
        }
        servers.sort_by(|a, b| {
            a.distance
                .unwrap_or(f64::MAX)
                .total_cmp(&b.distance.unwrap_or(f64::MAX))
        });
        debug!(count = servers.len(), "speedtest servers discovered");
        self.servers = servers;
        Ok(&self.servers)
    }

    /// Probe the nearest servers and keep the one with the lowest latency.
    ///
    /// The winning latency becomes the session's `ping`.
    pub async fn get_best_server(&mut self) -> SpeedtestResult<&Server> {
        if self.servers.is_empty() {
            self.get_servers().await?;
        }

        let mut best: Option<(f64, &Server)> = None;
        for server in self.servers.iter().take(self.options.latency_candidates)
        {
            match self.latency(server).await {
                Ok(ms) => {
                    debug!(server = %server.label(), latency_ms = ms, "latency probe");
                    if best.is_none_or(|(current, _)| ms < current) {
                        best = Some((ms, server));
                    }
                }
                Err(err) => {
                    debug!(server = %server.label(), error = %err, "latency probe failed");
                }
            }
        }

        let (ping, server) = best.ok_or(SpeedtestError::NoReachableServer)?;
        let server = server.clone();
        self.results.ping = ping;
        self.results.server = Some(server.clone());
        let best = self.best.insert(server);
        Ok(&*best)
    }

    /// Measure download throughput in bits per second.
    pub async fn download(&mut self) -> SpeedtestResult<f64> {
        let server =
            self.best.clone().ok_or(SpeedtestError::NoBestServer("download"))?;
        let secure = self.options.secure;

        let mut urls = Vec::new();
        for size in &self.options.download_sizes {
            for _ in 0..self.options.download_repeats {
                urls.push(server.resource_url(
                    secure,
                    &format!("random{size}x{size}.jpg"),
                )?);
            }
        }

        let started = Instant::now();
        let deadline = started + self.options.test_length;
        let client = &self.client;
        let outcomes: Vec<SpeedtestResult<u64>> = stream::iter(urls)
            .map(|url| fetch_body(client, url, deadline))
            .buffer_unordered(self.options.download_threads.max(1))
            .collect()
            .await;
        let received = tally("download", outcomes)?;

        let bps = bits_per_second(received, started.elapsed());
        self.results.bytes_received += received;
        self.results.download = bps;
        Ok(bps)
    }

    /// Measure upload throughput in bits per second.
    pub async fn upload(&mut self) -> SpeedtestResult<f64> {
        let server =
            self.best.clone().ok_or(SpeedtestError::NoBestServer("upload"))?;
        let url = server.upload_url(self.options.secure)?;

        let mut payloads = Vec::new();
        for size in &self.options.upload_sizes {
            for _ in 0..self.options.upload_repeats {
                payloads.push(build_payload(*size));
            }
        }

        let started = Instant::now();
        let deadline = started + self.options.test_length;
        let client = &self.client;
        let outcomes: Vec<SpeedtestResult<u64>> = stream::iter(payloads)
            .map(|payload| post_body(client, url.clone(), payload, deadline))
            .buffer_unordered(self.options.upload_threads.max(1))
            .collect()
            .await;
        let sent = tally("upload", outcomes)?;

        let bps = bits_per_second(sent, started.elapsed());
        self.results.bytes_sent += sent;
        self.results.upload = bps;
        Ok(bps)
    }

    async fn latency(&self, server: &Server) -> SpeedtestResult<f64> {
        let mut url = server.resource_url(self.options.secure, "latency.txt")?;
        let samples = self.options.latency_samples.max(1);
        let mut total = Duration::ZERO;

        for _ in 0..samples {
            url.set_query(Some(&format!(
                "x={}",
                Utc::now().timestamp_millis()
            )));
            let started = Instant::now();
            let body = self
                .client
                .get(url.clone())
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|source| request_error(&url, source))?
                .text()
                .await
                .map_err(|source| request_error(&url, source))?;
            let elapsed = started.elapsed();
            // Servers answer "test=test"; anything else counts as an hour.
            total += if body.trim() == "test=test" {
                elapsed
            } else {
                Duration::from_secs(3600)
            };
        }

        Ok(total.as_secs_f64() * 1000.0 / samples as f64)
    }
}

async fn fetch_body(
    client: &Client,
    url: Url,
    deadline: Instant,
) -> SpeedtestResult<u64> {
    if Instant::now() >= deadline {
        return Ok(0);
    }
    let mut response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| request_error(&url, source))?;

    let mut received = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| request_error(&url, source))?
    {
        received += chunk.len() as u64;
        if Instant::now() >= deadline {
            break;
        }
    }
    Ok(received)
}

async fn post_body(
    client: &Client,
    url: Url,
    payload: Vec<u8>,
    deadline: Instant,
) -> SpeedtestResult<u64> {
    if Instant::now() >= deadline {
        return Ok(0);
    }
    let len = payload.len() as u64;
    client
        .post(url.clone())
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(payload)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| request_error(&url, source))?;
    Ok(len)
}

fn request_error(url: &Url, source: reqwest::Error) -> SpeedtestError {
    SpeedtestError::Request {
        url: url.to_string(),
        source,
    }
}

/// Sum transferred bytes; individual request failures are tolerated unless
/// every request failed.
fn tally(
    phase: &'static str,
    outcomes: Vec<SpeedtestResult<u64>>,
) -> SpeedtestResult<u64> {
    let mut total = 0u64;
    let mut first_error = None;
    let mut succeeded = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(bytes) => {
                total += bytes;
                succeeded += 1;
            }
            Err(err) => {
                warn!(phase, error = %err, "speedtest request failed");
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) if succeeded == 0 => Err(err),
        _ => Ok(total),
    }
}

fn bits_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 * 8.0 / secs
    } else {
        0.0
    }
}

fn build_payload(size: usize) -> Vec<u8> {
    let prefix = b"content1=";
    let mut payload = Vec::with_capacity(size.max(prefix.len()));
    payload.extend_from_slice(prefix);
    let mut alphabet = PAYLOAD_ALPHABET.iter().cycle();
    while payload.len() < size {
        if let Some(byte) = alphabet.next() {
            payload.push(*byte);
        }
    }
    payload
}
