//! Accumulated measurement results.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::Server;

/// Results of one speedtest session, in the units speedtest.net reports:
/// bits per second for throughput and milliseconds for latency.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedtestResults {
    /// Download throughput, bit/s.
    pub download: f64,
    /// Upload throughput, bit/s.
    pub upload: f64,
    /// Latency to the best server, ms.
    pub ping: f64,
    /// Server the transfers ran against.
    pub server: Option<Server>,
    /// Session start.
    pub timestamp: DateTime<Utc>,
    /// Upload bytes sent.
    pub bytes_sent: u64,
    /// Download bytes received.
    pub bytes_received: u64,
}

impl Default for SpeedtestResults {
    fn default() -> Self {
        Self {
            download: 0.0,
            upload: 0.0,
            ping: 0.0,
            server: None,
            timestamp: Utc::now(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }
}

impl SpeedtestResults {
    /// Download throughput, Mbit/s.
    pub fn download_mbps(&self) -> f64 {
        self.download / 1_000_000.0
    }

    /// Upload throughput, Mbit/s.
    pub fn upload_mbps(&self) -> f64 {
        self.upload / 1_000_000.0
    }

    /// Flatten into ordered `(column, value)` pairs for tabular output.
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let (label, id, host) = match &self.server {
            Some(server) => {
                (server.label(), server.id.clone(), server.host.clone())
            }
            None => (String::new(), String::new(), String::new()),
        };
        vec![
            ("download".into(), self.download.to_string()),
            ("upload".into(), self.upload.to_string()),
            ("ping".into(), self.ping.to_string()),
            ("server".into(), label),
            ("server_id".into(), id),
            ("server_host".into(), host),
            (
                "timestamp".into(),
                self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
            ("bytes_sent".into(), self.bytes_sent.to_string()),
            ("bytes_received".into(), self.bytes_received.to_string()),
        ]
    }
}
