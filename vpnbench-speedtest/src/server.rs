//! Speedtest server descriptors as returned by the speedtest.net server API.

use serde::Deserialize;
use url::Url;

use crate::{SpeedtestError, SpeedtestResult};

/// One measurement server.
///
/// Only `url` is required; everything else is informational and defaults to
/// empty when the API omits it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Server {
    /// Upload endpoint, e.g. `http://host:8080/speedtest/upload.php`.
    pub url: String,
    /// speedtest.net server id.
    #[serde(default)]
    pub id: String,
    /// City name.
    #[serde(default)]
    pub name: String,
    /// Country name.
    #[serde(default)]
    pub country: String,
    /// Operator of the server.
    #[serde(default)]
    pub sponsor: String,
    /// `host:port` of the server.
    #[serde(default)]
    pub host: String,
    /// Distance in km from the client as estimated by the API.
    #[serde(default)]
    pub distance: Option<f64>,
}

impl Server {
    /// Upload endpoint, rewritten to https when `secure` is set.
    pub fn upload_url(&self, secure: bool) -> SpeedtestResult<Url> {
        let mut url = Url::parse(&self.url).map_err(|source| {
            SpeedtestError::InvalidServerUrl {
                url: self.url.clone(),
                source,
            }
        })?;
        if secure && url.scheme() == "http" {
            // Only fails for cannot-be-a-base URLs, which http URLs never are.
            let _ = url.set_scheme("https");
        }
        Ok(url)
    }

    /// Resolve a sibling resource (`latency.txt`, `random350x350.jpg`, ...).
    pub fn resource_url(
        &self,
        secure: bool,
        resource: &str,
    ) -> SpeedtestResult<Url> {
        let base = self.upload_url(secure)?;
        base.join(resource)
            .map_err(|source| SpeedtestError::InvalidServerUrl {
                url: self.url.clone(),
                source,
            })
    }

    /// Human-readable label used in result files.
    pub fn label(&self) -> String {
        format!("{} ({}, {})", self.sponsor, self.name, self.country)
    }
}
