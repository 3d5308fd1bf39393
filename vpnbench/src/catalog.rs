//! Location discovery from `list-locations` output.

use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::{
    error::{BenchError, BenchResult},
    vpn::VpnControl,
};

/// `<ISO> <country> <city> <ping>`, fields separated by two or more spaces.
static LOCATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Z]{2})\s+(.+?)\s{2,}(.+?)\s{2,}(\d+)\s*$")
        .expect("location pattern is valid")
});

/// Column names shared with result files written by earlier tooling.
pub const ISO_COLUMN: &str = "ISO";
/// See [`ISO_COLUMN`].
pub const COUNTRY_COLUMN: &str = "Country";
/// See [`ISO_COLUMN`].
pub const CITY_COLUMN: &str = "City";
/// See [`ISO_COLUMN`].
pub const PING_COLUMN: &str = "Ping Estimate";

/// One VPN exit location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Two-letter code passed to `connect -l`; unique per catalog.
    pub iso_code: String,
    /// Country name, whitespace collapsed.
    pub country: String,
    /// City name, whitespace collapsed.
    pub city: String,
    /// Advisory round-trip estimate reported by the VPN client, in ms.
    pub ping_estimate: u32,
}

impl Location {
    /// Ordered `(column, value)` pairs for the result file.
    pub fn fields(&self) -> Vec<(String, String)> {
        vec![
            (ISO_COLUMN.into(), self.iso_code.clone()),
            (COUNTRY_COLUMN.into(), self.country.clone()),
            (CITY_COLUMN.into(), self.city.clone()),
            (PING_COLUMN.into(), self.ping_estimate.to_string()),
        ]
    }
}

/// Parse every recognizable location line; anything else (headers, banners,
/// blank lines) is skipped. Discovery order is preserved.
pub fn parse_locations(output: &str) -> Vec<Location> {
    output.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Location> {
    let caps = LOCATION_LINE.captures(line)?;
    let ping_estimate = caps[4].parse().ok()?;
    Some(Location {
        iso_code: caps[1].to_string(),
        country: collapse_whitespace(&caps[2]),
        city: collapse_whitespace(&caps[3]),
        ping_estimate,
    })
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ask the VPN CLI for its locations.
///
/// A missing binary, a failing command and an empty catalog are all fatal.
pub async fn fetch_locations<V>(vpn: &V) -> BenchResult<Vec<Location>>
where
    V: VpnControl + ?Sized,
{
    info!("fetching available VPN locations");
    let output = vpn.list_locations().await.map_err(|err| {
        let reason = if err.is_missing_binary() {
            "VPN CLI binary is missing"
        } else {
            "list-locations failed"
        };
        BenchError::discovery(reason, Some(err))
    })?;

    let locations = parse_locations(&output);
    if locations.is_empty() {
        return Err(BenchError::discovery(
            "no locations could be parsed from list-locations output",
            None,
        ));
    }
    info!(count = locations.len(), "discovered VPN locations");
    Ok(locations)
}
