//! One result-file row.

use crate::catalog::{ISO_COLUMN, Location};

/// Ordered `(column, value)` pairs: location columns first, then whatever
/// the measurement produced.
///
/// Column order is the order of first insertion; re-inserting a column
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementRecord {
    fields: Vec<(String, String)>,
}

impl MeasurementRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Location columns merged with the measurement columns. Measurement
    /// values win on name clashes.
    pub fn from_parts<I>(location: &Location, measurement: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut record = Self::new();
        record.merge(location.fields());
        record.merge(measurement);
        record
    }

    /// Set `column`, appending it if new.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    /// [`insert`](Self::insert) each pair in order.
    pub fn merge<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (column, value) in fields {
            self.insert(column, value);
        }
    }

    /// Value of `column`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Value of the ISO column.
    pub fn iso_code(&self) -> Option<&str> {
        self.get(ISO_COLUMN)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Values laid out in `header` order; unknown columns are dropped and
    /// missing ones left empty.
    pub fn shaped_to<'a>(&'a self, header: &'a [String]) -> Vec<&'a str> {
        header
            .iter()
            .map(|column| self.get(column).unwrap_or(""))
            .collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// No columns at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Location {
        Location {
            iso_code: "JP".into(),
            country: "Japan".into(),
            city: "Tokyo".into(),
            ping_estimate: 180,
        }
    }

    #[test]
    fn measurement_follows_location_columns() {
        let record = MeasurementRecord::from_parts(
            &location(),
            [("download".to_string(), "1000".to_string())],
        );
        let columns: Vec<_> = record.columns().collect();
        assert_eq!(columns, ["ISO", "Country", "City", "Ping Estimate", "download"]);
        assert_eq!(record.iso_code(), Some("JP"));
    }

    #[test]
    fn clashing_measurement_column_overrides_in_place() {
        let record = MeasurementRecord::from_parts(
            &location(),
            [("City".to_string(), "Osaka".to_string())],
        );
        assert_eq!(record.len(), 4);
        assert_eq!(record.get("City"), Some("Osaka"));
    }

    #[test]
    fn shaping_drops_extras_and_blanks_missing() {
        let mut record = MeasurementRecord::new();
        record.insert("ISO", "FR");
        record.insert("extra", "ignored");
        let header = vec!["ISO".to_string(), "download".to_string()];
        assert_eq!(record.shaped_to(&header), ["FR", ""]);
    }
}
