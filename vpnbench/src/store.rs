//! Append-only CSV result store.
//!
//! The store is also the source of truth for resume state: the set of ISO
//! codes already present in the active result file is exactly the set of
//! locations a run skips.
//!
//! The header of a result file is fixed by whoever wrote it first (an
//! earlier run, or the first append of this one) and never rewritten. Rows
//! are shaped to that header.

use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{catalog::ISO_COLUMN, record::MeasurementRecord};

/// File name prefix of result CSVs.
pub const DEFAULT_RESULTS_PREFIX: &str = "adguard_speedtest_results";

/// Timestamp embedded in result and log file names.
pub fn run_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Result file failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("failed to access result file {}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The CSV reader or writer failed.
    #[error("malformed result file {}", path.display())]
    Csv {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: csv::Error,
    },
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path) -> impl FnOnce(csv::Error) -> Self + '_ {
        move |source| Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Picks the active result file among the files matching the naming
/// convention.
pub trait ActiveFilePolicy {
    /// `None` when there is nothing to resume from.
    fn choose(&self, candidates: &[PathBuf]) -> Option<PathBuf>;
}

/// Most recently modified file wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestModified;

impl ActiveFilePolicy for LatestModified {
    fn choose(&self, candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates
            .iter()
            .filter_map(|path| {
                let modified = fs::metadata(path).and_then(|m| m.modified());
                modified.ok().map(|at| (at, path))
            })
            .max_by_key(|(at, _)| *at)
            .map(|(_, path)| path.clone())
    }
}

impl<F> ActiveFilePolicy for F
where
    F: Fn(&[PathBuf]) -> Option<PathBuf>,
{
    fn choose(&self, candidates: &[PathBuf]) -> Option<PathBuf> {
        self(candidates)
    }
}

#[derive(Debug)]
struct Sink {
    header: Option<Vec<String>>,
    writer: csv::Writer<File>,
}

/// Result file handle for one run.
#[derive(Debug)]
pub struct ResultStore<P = LatestModified> {
    dir: PathBuf,
    prefix: String,
    stamp: String,
    active: PathBuf,
    policy: P,
    sink: Option<Sink>,
}

impl ResultStore<LatestModified> {
    /// Store that resumes from the most recently modified result file.
    pub fn with_latest_policy(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        stamp: impl Into<String>,
    ) -> Self {
        Self::new(dir, prefix, stamp, LatestModified)
    }
}

impl<P: ActiveFilePolicy> ResultStore<P> {
    /// The active file starts out as `<dir>/<prefix>_<stamp>.csv`; nothing
    /// touches the disk until [`load_resume_set`](Self::load_resume_set) or
    /// the first [`append`](Self::append).
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        stamp: impl Into<String>,
        policy: P,
    ) -> Self {
        let dir = dir.into();
        let prefix = prefix.into();
        let stamp = stamp.into();
        let active = fresh_path(&dir, &prefix, &stamp);
        Self {
            dir,
            prefix,
            stamp,
            active,
            policy,
            sink: None,
        }
    }

    /// File rows are appended to.
    pub fn active_path(&self) -> &Path {
        &self.active
    }

    /// The fixed header, once the active file has been opened.
    pub fn header(&self) -> Option<&[String]> {
        self.sink.as_ref().and_then(|sink| sink.header.as_deref())
    }

    /// Result files in the directory, sorted by name. A directory that does
    /// not exist yet holds none.
    pub fn candidates(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(StoreError::io(&self.dir)(err)),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&self.dir))?;
            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| self.matches_convention(name));
            if matches && path.is_file() {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    fn matches_convention(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with('_') && rest.ends_with(".csv"))
    }

    /// Choose the active file and return the ISO codes it already holds.
    ///
    /// Never fails: an unreadable directory or file is logged and treated
    /// as "nothing tested yet".
    pub fn load_resume_set(&mut self) -> HashSet<String> {
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "cannot scan for previous result files");
                return HashSet::new();
            }
        };

        let Some(chosen) = self.policy.choose(&candidates) else {
            info!(
                path = %self.active.display(),
                "no previous result file found, starting a new one"
            );
            return HashSet::new();
        };

        self.sink = None;
        self.active = chosen;
        info!(path = %self.active.display(), "continuing existing result file");

        match read_iso_codes(&self.active) {
            Ok(tested) => {
                info!(
                    path = %self.active.display(),
                    tested = tested.len(),
                    "loaded already-tested locations"
                );
                tested
            }
            Err(err) => {
                warn!(
                    path = %self.active.display(),
                    error = %err,
                    "failed to read previous result file, starting fresh"
                );
                HashSet::new()
            }
        }
    }

    /// Append one row and force it to disk.
    pub fn append(
        &mut self,
        record: &MeasurementRecord,
    ) -> Result<(), StoreError> {
        let path = self.active.clone();
        let Sink { header, writer } = self.sink()?;

        if header.is_none() {
            let columns: Vec<String> = record.columns().map(str::to_string).collect();
            writer
                .write_record(&columns)
                .map_err(StoreError::csv(&path))?;
            debug!(path = %path.display(), ?columns, "result header written");
            *header = Some(columns);
        }

        let columns = header.as_deref().unwrap_or_default();
        writer
            .write_record(record.shaped_to(columns))
            .map_err(StoreError::csv(&path))?;
        writer.flush().map_err(StoreError::io(&path))?;
        writer
            .get_ref()
            .sync_data()
            .map_err(StoreError::io(&path))?;
        Ok(())
    }

    fn sink(&mut self) -> Result<&mut Sink, StoreError> {
        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => self.open()?,
        };
        Ok(self.sink.insert(sink))
    }

    fn open(&mut self) -> Result<Sink, StoreError> {
        let mut header = None;
        if is_non_empty(&self.active) {
            match read_header(&self.active) {
                Ok(existing) => header = existing,
                Err(err) => {
                    let fresh = fresh_path(&self.dir, &self.prefix, &self.stamp);
                    warn!(
                        path = %self.active.display(),
                        replacement = %fresh.display(),
                        error = %err,
                        "existing result file is unreadable, writing to a new file"
                    );
                    self.active = fresh;
                }
            }
        }

        fs::create_dir_all(&self.dir).map_err(StoreError::io(&self.dir))?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.active)
            .map_err(StoreError::io(&self.active))?;
        terminate_last_line(&mut file).map_err(StoreError::io(&self.active))?;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Sink { header, writer })
    }
}

fn fresh_path(dir: &Path, prefix: &str, stamp: &str) -> PathBuf {
    dir.join(format!("{prefix}_{stamp}.csv"))
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.len() > 0)
}

fn read_header(path: &Path) -> Result<Option<Vec<String>>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(StoreError::csv(path))?;
    let header = reader.headers().map_err(StoreError::csv(path))?;
    if header.iter().all(str::is_empty) {
        return Ok(None);
    }
    Ok(Some(header.iter().map(str::to_string).collect()))
}

/// ISO codes recorded in `path`.
///
/// Rows are read as raw bytes, so a row whose other columns are not valid
/// UTF-8 still contributes its ISO code. A read error part-way through keeps
/// the codes gathered so far.
pub fn read_iso_codes(path: &Path) -> Result<HashSet<String>, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(StoreError::csv(path))?;
    let headers = reader.headers().map_err(StoreError::csv(path))?;
    let Some(iso_index) = headers.iter().position(|h| h == ISO_COLUMN) else {
        return Ok(HashSet::new());
    };

    let mut tested = HashSet::new();
    let mut row = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut row) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "stopped reading result file early"
                );
                break;
            }
        }
        match row.get(iso_index).map(std::str::from_utf8) {
            Some(Ok(iso)) if !iso.is_empty() => {
                tested.insert(iso.to_string());
            }
            Some(Err(_)) => debug!(
                path = %path.display(),
                line = row.position().map(|p| p.line()),
                "skipping row with undecodable ISO code"
            ),
            _ => {}
        }
    }
    Ok(tested)
}

/// A crash between the row bytes and its newline would otherwise glue the
/// next row onto the torn one.
fn terminate_last_line(file: &mut File) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use super::*;

    fn tmp() -> TempDir {
        tempfile::tempdir().expect("create temp dir")
    }

    fn record(pairs: &[(&str, &str)]) -> MeasurementRecord {
        let mut record = MeasurementRecord::new();
        for (k, v) in pairs {
            record.insert(*k, *v);
        }
        record
    }

    fn rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    fn touch(path: &Path, contents: &str, age_secs: u64) {
        fs::write(path, contents).unwrap();
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn fresh_directory_starts_new_timestamped_file() {
        let dir = tmp();
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "20240101_000000");
        assert!(store.load_resume_set().is_empty());
        assert_eq!(
            store.active_path(),
            dir.path().join("bench_20240101_000000.csv")
        );
        assert!(!store.active_path().exists());
    }

    #[test]
    fn first_append_fixes_header_and_extras_are_dropped() {
        let dir = tmp();
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s1");
        store
            .append(&record(&[("ISO", "US"), ("download", "10")]))
            .unwrap();
        store
            .append(&record(&[("ISO", "DE"), ("download", "20"), ("share", "x")]))
            .unwrap();
        store.append(&record(&[("download", "30"), ("ISO", "FR")])).unwrap();

        assert_eq!(store.header().unwrap(), ["ISO", "download"]);
        assert_eq!(
            rows(store.active_path()),
            vec![
                vec!["ISO", "download"],
                vec!["US", "10"],
                vec!["DE", "20"],
                vec!["FR", "30"],
            ]
        );
    }

    #[test]
    fn rows_reach_disk_before_append_returns() {
        let dir = tmp();
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s1");
        store.append(&record(&[("ISO", "NL")])).unwrap();
        let on_disk = fs::read_to_string(store.active_path()).unwrap();
        assert_eq!(on_disk, "ISO\nNL\n");
    }

    #[test]
    fn resumes_from_most_recently_modified_file() {
        let dir = tmp();
        touch(&dir.path().join("bench_old.csv"), "ISO,download\nUS,1\n", 600);
        touch(&dir.path().join("bench_new.csv"), "ISO,download\nDE,2\nFR,3\n", 5);
        touch(&dir.path().join("other_new.csv"), "ISO\nJP\n", 0);

        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s9");
        let tested = store.load_resume_set();
        assert_eq!(tested, HashSet::from(["DE".to_string(), "FR".to_string()]));
        assert_eq!(store.active_path(), dir.path().join("bench_new.csv"));

        // Existing header is reused even if the record orders columns differently.
        store.append(&record(&[("download", "4"), ("ISO", "IT")])).unwrap();
        assert_eq!(rows(store.active_path()).last().unwrap(), &["IT", "4"]);
    }

    #[test]
    fn injected_policy_overrides_timestamps() {
        let dir = tmp();
        touch(&dir.path().join("bench_a.csv"), "ISO\nUS\n", 0);
        touch(&dir.path().join("bench_b.csv"), "ISO\nCA\n", 600);

        let oldest_name = |candidates: &[PathBuf]| candidates.last().cloned();
        let mut store = ResultStore::new(dir.path(), "bench", "s1", oldest_name);
        assert_eq!(store.load_resume_set(), HashSet::from(["CA".to_string()]));
    }

    #[test]
    fn unreadable_history_is_not_fatal() {
        let dir = tmp();
        let broken = dir.path().join("bench_broken.csv");
        fs::write(&broken, b"ISO,\xff\xfe\nUS,1\n").unwrap();

        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s2");
        assert!(store.load_resume_set().is_empty());
        assert_eq!(store.active_path(), broken);

        store.append(&record(&[("ISO", "SE")])).unwrap();
        assert_eq!(store.active_path(), dir.path().join("bench_s2.csv"));
        assert_eq!(rows(store.active_path()), vec![vec!["ISO"], vec!["SE"]]);
    }

    #[test]
    fn empty_history_file_gets_a_header() {
        let dir = tmp();
        touch(&dir.path().join("bench_empty.csv"), "", 0);
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s3");
        assert!(store.load_resume_set().is_empty());
        store.append(&record(&[("ISO", "PL"), ("ping", "9")])).unwrap();
        assert_eq!(
            rows(&dir.path().join("bench_empty.csv")),
            vec![vec!["ISO", "ping"], vec!["PL", "9"]]
        );
    }

    #[test]
    fn torn_last_line_is_terminated_before_appending() {
        let dir = tmp();
        touch(&dir.path().join("bench_torn.csv"), "ISO,ping\nUS,1", 0);
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s4");
        assert_eq!(store.load_resume_set(), HashSet::from(["US".to_string()]));
        store.append(&record(&[("ISO", "MX"), ("ping", "2")])).unwrap();
        assert_eq!(
            fs::read_to_string(store.active_path()).unwrap(),
            "ISO,ping\nUS,1\nMX,2\n"
        );
    }

    #[test]
    fn missing_results_dir_is_created_on_first_append() {
        let dir = tmp();
        let results = dir.path().join("results/nested");
        let mut store = ResultStore::with_latest_policy(&results, "bench", "s6");
        assert!(store.load_resume_set().is_empty());
        assert!(store.candidates().unwrap().is_empty());

        store.append(&record(&[("ISO", "US"), ("ping", "7")])).unwrap();
        assert_eq!(store.active_path(), results.join("bench_s6.csv"));
        assert_eq!(
            rows(store.active_path()),
            vec![vec!["ISO", "ping"], vec!["US", "7"]]
        );
    }

    #[test]
    fn undecodable_rows_do_not_discard_other_codes() {
        let dir = tmp();
        fs::write(
            dir.path().join("bench_partial.csv"),
            b"ISO,City\nUS,New York\nDE,M\xc3\nFR,Paris\n\xffX,Nowhere\nIT,Rome\n",
        )
        .unwrap();

        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s7");
        let tested = store.load_resume_set();
        let expected: HashSet<String> =
            ["US", "DE", "FR", "IT"].into_iter().map(String::from).collect();
        assert_eq!(tested, expected);
    }

    #[test]
    fn file_without_iso_column_yields_nothing() {
        let dir = tmp();
        touch(&dir.path().join("bench_x.csv"), "City\nParis\n", 0);
        let mut store = ResultStore::with_latest_policy(dir.path(), "bench", "s5");
        assert!(store.load_resume_set().is_empty());
    }
}
