//! Temporary, reversible custody of the VPN CLI's configuration directory.
//!
//! The VPN CLI keeps its login state under the invoking user's home, but the
//! benchmark runs as root and the CLI then looks under root's home. The
//! custodian copies the user's directory over root's for the duration of the
//! run, parking whatever root had in a `.bak` sibling, and puts everything
//! back on release.
//!
//! ```text
//! Empty --acquire--> Displaced { backed_up } --release--> Restored
//! ```
//!
//! `Displaced` is entered before the copy starts, so a copy that fails half
//! way is still undone by [`ConfigCustodian::release`].

use std::{
    env, fs, io,
    os::unix::fs::{FileTypeExt, symlink},
    path::{Path, PathBuf},
};

use nix::unistd::{Uid, User};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{BenchError, BenchResult, PrivilegeError};

/// Default location of the VPN CLI state, relative to a home directory.
pub const DEFAULT_CONFIG_SUBDIR: &str = ".local/share/adguardvpn-cli";

/// Runtime sockets owned by a live VPN daemon; copying them is meaningless.
const SOCKET_SUFFIX: &str = ".socket";

/// The user who invoked the benchmark through `sudo`, and where both homes
/// live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Login name from `SUDO_USER`.
    pub name: String,
    /// Home directory of that user.
    pub home: PathBuf,
    /// Home directory of the effective (root) user.
    pub effective_home: PathBuf,
}

impl Principal {
    /// Principal with explicit homes.
    pub fn new(
        name: impl Into<String>,
        home: impl Into<PathBuf>,
        effective_home: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
            effective_home: effective_home.into(),
        }
    }

    /// Requires root and a non-root `SUDO_USER`.
    pub fn from_environment() -> Result<Self, PrivilegeError> {
        if !Uid::effective().is_root() {
            return Err(PrivilegeError::NotRoot);
        }
        let name = env::var("SUDO_USER")
            .ok()
            .filter(|name| !name.is_empty() && name != "root")
            .ok_or(PrivilegeError::UnknownPrincipal)?;

        let home = User::from_name(&name)
            .map_err(|source| PrivilegeError::UserLookup {
                name: name.clone(),
                source,
            })?
            .map(|user| user.dir)
            .unwrap_or_else(|| Path::new("/home").join(&name));

        let effective_home = User::from_uid(Uid::effective())
            .ok()
            .flatten()
            .map(|user| user.dir)
            .or_else(|| env::var_os("HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/root"));

        debug!(
            user = %name,
            home = %home.display(),
            effective_home = %effective_home.display(),
            "resolved invoking user"
        );
        Ok(Self::new(name, home, effective_home))
    }
}

/// The three directories custody moves between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodyPaths {
    /// The invoking user's configuration; only ever read.
    pub source: PathBuf,
    /// Where the VPN CLI looks when running as root.
    pub destination: PathBuf,
    /// Parking spot for the pre-existing destination.
    pub backup: PathBuf,
}

impl CustodyPaths {
    /// The backup is `destination` with a `.bak` extension.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let backup = destination.with_extension("bak");
        Self {
            source: source.into(),
            destination,
            backup,
        }
    }

    /// `relative_dir` under each of the principal's homes.
    pub fn for_principal(principal: &Principal, relative_dir: impl AsRef<Path>) -> Self {
        let relative_dir = relative_dir.as_ref();
        Self::new(
            principal.home.join(relative_dir),
            principal.effective_home.join(relative_dir),
        )
    }
}

/// Where a [`ConfigCustodian`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodyState {
    /// Nothing touched yet.
    Empty,
    /// The destination holds the borrowed configuration.
    Displaced {
        /// A pre-existing destination was parked at the backup path.
        backed_up: bool,
    },
    /// The original destination is back in place.
    Restored,
}

/// Installs the invoking user's configuration for root and puts the
/// original back on release or drop.
#[derive(Debug)]
pub struct ConfigCustodian {
    paths: CustodyPaths,
    state: CustodyState,
}

impl ConfigCustodian {
    /// Custodian in the [`CustodyState::Empty`] state.
    pub fn new(paths: CustodyPaths) -> Self {
        Self {
            paths,
            state: CustodyState::Empty,
        }
    }

    /// Paths this custodian moves between.
    pub fn paths(&self) -> &CustodyPaths {
        &self.paths
    }

    /// Current state.
    pub fn state(&self) -> CustodyState {
        self.state
    }

    /// Fails with [`BenchError::ConfigNotFound`] when the invoking user has
    /// no configuration to lend.
    pub fn check_source(&self) -> BenchResult<()> {
        if self.paths.source.is_dir() {
            Ok(())
        } else {
            Err(BenchError::ConfigNotFound {
                path: self.paths.source.clone(),
            })
        }
    }

    /// Displace the destination and install a copy of the source.
    ///
    /// Already holding custody is a no-op.
    pub fn acquire(&mut self) -> BenchResult<()> {
        if matches!(self.state, CustodyState::Displaced { .. }) {
            return Ok(());
        }
        self.check_source()?;

        if exists(&self.paths.backup) {
            warn!(
                backup = %self.paths.backup.display(),
                "found a backup left by an earlier run, restoring it first"
            );
            restore_stale(&self.paths).map_err(custody_error(&self.paths.backup))?;
        }

        self.displace()?;
        self.install()?;
        info!(
            source = %self.paths.source.display(),
            destination = %self.paths.destination.display(),
            "VPN configuration in place"
        );
        Ok(())
    }

    fn displace(&mut self) -> BenchResult<()> {
        let destination = &self.paths.destination;
        let backed_up = if exists(destination) {
            fs::rename(destination, &self.paths.backup)
                .map_err(custody_error(destination))?;
            debug!(
                from = %destination.display(),
                to = %self.paths.backup.display(),
                "parked existing configuration"
            );
            true
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(custody_error(parent))?;
            }
            false
        };
        self.state = CustodyState::Displaced { backed_up };
        Ok(())
    }

    fn install(&mut self) -> BenchResult<()> {
        copy_tree(&self.paths.source, &self.paths.destination)
            .map_err(custody_error(&self.paths.destination))
    }

    /// Undo [`acquire`](Self::acquire). Only acts while displaced; errors are
    /// logged and swallowed.
    pub fn release(&mut self) {
        let CustodyState::Displaced { backed_up } = self.state else {
            return;
        };
        let destination = &self.paths.destination;
        let backup = &self.paths.backup;

        if exists(destination)
            && let Err(err) = remove_path(destination)
        {
            error!(
                path = %destination.display(),
                error = %err,
                "failed to remove copied configuration"
            );
        }

        if exists(backup) {
            match fs::rename(backup, destination) {
                Ok(()) => debug!(path = %destination.display(), "original configuration restored"),
                Err(err) => error!(
                    backup = %backup.display(),
                    error = %err,
                    "failed to restore original configuration; run `vpnbench restore`"
                ),
            }
        } else if backed_up {
            warn!(backup = %backup.display(), "backup disappeared before release");
        }

        self.state = CustodyState::Restored;
        info!("VPN configuration custody released");
    }
}

impl Drop for ConfigCustodian {
    fn drop(&mut self) {
        if matches!(self.state, CustodyState::Displaced { .. }) {
            warn!("configuration custody still held at drop, releasing");
            self.release();
        }
    }
}

/// Put a backup left by a killed run back in place. Returns whether there
/// was anything to restore.
pub fn restore_stale(paths: &CustodyPaths) -> io::Result<bool> {
    if !exists(&paths.backup) {
        return Ok(false);
    }
    if exists(&paths.destination) {
        remove_path(&paths.destination)?;
    }
    fs::rename(&paths.backup, &paths.destination)?;
    info!(
        path = %paths.destination.display(),
        "restored configuration from stale backup"
    );
    Ok(true)
}

fn custody_error(path: &Path) -> impl FnOnce(io::Error) -> BenchError + '_ {
    move |source| BenchError::Custody {
        path: path.to_path_buf(),
        source,
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn remove_path(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn is_socket_name(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.ends_with(SOCKET_SUFFIX))
}

/// Recursive copy that recreates symlinks instead of following them and
/// skips sockets.
fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_socket_name(entry.file_name()));

    for entry in walker {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else if file_type.is_socket() {
            debug!(path = %entry.path().display(), "skipping socket");
        } else {
            debug!(path = %entry.path().display(), "skipping special file");
        }
    }
    Ok(())
}
