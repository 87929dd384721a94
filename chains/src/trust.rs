//! Per-name trust store.
//!
//! A bundle is trusted when a profile has been persisted for its name
//! **and** the bundle file carries the owner-execute bit. Replacing the
//! file (which usually drops the bit) or deleting the profile revokes
//! trust.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::{Bundle, Config, Error, Perms, Result};

/// Mode bit that marks a bundle as trusted.
const TRUST_BIT: u32 = 0o100;

/// Directory of protected profiles, one file per bundle name.
#[derive(Debug, Clone)]
pub struct TrustStore {
    /// Profile directory.
    dir: PathBuf,
}

impl TrustStore {
    /// Uses `dir` as the profile directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Uses the profile directory from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.profiles_dir())
    }

    /// Profile directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the protected profile for `name`.
    pub fn profile_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Error::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(name))
    }

    /// Returns `true` if `name` has a protected profile and `bundle` has
    /// the trust bit set.
    pub fn is_trusted(&self, name: &str, bundle: &Path) -> bool {
        let Ok(profile) = self.profile_path(name) else {
            return false;
        };
        profile.exists()
            && fs::metadata(bundle).is_ok_and(|m| m.permissions().mode() & TRUST_BIT != 0)
    }

    /// Loads the protected profile for `name`.
    pub fn load(&self, name: &str) -> Result<Perms> {
        let path = self.profile_path(name)?;
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(path)),
            Err(e) => return Err(e.into()),
        };
        Perms::from_text(&text)
    }

    /// Trusts or revokes `name`.
    ///
    /// Trusting fails with [`Error::TrustConflict`] when a profile already
    /// exists; otherwise it sets the trust bit on `bundle` and persists
    /// `profile` (desktop-entry text). Revoking removes the profile and is a
    /// no-op when none exists.
    pub fn set_trusted(&self, name: &str, bundle: &Path, profile: &str, trusted: bool) -> Result<()> {
        if !trusted {
            return self.revoke(name);
        }

        let path = self.profile_path(name)?;
        DirBuilder::new().recursive(true).mode(0o744).create(&self.dir)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::TrustConflict(name.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = mark_executable(bundle)
            .and_then(|()| file.write_all(profile.as_bytes()).map_err(Error::from));
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %cleanup,
                    "failed to remove partial profile"
                );
            }
            return Err(e);
        }
        tracing::info!(name, bundle = %bundle.display(), "trusted");
        Ok(())
    }

    /// Trusts an opened bundle, persisting its embedded desktop entry.
    pub fn trust(&self, bundle: &Bundle) -> Result<()> {
        self.set_trusted(bundle.name(), bundle.path(), bundle.desktop().raw(), true)
    }

    /// Removes the protected profile for `name`, if any.
    pub fn revoke(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.profile_path(name)?) {
            Ok(()) => {
                tracing::info!(name, "trust revoked");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Adds the trust bit to the file's mode.
fn mark_executable(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | TRUST_BIT);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PROFILE: &str = "[Desktop Entry]\nName=Demo\n\n[X-App Permissions]\nLevel=3\nSockets=x11;\n";

    fn fixture() -> (tempfile::TempDir, TrustStore, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let store = TrustStore::new(tmp.path().join("profiles"));
        let bundle = tmp.path().join("Demo.AppImage");
        fs::write(&bundle, b"bundle").unwrap();
        fs::set_permissions(&bundle, fs::Permissions::from_mode(0o644)).unwrap();
        (tmp, store, bundle)
    }

    #[test]
    fn trust_requires_both_signals() {
        let (_tmp, store, bundle) = fixture();
        assert!(!store.is_trusted("Demo", &bundle));

        store.set_trusted("Demo", &bundle, PROFILE, true).unwrap();
        assert!(store.is_trusted("Demo", &bundle));

        // Dropping the mode bit alone revokes trust.
        fs::set_permissions(&bundle, fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!store.is_trusted("Demo", &bundle));

        // Restoring the bit alone restores it.
        fs::set_permissions(&bundle, fs::Permissions::from_mode(0o744)).unwrap();
        assert!(store.is_trusted("Demo", &bundle));

        // Removing the profile alone revokes it again.
        store.revoke("Demo").unwrap();
        assert!(!store.is_trusted("Demo", &bundle));
    }

    #[test]
    fn persisted_profile_round_trips() {
        let (_tmp, store, bundle) = fixture();
        store.set_trusted("Demo", &bundle, PROFILE, true).unwrap();
        let perms = store.load("Demo").unwrap();
        assert_eq!(perms.level(), 3);
        let on_disk = fs::read_to_string(store.profile_path("Demo").unwrap()).unwrap();
        assert_eq!(on_disk, PROFILE);
    }

    #[test]
    fn trusting_twice_conflicts() {
        let (_tmp, store, bundle) = fixture();
        store.set_trusted("Demo", &bundle, PROFILE, true).unwrap();
        let err = store.set_trusted("Demo", &bundle, PROFILE, true).unwrap_err();
        assert!(matches!(err, Error::TrustConflict(_)));
    }

    #[test]
    fn revoking_unknown_name_is_ok() {
        let (_tmp, store, _bundle) = fixture();
        store.revoke("Never-Trusted").unwrap();
        assert!(matches!(store.load("Never-Trusted"), Err(Error::NotFound(_))));
    }

    #[test]
    fn rejects_path_like_names() {
        let (_tmp, store, bundle) = fixture();
        for name in ["", ".", "..", "../evil", "a/b"] {
            assert!(matches!(
                store.set_trusted(name, &bundle, PROFILE, true),
                Err(Error::InvalidName(_))
            ));
            assert!(!store.is_trusted(name, &bundle));
        }
    }

    #[test]
    fn missing_bundle_leaves_no_profile() {
        let (tmp, store, _bundle) = fixture();
        let gone = tmp.path().join("gone.AppImage");
        assert!(store.set_trusted("Gone", &gone, PROFILE, true).is_err());
        assert!(!store.profile_path("Gone").unwrap().exists());
    }
}
