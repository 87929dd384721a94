//! Process-wide settings read from the environment.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::{Error, Precedence, Result};

/// Overrides the application data directory.
pub const HOME_ENV: &str = "CHAINS_HOME";
/// When present, the built-in catalog outranks persisted profiles.
pub const PREFER_CATALOG_ENV: &str = "PREFER_CHAINS_PROFILE";

/// Directory name under the platform data directory.
const APP_DIR: &str = "chains";
/// Subdirectory of the data directory holding protected profiles.
const PROFILES_DIR: &str = "profiles";

/// Environment-derived configuration.
///
/// Default data directory: `$CHAINS_HOME` or `$XDG_DATA_HOME/chains`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Application data directory.
    pub data_dir: PathBuf,
    /// Order in which persisted and built-in profiles are consulted.
    pub precedence: Precedence,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let default = dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .ok_or_else(|| Error::NotFound(PathBuf::from("$XDG_DATA_HOME")))?;
        Ok(Self::from_lookup(default, |key| std::env::var_os(key)))
    }

    /// Builds the configuration from `lookup`, using `default_data_dir`
    /// when [`HOME_ENV`] is unset.
    pub fn from_lookup<F>(default_data_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let data_dir = lookup(HOME_ENV)
            .filter(|v| !v.is_empty())
            .map_or(default_data_dir, PathBuf::from);
        let precedence = if lookup(PREFER_CATALOG_ENV).is_some() {
            Precedence::CatalogFirst
        } else {
            Precedence::TrustedFirst
        };
        Self {
            data_dir,
            precedence,
        }
    }

    /// Directory of protected profiles.
    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join(PROFILES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::from_lookup(PathBuf::from("/home/u/.local/share/chains"), |_| None);
        assert_eq!(cfg.precedence, Precedence::TrustedFirst);
        assert_eq!(
            cfg.profiles_dir(),
            Path::new("/home/u/.local/share/chains/profiles")
        );
    }

    #[test]
    fn env_overrides() {
        let cfg = Config::from_lookup(PathBuf::from("/unused"), |k| match k {
            HOME_ENV => Some("/srv/chains".into()),
            PREFER_CATALOG_ENV => Some("".into()),
            _ => None,
        });
        assert_eq!(cfg.data_dir, Path::new("/srv/chains"));
        // Presence alone flips the order, even when empty.
        assert_eq!(cfg.precedence, Precedence::CatalogFirst);
    }
}
