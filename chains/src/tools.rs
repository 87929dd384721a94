//! Discovery of the external helper binaries.
//!
//! Each helper is looked up once per process, next to the running
//! executable first and then on `$PATH`, so a self-contained install can
//! ship its own `squashfuse` and `bwrap` alongside `chains`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::{Error, Result};

/// External programs chains delegates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Tool {
    /// FUSE SquashFS mounter, used with `-o offset=N`.
    Squashfuse,
    /// FUSE unmount helper, used with `-uz`.
    Fusermount,
    /// Generic unmount, used with `-l` when `fusermount` is absent.
    Umount,
    /// The bubblewrap sandbox enforcer.
    Bwrap,
}

impl Tool {
    /// Every helper, in lookup-slot order.
    const ALL: [Self; 4] = [Self::Squashfuse, Self::Fusermount, Self::Umount, Self::Bwrap];

    /// Binary name of the helper.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Squashfuse => "squashfuse",
            Self::Fusermount => "fusermount",
            Self::Umount => "umount",
            Self::Bwrap => "bwrap",
        }
    }

    /// Returns the cached location of the helper, if installed.
    pub fn path(self) -> Option<&'static Path> {
        static CACHED: [OnceLock<Option<PathBuf>>; 4] = [
            OnceLock::new(),
            OnceLock::new(),
            OnceLock::new(),
            OnceLock::new(),
        ];
        let slot = Self::ALL.iter().position(|t| *t == self).unwrap_or(0);
        CACHED[slot]
            .get_or_init(|| {
                let found = sibling_path(self.name()).or_else(|| search_path(self.name()));
                tracing::debug!(tool = self.name(), path = ?found, "helper lookup");
                found
            })
            .as_deref()
    }

    /// Like [`path`](Self::path), but fails with [`Error::MissingTool`].
    pub fn require(self) -> Result<&'static Path> {
        self.path().ok_or(Error::MissingTool(self.name()))
    }
}

/// Check for a binary next to the current executable.
fn sibling_path(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let sibling = exe.with_file_name(name);
    sibling.is_file().then_some(sibling)
}

/// Search `$PATH` for a binary.
fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_binary_names() {
        let names: Vec<_> = Tool::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["squashfuse", "fusermount", "umount", "bwrap"]);
    }

    #[test]
    fn missing_binary_is_not_found() {
        assert!(search_path("chains-definitely-not-a-real-binary").is_none());
        assert!(sibling_path("chains-definitely-not-a-real-binary").is_none());
    }
}
