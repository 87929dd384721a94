//! Error types for chains operations.

use std::path::PathBuf;

use crate::Perms;

/// Alias for `Result<T, chains::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by bundle, permission and sandbox operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No bundle, profile or directory exists at the given location.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The bundle format could not be detected or its payload located.
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    /// The embedded filesystem image could not be read.
    #[error("payload: {0}")]
    Payload(String),

    /// A permission level outside `0..=3` (or not a number at all).
    #[error("invalid permission level `{0}` (expected 0-3)")]
    InvalidLevel(String),

    /// A permission declaration whose `Level` is missing or invalid.
    ///
    /// Carries the rest of the declaration with the level left at
    /// [`UNSET_LEVEL`](crate::UNSET_LEVEL), so callers can supply one.
    #[error("undetermined permission level `{value}` (expected 0-3)")]
    UndeterminedLevel {
        /// Raw `Level` value, empty when the key is absent.
        value: String,
        /// Everything else that was declared.
        perms: Box<Perms>,
    },

    /// A socket token outside the closed socket enumeration.
    #[error("invalid socket `{0}`")]
    InvalidSocket(String),

    /// Profile text that could not be parsed.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// No built-in catalog entry for the given name.
    #[error("no built-in profile for `{0}`")]
    ProfileNotFound(String),

    /// A bundle name that cannot be used as a profile file name.
    #[error("invalid bundle name `{0}`")]
    InvalidName(String),

    /// The operation requires a mounted bundle.
    #[error("bundle is not mounted")]
    NotMounted,

    /// The bundle is already mounted.
    #[error("bundle is already mounted at {}", .0.display())]
    AlreadyMounted(PathBuf),

    /// The bundle handle was destroyed and can no longer be used.
    #[error("bundle handle was destroyed")]
    Destroyed,

    /// An explicit mount target does not exist.
    #[error("mount point doesn't exist: {}", .0.display())]
    NoMountPoint(PathBuf),

    /// A protected profile already exists for this bundle name.
    #[error("`{0}` is already trusted; revoke it first")]
    TrustConflict(String),

    /// A required helper binary is not installed.
    #[error("`{0}` not found next to the executable or in $PATH")]
    MissingTool(&'static str),

    /// A mount or unmount helper exited unsuccessfully.
    #[error("{tool} failed: {output}")]
    Helper {
        /// Helper binary name.
        tool: &'static str,
        /// Combined stdout and stderr of the helper.
        output: String,
    },

    /// The sandbox enforcer failed to spawn or exited non-zero.
    #[error("sandbox failed: {0}")]
    Sandbox(String),

    /// An I/O error from bundle, trust-store or runner operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catalog (de)serialisation error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
