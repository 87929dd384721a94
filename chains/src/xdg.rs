//! Host directory layout and path shorthand expansion.
//!
//! Profiles name user directories through shorthands (`xdg-download`,
//! `~/.config/foo`) so one profile works for every account. [`HostDirs`]
//! resolves them against the *real* home directory of the invoking user,
//! taken from the password database rather than `$HOME`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Resolved XDG base and user directories of the invoking user.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HostDirs {
    /// Real home directory (password database entry).
    pub home: PathBuf,
    /// `$HOME` as seen by this process, when it differs from [`home`](Self::home).
    pub env_home: Option<PathBuf>,
    /// `$XDG_CONFIG_HOME`.
    pub config_home: PathBuf,
    /// `$XDG_CACHE_HOME`.
    pub cache_home: PathBuf,
    /// `$XDG_DATA_HOME`.
    pub data_home: PathBuf,
    /// `$XDG_STATE_HOME`.
    pub state_home: PathBuf,
    /// `$XDG_RUNTIME_DIR`.
    pub runtime_dir: PathBuf,
    /// `XDG_DESKTOP_DIR`.
    pub desktop: PathBuf,
    /// `XDG_DOWNLOAD_DIR`.
    pub download: PathBuf,
    /// `XDG_DOCUMENTS_DIR`.
    pub documents: PathBuf,
    /// `XDG_MUSIC_DIR`.
    pub music: PathBuf,
    /// `XDG_PICTURES_DIR`.
    pub pictures: PathBuf,
    /// `XDG_VIDEOS_DIR`.
    pub videos: PathBuf,
    /// `XDG_TEMPLATES_DIR`.
    pub templates: PathBuf,
    /// `XDG_PUBLICSHARE_DIR`.
    pub public_share: PathBuf,
}

impl HostDirs {
    /// Resolves the layout of the current user from the process environment.
    pub fn detect() -> Result<Self> {
        let uid = nix::unistd::getuid().as_raw();
        let home = real_home()?;
        Ok(Self::from_env(home, uid, |key| std::env::var_os(key)))
    }

    /// Builds the default layout for `home` with no environment overrides.
    pub fn from_home(home: impl Into<PathBuf>, uid: u32) -> Self {
        Self::from_env(home.into(), uid, |_| None)
    }

    /// Builds the layout for `home`, reading overrides through `lookup`.
    ///
    /// Relative XDG values are ignored.
    pub fn from_env<F>(home: PathBuf, uid: u32, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let base = |key: &str, default: PathBuf| {
            lookup(key)
                .map(PathBuf::from)
                .filter(|p| p.is_absolute())
                .unwrap_or(default)
        };

        let env_home = lookup("HOME").map(PathBuf::from).filter(|p| *p != home);
        let config_home = base("XDG_CONFIG_HOME", home.join(".config"));
        let user_dirs = fs::read_to_string(config_home.join("user-dirs.dirs")).unwrap_or_default();
        let user = |key: &str, default: &str| {
            user_dir(&user_dirs, key, &home).unwrap_or_else(|| home.join(default))
        };

        Self {
            env_home,
            cache_home: base("XDG_CACHE_HOME", home.join(".cache")),
            data_home: base("XDG_DATA_HOME", home.join(".local/share")),
            state_home: base("XDG_STATE_HOME", home.join(".local/state")),
            runtime_dir: base("XDG_RUNTIME_DIR", PathBuf::from(format!("/run/user/{uid}"))),
            desktop: user("XDG_DESKTOP_DIR", "Desktop"),
            download: user("XDG_DOWNLOAD_DIR", "Downloads"),
            documents: user("XDG_DOCUMENTS_DIR", "Documents"),
            music: user("XDG_MUSIC_DIR", "Music"),
            pictures: user("XDG_PICTURES_DIR", "Pictures"),
            videos: user("XDG_VIDEOS_DIR", "Videos"),
            templates: user("XDG_TEMPLATES_DIR", "Templates"),
            public_share: user("XDG_PUBLICSHARE_DIR", "Public"),
            config_home,
            home,
        }
    }

    /// Directory a shorthand stands for, if `key` is one.
    pub fn shorthand(&self, key: &str) -> Option<&Path> {
        let dir = match key {
            "xdg-home" => &self.home,
            "xdg-desktop" => &self.desktop,
            "xdg-download" => &self.download,
            "xdg-documents" => &self.documents,
            "xdg-music" => &self.music,
            "xdg-pictures" => &self.pictures,
            "xdg-videos" => &self.videos,
            "xdg-templates" => &self.templates,
            "xdg-publicshare" => &self.public_share,
            "xdg-config" => &self.config_home,
            "xdg-cache" => &self.cache_home,
            "xdg-data" => &self.data_home,
            "xdg-state" => &self.state_home,
            _ => return None,
        };
        Some(dir)
    }

    /// Expands shorthands and `~`, then normalizes the result.
    ///
    /// Paths under a `$HOME` that differs from the real home are rewritten
    /// to the real home, so a profile resolves the same way under `sudo -E`
    /// or a redirected `$HOME`.
    pub fn expand(&self, path: &str) -> String {
        let (head, tail) = match path.find('/') {
            Some(i) => (&path[..i], &path[i..]),
            None => (path, ""),
        };

        let joined = if head == "~" {
            format!("{}{tail}", self.home.display())
        } else if let Some(dir) = self.shorthand(head) {
            format!("{}{tail}", dir.display())
        } else {
            path.to_owned()
        };

        let cleaned = clean(&joined);
        match &self.env_home {
            Some(env_home) => {
                let p = Path::new(&cleaned);
                match p.strip_prefix(env_home) {
                    Ok(rest) if rest.as_os_str().is_empty() => self.home.display().to_string(),
                    Ok(rest) => self.home.join(rest).display().to_string(),
                    Err(_) => cleaned,
                }
            }
            None => cleaned,
        }
    }
}

/// Home directory of the current uid from the password database.
///
/// Falls back to [`dirs::home_dir`] when the uid has no passwd entry
/// (common in minimal containers).
pub fn real_home() -> Result<PathBuf> {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => return Ok(user.dir),
        Ok(None) => tracing::debug!(uid = uid.as_raw(), "no passwd entry; using $HOME"),
        Err(e) => tracing::warn!(error = %e, "passwd lookup failed; using $HOME"),
    }
    dirs::home_dir().ok_or_else(|| Error::NotFound(PathBuf::from("~")))
}

/// Extracts `KEY="$HOME/dir"` from a `user-dirs.dirs` document.
fn user_dir(doc: &str, key: &str, home: &Path) -> Option<PathBuf> {
    doc.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .and_then(|v| {
            if let Some(rest) = v.strip_prefix("$HOME") {
                let rest = rest.trim_start_matches('/');
                Some(if rest.is_empty() {
                    home.to_path_buf()
                } else {
                    home.join(rest)
                })
            } else {
                let p = PathBuf::from(v);
                p.is_absolute().then_some(p)
            }
        })
}

/// Lexically normalizes a path: collapses `//` and `.`, resolves `..`.
pub(crate) fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".into();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            p => parts.push(p),
        }
    }
    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".into(),
        (false, false) => body,
    }
}
