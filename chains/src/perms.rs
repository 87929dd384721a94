//! The permission model: isolation level plus file, device and socket grants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::desktop::{DesktopEntry, PERMISSIONS_SECTION, split_list};
use crate::{Error, Result, xdg};

/// Level value meaning "not determined".
pub const UNSET_LEVEL: i8 = -1;

/// Access mode of a file grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Mode {
    /// Read-only bind.
    #[default]
    ReadOnly,
    /// Read-write bind.
    ReadWrite,
}

impl Mode {
    /// Textual suffix without the colon.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// A path exposed to the sandbox, stored with shorthands unexpanded.
///
/// Canonical text is `path:ro` or `path:rw`; a missing suffix means
/// read-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub struct FileGrant {
    /// Normalized path, possibly starting with `~` or an `xdg-*` shorthand.
    pub path: String,
    /// Access mode.
    pub mode: Mode,
}

impl FileGrant {
    /// Parses `path[:ro|:rw]`. Returns `None` when the path part is blank.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (path, mode) = if let Some(p) = s.strip_suffix(":rw") {
            (p, Mode::ReadWrite)
        } else if let Some(p) = s.strip_suffix(":ro") {
            (p, Mode::ReadOnly)
        } else {
            (s, Mode::ReadOnly)
        };
        (!path.trim().is_empty()).then(|| Self {
            path: xdg::clean(path),
            mode,
        })
    }

    /// Returns `true` for a read-write grant.
    pub fn writable(&self) -> bool {
        self.mode == Mode::ReadWrite
    }
}

impl fmt::Display for FileGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.mode.as_str())
    }
}

impl TryFrom<String> for FileGrant {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s).ok_or_else(|| Error::InvalidProfile(format!("empty file grant `{s}`")))
    }
}

impl From<FileGrant> for String {
    fn from(g: FileGrant) -> Self {
        g.to_string()
    }
}

/// An IPC channel or namespace the sandbox may share with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Socket {
    /// X11 display socket and Xauthority.
    X11,
    /// ALSA sound devices.
    Alsa,
    /// PulseAudio plus ALSA.
    Audio,
    /// PulseAudio socket.
    PulseAudio,
    /// Wayland compositor socket.
    Wayland,
    /// Session D-Bus.
    Dbus,
    /// Cgroup namespace.
    Cgroup,
    /// Network namespace.
    Network,
    /// PID namespace.
    Pid,
    /// PipeWire socket.
    Pipewire,
    /// Terminal session (no `setsid`).
    Session,
    /// User namespace.
    User,
    /// UTS namespace.
    Uts,
}

impl Socket {
    /// Every socket, in policy emission order.
    pub const ALL: [Self; 13] = [
        Self::X11,
        Self::Alsa,
        Self::Audio,
        Self::PulseAudio,
        Self::Wayland,
        Self::Dbus,
        Self::Cgroup,
        Self::Network,
        Self::Pid,
        Self::Pipewire,
        Self::Session,
        Self::User,
        Self::Uts,
    ];

    /// Profile token of the socket.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X11 => "x11",
            Self::Alsa => "alsa",
            Self::Audio => "audio",
            Self::PulseAudio => "pulseaudio",
            Self::Wayland => "wayland",
            Self::Dbus => "dbus",
            Self::Cgroup => "cgroup",
            Self::Network => "network",
            Self::Pid => "pid",
            Self::Pipewire => "pipewire",
            Self::Session => "session",
            Self::User => "user",
            Self::Uts => "uts",
        }
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Socket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|sock| sock.as_str() == s)
            .ok_or_else(|| Error::InvalidSocket(s.to_owned()))
    }
}

/// Permissions of one bundle.
///
/// Grants are upserts: adding an entry whose key is already present
/// replaces it. File grants keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Perms {
    /// Isolation level `0..=3`, or [`UNSET_LEVEL`].
    #[serde(default = "unset_level")]
    level: i8,
    /// File grants.
    #[serde(rename = "filesystem", default)]
    files: Vec<FileGrant>,
    /// Device names without the `/dev/` prefix.
    #[serde(default)]
    devices: Vec<String>,
    /// Granted sockets.
    #[serde(default)]
    sockets: Vec<Socket>,
    /// Bind a persistent home instead of an empty tmpfs.
    #[serde(rename = "data_dir", default = "enabled")]
    pub persist_home: bool,
    /// Catalog aliases this record applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
}

/// Serde default for [`Perms::level`].
const fn unset_level() -> i8 {
    UNSET_LEVEL
}

/// Serde default for [`Perms::persist_home`].
const fn enabled() -> bool {
    true
}

impl Default for Perms {
    fn default() -> Self {
        Self {
            level: UNSET_LEVEL,
            files: Vec::new(),
            devices: Vec::new(),
            sockets: Vec::new(),
            persist_home: true,
            names: Vec::new(),
        }
    }
}

impl Perms {
    /// Reads the `[X-App Permissions]` group of a desktop entry.
    ///
    /// An unknown socket token is an error. A missing, non-numeric or
    /// out-of-range `Level` yields [`Error::UndeterminedLevel`] carrying
    /// the remaining grants with the level at [`UNSET_LEVEL`].
    pub fn from_entry(entry: &DesktopEntry) -> Result<Self> {
        let key = |k: &str| entry.get(PERMISSIONS_SECTION, k).unwrap_or_default();
        let mut perms = Self {
            persist_home: key("DataDir") != "false",
            ..Self::default()
        };
        perms.add_files(split_list(&key("Files")));
        perms.add_devices(split_list(&key("Devices")));
        perms.add_sockets(split_list(&key("Sockets")))?;

        let value = key("Level");
        match value.trim().parse::<i8>() {
            Ok(l) if (0..=3).contains(&l) => {
                perms.level = l;
                Ok(perms)
            }
            _ => Err(Error::UndeterminedLevel {
                value,
                perms: Box::new(perms),
            }),
        }
    }

    /// Validates a deserialized record and re-applies the upsert rules to
    /// its grants.
    pub(crate) fn normalized(self) -> Result<Self> {
        if !(0..=3).contains(&self.level) {
            return Err(Error::InvalidLevel(self.level.to_string()));
        }
        let mut perms = Self {
            level: self.level,
            persist_home: self.persist_home,
            names: self.names,
            ..Self::default()
        };
        perms.add_files(self.files.iter().map(ToString::to_string));
        perms.add_devices(&self.devices);
        for sock in self.sockets {
            perms.sockets.retain(|x| *x != sock);
            perms.sockets.push(sock);
        }
        Ok(perms)
    }

    /// Parses profile text and reads its permission group.
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_entry(&DesktopEntry::parse(text)?)
    }

    /// The isolation level, or [`UNSET_LEVEL`].
    pub fn level(&self) -> i8 {
        self.level
    }

    /// Returns `true` if the level is still [`UNSET_LEVEL`].
    pub fn is_unset(&self) -> bool {
        self.level == UNSET_LEVEL
    }

    /// Sets the isolation level.
    pub fn set_level(&mut self, level: i64) -> Result<()> {
        match i8::try_from(level) {
            Ok(l) if (0..=3).contains(&l) => {
                self.level = l;
                Ok(())
            }
            _ => Err(Error::InvalidLevel(level.to_string())),
        }
    }

    /// File grants in insertion order.
    pub fn files(&self) -> &[FileGrant] {
        &self.files
    }

    /// Device names without the `/dev/` prefix.
    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Granted sockets in insertion order.
    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    /// Returns `true` if `socket` is granted.
    pub fn has_socket(&self, socket: Socket) -> bool {
        self.sockets.contains(&socket)
    }

    /// Adds file grants, replacing any grant for the same path.
    pub fn add_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for grant in files.into_iter().filter_map(|f| FileGrant::parse(f.as_ref())) {
            self.files.retain(|g| g.path != grant.path);
            self.files.push(grant);
        }
    }

    /// Removes file grants by path, whatever mode they carry.
    pub fn remove_files<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for grant in files.into_iter().filter_map(|f| FileGrant::parse(f.as_ref())) {
            self.files.retain(|g| g.path != grant.path);
        }
    }

    /// Adds devices, stripping a leading `/dev/`.
    pub fn add_devices<I, S>(&mut self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for d in devices {
            if d.as_ref().trim().is_empty() {
                continue;
            }
            let dev = canonical_device(d.as_ref());
            self.devices.retain(|x| *x != dev);
            self.devices.push(dev);
        }
    }

    /// Removes devices whose stored name equals the given string.
    pub fn remove_devices<I, S>(&mut self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for d in devices {
            self.devices.retain(|x| x != d.as_ref());
        }
    }

    /// Adds sockets by token.
    ///
    /// Tokens are applied one at a time. The first unknown token aborts
    /// with [`Error::InvalidSocket`]; tokens before it stay applied.
    pub fn add_sockets<I, S>(&mut self, sockets: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for s in sockets {
            let sock: Socket = s.as_ref().parse()?;
            self.sockets.retain(|x| *x != sock);
            self.sockets.push(sock);
        }
        Ok(())
    }

    /// Removes sockets whose token equals the given string.
    pub fn remove_sockets<I, S>(&mut self, sockets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for s in sockets {
            self.sockets.retain(|x| x.as_str() != s.as_ref());
        }
    }
}

/// Strips a leading `/dev/` from a device name.
fn canonical_device(dev: &str) -> String {
    match dev.strip_prefix("/dev/") {
        Some(rest) if !rest.is_empty() => rest.to_owned(),
        _ => dev.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_grant_upserts_by_path() {
        let mut p = Perms::default();
        p.add_files(["/x:rw", "/y"]);
        p.add_files(["/x:ro"]);
        let files: Vec<_> = p.files().iter().map(ToString::to_string).collect();
        assert_eq!(files, ["/y:ro", "/x:ro"]);
    }

    #[test]
    fn file_removal_ignores_mode() {
        let mut p = Perms::default();
        p.add_files(["/x:ro", "~/notes/:rw"]);
        p.remove_files(["/x:rw", "~/notes"]);
        assert!(p.files().is_empty());
    }

    #[test]
    fn devices_are_canonical_and_deduplicated() {
        let mut p = Perms::default();
        p.add_devices(["/dev/dri", "dri", "input", "/dev/"]);
        assert_eq!(p.devices(), ["dri", "input", "/dev/"]);
        p.remove_devices(["/dev/dri"]);
        assert_eq!(p.devices().len(), 3);
        p.remove_devices(["dri"]);
        assert_eq!(p.devices(), ["input", "/dev/"]);
    }

    #[test]
    fn socket_batch_is_not_atomic() {
        let mut p = Perms::default();
        let err = p.add_sockets(["x11", "bogus", "wayland"]).unwrap_err();
        assert!(matches!(err, Error::InvalidSocket(ref s) if s == "bogus"));
        assert_eq!(p.sockets(), [Socket::X11]);
    }

    #[test]
    fn socket_add_and_remove() {
        let mut p = Perms::default();
        p.add_sockets(["network", "x11", "network"]).unwrap();
        assert_eq!(p.sockets(), [Socket::X11, Socket::Network]);
        p.remove_sockets(["x11", "pulseaudio"]);
        assert_eq!(p.sockets(), [Socket::Network]);
    }

    #[test]
    fn level_bounds() {
        let mut p = Perms::default();
        assert!(p.is_unset());
        p.set_level(2).unwrap();
        assert_eq!(p.level(), 2);
        assert!(matches!(p.set_level(4), Err(Error::InvalidLevel(_))));
        assert!(matches!(p.set_level(-1), Err(Error::InvalidLevel(_))));
        assert!(p.set_level(300).is_err());
        assert_eq!(p.level(), 2);
    }

    #[test]
    fn reads_permission_group() {
        let p = Perms::from_text(
            "[X-App Permissions]\nLevel=2\nFiles=xdg-download:rw;/opt/data\nDevices=/dev/dri\nSockets=x11;wayland;\nDataDir=false\n",
        )
        .unwrap();
        assert_eq!(p.level(), 2);
        assert_eq!(p.files()[0].path, "xdg-download");
        assert!(p.files()[0].writable());
        assert!(!p.files()[1].writable());
        assert_eq!(p.devices(), ["dri"]);
        assert_eq!(p.sockets(), [Socket::X11, Socket::Wayland]);
        assert!(!p.persist_home);
    }

    #[test]
    fn bad_level_is_undetermined() {
        for text in [
            "[X-App Permissions]\nLevel=7\n",
            "[X-App Permissions]\nLevel=high\n",
            "[Desktop Entry]\nName=NoPerms\n",
        ] {
            let err = Perms::from_text(text).unwrap_err();
            assert!(
                matches!(err, Error::UndeterminedLevel { ref perms, .. } if perms.is_unset()),
                "{text:?}: {err:?}"
            );
        }
    }

    #[test]
    fn undetermined_level_keeps_other_grants() {
        let err = Perms::from_text("[X-App Permissions]\nLevel=9\nSockets=x11\nFiles=/opt/data:rw\n")
            .unwrap_err();
        assert!(matches!(err, Error::UndeterminedLevel { ref value, .. } if value == "9"));
        let Error::UndeterminedLevel { perms: partial, .. } = err else {
            return;
        };
        assert_eq!(partial.level(), UNSET_LEVEL);
        assert_eq!(partial.sockets(), [Socket::X11]);
        assert_eq!(partial.files()[0].to_string(), "/opt/data:rw");

        let mut fixed = *partial;
        fixed.set_level(1).unwrap();
        assert!(!fixed.is_unset());
    }

    #[test]
    fn blank_grants_are_skipped() {
        let mut p = Perms::default();
        p.add_files(["", "  ", ":rw", "/opt/x"]);
        p.add_devices(["", "dri"]);
        let files: Vec<_> = p.files().iter().map(ToString::to_string).collect();
        assert_eq!(files, ["/opt/x:ro"]);
        assert_eq!(p.devices(), ["dri"]);
        assert!(FileGrant::parse(":ro").is_none());
        assert!(serde_json::from_str::<Perms>(r#"{"level":1,"filesystem":[""]}"#).is_err());
    }

    #[test]
    fn normalizing_applies_upserts_and_bounds() {
        let p: Perms = serde_json::from_str(
            r#"{"names":["n"],"level":2,"filesystem":["/a:rw","/a/"],"devices":["/dev/dri","dri"],"sockets":["x11","x11"]}"#,
        )
        .unwrap();
        let p = p.normalized().unwrap();
        let files: Vec<_> = p.files().iter().map(ToString::to_string).collect();
        assert_eq!(files, ["/a:ro"]);
        assert_eq!(p.devices(), ["dri"]);
        assert_eq!(p.sockets(), [Socket::X11]);
        assert_eq!(p.names, ["n"]);

        for json in [r#"{"level":7}"#, r#"{"names":["x"]}"#] {
            let p: Perms = serde_json::from_str(json).unwrap();
            assert!(matches!(p.normalized(), Err(Error::InvalidLevel(_))));
        }
    }

    #[test]
    fn unknown_socket_in_profile_is_rejected() {
        let err = Perms::from_text("[X-App Permissions]\nLevel=1\nSockets=x11;carrier-pigeon\n")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSocket(_)));
    }

    #[test]
    fn catalog_json_shape() {
        let p: Perms = serde_json::from_str(
            r#"{"names":["foo","foo-beta"],"level":3,"filesystem":["xdg-music:ro"],"sockets":["pulseaudio"],"data_dir":false}"#,
        )
        .unwrap();
        assert_eq!(p.level(), 3);
        assert_eq!(p.files()[0].to_string(), "xdg-music:ro");
        assert_eq!(p.sockets(), [Socket::PulseAudio]);
        assert!(p.devices().is_empty());
        assert!(!p.persist_home);
        assert_eq!(p.names, ["foo", "foo-beta"]);
    }
}
