//! The bundle handle: identity, metadata and mount lifecycle.

use std::fs::{self, DirBuilder, File};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::desktop::{DesktopEntry, split_list};
use crate::format::{self, BundleType};
use crate::payload::{self, Payload};
use crate::{Error, Perms, Result, mount};

/// Version reported when the desktop entry has none.
const DEFAULT_VERSION: &str = "1.0";
/// Banner line preceding the update information in shImg resources.
const UPDATE_INFO_BANNER: &str = " APPIMAGE [update_info]";
/// Directory under the runtime dir holding generated mount state.
const RUNTIME_SUBDIR: &str = "chains";

/// Lifecycle of a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Opened and classified, nothing mounted.
    Open,
    /// Payload mounted at `mount_dir`.
    Mounted {
        /// Mount point.
        mount_dir: PathBuf,
        /// Whether chains created `mount_dir` (and removes it on destroy).
        generated: bool,
        /// Generated temp directory to remove on destroy.
        owned_temp: Option<PathBuf>,
    },
    /// Unmounted and released; every operation fails.
    Destroyed,
}

/// An opened bundle file.
///
/// Identity is derived from the bundle's location, not its content, so the
/// same file launched twice shares mount and cache directories.
#[derive(Debug)]
pub struct Bundle {
    /// Absolute path of the bundle file.
    path: PathBuf,
    /// Location-derived identifier.
    hash: String,
    /// Container layout.
    kind: BundleType,
    /// Byte offset of the SquashFS payload.
    offset: u64,
    /// Embedded desktop entry.
    desktop: DesktopEntry,
    /// `Name` from the desktop entry.
    name: String,
    /// `X-AppImage-Version`, or [`DEFAULT_VERSION`].
    version: String,
    /// Update information, empty when absent.
    update_info: String,
    /// Host directory substituted for `/` in system binds.
    root_dir: PathBuf,
    /// Host directory bound as the sandbox home.
    data_dir: PathBuf,
    /// Host directory bound as the sandbox `/tmp`.
    temp_dir: PathBuf,
    /// `true` once [`set_temp_dir`](Self::set_temp_dir) was called.
    temp_dir_set: bool,
    /// Base directory for generated mount state.
    runtime_dir: PathBuf,
    /// Lifecycle state.
    state: State,
}

impl Bundle {
    /// Opens and classifies a bundle, reading its embedded metadata.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let path = std::path::absolute(path)?;
        let hash = location_hash(&path);

        let mut file = File::open(&path)?;
        let kind = format::detect(&mut file)?;
        let offset = format::payload_offset(&mut file, kind)?;
        tracing::debug!(path = %path.display(), %kind, offset, "classified bundle");
        if kind == BundleType::Iso {
            return Err(Error::UnsupportedContainer(
                "ISO 9660 payloads are not supported".into(),
            ));
        }

        let desktop = DesktopEntry::parse(&Payload::open(&path, offset)?.desktop_entry()?)?;
        let name = desktop
            .entry("Name")
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback_name(&path));
        let version = desktop
            .entry("X-AppImage-Version")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VERSION.to_owned());

        let update_info = match read_update_info(&path, &mut file, kind) {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(error = %e, "no update information");
                String::new()
            }
        };

        let mut data_dir = path.clone().into_os_string();
        data_dir.push(".home");

        Ok(Self {
            temp_dir: std::env::temp_dir().join(format!("appimage-{hash}")),
            runtime_dir: dirs::runtime_dir().unwrap_or_else(std::env::temp_dir),
            data_dir: PathBuf::from(data_dir),
            root_dir: PathBuf::from("/"),
            temp_dir_set: false,
            state: State::Open,
            path,
            hash,
            kind,
            offset,
            desktop,
            name,
            version,
            update_info,
        })
    }

    /// Absolute path of the bundle file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable identifier derived from the bundle location.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Container layout.
    pub fn kind(&self) -> BundleType {
        self.kind
    }

    /// Byte offset of the embedded filesystem image.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Application name from the desktop entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application version, `"1.0"` when unspecified.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Update information string, empty when absent.
    pub fn update_info(&self) -> &str {
        &self.update_info
    }

    /// The embedded desktop entry.
    pub fn desktop(&self) -> &DesktopEntry {
        &self.desktop
    }

    /// Permissions declared by the bundle itself.
    pub fn declared_perms(&self) -> Result<Perms> {
        Perms::from_entry(&self.desktop)
    }

    /// Host directory used as the system root.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Host directory bound as the sandbox home.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Host directory bound as the sandbox `/tmp`.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Sets the host directory system paths are taken from.
    pub fn set_root_dir(&mut self, dir: impl Into<PathBuf>) {
        self.root_dir = dir.into();
    }

    /// Sets the host directory bound as the sandbox home.
    pub fn set_data_dir(&mut self, dir: impl Into<PathBuf>) {
        self.data_dir = dir.into();
    }

    /// Sets the host directory bound as the sandbox `/tmp`.
    ///
    /// An explicit temp directory is never removed by [`destroy`](Self::destroy).
    pub fn set_temp_dir(&mut self, dir: impl Into<PathBuf>) {
        self.temp_dir = dir.into();
        self.temp_dir_set = true;
    }

    /// Sets the base directory for generated mount state.
    pub fn set_runtime_dir(&mut self, dir: impl Into<PathBuf>) {
        self.runtime_dir = dir.into();
    }

    /// Current mount point, if mounted.
    pub fn mount_dir(&self) -> Option<&Path> {
        match &self.state {
            State::Mounted { mount_dir, .. } => Some(mount_dir),
            State::Open | State::Destroyed => None,
        }
    }

    /// Returns `true` while the payload is mounted.
    pub fn is_mounted(&self) -> bool {
        matches!(self.state, State::Mounted { .. })
    }

    /// Mounts the payload and returns the mount point.
    ///
    /// With `target`, the directory must exist and an image already mounted
    /// there is reused. Without one, the mount directory is created under
    /// `$XDG_RUNTIME_DIR/chains/mount`, keyed by [`hash`](Self::hash), and
    /// an existing mount of the same bundle is reused. Either way the temp
    /// directory exists afterwards: `chains/tmp/<hash>` unless one was set
    /// explicitly.
    pub fn mount(&mut self, target: Option<&Path>) -> Result<&Path> {
        match &self.state {
            State::Destroyed => return Err(Error::Destroyed),
            State::Mounted { mount_dir, .. } => return Err(Error::AlreadyMounted(mount_dir.clone())),
            State::Open => {}
        }

        let base = self.runtime_dir.join(RUNTIME_SUBDIR);
        let (mount_dir, generated) = match target {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(Error::NoMountPoint(dir.to_path_buf()));
                }
                (dir.to_path_buf(), false)
            }
            None => (make_dir(&base.join("mount").join(&self.hash))?, true),
        };

        let temp = if self.temp_dir_set {
            make_dir(&self.temp_dir).map(|_| None)
        } else {
            make_dir(&base.join("tmp").join(&self.hash)).map(Some)
        };
        let owned_temp = match temp {
            Ok(owned) => owned,
            Err(e) => {
                discard(&mount_dir, generated, None);
                return Err(e);
            }
        };

        if mount::is_mount_point(&mount_dir) {
            tracing::debug!(mount = %mount_dir.display(), "reusing existing mount");
        } else if let Err(e) = mount::mount(&self.path, &mount_dir, self.offset) {
            discard(&mount_dir, generated, owned_temp.as_deref());
            return Err(e);
        }

        if let Some(tmp) = &owned_temp {
            self.temp_dir.clone_from(tmp);
        }
        self.state = State::Mounted {
            mount_dir,
            generated,
            owned_temp,
        };
        self.mount_dir().ok_or(Error::NotMounted)
    }

    /// Unmounts the payload, removes generated directories and invalidates
    /// the handle.
    pub fn destroy(&mut self) -> Result<()> {
        let (mount_dir, generated, owned_temp) = match &self.state {
            State::Destroyed => return Err(Error::Destroyed),
            State::Open => return Err(Error::NotMounted),
            State::Mounted {
                mount_dir,
                generated,
                owned_temp,
            } => (mount_dir.clone(), *generated, owned_temp.clone()),
        };

        mount::unmount(&mount_dir)?;
        self.state = State::Destroyed;

        if let Some(tmp) = owned_temp {
            remove_tree(&tmp)?;
        }
        if generated && let Err(e) = fs::remove_dir(&mount_dir) {
            tracing::debug!(mount = %mount_dir.display(), error = %e, "mount dir left behind");
        }
        Ok(())
    }

    /// Opens the payload for reading.
    fn payload(&self) -> Result<Payload> {
        if self.state == State::Destroyed {
            return Err(Error::Destroyed);
        }
        Payload::open(&self.path, self.offset)
    }

    /// Reads a file from the payload, following in-image symlinks.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.payload()?.read(path)
    }

    /// Reads a resource from the archive appended to shImg bundles.
    pub fn resource(&self, name: &str) -> Result<Vec<u8>> {
        payload::resource(&self.path, name)
    }

    /// Returns the application icon named by the desktop entry's `Icon` key,
    /// falling back to `.DirIcon`.
    pub fn icon(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if let Some(icon) = self.desktop.entry("Icon").filter(|i| !i.is_empty()) {
            for ext in ["png", "svg"] {
                let candidate = format!("{icon}.{ext}");
                if payload.exists(&candidate) {
                    return payload.read(&candidate);
                }
            }
        }
        payload.read(".DirIcon")
    }

    /// Returns a thumbnail-sized icon.
    ///
    /// Formats with a dedicated icon resource use it; everything else (and
    /// a missing resource) falls back to `.DirIcon`.
    pub fn thumbnail(&self) -> Result<Vec<u8>> {
        if self.kind.has_dedicated_icon() {
            match self.resource("icon/256.png") {
                Ok(data) => return Ok(data),
                Err(e) => tracing::debug!(error = %e, "no dedicated icon"),
            }
        }
        self.read_file(".DirIcon")
    }

    /// Architectures the bundle runs on.
    ///
    /// Uses `X-AppImage-Architecture` when set, else the ELF machine field.
    /// Empty when neither is available.
    pub fn architectures(&self) -> Result<Vec<String>> {
        if let Some(arch) = self.desktop.entry("X-AppImage-Architecture") {
            let list = split_list(&arch);
            if !list.is_empty() {
                return Ok(list);
            }
        }
        if !self.kind.is_elf() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path)?;
        Ok(format::elf_architecture(&mut file)?
            .map(|a| vec![a.to_owned()])
            .unwrap_or_default())
    }
}

impl Drop for Bundle {
    fn drop(&mut self) {
        if let State::Mounted { generated: true, .. } = self.state
            && let Err(e) = self.destroy()
        {
            tracing::warn!(path = %self.path.display(), error = %e, "cleanup on drop failed");
        }
    }
}

/// Identifier for a bundle location: truncated SHA-256 of its `file://` URI.
pub fn location_hash(path: &Path) -> String {
    let uri = format!("file://{}", path.display());
    let digest = Sha256::digest(uri.as_bytes());
    let mut hex = hex::encode(digest.as_slice());
    hex.truncate(32);
    hex
}

/// Name used when the desktop entry has none: the file stem.
fn fallback_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads update information from `.upd_info` or the shImg resource archive.
fn read_update_info(path: &Path, file: &mut File, kind: BundleType) -> Result<String> {
    if kind.is_elf() {
        return Ok(format::elf_update_info(file)?.unwrap_or_default());
    }
    let data = payload::resource(path, "update_info")?;
    let text = String::from_utf8_lossy(&data);
    Ok(text
        .lines()
        .find(|l| !l.contains(UPDATE_INFO_BANNER))
        .unwrap_or_default()
        .to_owned())
}

/// Creates `dir` (and parents) with mode `0744`.
fn make_dir(dir: &Path) -> Result<PathBuf> {
    DirBuilder::new().recursive(true).mode(0o744).create(dir)?;
    Ok(dir.to_path_buf())
}

/// Removes directories created by a mount attempt that failed.
fn discard(mount_dir: &Path, generated: bool, owned_temp: Option<&Path>) {
    if generated && let Err(e) = fs::remove_dir(mount_dir) {
        tracing::warn!(mount = %mount_dir.display(), error = %e, "failed to remove mount dir");
    }
    if let Some(tmp) = owned_temp
        && let Err(e) = remove_tree(tmp)
    {
        tracing::warn!(tmp = %tmp.display(), error = %e, "failed to remove temp dir");
    }
}

/// Removes a directory tree, tolerating its absence.
fn remove_tree(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::payload::fixture::{Entry, elf_runtime, write_bundle};
    use crate::policy::{self, HostContext};
    use crate::xdg::HostDirs;

    const DESKTOP: &[u8] =
        b"[Desktop Entry]\nName=Demo\nIcon=demo\n\n[X-App Permissions]\nLevel=2\nSockets=x11;\n";

    /// Writes an ELF type 2 bundle holding `entries`.
    fn elf_bundle(dir: &Path, entries: &[Entry<'_>]) -> PathBuf {
        let path = dir.join("Demo.AppImage");
        write_bundle(&path, &elf_runtime(4096), entries);
        path
    }

    /// Writes a shImg bundle holding `entries`, with `resources` appended as a zip.
    fn shell_bundle(dir: &Path, entries: &[Entry<'_>], resources: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("Demo.shImg");
        let head = |n: usize| format!("#!/bin/sh\n#.shImg.#\nsfs_offset={n:08}\nexit 1\n");
        let len = head(0).len();
        write_bundle(&path, head(len).as_bytes(), entries);

        let mut zipped = std::io::Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut zipped);
            for (name, data) in resources {
                w.start_file(format!(".APPIMAGE_RESOURCES/{name}"), SimpleFileOptions::default())
                    .unwrap();
                w.write_all(data).unwrap();
            }
            w.finish().unwrap();
        }
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(zipped.get_ref()).unwrap();
        path
    }

    #[test]
    fn opens_elf_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let path = elf_bundle(
            tmp.path(),
            &[
                Entry::File("demo.desktop", DESKTOP),
                Entry::File("AppRun", b"#!/bin/sh\n"),
            ],
        );

        let b = Bundle::open(&path).unwrap();
        assert_eq!(b.kind(), BundleType::SquashFs);
        assert_eq!(b.offset(), 4096);
        assert_eq!(b.name(), "Demo");
        assert_eq!(b.version(), DEFAULT_VERSION);
        assert_eq!(b.update_info(), "");
        assert_eq!(b.hash(), location_hash(&path));
        assert_eq!(b.data_dir(), tmp.path().join("Demo.AppImage.home"));
        assert!(!b.is_mounted());
        assert_eq!(b.read_file("AppRun").unwrap(), b"#!/bin/sh\n");

        let perms = b.declared_perms().unwrap();
        assert_eq!(perms.level(), 2);
        assert!(perms.has_socket(crate::Socket::X11));
    }

    #[test]
    fn bundle_without_desktop_entry_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = elf_bundle(tmp.path(), &[Entry::File("AppRun", b"")]);
        assert!(matches!(Bundle::open(&path), Err(Error::Payload(_))));
    }

    #[test]
    fn icon_prefers_named_png_then_svg_then_diricon() {
        let tmp = tempfile::tempdir().unwrap();
        let both = tmp.path().join("both");
        let svg_only = tmp.path().join("svg");
        let neither = tmp.path().join("none");
        for d in [&both, &svg_only, &neither] {
            fs::create_dir(d).unwrap();
        }

        let b = Bundle::open(elf_bundle(
            &both,
            &[
                Entry::File("demo.desktop", DESKTOP),
                Entry::File("demo.svg", b"SVG"),
                Entry::File("demo.png", b"PNG"),
                Entry::Link(".DirIcon", "demo.svg"),
            ],
        ))
        .unwrap();
        assert_eq!(b.icon().unwrap(), b"PNG");

        let b = Bundle::open(elf_bundle(
            &svg_only,
            &[
                Entry::File("demo.desktop", DESKTOP),
                Entry::File("demo.svg", b"SVG"),
            ],
        ))
        .unwrap();
        assert_eq!(b.icon().unwrap(), b"SVG");

        let b = Bundle::open(elf_bundle(
            &neither,
            &[
                Entry::File("demo.desktop", DESKTOP),
                Entry::File("fallback.png", b"DIR"),
                Entry::Link(".DirIcon", "fallback.png"),
            ],
        ))
        .unwrap();
        assert_eq!(b.icon().unwrap(), b"DIR");
        assert_eq!(b.thumbnail().unwrap(), b"DIR");
    }

    #[test]
    fn shell_bundle_thumbnail_prefers_resource() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [
            Entry::File("demo.desktop", DESKTOP),
            Entry::File(".DirIcon", b"DIR"),
        ];

        let with = tmp.path().join("with");
        fs::create_dir(&with).unwrap();
        let path = shell_bundle(
            &with,
            &entries,
            &[
                ("icon/256.png", b"THUMB"),
                ("update_info", b" APPIMAGE [update_info]\nzsync|https://example.org/d.zsync\n"),
            ],
        );
        let b = Bundle::open(&path).unwrap();
        assert_eq!(b.kind(), BundleType::ShellSquashFs);
        assert_eq!(b.update_info(), "zsync|https://example.org/d.zsync");
        assert_eq!(b.thumbnail().unwrap(), b"THUMB");
        assert_eq!(b.icon().unwrap(), b"DIR");
        assert!(b.architectures().unwrap().is_empty());

        let without = tmp.path().join("without");
        fs::create_dir(&without).unwrap();
        let b = Bundle::open(shell_bundle(&without, &entries, &[])).unwrap();
        assert_eq!(b.update_info(), "");
        assert_eq!(b.thumbnail().unwrap(), b"DIR");
    }

    #[test]
    fn architectures_from_entry_or_elf_machine() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        let declared = tmp.path().join("declared");
        fs::create_dir(&plain).unwrap();
        fs::create_dir(&declared).unwrap();

        let b = Bundle::open(elf_bundle(&plain, &[Entry::File("demo.desktop", DESKTOP)])).unwrap();
        assert_eq!(b.architectures().unwrap(), ["x86_64"]);

        let b = Bundle::open(elf_bundle(
            &declared,
            &[Entry::File(
                "demo.desktop",
                b"[Desktop Entry]\nName=Demo\nX-AppImage-Architecture=aarch64;armhf;\n",
            )],
        ))
        .unwrap();
        assert_eq!(b.architectures().unwrap(), ["aarch64", "armhf"]);
    }

    #[test]
    fn explicit_target_still_gets_a_temp_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        b.mount(Some(Path::new("/"))).unwrap();

        let expected = tmp.path().join("run/chains/tmp").join(b.hash());
        assert_eq!(b.temp_dir(), expected);
        assert!(expected.is_dir());

        let mut perms = Perms::default();
        perms.set_level(3).unwrap();
        let host = HostContext::new(HostDirs::from_home(tmp.path(), 1000), 1000);
        let args = policy::compile(&b, &perms, &host, &[]).unwrap().args();
        assert_eq!(args[..3], ["--bind", expected.to_str().unwrap(), "/tmp"]);

        // Not generated, so dropping the handle leaves `/` alone.
        b.state = State::Open;
    }

    #[test]
    fn explicit_temp_dir_is_created_but_not_owned() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        b.set_temp_dir(tmp.path().join("mine"));
        b.mount(Some(Path::new("/"))).unwrap();
        assert!(tmp.path().join("mine").is_dir());
        assert!(matches!(b.state, State::Mounted { owned_temp: None, .. }));
        b.state = State::Open;
    }

    #[test]
    fn failed_mount_leaves_no_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        let before = b.temp_dir().to_path_buf();

        // The bundle file does not exist, so the mount helper cannot succeed.
        assert!(b.mount(None).is_err());
        assert!(!b.is_mounted());
        assert_eq!(b.temp_dir(), before);
        let base = tmp.path().join("run/chains");
        assert!(!base.join("mount").join(b.hash()).exists());
        assert!(!base.join("tmp").join(b.hash()).exists());
    }

    #[test]
    fn hash_tracks_location() {
        let a = location_hash(Path::new("/opt/apps/Foo.AppImage"));
        let b = location_hash(Path::new("/opt/apps/Foo.AppImage"));
        let c = location_hash(Path::new("/opt/apps/Bar.AppImage"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Bundle::open("/nonexistent/Thing.AppImage").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn non_bundle_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        fs::write(&path, "just some text\n").unwrap();
        assert!(matches!(
            Bundle::open(&path),
            Err(Error::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn shell_bundle_without_offset_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app.shImg");
        fs::write(&path, "#!/bin/sh\n#.shImg.#\necho no offset here\n").unwrap();
        assert!(matches!(
            Bundle::open(&path),
            Err(Error::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn bad_payload_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("app.shImg");
        fs::write(&path, "#!/bin/sh\n#.shImg.#\nsfs_offset=20000\n").unwrap();
        assert!(Bundle::open(&path).is_err());
    }

    fn unmounted(dir: &Path) -> Bundle {
        let path = dir.join("Demo.AppImage");
        Bundle {
            hash: location_hash(&path),
            kind: BundleType::SquashFs,
            offset: 0,
            desktop: DesktopEntry::parse("[Desktop Entry]\nName=Demo\n").unwrap(),
            name: "Demo".into(),
            version: DEFAULT_VERSION.into(),
            update_info: String::new(),
            root_dir: PathBuf::from("/"),
            data_dir: dir.join("Demo.AppImage.home"),
            temp_dir: dir.join("tmp"),
            temp_dir_set: false,
            runtime_dir: dir.join("run"),
            state: State::Open,
            path,
        }
    }

    #[test]
    fn destroy_requires_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        assert!(matches!(b.destroy(), Err(Error::NotMounted)));
        assert!(!b.is_mounted());
        assert_eq!(b.mount_dir(), None);
    }

    #[test]
    fn explicit_target_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        let missing = tmp.path().join("nope");
        assert!(matches!(b.mount(Some(&missing)), Err(Error::NoMountPoint(_))));
        assert!(!b.is_mounted());
    }

    #[test]
    fn destroyed_handle_rejects_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        b.state = State::Destroyed;
        assert!(matches!(b.mount(None), Err(Error::Destroyed)));
        assert!(matches!(b.destroy(), Err(Error::Destroyed)));
        assert!(matches!(b.read_file(".DirIcon"), Err(Error::Destroyed)));
    }

    #[test]
    fn mounting_twice_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        b.state = State::Mounted {
            mount_dir: tmp.path().join("mnt"),
            generated: false,
            owned_temp: None,
        };
        assert!(matches!(b.mount(None), Err(Error::AlreadyMounted(_))));
        assert_eq!(b.mount_dir(), Some(tmp.path().join("mnt").as_path()));
        b.state = State::Open;
    }

    #[test]
    fn explicit_temp_dir_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = unmounted(tmp.path());
        b.set_temp_dir(tmp.path().join("mine"));
        assert_eq!(b.temp_dir(), tmp.path().join("mine"));
        assert!(b.temp_dir_set);
    }

    #[test]
    fn declared_perms_need_a_level() {
        let tmp = tempfile::tempdir().unwrap();
        let b = unmounted(tmp.path());
        let err = b.declared_perms().unwrap_err();
        assert!(matches!(err, Error::UndeterminedLevel { ref perms, .. } if perms.is_unset()));
    }

    #[test]
    fn fallback_name_is_file_stem() {
        assert_eq!(fallback_name(Path::new("/a/Krita-5.2.AppImage")), "Krita-5.2");
    }
}
