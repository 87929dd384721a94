//! Compilation of a permission model into a bubblewrap invocation.
//!
//! The compiled directive list is ordered; when two binds target the same
//! path the later one wins. Layout of a sandboxed policy:
//!
//! ```text
//! temp/mount binds → home → baseline → level tier → files → sockets → devices → -- AppRun args…
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::xdg::{self, HostDirs};
use crate::{Bundle, Error, Perms, Result, Socket};

/// Host paths exposed read-only at every level, relative to the root dir.
const BASE_SYSTEM_DIRS: [&str; 11] = [
    "opt", "bin", "sbin", "lib", "lib32", "lib64", "usr/bin", "usr/sbin", "usr/lib", "usr/lib32",
    "usr/lib64",
];

/// Level-2 allow-list of system paths, relative to the root dir.
const LEVEL2_SYSTEM_PATHS: [&str; 15] = [
    "etc/fonts",
    "etc/ld.so.cache",
    "etc/mime.types",
    "etc/xdg",
    "usr/share/fontconfig",
    "usr/share/fonts",
    "usr/share/icons",
    "usr/share/themes",
    "usr/share/applications",
    "usr/share/mime",
    "usr/share/libdrm",
    "usr/share/vulkan",
    "usr/share/glvnd",
    "usr/share/glib-2.0",
    "usr/share/terminfo",
];

/// User data directories exposed at levels 1 and 2.
const USER_DATA_DIRS: [&str; 3] = ["fonts", "themes", "icons"];

/// User config entries exposed at levels 1 and 2.
const USER_CONFIG_DIRS: [&str; 8] = [
    "fontconfig",
    "gtk-3.0",
    "gtk-4.0",
    "qt5ct",
    "qt6ct",
    "Kvantum",
    "kdeglobals",
    "lxde/lxde.conf",
];

/// Certificate and resolver files shared with the network socket.
const NETWORK_FILES: [&str; 5] = [
    "etc/ca-certificates",
    "etc/resolv.conf",
    "etc/ssl",
    "etc/pki",
    "usr/share/ca-certificates",
];

/// Flavour of a bind directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BindKind {
    /// `--bind`
    Bind,
    /// `--bind-try`
    BindTry,
    /// `--ro-bind`
    RoBind,
    /// `--ro-bind-try`
    RoBindTry,
    /// `--dev-bind`
    DevBind,
    /// `--dev-bind-try`
    DevBindTry,
}

impl BindKind {
    /// Command-line flag.
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Bind => "--bind",
            Self::BindTry => "--bind-try",
            Self::RoBind => "--ro-bind",
            Self::RoBindTry => "--ro-bind-try",
            Self::DevBind => "--dev-bind",
            Self::DevBindTry => "--dev-bind-try",
        }
    }
}

/// A namespace the sandbox may detach from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Namespace {
    /// Cgroup namespace (best effort).
    Cgroup,
    /// IPC namespace.
    Ipc,
    /// Network namespace.
    Net,
    /// PID namespace.
    Pid,
    /// User namespace (best effort).
    User,
    /// UTS namespace.
    Uts,
}

impl Namespace {
    /// Command-line flag.
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Cgroup => "--unshare-cgroup-try",
            Self::Ipc => "--unshare-ipc",
            Self::Net => "--unshare-net",
            Self::Pid => "--unshare-pid",
            Self::User => "--unshare-user-try",
            Self::Uts => "--unshare-uts",
        }
    }
}

/// One isolation instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Directive {
    /// Set an environment variable inside the sandbox.
    SetEnv {
        /// Variable name.
        key: String,
        /// Value.
        value: String,
    },
    /// Bind a host path into the sandbox.
    Bind {
        /// Bind flavour.
        kind: BindKind,
        /// Host path.
        src: String,
        /// Sandbox path.
        dest: String,
    },
    /// Create a directory, optionally with explicit permissions.
    Dir {
        /// Sandbox path.
        path: String,
        /// Octal mode applied through `--perms`.
        mode: Option<u32>,
    },
    /// Mount an empty tmpfs.
    Tmpfs(String),
    /// Mount a fresh devtmpfs.
    Dev(String),
    /// Mount a fresh procfs.
    Proc(String),
    /// Kill the sandbox when chains exits.
    DieWithParent,
    /// Keep the host network namespace.
    ShareNet,
    /// Detach a namespace.
    Unshare(Namespace),
    /// Start a new terminal session.
    NewSession,
    /// Program to run inside the sandbox; always last.
    Exec {
        /// Sandbox path of the entry point.
        program: String,
        /// Arguments passed through.
        args: Vec<String>,
    },
}

impl Directive {
    /// Shorthand for a [`Directive::SetEnv`].
    fn env(key: &str, value: impl fmt::Display) -> Self {
        Self::SetEnv {
            key: key.to_owned(),
            value: value.to_string(),
        }
    }

    /// Shorthand for a [`Directive::Bind`].
    fn bind(kind: BindKind, src: impl fmt::Display, dest: impl fmt::Display) -> Self {
        Self::Bind {
            kind,
            src: src.to_string(),
            dest: dest.to_string(),
        }
    }

    /// Appends the command-line form of this directive to `out`.
    pub fn push_args(&self, out: &mut Vec<String>) {
        match self {
            Self::SetEnv { key, value } => {
                out.extend(["--setenv".into(), key.clone(), value.clone()]);
            }
            Self::Bind { kind, src, dest } => {
                out.extend([kind.flag().into(), src.clone(), dest.clone()]);
            }
            Self::Dir { path, mode } => {
                if let Some(mode) = mode {
                    out.extend(["--perms".into(), format!("{mode:04o}")]);
                }
                out.extend(["--dir".into(), path.clone()]);
            }
            Self::Tmpfs(p) => out.extend(["--tmpfs".into(), p.clone()]),
            Self::Dev(p) => out.extend(["--dev".into(), p.clone()]),
            Self::Proc(p) => out.extend(["--proc".into(), p.clone()]),
            Self::DieWithParent => out.push("--die-with-parent".into()),
            Self::ShareNet => out.push("--share-net".into()),
            Self::Unshare(ns) => out.push(ns.flag().into()),
            Self::NewSession => out.push("--new-session".into()),
            Self::Exec { program, args } => {
                out.extend(["--".into(), program.clone()]);
                out.extend(args.iter().cloned());
            }
        }
    }
}

/// Result of compiling a permission model.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Policy {
    /// Run inside bubblewrap with these directives.
    Sandboxed(Vec<Directive>),
    /// Level 0: run the entry point directly with these arguments.
    Passthrough(Vec<String>),
}

impl Policy {
    /// Renders the argument vector (bwrap arguments, or the raw arguments
    /// for a passthrough policy).
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Sandboxed(directives) => {
                let mut out = Vec::new();
                for d in directives {
                    d.push_args(&mut out);
                }
                out
            }
            Self::Passthrough(args) => args.clone(),
        }
    }

    /// Directives of a sandboxed policy; empty for a passthrough.
    pub fn directives(&self) -> &[Directive] {
        match self {
            Self::Sandboxed(d) => d,
            Self::Passthrough(_) => &[],
        }
    }
}

/// Session context of the invoking user.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HostContext {
    /// Resolved user directories.
    pub dirs: HostDirs,
    /// Real user id.
    pub uid: u32,
    /// `$WAYLAND_DISPLAY`; `Some` means a compositor is running.
    pub wayland_display: Option<String>,
    /// `$DISPLAY`.
    pub display: Option<String>,
    /// `$XAUTHORITY`.
    pub xauthority: Option<PathBuf>,
    /// `$TMPDIR`, default `/tmp`.
    pub tmpdir: PathBuf,
}

impl HostContext {
    /// Captures the context from the process environment.
    pub fn detect() -> Result<Self> {
        let mut host = Self::new(HostDirs::detect()?, nix::unistd::getuid().as_raw());
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        host.wayland_display = var("WAYLAND_DISPLAY");
        host.display = var("DISPLAY");
        host.xauthority = var("XAUTHORITY").map(PathBuf::from);
        if let Some(tmp) = var("TMPDIR") {
            host.tmpdir = PathBuf::from(tmp);
        }
        Ok(host)
    }

    /// A context with no display server and `/tmp` as `$TMPDIR`.
    pub fn new(dirs: HostDirs, uid: u32) -> Self {
        Self {
            dirs,
            uid,
            wayland_display: None,
            display: None,
            xauthority: None,
            tmpdir: PathBuf::from("/tmp"),
        }
    }

    /// `/run/user/<uid>`, the runtime directory as seen from inside.
    fn sandbox_runtime(&self) -> String {
        format!("/run/user/{}", self.uid)
    }

    /// X display number from `$DISPLAY` (`":1.0"` → `"1"`).
    fn display_number(&self) -> Option<&str> {
        let display = self.display.as_deref()?;
        let after = display.rsplit_once(':').map_or(display, |(_, n)| n);
        let number = after.split('.').next().unwrap_or(after);
        (!number.is_empty()).then_some(number)
    }
}

/// What the compiler needs to know about a mounted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Target {
    /// Bundle file.
    pub path: PathBuf,
    /// Location hash.
    pub hash: String,
    /// Host root for system binds.
    pub root_dir: PathBuf,
    /// Persistent home.
    pub data_dir: PathBuf,
    /// Host `/tmp` replacement.
    pub temp_dir: PathBuf,
    /// Payload mount point.
    pub mount_dir: PathBuf,
}

impl Target {
    /// Snapshot of a mounted bundle.
    pub fn of(bundle: &Bundle) -> Result<Self> {
        let mount_dir = bundle.mount_dir().ok_or(Error::NotMounted)?;
        Ok(Self {
            path: bundle.path().to_path_buf(),
            hash: bundle.hash().to_owned(),
            root_dir: bundle.root_dir().to_path_buf(),
            data_dir: bundle.data_dir().to_path_buf(),
            temp_dir: bundle.temp_dir().to_path_buf(),
            mount_dir: mount_dir.to_path_buf(),
        })
    }

    /// Sandbox path of the mounted payload.
    pub fn app_dir(&self) -> String {
        format!("/tmp/.mount_{}", self.hash)
    }

    /// File name of the bundle.
    fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Compiles `perms` for a mounted `bundle`.
///
/// Fails with [`Error::NotMounted`] before looking at the level.
pub fn compile(bundle: &Bundle, perms: &Perms, host: &HostContext, args: &[String]) -> Result<Policy> {
    compile_target(&Target::of(bundle)?, perms, host, args)
}

/// Compiles `perms` against an explicit target.
pub fn compile_target(
    target: &Target,
    perms: &Perms,
    host: &HostContext,
    args: &[String],
) -> Result<Policy> {
    match perms.level() {
        0 => return Ok(Policy::Passthrough(args.to_vec())),
        1..=3 => {}
        l => return Err(Error::InvalidLevel(l.to_string())),
    }

    let c = Compiler {
        target,
        perms,
        host,
    };
    let home = host.dirs.home.display().to_string();

    let mut out = vec![
        Directive::bind(BindKind::Bind, target.temp_dir.display(), "/tmp"),
        Directive::bind(BindKind::Bind, target.mount_dir.display(), target.app_dir()),
        if perms.persist_home {
            Directive::bind(BindKind::Bind, target.data_dir.display(), &home)
        } else {
            Directive::Tmpfs(home)
        },
    ];
    c.baseline(&mut out);
    c.tier(&mut out);
    c.files(&mut out);
    c.sockets(&mut out);
    c.devices(&mut out);
    out.push(Directive::Exec {
        program: format!("{}/AppRun", target.app_dir()),
        args: args.to_vec(),
    });

    tracing::debug!(level = perms.level(), directives = out.len(), "compiled policy");
    Ok(Policy::Sandboxed(out))
}

/// Borrowed inputs of one compilation.
struct Compiler<'a> {
    /// Bundle being sandboxed.
    target: &'a Target,
    /// Permissions to grant.
    perms: &'a Perms,
    /// Host session.
    host: &'a HostContext,
}

impl Compiler<'_> {
    /// Host location of a system path under the root dir, symlinks
    /// resolved; the literal `/`-prefixed path when resolution fails.
    fn resolve(&self, rel: &str) -> String {
        let rel = rel.trim_start_matches('/');
        match std::fs::canonicalize(self.target.root_dir.join(rel)) {
            Ok(p) => p.display().to_string(),
            Err(_) => format!("/{rel}"),
        }
    }

    /// Read-only best-effort bind of a system path onto itself.
    fn system(&self, rel: &str) -> Directive {
        let dest = xdg::clean(&format!("/{rel}"));
        Directive::bind(BindKind::RoBindTry, self.resolve(rel), dest)
    }

    /// Read-only best-effort bind of a user path onto itself.
    fn user(path: &Path) -> Directive {
        Directive::bind(BindKind::RoBindTry, path.display(), path.display())
    }

    /// Directives present at every sandboxed level.
    fn baseline(&self, out: &mut Vec<Directive>) {
        let d = &self.host.dirs;
        let base = self.target.base_name();
        out.extend([
            Directive::env("TMPDIR", "/tmp"),
            Directive::env("HOME", d.home.display()),
            Directive::env("APPDIR", self.target.app_dir()),
            Directive::env("APPIMAGE", format!("/app/{base}")),
            Directive::env("ARGV0", &base),
            Directive::env("XDG_DESKTOP_DIR", d.desktop.display()),
            Directive::env("XDG_DOWNLOAD_DIR", d.download.display()),
            Directive::env("XDG_DOCUMENTS_DIR", d.documents.display()),
            Directive::env("XDG_MUSIC_DIR", d.music.display()),
            Directive::env("XDG_PICTURES_DIR", d.pictures.display()),
            Directive::env("XDG_VIDEOS_DIR", d.videos.display()),
            Directive::env("XDG_TEMPLATES_DIR", d.templates.display()),
            Directive::env("XDG_PUBLICSHARE_DIR", d.public_share.display()),
            Directive::env("XDG_DATA_HOME", d.data_home.display()),
            Directive::env("XDG_CONFIG_HOME", d.config_home.display()),
            Directive::env("XDG_CACHE_HOME", d.cache_home.display()),
            Directive::env("XDG_STATE_HOME", d.state_home.display()),
            Directive::env("XDG_RUNTIME_DIR", d.runtime_dir.display()),
            Directive::DieWithParent,
            Directive::Dir {
                path: d.runtime_dir.display().to_string(),
                mode: Some(0o700),
            },
            Directive::Dev("/dev".into()),
            Directive::Proc("/proc".into()),
            Directive::bind(
                BindKind::Bind,
                cache_dir(d, &self.target.hash).display(),
                d.cache_home.display(),
            ),
        ]);
        out.extend(BASE_SYSTEM_DIRS.iter().map(|rel| self.system(rel)));
        out.push(Directive::Dir {
            path: "/app".into(),
            mode: None,
        });
        out.push(Directive::bind(
            BindKind::Bind,
            self.target.path.display(),
            format!("/app/{base}"),
        ));
    }

    /// Level-dependent exposure of system and user configuration.
    fn tier(&self, out: &mut Vec<Directive>) {
        match self.perms.level() {
            1 => {
                out.extend([
                    Directive::bind(BindKind::DevBind, "/dev", "/dev"),
                    Directive::bind(BindKind::RoBind, "/sys", "/sys"),
                    self.system("usr"),
                    self.system("etc"),
                    self.system("run/systemd"),
                ]);
                self.user_config(out);
            }
            2 => {
                out.extend(LEVEL2_SYSTEM_PATHS.iter().map(|rel| self.system(rel)));
                self.user_config(out);
            }
            _ => {}
        }
    }

    /// Fonts, themes and toolkit settings of the user.
    fn user_config(&self, out: &mut Vec<Directive>) {
        let d = &self.host.dirs;
        out.extend(USER_DATA_DIRS.iter().map(|n| Self::user(&d.data_home.join(n))));
        out.extend(USER_CONFIG_DIRS.iter().map(|n| Self::user(&d.config_home.join(n))));
    }

    /// One bind per file grant.
    fn files(&self, out: &mut Vec<Directive>) {
        for grant in self.perms.files() {
            let kind = if grant.writable() {
                BindKind::BindTry
            } else {
                BindKind::RoBindTry
            };
            let path = self.host.dirs.expand(&grant.path);
            out.push(Directive::bind(kind, &path, &path));
        }
    }

    /// Positive bundle of each granted socket, negative bundle otherwise.
    fn sockets(&self, out: &mut Vec<Directive>) {
        let wayland_active =
            self.perms.has_socket(Socket::Wayland) && self.host.wayland_display.is_some();

        for socket in Socket::ALL {
            if !self.perms.has_socket(socket) {
                out.extend(negative(socket));
                continue;
            }
            if socket == Socket::X11 && wayland_active {
                tracing::debug!("wayland available; not sharing X11");
                continue;
            }
            if socket == Socket::Network && self.perms.level() == 1 {
                out.push(Directive::ShareNet);
                continue;
            }
            self.grant(socket, out);
        }
        out.push(Directive::Unshare(Namespace::Ipc));
    }

    /// Binds and environment for a granted socket.
    fn grant(&self, socket: Socket, out: &mut Vec<Directive>) {
        let h = self.host;
        let runtime = &h.dirs.runtime_dir;
        let inner = h.sandbox_runtime();
        let run = |name: &str, dest: &str| {
            Directive::bind(BindKind::RoBindTry, runtime.join(name).display(), format!("{inner}/{dest}"))
        };
        let snd = || Directive::bind(BindKind::DevBind, self.resolve("dev/snd"), "/dev/snd");

        match socket {
            Socket::X11 => {
                let home = h.dirs.home.display();
                let xauth = h
                    .xauthority
                    .clone()
                    .unwrap_or_else(|| h.dirs.home.join(".Xauthority"));
                out.push(Directive::bind(
                    BindKind::RoBindTry,
                    xauth.display(),
                    format!("{home}/.Xauthority"),
                ));
                if let Some(n) = h.display_number() {
                    out.push(Directive::bind(
                        BindKind::RoBindTry,
                        h.tmpdir.join(format!(".X11-unix/X{n}")).display(),
                        format!("/tmp/.X11-unix/X{n}"),
                    ));
                }
                out.extend([
                    self.system("usr/share/X11"),
                    Directive::env("QT_QPA_PLATFORM", "xcb"),
                    Directive::env("XAUTHORITY", format!("{home}/.Xauthority")),
                ]);
            }
            Socket::Alsa => out.extend([
                self.system("usr/share/alsa"),
                self.system("etc/alsa"),
                self.system("etc/group"),
                snd(),
            ]),
            Socket::Audio => out.extend([
                run("pulse", "pulse"),
                self.system("usr/share/alsa"),
                self.system("usr/share/pulseaudio"),
                self.system("etc/alsa"),
                self.system("etc/group"),
                self.system("etc/pulse"),
                snd(),
            ]),
            Socket::PulseAudio => out.extend([run("pulse", "pulse"), self.system("etc/pulse")]),
            Socket::Wayland => {
                let display = h.wayland_display.as_deref().unwrap_or("wayland-0");
                out.extend([
                    run(display, "wayland-0"),
                    self.system("usr/share/X11"),
                    Directive::env("WAYLAND_DISPLAY", "wayland-0"),
                    Directive::env("_JAVA_AWT_WM_NONREPARENTING", "1"),
                    Directive::env("MOZ_ENABLE_WAYLAND", "1"),
                    Directive::env("XDG_SESSION_TYPE", "wayland"),
                ]);
            }
            Socket::Dbus => out.push(run("bus", "bus")),
            Socket::Network => {
                out.push(Directive::ShareNet);
                out.extend(NETWORK_FILES.iter().map(|rel| self.system(rel)));
            }
            Socket::Pipewire => out.push(run("pipewire-0", "pipewire-0")),
            Socket::Cgroup | Socket::Pid | Socket::Session | Socket::User | Socket::Uts => {}
        }
    }

    /// Device binds plus the auxiliary paths of known device classes.
    fn devices(&self, out: &mut Vec<Directive>) {
        let devices = self.perms.devices();
        for dev in devices {
            let path = if dev.starts_with("/dev/") {
                dev.clone()
            } else {
                format!("/dev/{dev}")
            };
            out.push(Directive::bind(BindKind::DevBindTry, &path, &path));
        }

        if devices.iter().any(|d| d == "dri") {
            out.extend([
                Directive::bind(BindKind::RoBind, "/sys/dev/char", "/sys/dev/char"),
                Directive::bind(
                    BindKind::RoBind,
                    "/sys/devices/pci0000:00",
                    "/sys/devices/pci0000:00",
                ),
                Directive::bind(BindKind::DevBindTry, "/dev/nvidiactl", "/dev/nvidiactl"),
                Directive::bind(BindKind::DevBindTry, "/dev/nvidia0", "/dev/nvidia0"),
                Directive::bind(BindKind::DevBindTry, "/dev/nvidia-modeset", "/dev/nvidia-modeset"),
                self.system("usr/share/glvnd"),
            ]);
        }
        if devices.iter().any(|d| d == "input") {
            out.push(Directive::bind(
                BindKind::RoBind,
                "/sys/class/input",
                "/sys/class/input",
            ));
        }
    }
}

/// Directives emitted when `socket` is not granted.
fn negative(socket: Socket) -> Option<Directive> {
    match socket {
        Socket::Cgroup => Some(Directive::Unshare(Namespace::Cgroup)),
        Socket::Network => Some(Directive::Unshare(Namespace::Net)),
        Socket::Pid => Some(Directive::Unshare(Namespace::Pid)),
        Socket::Session => Some(Directive::NewSession),
        Socket::User => Some(Directive::Unshare(Namespace::User)),
        Socket::Uts => Some(Directive::Unshare(Namespace::Uts)),
        Socket::X11
        | Socket::Alsa
        | Socket::Audio
        | Socket::PulseAudio
        | Socket::Wayland
        | Socket::Dbus
        | Socket::Pipewire => None,
    }
}

/// Per-bundle host cache directory, bound over `$XDG_CACHE_HOME`.
pub fn cache_dir(dirs: &HostDirs, hash: &str) -> PathBuf {
    dirs.cache_home.join("appimage").join(hash)
}
