//! Permission overrides and the sandboxed launch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chains::{Bundle, Config, HostContext, Perms, TrustStore};

/// Per-session permission and directory overrides.
///
/// None of these are persisted; use `--trust` for that.
#[derive(clap::Args)]
pub(crate) struct Overrides {
    /// Use the profile in FILE instead of resolving one.
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Use the profile in FILE when no profile can be resolved.
    #[arg(long, value_name = "FILE", conflicts_with = "profile")]
    fallback_profile: Option<PathBuf>,

    /// Isolation level for this session (0 disables the sandbox).
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..=3))]
    level: Option<i64>,

    /// Grant a file (format: path[:ro|:rw]).
    #[arg(long = "add-file", value_name = "PATH")]
    add_files: Vec<String>,

    /// Revoke a file grant.
    #[arg(long = "rm-file", value_name = "PATH")]
    rm_files: Vec<String>,

    /// Grant a device (e.g. dri, input).
    #[arg(long = "add-device", value_name = "DEVICE")]
    add_devices: Vec<String>,

    /// Revoke a device grant.
    #[arg(long = "rm-device", value_name = "DEVICE")]
    rm_devices: Vec<String>,

    /// Grant a socket (e.g. x11, wayland, network).
    #[arg(long = "add-socket", value_name = "SOCKET")]
    add_sockets: Vec<String>,

    /// Revoke a socket grant.
    #[arg(long = "rm-socket", value_name = "SOCKET")]
    rm_sockets: Vec<String>,

    /// Host directory standing in for the sandbox root.
    #[arg(long, value_name = "DIR")]
    root_dir: Option<PathBuf>,

    /// Persistent home directory for the bundle.
    #[arg(long, value_name = "DIR", conflicts_with = "no_data_dir")]
    data_dir: Option<PathBuf>,

    /// Give the bundle an empty, temporary home.
    #[arg(long)]
    no_data_dir: bool,
}

impl Overrides {
    /// Resolves the bundle's permissions and applies the overrides.
    ///
    /// A declaration whose level is undetermined is kept; `--level`, then
    /// `--fallback-profile`, then level 3 fill the gap.
    pub(crate) fn permissions(
        &self,
        bundle: &Bundle,
        store: &TrustStore,
        config: &Config,
    ) -> Result<Perms> {
        let resolved = match &self.profile {
            Some(file) => read_profile(file)?,
            None => match partial(chains::resolve(bundle, store, config.precedence)) {
                Ok(p) => p,
                Err(e) => match &self.fallback_profile {
                    Some(file) => {
                        tracing::info!(error = %e, "using fallback profile");
                        read_profile(file)?
                    }
                    None => return Err(e.into()),
                },
            },
        };
        self.finish(resolved)
    }

    /// Applies the overrides and settles an undetermined level.
    fn finish(&self, mut perms: Perms) -> Result<Perms> {
        self.apply(&mut perms)?;
        if perms.is_unset()
            && let Some(file) = &self.fallback_profile
        {
            tracing::info!("level undetermined, using fallback profile");
            perms = read_profile(file)?;
            self.apply(&mut perms)?;
        }
        if perms.is_unset() {
            perms.set_level(3)?;
        }
        Ok(perms)
    }

    /// Applies the per-session grant overrides to `perms`.
    fn apply(&self, perms: &mut Perms) -> Result<()> {
        if let Some(level) = self.level {
            perms.set_level(level)?;
        }
        perms.add_files(&self.add_files);
        perms.remove_files(&self.rm_files);
        perms.add_devices(&self.add_devices);
        perms.remove_devices(&self.rm_devices);
        perms.add_sockets(&self.add_sockets)?;
        perms.remove_sockets(&self.rm_sockets);
        if self.no_data_dir {
            perms.persist_home = false;
        }
        Ok(())
    }

    /// Applies root and data directory overrides to `bundle`.
    pub(crate) fn apply_dirs(&self, bundle: &mut Bundle) {
        if let Some(dir) = &self.root_dir {
            bundle.set_root_dir(dir);
        }
        if let Some(dir) = &self.data_dir {
            bundle.set_data_dir(dir);
        }
    }
}

/// Keeps the grants of a declaration whose level is undetermined.
fn partial(resolved: chains::Result<Perms>) -> chains::Result<Perms> {
    match resolved {
        Err(chains::Error::UndeterminedLevel { value, perms }) => {
            tracing::info!(level = %value, "declared level undetermined");
            Ok(*perms)
        }
        other => other,
    }
}

fn read_profile(file: &Path) -> Result<Perms> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    Ok(partial(Perms::from_text(&text))?)
}

/// Mounts `bundle`, runs it and tears the mount down again.
///
/// The mount directory is published through `active` so the signal
/// listener can unmount it.
pub(crate) fn launch(
    bundle: &mut Bundle,
    perms: &Perms,
    args: &[String],
    active: &Arc<Mutex<Option<PathBuf>>>,
) -> Result<()> {
    let host = HostContext::detect().context("host")?;
    let dir = bundle.mount(None).context("mount")?.to_path_buf();
    if let Ok(mut slot) = active.lock() {
        *slot = Some(dir);
    }

    let ran = chains::sandbox::run(bundle, perms, &host, args).context("sandbox");

    if let Ok(mut slot) = active.lock() {
        *slot = None;
    }
    let destroyed = bundle.destroy().context("unmount");
    ran.and(destroyed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chains::Socket;
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        overrides: Overrides,
    }

    fn overrides(args: &[&str]) -> Overrides {
        let argv = std::iter::once("chains").chain(args.iter().copied());
        Harness::try_parse_from(argv).unwrap().overrides
    }

    fn undetermined() -> Perms {
        partial(Perms::from_text("[X-App Permissions]\nLevel=9\nSockets=x11;\n")).unwrap()
    }

    #[test]
    fn level_flag_completes_an_undetermined_declaration() {
        let perms = overrides(&["--level", "1"]).finish(undetermined()).unwrap();
        assert_eq!(perms.level(), 1);
        assert_eq!(perms.sockets(), [Socket::X11]);
    }

    #[test]
    fn undetermined_level_falls_back_to_strictest() {
        let perms = overrides(&[]).finish(undetermined()).unwrap();
        assert_eq!(perms.level(), 3);
        assert!(perms.has_socket(Socket::X11));
    }

    #[test]
    fn fallback_profile_replaces_undetermined_declaration() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("fallback");
        std::fs::write(&file, "[X-App Permissions]\nLevel=2\nSockets=wayland;\n").unwrap();

        let o = overrides(&["--fallback-profile", file.to_str().unwrap(), "--add-socket", "network"]);
        let perms = o.finish(undetermined()).unwrap();
        assert_eq!(perms.level(), 2);
        assert_eq!(perms.sockets(), [Socket::Wayland, Socket::Network]);
    }

    #[test]
    fn grant_overrides_apply_in_order() {
        let mut base = Perms::default();
        base.set_level(2).unwrap();
        base.add_files(["/opt/a:rw"]);
        let o = overrides(&[
            "--add-file",
            "/opt/b",
            "--rm-file",
            "/opt/a",
            "--add-device",
            "/dev/dri",
            "--no-data-dir",
        ]);
        let perms = o.finish(base).unwrap();
        let files: Vec<_> = perms.files().iter().map(ToString::to_string).collect();
        assert_eq!(files, ["/opt/b:ro"]);
        assert_eq!(perms.devices(), ["dri"]);
        assert!(!perms.persist_home);
    }

    #[test]
    fn out_of_range_level_flag_is_rejected() {
        let argv = ["chains", "--level", "4"];
        assert!(Harness::try_parse_from(argv).is_err());
    }
}
