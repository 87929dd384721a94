//! Running a bundle under its compiled policy.

use std::fs::{DirBuilder, OpenOptions};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use std::process::Command;

use crate::policy::{self, HostContext, Policy, Target};
use crate::tools::Tool;
use crate::{Bundle, Error, Perms, Result};

/// Marker telling AppImage runtimes not to offer desktop integration.
const NO_INTEGRATION: &str = ".local/share/appimagekit/no_desktopintegration";

/// Compiles `perms` for the mounted `bundle` and runs it to completion.
///
/// Nothing is executed when compilation fails. A non-zero exit of the
/// sandbox (or of the entry point, for level 0) is [`Error::Sandbox`].
pub fn run(bundle: &Bundle, perms: &Perms, host: &HostContext, args: &[String]) -> Result<()> {
    let target = Target::of(bundle)?;
    let policy = policy::compile_target(&target, perms, host, args)?;
    prepare(&target, perms, host)?;

    let mut cmd = match &policy {
        Policy::Sandboxed(_) => command(&target, &policy, Tool::Bwrap.require()?),
        Policy::Passthrough(_) => command(&target, &policy, Path::new("")),
    };
    tracing::debug!(cmd = ?cmd, "launching");

    let status = cmd
        .status()
        .map_err(|e| Error::Sandbox(format!("failed to spawn {:?}: {e}", cmd.get_program())))?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Sandbox(format!("{} exited with {status}", bundle.name())))
    }
}

/// Creates the per-bundle cache directory and the integration marker.
fn prepare(target: &Target, perms: &Perms, host: &HostContext) -> Result<()> {
    let mut dirs = DirBuilder::new();
    dirs.recursive(true).mode(0o744);
    dirs.create(policy::cache_dir(&host.dirs, &target.hash))?;

    if perms.persist_home {
        let marker = target.data_dir.join(NO_INTEGRATION);
        if let Some(parent) = marker.parent() {
            dirs.create(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&marker)?;
    }
    Ok(())
}

/// Builds the process for a compiled policy.
///
/// A sandboxed policy runs `bwrap` with the rendered directives; a
/// passthrough policy runs the mounted `AppRun` directly.
fn command(target: &Target, policy: &Policy, bwrap: &Path) -> Command {
    match policy {
        Policy::Sandboxed(_) => {
            let mut cmd = Command::new(bwrap);
            cmd.args(policy.args());
            cmd
        }
        Policy::Passthrough(args) => {
            let mut cmd = Command::new(target.mount_dir.join("AppRun"));
            cmd.args(args)
                .env("APPDIR", &target.mount_dir)
                .env("APPIMAGE", &target.path)
                .env("ARGV0", target.path.file_name().unwrap_or_default());
            cmd
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::ffi::OsStr;
    use std::path::PathBuf;

    use super::*;
    use crate::HostDirs;

    fn target(root: &Path) -> Target {
        Target {
            path: root.join("Demo.AppImage"),
            hash: "feedface".into(),
            root_dir: PathBuf::from("/"),
            data_dir: root.join("Demo.AppImage.home"),
            temp_dir: root.join("tmp"),
            mount_dir: root.join("mnt"),
        }
    }

    fn perms(level: i64, persist: bool) -> Perms {
        let mut p = Perms::default();
        p.set_level(level).unwrap();
        p.persist_home = persist;
        p
    }

    #[test]
    fn passthrough_runs_apprun_directly() {
        let tmp = tempfile::tempdir().unwrap();
        let t = target(tmp.path());
        let host = HostContext::new(HostDirs::from_home(tmp.path(), 1000), 1000);
        let policy = policy::compile_target(&t, &perms(0, true), &host, &["-v".into()]).unwrap();

        let cmd = command(&t, &policy, Path::new("/usr/bin/bwrap"));
        assert_eq!(cmd.get_program(), t.mount_dir.join("AppRun").as_os_str());
        assert_eq!(cmd.get_args().collect::<Vec<_>>(), [OsStr::new("-v")]);
        let appdir = cmd.get_envs().find(|(k, _)| *k == "APPDIR").and_then(|(_, v)| v);
        assert_eq!(appdir, Some(t.mount_dir.as_os_str()));
    }

    #[test]
    fn sandboxed_runs_bwrap() {
        let tmp = tempfile::tempdir().unwrap();
        let t = target(tmp.path());
        let host = HostContext::new(HostDirs::from_home(tmp.path(), 1000), 1000);
        let policy = policy::compile_target(&t, &perms(3, true), &host, &[]).unwrap();

        let cmd = command(&t, &policy, Path::new("/usr/bin/bwrap"));
        assert_eq!(cmd.get_program(), "/usr/bin/bwrap");
        assert_eq!(cmd.get_args().count(), policy.args().len());
    }

    #[test]
    fn prepare_creates_cache_and_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let t = target(tmp.path());
        let host = HostContext::new(HostDirs::from_home(tmp.path(), 1000), 1000);

        prepare(&t, &perms(2, true), &host).unwrap();
        assert!(policy::cache_dir(&host.dirs, "feedface").is_dir());
        assert!(t.data_dir.join(NO_INTEGRATION).is_file());
        // Idempotent.
        prepare(&t, &perms(2, true), &host).unwrap();
    }

    #[test]
    fn ephemeral_home_gets_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let t = target(tmp.path());
        let host = HostContext::new(HostDirs::from_home(tmp.path(), 1000), 1000);

        prepare(&t, &perms(2, false), &host).unwrap();
        assert!(!t.data_dir.exists());
    }
}
