//! FUSE mounting of the payload and mount-table queries.

use std::path::Path;
use std::process::{Command, Output};

use crate::tools::Tool;
use crate::{Error, Result};

/// Kernel mount table of the calling process.
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Returns `true` if `dir` is a mount point in the live mount table.
pub fn is_mount_point(dir: &Path) -> bool {
    match std::fs::read_to_string(MOUNTINFO) {
        Ok(table) => listed_in(&table, dir),
        Err(e) => {
            tracing::warn!(error = %e, "cannot read {MOUNTINFO}");
            false
        }
    }
}

/// Scans a `mountinfo` document for a mount point equal to `dir`.
fn listed_in(table: &str, dir: &Path) -> bool {
    let want = dir.to_string_lossy();
    table
        .lines()
        .filter_map(|l| l.split(' ').nth(4))
        .any(|field| unescape(field) == want)
}

/// Decodes the `\ooo` octal escapes the kernel uses for spaces and the like.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(v) = u8::from_str_radix(oct, 8) {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mounts the SquashFS image at `offset` inside `image` onto `dest`.
pub(crate) fn mount(image: &Path, dest: &Path, offset: u64) -> Result<()> {
    let squashfuse = Tool::Squashfuse.require()?;
    let out = Command::new(squashfuse)
        .arg("-o")
        .arg(format!("offset={offset}"))
        .arg(image)
        .arg(dest)
        .output()?;
    if !out.status.success() {
        return Err(Error::Helper {
            tool: Tool::Squashfuse.name(),
            output: combined(&out),
        });
    }
    tracing::info!(image = %image.display(), mount = %dest.display(), offset, "mounted payload");
    Ok(())
}

/// Lazily unmounts `dir`, preferring `fusermount -uz` over `umount -l`.
pub fn unmount(dir: &Path) -> Result<()> {
    let (tool, flag) = match Tool::Fusermount.path() {
        Some(_) => (Tool::Fusermount, "-uz"),
        None => (Tool::Umount, "-l"),
    };
    let out = Command::new(tool.require()?).arg(flag).arg(dir).output()?;
    if !out.status.success() {
        return Err(Error::Helper {
            tool: tool.name(),
            output: combined(&out),
        });
    }
    tracing::info!(mount = %dir.display(), "unmounted payload");
    Ok(())
}

/// Stdout followed by stderr, trimmed.
fn combined(out: &Output) -> String {
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    text.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
22 1 0:21 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
36 22 0:32 / /run/user/1000 rw,nosuid shared:20 - tmpfs tmpfs rw
91 36 0:55 / /run/user/1000/chains/mount/abc rw - fuse.squashfuse squashfuse rw
92 22 0:56 / /mnt/with\\040space rw - fuse.squashfuse squashfuse rw
";

    #[test]
    fn matches_exact_mount_point() {
        assert!(listed_in(TABLE, Path::new("/run/user/1000/chains/mount/abc")));
        assert!(listed_in(TABLE, Path::new("/")));
        assert!(!listed_in(TABLE, Path::new("/run/user/1000/chains")));
        assert!(!listed_in(TABLE, Path::new("/run/user/1000/chains/mount/abcd")));
    }

    #[test]
    fn decodes_octal_escapes() {
        assert!(listed_in(TABLE, Path::new("/mnt/with space")));
        assert_eq!(unescape("a\\011b"), "a\tb");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn proc_root_is_mounted() {
        if Path::new(MOUNTINFO).exists() {
            assert!(is_mount_point(Path::new("/")));
        }
    }
}
