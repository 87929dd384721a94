//! Read access to the embedded filesystem image and the resource archive.
//!
//! Files are read straight out of the SquashFS payload at the computed
//! offset, so metadata and icons are available before (or without)
//! mounting.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use backhand::{FilesystemReader, InnerNode, Node, SquashfsFileReader};

use crate::{Error, Result, xdg};

/// Symlink hops followed before giving up.
const MAX_SYMLINK_DEPTH: usize = 16;
/// Directory of the resource archive appended to shImg bundles.
const RESOURCE_PREFIX: &str = ".APPIMAGE_RESOURCES";

/// An opened SquashFS payload.
pub(crate) struct Payload {
    /// Parsed image.
    fs: FilesystemReader<'static>,
}

impl Payload {
    /// Opens the image embedded in `path` at `offset`.
    pub(crate) fn open(path: &Path, offset: u64) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let fs = FilesystemReader::from_reader_with_offset(file, offset)
            .map_err(|e| Error::Payload(format!("offset {offset}: {e}")))?;
        Ok(Self { fs })
    }

    /// Finds the node at an image-absolute path.
    fn node(&self, path: &str) -> Option<&Node<SquashfsFileReader>> {
        let want = xdg::clean(&format!("/{path}"));
        self.fs
            .files()
            .find(|n| n.fullpath.to_str().is_some_and(|p| xdg::clean(p) == want))
    }

    /// Resolves symlinks without leaving the image.
    fn resolve(&self, path: &str) -> Result<&SquashfsFileReader> {
        let mut current = xdg::clean(&format!("/{path}"));
        for _ in 0..MAX_SYMLINK_DEPTH {
            let node = self
                .node(&current)
                .ok_or_else(|| Error::NotFound(PathBuf::from(&current)))?;
            match &node.inner {
                InnerNode::File(f) => return Ok(f),
                InnerNode::Symlink(link) => {
                    let target = link.link.to_string_lossy();
                    current = if target.starts_with('/') {
                        xdg::clean(&target)
                    } else {
                        let parent = Path::new(&current)
                            .parent()
                            .map_or_else(|| "/".to_owned(), |p| p.display().to_string());
                        xdg::clean(&format!("{parent}/{target}"))
                    };
                    tracing::trace!(target = %current, "following in-image symlink");
                }
                _ => return Err(Error::Payload(format!("`{current}` is not a regular file"))),
            }
        }
        Err(Error::Payload(format!("too many symlink levels at `{path}`")))
    }

    /// Returns `true` if something exists at `path`.
    pub(crate) fn exists(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    /// Reads a whole file, following symlinks inside the image.
    pub(crate) fn read(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        let mut buf = Vec::new();
        self.fs.file(&file.basic).reader().read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Reads the single top-level `*.desktop` entry.
    pub(crate) fn desktop_entry(&self) -> Result<String> {
        let mut found = self.fs.files().filter(|n| {
            n.fullpath.parent() == Some(Path::new("/"))
                && n.fullpath.extension().is_some_and(|e| e == "desktop")
        });
        let first = found
            .next()
            .ok_or_else(|| Error::Payload("no desktop entry at the image root".into()))?;
        if found.next().is_some() {
            return Err(Error::Payload(
                "more than one desktop entry at the image root".into(),
            ));
        }
        let path = first.fullpath.to_string_lossy().into_owned();
        let bytes = self.read(&path)?;
        String::from_utf8(bytes).map_err(|_| Error::Payload(format!("`{path}` is not UTF-8")))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").finish_non_exhaustive()
    }
}

/// Reads `.APPIMAGE_RESOURCES/<name>` from the zip archive appended to a bundle.
pub(crate) fn resource(bundle: &Path, name: &str) -> Result<Vec<u8>> {
    let entry = format!("{RESOURCE_PREFIX}/{name}");
    let file = File::open(bundle)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| Error::Payload(format!("resource archive: {e}")))?;
    let mut zf = match archive.by_name(&entry) {
        Ok(zf) => zf,
        Err(zip::result::ZipError::FileNotFound) => return Err(Error::NotFound(entry.into())),
        Err(e) => return Err(Error::Payload(format!("{entry}: {e}"))),
    };
    let mut buf = Vec::new();
    zf.read_to_end(&mut buf)?;
    Ok(buf)
}
