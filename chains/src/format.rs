//! Bundle format detection and payload offset computation.
//!
//! Three on-disk layouts carry an embedded read-only filesystem image:
//!
//! | Type | Header                      | Payload starts at                   |
//! |------|-----------------------------|-------------------------------------|
//! | 1    | ELF, `AI\x01` at `0x08`     | end of the section-header table     |
//! | 2    | ELF, `AI\x02` at `0x08`     | end of the section-header table     |
//! | -2   | `#!/bin/sh\n#.shImg.#`      | value of the `sfs_offset=` line     |
//!
//! An ELF file without either sub-magic is classified but never given an
//! offset.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use crate::{Error, Result};

/// ELF identification bytes at offset 0.
const ELF_MAGIC: &[u8] = b"\x7fELF";
/// Sub-magic of an ISO 9660 (type 1) bundle.
const TYPE1_MAGIC: &[u8] = b"AI\x01";
/// Sub-magic of a SquashFS (type 2) bundle.
const TYPE2_MAGIC: &[u8] = b"AI\x02";
/// Offset of the sub-magic inside `e_ident` padding.
const SUB_MAGIC_OFFSET: u64 = 8;
/// Banner of a shell-wrapped SquashFS bundle.
const SHELL_BANNER: &[u8] = b"#!/bin/sh\n#.shImg.#";
/// Script variable holding the payload offset of a shell-wrapped bundle.
const SFS_OFFSET_KEY: &[u8] = b"sfs_offset=";
/// Bytes of a shImg script scanned for `sfs_offset=`.
const MAX_SCRIPT_SIZE: u64 = 64 << 10;
/// Upper bound for section contents read into memory.
const MAX_SECTION_SIZE: u64 = 16 << 20;

/// Container layout of a bundle file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(i8)]
pub enum BundleType {
    /// Valid ELF without a recognised sub-magic.
    UnknownElf = 0,
    /// ELF runtime followed by an ISO 9660 image.
    Iso = 1,
    /// ELF runtime followed by a SquashFS image.
    SquashFs = 2,
    /// Shell script followed by a SquashFS image and a resource archive.
    ShellSquashFs = -2,
}

impl BundleType {
    /// Numeric type code (`1`, `2`, `0` or `-2`).
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Returns `true` for the ELF-based layouts.
    pub const fn is_elf(self) -> bool {
        !matches!(self, Self::ShellSquashFs)
    }

    /// Returns `true` if the format ships a thumbnail outside the payload.
    ///
    /// Shell-wrapped bundles keep a 256px icon in their resource archive.
    pub const fn has_dedicated_icon(self) -> bool {
        matches!(self, Self::ShellSquashFs)
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnknownElf => "unknown ELF",
            Self::Iso => "type 1 (ISO 9660)",
            Self::SquashFs => "type 2 (SquashFS)",
            Self::ShellSquashFs => "shImg (shell + SquashFS)",
        })
    }
}

/// Classifies a bundle by its magic bytes.
pub fn detect<R: Read + Seek>(r: &mut R) -> Result<BundleType> {
    if has_magic(r, ELF_MAGIC, 0)? {
        if has_magic(r, TYPE1_MAGIC, SUB_MAGIC_OFFSET)? {
            return Ok(BundleType::Iso);
        }
        if has_magic(r, TYPE2_MAGIC, SUB_MAGIC_OFFSET)? {
            return Ok(BundleType::SquashFs);
        }
        return Ok(BundleType::UnknownElf);
    }
    if has_magic(r, SHELL_BANNER, 0)? {
        return Ok(BundleType::ShellSquashFs);
    }
    Err(Error::UnsupportedContainer(
        "no ELF header or shImg banner at offset 0".into(),
    ))
}

/// Returns the byte offset of the embedded filesystem image.
pub fn payload_offset<R: Read + Seek>(r: &mut R, kind: BundleType) -> Result<u64> {
    match kind {
        BundleType::Iso | BundleType::SquashFs => elf_payload_offset(r),
        BundleType::ShellSquashFs => shell_payload_offset(r),
        BundleType::UnknownElf => Err(Error::UnsupportedContainer(
            "ELF file without `AI` magic at 0x08".into(),
        )),
    }
}

/// Compares the bytes at `offset` with `magic`. Short files never match.
fn has_magic<R: Read + Seek>(r: &mut R, magic: &[u8], offset: u64) -> Result<bool> {
    let mut buf = vec![0u8; magic.len()];
    r.seek(SeekFrom::Start(offset))?;
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(buf == magic),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// End of the section-header table; `0` for an unknown ELF class.
fn elf_payload_offset<R: Read + Seek>(r: &mut R) -> Result<u64> {
    let Some(hdr) = ElfHeader::read(r)? else {
        return Ok(0);
    };
    hdr.shoff
        .checked_add(u64::from(hdr.shnum) * u64::from(hdr.shentsize))
        .ok_or_else(|| Error::UnsupportedContainer("section header table overflows".into()))
}

/// Scans the script prefix for `sfs_offset=<n>`.
///
/// The scan stops at the first NUL byte or after [`MAX_SCRIPT_SIZE`] bytes,
/// whichever comes first.
fn shell_payload_offset<R: Read + Seek>(r: &mut R) -> Result<u64> {
    r.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(r.take(MAX_SCRIPT_SIZE));
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 || line.contains(&0) {
            break;
        }
        if !line.starts_with(SFS_OFFSET_KEY) || line.iter().filter(|&&b| b == b'=').count() != 1 {
            continue;
        }
        let raw = String::from_utf8_lossy(&line[SFS_OFFSET_KEY.len()..]);
        let value: String = raw
            .trim_end_matches(['\n', '\r'])
            .chars()
            .filter(|c| !matches!(c, '\'' | '"'))
            .collect();
        return value.parse().map_err(|_| {
            Error::UnsupportedContainer(format!("invalid sfs_offset value `{value}`"))
        });
    }
    Err(Error::UnsupportedContainer(
        "shImg bundle has no `sfs_offset=` line".into(),
    ))
}

/// Reads the contents of the named ELF section, if present.
pub(crate) fn elf_section<R: Read + Seek>(r: &mut R, name: &str) -> Result<Option<Vec<u8>>> {
    let Some(hdr) = ElfHeader::read(r)? else {
        return Ok(None);
    };
    if hdr.shnum == 0 || hdr.shstrndx >= hdr.shnum {
        return Ok(None);
    }

    let (strtab_off, strtab_len) = hdr.section_range(r, hdr.shstrndx)?;
    let names = read_range(r, strtab_off, strtab_len)?;

    for idx in 0..hdr.shnum {
        let entry = hdr.shoff + u64::from(idx) * u64::from(hdr.shentsize);
        let mut raw = [0u8; 4];
        r.seek(SeekFrom::Start(entry))?;
        r.read_exact(&mut raw)?;
        let name_off = usize::try_from(hdr.order.u32(raw)).unwrap_or(usize::MAX);
        let Some(tail) = names.get(name_off..) else {
            continue;
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        if &tail[..end] == name.as_bytes() {
            let (off, len) = hdr.section_range(r, idx)?;
            return read_range(r, off, len).map(Some);
        }
    }
    Ok(None)
}

/// Returns the update information string embedded in `.upd_info`.
pub(crate) fn elf_update_info<R: Read + Seek>(r: &mut R) -> Result<Option<String>> {
    let Some(data) = elf_section(r, ".upd_info")? else {
        return Ok(None);
    };
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    if end == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&data[..end]).into_owned()))
}

/// Maps the ELF machine field to an architecture name.
pub(crate) fn elf_architecture<R: Read + Seek>(r: &mut R) -> Result<Option<&'static str>> {
    let Some(hdr) = ElfHeader::read(r)? else {
        return Ok(None);
    };
    Ok(match hdr.machine {
        3 => Some("i386"),
        40 => Some("armhf"),
        62 => Some("x86_64"),
        183 => Some("aarch64"),
        _ => None,
    })
}

/// Reads `len` bytes at `off`, bounded by [`MAX_SECTION_SIZE`].
fn read_range<R: Read + Seek>(r: &mut R, off: u64, len: u64) -> Result<Vec<u8>> {
    if len > MAX_SECTION_SIZE {
        return Err(Error::UnsupportedContainer(format!(
            "ELF section of {len} bytes is too large"
        )));
    }
    let mut buf = vec![0u8; usize::try_from(len).unwrap_or(0)];
    r.seek(SeekFrom::Start(off))?;
    r.read_exact(&mut buf)?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// ELF header decoding
// ---------------------------------------------------------------------------

/// Byte order declared in `e_ident[EI_DATA]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    /// `ELFDATA2LSB`.
    Little,
    /// `ELFDATA2MSB`.
    Big,
}

impl ByteOrder {
    /// Decodes a `u16`.
    fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    /// Decodes a `u32`.
    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    /// Decodes a `u64`.
    fn u64(self, b: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }
}

/// The fields of the ELF file header this module needs.
#[derive(Debug, Clone, Copy)]
struct ElfHeader {
    /// `true` for `ELFCLASS64`.
    wide: bool,
    /// Declared byte order.
    order: ByteOrder,
    /// `e_machine`.
    machine: u16,
    /// `e_shoff`.
    shoff: u64,
    /// `e_shentsize`.
    shentsize: u16,
    /// `e_shnum`.
    shnum: u16,
    /// `e_shstrndx`.
    shstrndx: u16,
}

impl ElfHeader {
    /// Parses the header, returning `None` for a class other than 32/64-bit.
    fn read<R: Read + Seek>(r: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; 64];
        r.seek(SeekFrom::Start(0))?;
        let n = read_up_to(r, &mut buf)?;

        let wide = match buf[4] {
            1 => false,
            2 => true,
            _ => return Ok(None),
        };
        let order = if buf[5] == 2 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let needed = if wide { 64 } else { 52 };
        if n < needed {
            return Err(Error::UnsupportedContainer("truncated ELF header".into()));
        }

        let u16_at = |off: usize| order.u16([buf[off], buf[off + 1]]);
        let u32_at = |off: usize| order.u32([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        let u64_at = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[off..off + 8]);
            order.u64(b)
        };

        let hdr = if wide {
            Self {
                wide,
                order,
                machine: u16_at(18),
                shoff: u64_at(0x28),
                shentsize: u16_at(0x3A),
                shnum: u16_at(0x3C),
                shstrndx: u16_at(0x3E),
            }
        } else {
            Self {
                wide,
                order,
                machine: u16_at(18),
                shoff: u64::from(u32_at(0x20)),
                shentsize: u16_at(0x2E),
                shnum: u16_at(0x30),
                shstrndx: u16_at(0x32),
            }
        };
        Ok(Some(hdr))
    }

    /// Returns `(sh_offset, sh_size)` of section `idx`.
    fn section_range<R: Read + Seek>(&self, r: &mut R, idx: u16) -> Result<(u64, u64)> {
        let entry = self.shoff + u64::from(idx) * u64::from(self.shentsize);
        if self.wide {
            let mut b = [0u8; 16];
            r.seek(SeekFrom::Start(entry + 24))?;
            r.read_exact(&mut b)?;
            let mut off = [0u8; 8];
            let mut len = [0u8; 8];
            off.copy_from_slice(&b[..8]);
            len.copy_from_slice(&b[8..]);
            Ok((self.order.u64(off), self.order.u64(len)))
        } else {
            let mut b = [0u8; 8];
            r.seek(SeekFrom::Start(entry + 16))?;
            r.read_exact(&mut b)?;
            let off = self.order.u32([b[0], b[1], b[2], b[3]]);
            let len = self.order.u32([b[4], b[5], b[6], b[7]]);
            Ok((u64::from(off), u64::from(len)))
        }
    }
}

/// Fills as much of `buf` as the reader provides.
fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
