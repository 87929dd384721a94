//! Desktop-entry parsing.
//!
//! Bundles describe themselves (name, version, icon and the optional
//! `[X-App Permissions]` group) in a desktop-entry file. Profiles persisted
//! by the trust store share the same format.
//!
//! A literal `;` is both the list separator of desktop entries and a comment
//! marker for most ini parsers, so the text is rewritten to use the
//! full-width `；` before parsing and [`split_list`] reverses it.

use std::fmt;

use ini::{Ini, ParseOption};

use crate::{Error, Result};

/// Group holding the standard desktop-entry keys.
pub const DESKTOP_SECTION: &str = "Desktop Entry";
/// Group holding the permission keys.
pub const PERMISSIONS_SECTION: &str = "X-App Permissions";

/// Separator used in list values.
const SEMICOLON: char = ';';
/// Stand-in for [`SEMICOLON`] while the text goes through the ini parser.
const FULLWIDTH_SEMICOLON: char = '；';

/// A parsed desktop entry together with its source text.
pub struct DesktopEntry {
    /// Text as read, before semicolon substitution.
    raw: String,
    /// Parsed document.
    ini: Ini,
}

impl DesktopEntry {
    /// Parses desktop-entry text.
    pub fn parse(text: &str) -> Result<Self> {
        let escaped = text.replace(SEMICOLON, "；");
        let opt = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(&escaped, opt)
            .map_err(|e| Error::InvalidProfile(e.to_string()))?;
        Ok(Self {
            raw: text.to_owned(),
            ini,
        })
    }

    /// Returns the value of `key` in `section`, with `;` restored.
    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        self.ini
            .section(Some(section))
            .and_then(|s| s.get(key))
            .map(|v| v.replace(FULLWIDTH_SEMICOLON, ";"))
    }

    /// Shorthand for a key of the `[Desktop Entry]` group.
    pub fn entry(&self, key: &str) -> Option<String> {
        self.get(DESKTOP_SECTION, key)
    }

    /// Returns `true` if the document has the given group.
    pub fn has_section(&self, section: &str) -> bool {
        self.ini.section(Some(section)).is_some()
    }

    /// The unmodified source text.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Debug for DesktopEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesktopEntry")
            .field("name", &self.entry("Name"))
            .field("len", &self.raw.len())
            .finish_non_exhaustive()
    }
}

/// Splits a `;`-delimited list value, dropping empty items.
///
/// `"foo;bar;"` yields `["foo", "bar"]`.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .replace(FULLWIDTH_SEMICOLON, ";")
        .split(SEMICOLON)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
