//! Built-in profile catalog.
//!
//! The catalog ships inside the binary as `profile_database.json`, a list of
//! [`Perms`] records whose `names` field lists every alias the record
//! applies to. It is parsed on first use and immutable afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{Error, Perms, Result};

/// Serialized catalog.
const DATABASE: &str = include_str!("profile_database.json");

/// Parsed catalog plus its alias index.
#[derive(Debug)]
struct Catalog {
    /// Records in file order.
    records: Vec<Perms>,
    /// Case-folded alias to record index; later records win.
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Parses and validates `json`, then indexes every alias.
    fn parse(json: &str) -> Result<Self> {
        let records = serde_json::from_str::<Vec<Perms>>(json)?
            .into_iter()
            .map(Perms::normalized)
            .collect::<Result<Vec<_>>>()?;
        let mut index = HashMap::new();
        for (i, rec) in records.iter().enumerate() {
            for name in &rec.names {
                index.insert(name.to_lowercase(), i);
            }
        }
        Ok(Self { records, index })
    }
}

/// Returns the process-wide catalog, parsing it on first call.
fn catalog() -> Result<&'static Catalog> {
    static CATALOG: OnceLock<std::result::Result<Catalog, String>> = OnceLock::new();
    CATALOG
        .get_or_init(|| {
            let parsed = Catalog::parse(DATABASE).map_err(|e| e.to_string());
            if let Ok(c) = &parsed {
                tracing::debug!(records = c.records.len(), aliases = c.index.len(), "catalog loaded");
            }
            parsed
        })
        .as_ref()
        .map_err(|e| Error::InvalidProfile(format!("built-in catalog: {e}")))
}

/// Every catalog record.
pub fn all() -> Result<&'static [Perms]> {
    Ok(&catalog()?.records)
}

/// Looks up the record for a bundle name, case-insensitively.
pub fn lookup(name: &str) -> Result<Perms> {
    let cat = catalog()?;
    cat.index
        .get(&name.to_lowercase())
        .map(|&i| cat.records[i].clone())
        .ok_or_else(|| Error::ProfileNotFound(name.to_owned()))
}
