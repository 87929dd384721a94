//! Effective-permission resolution across profile sources.

use crate::{Bundle, Perms, Result, TrustStore, profiles};

/// Which of the two curated sources is consulted first.
///
/// The bundle's own declaration is always the last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Precedence {
    /// Persisted profile, then built-in catalog.
    #[default]
    TrustedFirst,
    /// Built-in catalog, then persisted profile.
    CatalogFirst,
}

/// Resolves the permissions of `bundle`.
///
/// Failures of the first two sources are logged and skipped; a failure of
/// the bundle's own declaration is returned.
pub fn resolve(bundle: &Bundle, store: &TrustStore, precedence: Precedence) -> Result<Perms> {
    let name = bundle.name();
    first_success(
        precedence,
        || store.load(name),
        || profiles::lookup(name),
        || bundle.declared_perms(),
    )
}

/// Tries the sources in precedence order, returning the first success.
fn first_success<T, C, D>(precedence: Precedence, trusted: T, catalog: C, declared: D) -> Result<Perms>
where
    T: FnOnce() -> Result<Perms>,
    C: FnOnce() -> Result<Perms>,
    D: FnOnce() -> Result<Perms>,
{
    let curated = match precedence {
        Precedence::TrustedFirst => trusted().or_else(|e| {
            tracing::debug!(error = %e, "no persisted profile");
            catalog()
        }),
        Precedence::CatalogFirst => catalog().or_else(|e| {
            tracing::debug!(error = %e, "no catalog entry");
            trusted()
        }),
    };
    curated.or_else(|e| {
        tracing::debug!(error = %e, "falling back to bundle declaration");
        declared()
    })
}
