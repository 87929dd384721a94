//! Least-privilege sandboxing for self-contained application bundles.
//!
//! `chains` opens an AppImage-style bundle, reads the permissions it
//! declares (or a curated/persisted replacement), and compiles them into a
//! [bubblewrap] invocation that exposes only what was granted.
//!
//! # Quick start
//!
//! ```no_run
//! use chains::{Bundle, Config, HostContext, TrustStore};
//!
//! let config = Config::from_env()?;
//! let store = TrustStore::from_config(&config);
//!
//! let mut bundle = Bundle::open("Krita.AppImage")?;
//! let perms = chains::resolve(&bundle, &store, config.precedence)?;
//!
//! bundle.mount(None)?;
//! chains::sandbox::run(&bundle, &perms, &HostContext::detect()?, &[])?;
//! bundle.destroy()?;
//! # Ok::<(), chains::Error>(())
//! ```
//!
//! Mounting and running need `squashfuse` and `bwrap`, looked up next to
//! the current executable first and on `$PATH` second (see [`Tool`]).
//!
//! [bubblewrap]: https://github.com/containers/bubblewrap

mod bundle;
mod config;
pub mod desktop;
mod error;
pub mod format;
pub mod mount;
mod payload;
mod perms;
pub mod policy;
pub mod profiles;
mod resolve;
pub mod sandbox;
mod tools;
mod trust;
pub mod xdg;

pub use bundle::{Bundle, location_hash};
pub use config::{Config, HOME_ENV, PREFER_CATALOG_ENV};
pub use desktop::DesktopEntry;
pub use error::{Error, Result};
pub use format::BundleType;
pub use perms::{FileGrant, Mode, Perms, Socket, UNSET_LEVEL};
pub use policy::{BindKind, Directive, HostContext, Namespace, Policy, Target, compile};
pub use resolve::{Precedence, resolve};
pub use tools::Tool;
pub use trust::TrustStore;
pub use xdg::HostDirs;
