//! CLI for the chains bundle sandbox.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod run;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chains::{Bundle, Config, Perms, TrustStore};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing_subscriber::EnvFilter;

/// Usage: `chains [OPTIONS] BUNDLE [ARG...]`
#[derive(Parser)]
#[command(
    name = "chains",
    version,
    about = "Run application bundles in a least-privilege bubblewrap sandbox"
)]
struct Cli {
    /// Bundle to open.
    #[arg(required_unless_present = "completion")]
    bundle: Option<PathBuf>,

    /// Arguments passed to the bundle's entry point.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Print the effective permissions and exit.
    #[arg(long)]
    list_perms: bool,

    /// Output format for --list-perms.
    #[arg(long, default_value = "table")]
    format: OutputFormat,

    /// Log progress to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Write the bundle icon to FILE and exit.
    #[arg(long, value_name = "FILE", conflicts_with = "extract_thumbnail")]
    extract_icon: Option<PathBuf>,

    /// Write the bundle thumbnail to FILE and exit.
    #[arg(long, value_name = "FILE")]
    extract_thumbnail: Option<PathBuf>,

    /// Trust (`true`) or revoke (`false`) the bundle, then exit.
    #[arg(long, value_name = "BOOL")]
    trust: Option<bool>,

    /// Run an untrusted bundle this once without persisting trust.
    #[arg(long)]
    trust_once: bool,

    #[command(flatten)]
    overrides: run::Overrides,

    /// Generate shell completion scripts.
    #[arg(long, value_name = "SHELL", hide = true, exclusive = true)]
    completion: Option<Shell>,
}

/// Output format for --list-perms.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.dispatch() {
        eprintln!("chains: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        if let Some(shell) = self.completion {
            clap_complete::generate(shell, &mut Self::command(), "chains", &mut std::io::stdout());
            return Ok(());
        }
        let Some(path) = self.bundle.as_deref() else {
            anyhow::bail!("no bundle given");
        };

        let config = Config::from_env().context("config")?;
        let store = TrustStore::from_config(&config);
        let mut bundle = Bundle::open(path).context("open")?;

        if let Some(out) = &self.extract_icon {
            return extract(out, bundle.icon()).context("extract icon");
        }
        if let Some(out) = &self.extract_thumbnail {
            return extract(out, bundle.thumbnail()).context("extract thumbnail");
        }
        if let Some(trusted) = self.trust {
            return set_trust(&store, &bundle, trusted).context("trust");
        }

        let perms = self
            .overrides
            .permissions(&bundle, &store, &config)
            .context("permissions")?;
        if self.list_perms {
            return list_perms(&perms, self.format);
        }

        if !store.is_trusted(bundle.name(), bundle.path()) && !self.trust_once {
            anyhow::bail!(
                "untrusted: {} has no trusted profile; run `chains --trust true {}` or pass --trust-once",
                bundle.name(),
                path.display()
            );
        }

        let active = Arc::new(Mutex::new(None));
        unmount_on_signal(Arc::clone(&active)).context("signals")?;
        self.overrides.apply_dirs(&mut bundle);
        run::launch(&mut bundle, &perms, &self.args, &active)
    }
}

fn extract(out: &Path, data: chains::Result<Vec<u8>>) -> Result<()> {
    std::fs::write(out, data?)?;
    println!("{}", out.display());
    Ok(())
}

fn set_trust(store: &TrustStore, bundle: &Bundle, trusted: bool) -> Result<()> {
    if trusted {
        store.trust(bundle)?;
        println!("trusted {}", bundle.name());
    } else {
        store.revoke(bundle.name())?;
        println!("revoked {}", bundle.name());
    }
    Ok(())
}

fn list_perms(perms: &Perms, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(perms)?);
        return Ok(());
    }

    let join = |items: Vec<String>| {
        if items.is_empty() {
            "none".to_owned()
        } else {
            items.join(", ")
        }
    };
    println!("level:    {}", perms.level());
    println!("files:    {}", join(perms.files().iter().map(ToString::to_string).collect()));
    println!("devices:  {}", join(perms.devices().to_vec()));
    println!("sockets:  {}", join(perms.sockets().iter().map(ToString::to_string).collect()));
    println!("data dir: {}", perms.persist_home);
    Ok(())
}

/// Unmounts the active bundle and exits on SIGINT or SIGTERM.
fn unmount_on_signal(active: Arc<Mutex<Option<PathBuf>>>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            if let Ok(guard) = active.lock()
                && let Some(dir) = guard.as_deref()
                && let Err(e) = chains::mount::unmount(dir)
            {
                tracing::warn!(dir = %dir.display(), error = %e, "cleanup unmount failed");
            }
            std::process::exit(128 + sig);
        }
    });
    Ok(())
}
