//! jsonfs binary
//!
//! Inspect and edit a JSON-backed file tree, or mount it with FUSE.
//!
//! ## Usage
//!
//! ```bash
//! jsonfs --snapshot fs.json init
//! jsonfs --snapshot fs.json mkdir /docs
//! echo hello | jsonfs --snapshot fs.json put /docs/hello.txt
//! jsonfs --snapshot fs.json ls /docs
//! jsonfs --snapshot fs.json cat /docs/hello.txt
//!
//! # Requires --features fuse
//! jsonfs --snapshot fs.json mount /mnt/jsonfs
//! ```

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use jsonfs_core::{FsConfig, FsOps, JsonFs, NodeKind};

#[cfg(feature = "fuse")]
mod mount;

/// In-memory filesystem persisted as a JSON snapshot.
#[derive(Parser, Debug)]
#[command(name = "jsonfs")]
#[command(about = "In-memory filesystem persisted as a JSON snapshot")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot file (overrides the config file)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Start empty when the snapshot does not exist
    #[arg(long)]
    create: bool,

    /// Indent the saved snapshot
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a snapshot holding only an empty root
    Init {
        /// Overwrite an existing snapshot
        #[arg(long)]
        force: bool,
    },
    /// Load the snapshot and print tree statistics
    Check,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print node attributes as JSON
    Stat { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Replace a file's contents with stdin, creating it if needed
    Put { path: String },
    /// Create an empty file
    Touch { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Resize a file
    Truncate { path: String, size: u64 },
    /// Mount the tree with FUSE until Ctrl-C
    Mount { mountpoint: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output, so logs go to stderr
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    run(args.command, config).await
}

fn load_config(args: &Args) -> Result<FsConfig> {
    let mut config = match &args.config {
        Some(path) => FsConfig::load(path)?,
        None => FsConfig::default(),
    };
    if let Some(snapshot) = &args.snapshot {
        config.snapshot = snapshot.clone();
    }
    config.create_if_missing |= args.create;
    config.pretty |= args.pretty;
    Ok(config)
}

async fn run(command: Command, config: FsConfig) -> Result<()> {
    tracing::debug!(?command, snapshot = %config.snapshot.display(), "running");

    match command {
        Command::Init { force } => {
            if config.snapshot.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    config.snapshot.display()
                );
            }
            JsonFs::new(config).flush()?;
        }
        Command::Check => {
            let fs = open(&config)?;
            println!("{}", serde_json::to_string_pretty(&fs.stats())?);
        }
        Command::Ls { path } => {
            for entry in open(&config)?.readdir(&path)?.into_iter().skip(2) {
                let marker = match entry.kind {
                    NodeKind::Directory => "/",
                    NodeKind::File => "",
                };
                println!("{:>6}  {}{}", entry.id, entry.name, marker);
            }
        }
        Command::Stat { path } => {
            let attr = open(&config)?.getattr(&path)?;
            println!("{}", serde_json::to_string_pretty(&attr)?);
        }
        Command::Cat { path } => {
            let data = open(&config)?.read_all(&path)?;
            std::io::stdout().lock().write_all(&data)?;
        }
        Command::Put { path } => {
            let mut data = Vec::new();
            std::io::stdin().lock().read_to_end(&mut data)?;
            edit(&config, |fs| Ok(fs.write_all(&path, &data)?))?;
        }
        Command::Touch { path } => edit(&config, |fs| {
            if !fs.exists(&path) {
                fs.create(&path)?;
            }
            Ok(())
        })?,
        Command::Mkdir { path } => edit(&config, |fs| Ok(fs.mkdir(&path).map(drop)?))?,
        Command::Rm { path } => edit(&config, |fs| Ok(fs.unlink(&path)?))?,
        Command::Rmdir { path } => edit(&config, |fs| Ok(fs.rmdir(&path)?))?,
        Command::Truncate { path, size } => edit(&config, |fs| Ok(fs.truncate(&path, size)?))?,
        Command::Mount { mountpoint } => mount_tree(open(&config)?, mountpoint).await?,
    }
    Ok(())
}

/// Init hook: load the configured snapshot.
fn open(config: &FsConfig) -> Result<JsonFs> {
    JsonFs::init(config.clone())
        .with_context(|| format!("failed to load {}", config.snapshot.display()))
}

/// Load, apply one mutation, then run the teardown hook to save.
fn edit(config: &FsConfig, op: impl FnOnce(&JsonFs) -> Result<()>) -> Result<()> {
    let fs = open(config)?;
    op(&fs)?;
    fs.destroy()?;
    Ok(())
}

#[cfg(feature = "fuse")]
async fn mount_tree(fs: JsonFs, mountpoint: PathBuf) -> Result<()> {
    mount::run(fs, &mountpoint).await
}

#[cfg(not(feature = "fuse"))]
async fn mount_tree(_fs: JsonFs, mountpoint: PathBuf) -> Result<()> {
    bail!(
        "cannot mount {}: built without FUSE support (rebuild with --features fuse)",
        mountpoint.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from(["jsonfs", "-s", "tree.json", "truncate", "/f", "12"])
            .unwrap();
        assert_eq!(args.snapshot, Some(PathBuf::from("tree.json")));
        assert!(matches!(args.command, Command::Truncate { size: 12, .. }));
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "jsonfs", "--snapshot", "x.json", "--create", "--pretty", "check",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.snapshot, PathBuf::from("x.json"));
        assert!(config.create_if_missing);
        assert!(config.pretty);
    }

    #[test]
    fn test_ls_defaults_to_root() {
        let args = Args::try_parse_from(["jsonfs", "ls"]).unwrap();
        assert!(matches!(args.command, Command::Ls { ref path } if path == "/"));
    }

    fn scratch() -> (tempfile::TempDir, FsConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig::with_snapshot(dir.path().join("fs.json"));
        (dir, config)
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let (_dir, config) = scratch();
        run(Command::Init { force: false }, config.clone()).await.unwrap();
        assert!(config.snapshot.exists());
        assert!(run(Command::Init { force: false }, config.clone()).await.is_err());
        run(Command::Init { force: true }, config).await.unwrap();
    }

    #[tokio::test]
    async fn test_mutations_are_saved() {
        let (_dir, config) = scratch();
        run(Command::Init { force: false }, config.clone()).await.unwrap();
        let mkdir = Command::Mkdir {
            path: "/docs".into(),
        };
        run(mkdir, config.clone()).await.unwrap();
        let touch = Command::Touch {
            path: "/docs/a".into(),
        };
        run(touch, config.clone()).await.unwrap();
        let truncate = Command::Truncate {
            path: "/docs/a".into(),
            size: 3,
        };
        run(truncate, config.clone()).await.unwrap();

        let fs = JsonFs::init(config.clone()).unwrap();
        assert_eq!(fs.read_all("/docs/a").unwrap(), vec![0, 0, 0]);

        let rm = Command::Rm {
            path: "/docs/a".into(),
        };
        run(rm, config.clone()).await.unwrap();
        let rmdir = Command::Rmdir {
            path: "/docs".into(),
        };
        run(rmdir, config.clone()).await.unwrap();
        assert_eq!(JsonFs::init(config).unwrap().stats().nodes, 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_snapshot_alone() {
        let (_dir, config) = scratch();
        run(Command::Init { force: false }, config.clone()).await.unwrap();
        let before = std::fs::read(&config.snapshot).unwrap();
        let rm = Command::Rm {
            path: "/missing".into(),
        };
        assert!(run(rm, config.clone()).await.is_err());
        assert_eq!(std::fs::read(&config.snapshot).unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_reported() {
        let (_dir, config) = scratch();
        let err = run(Command::Check, config).await.unwrap_err();
        assert!(err.to_string().contains("failed to load"));
    }
}
