//! camli-ctl: command-line client for a camli blob store.

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};

use camli_core::CamliConfig;

/// Settings shared by every command, after flags are applied.
pub struct Options {
    pub config: CamliConfig,
    pub config_path: PathBuf,
    pub dry_run: bool,
    pub json: bool,
}

fn print_usage() {
    println!("Usage: camli-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  upload <paths..>    Upload files (directories are walked)");
    println!("  hash <paths..>      Print the content reference of each file");
    println!("  discover            Run the discovery handshake and show the result");
    println!("  stats               Show blob count and size on the server");
    println!("  config              Write the default config if missing and show it");
    println!();
    println!("Options:");
    println!("  --config <path>     Config file (default: $CAMLI_CONFIG or ~/.config/camli/config.toml)");
    println!("  --url <url>         Blob server URL");
    println!("  --digest <name>     sha224 or blake3");
    println!("  --concurrency <n>   Simultaneous reads/uploads");
    println!("  --dry-run           Upload into an in-memory store instead of the server");
    println!("  --json              One JSON object per outcome");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = CamliConfig::file_path();
    let mut url = None;
    let mut digest = None;
    let mut concurrency = None;
    let mut dry_run = false;
    let mut json = false;
    let mut remaining: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).context("--config requires a path")?.into();
            }
            "--url" => {
                i += 1;
                url = Some(args.get(i).context("--url requires a value")?.clone());
            }
            "--digest" => {
                i += 1;
                digest = Some(args.get(i).context("--digest requires a name")?.clone());
            }
            "--concurrency" => {
                i += 1;
                concurrency = Some(
                    args.get(i)
                        .context("--concurrency requires a value")?
                        .parse::<u32>()
                        .context("--concurrency must be a number")?,
                );
            }
            "--dry-run" => dry_run = true,
            "--json" => json = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let mut config = CamliConfig::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(url) = url {
        config.store.url = url;
    }
    if let Some(digest) = digest {
        config.upload.digest = digest;
    }
    if let Some(n) = concurrency {
        config.upload.concurrency = n;
    }

    let opts = Options {
        config,
        config_path,
        dry_run,
        json,
    };

    match remaining.as_slice() {
        ["upload", paths @ ..] if !paths.is_empty() => cmd::upload::run(&opts, paths).await,
        ["hash", paths @ ..] if !paths.is_empty() => cmd::hash::run(&opts, paths),
        ["discover"] => cmd::discover::run(&opts).await,
        ["stats"] => cmd::discover::stats(&opts).await,
        ["config"] => cmd::config::run(&opts),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
