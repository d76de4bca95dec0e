//! Ssiflow - streaming Server-Side Includes renderer
//!
//! This is the main entry point for the ssiflow CLI.

use clap::{Parser, Subcommand};
use ssiflow_core::config::SsiConfig;
use ssiflow_core::env::Environment;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ssiflow - render Server-Side Includes documents
#[derive(Parser)]
#[command(name = "ssiflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a document through the SSI filter
    Render {
        /// Document to render
        file: PathBuf,

        /// Document root for virtual includes (defaults to the
        /// configured root)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Path to a TOML or JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Upstream chunk size in bytes
        #[arg(long, default_value_t = 65536)]
        chunk_size: usize,

        /// Seed a request variable (NAME=VALUE, repeatable)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Write output here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render with output discarded; exit non-zero on directive errors
    Check {
        /// Document to check
        file: PathBuf,

        #[arg(long)]
        root: Option<PathBuf>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Show version information
    Version,
}

fn load_config(path: Option<&PathBuf>, root: Option<PathBuf>) -> anyhow::Result<SsiConfig> {
    let mut config = match path {
        Some(p) => SsiConfig::from_file(p)?,
        None => SsiConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

fn parse_vars(vars: &[String]) -> Environment {
    let mut env = Environment::new();
    for spec in vars {
        match spec.split_once('=') {
            Some((name, value)) => env.set(name, value),
            None => env.set(spec.as_str(), ""),
        }
    }
    env
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Commands::Render {
            file,
            root,
            config,
            chunk_size,
            vars,
            output,
        } => {
            let config = load_config(config.as_ref(), root)?;
            let env = parse_vars(&vars);
            let outcome = ssiflow::render_document(&file, config, env, chunk_size).await?;

            match output {
                Some(path) => std::fs::write(path, &outcome.body)?,
                None => std::io::stdout().write_all(&outcome.body)?,
            }
            if outcome.had_errors {
                tracing::warn!("document rendered with directive errors");
            }
        }

        Commands::Check { file, root, config, vars } => {
            let config = load_config(config.as_ref(), root)?;
            let env = parse_vars(&vars);
            let outcome = ssiflow::render_document(&file, config, env, 65536).await?;
            if outcome.had_errors {
                eprintln!("{}: directive errors", file.display());
                std::process::exit(1);
            }
            println!("{}: ok", file.display());
        }

        Commands::Version => {
            println!("ssiflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn var_parsing() {
        let env = parse_vars(&["A=1".to_string(), "B=x=y".to_string(), "C".to_string()]);
        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("x=y"));
        assert_eq!(env.get("C"), Some(""));
    }
}
