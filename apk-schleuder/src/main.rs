use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use apk_schleuder::{Catalog, RunReport, Schleuder, load_config};
use clap::{Parser, Subcommand};
use prettytable::{Table, format, row};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(short, long, default_value = "apk_schleuder.yaml")]
    config: PathBuf,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Default, Subcommand)]
enum Commands {
    /// Update, verify and print the status table
    #[default]
    Run,
    /// Fetch newer packages
    Update,
    /// Re-verify the catalogued packages
    Verify,
    /// Print the catalog
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[!] {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load `{}`", cli.config.display()))?;
    let schleuder = Schleuder::from_config(config)?;

    match cli.command.unwrap_or_default() {
        Commands::Run => {
            print_report("Update", &schleuder.update().await?);
            print_report("Verify", &schleuder.verify().await?);
            print_status(&schleuder.status()?);
        }
        Commands::Update => print_report("Update", &schleuder.update().await?),
        Commands::Verify => print_report("Verify", &schleuder.verify().await?),
        Commands::Status => print_status(&schleuder.status()?),
    }
    Ok(())
}

fn print_report(title: &str, report: &RunReport) {
    println!("{title}:");
    for (app, status) in report.iter() {
        println!(" - {app}: {status}");
    }
}

fn print_status(catalog: &Catalog) {
    status_table(catalog).printstd();
}

fn status_table(catalog: &Catalog) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.set_titles(row!("NAME", "VERSION", "SOURCE", "FILE"));
    for (app, entry) in catalog.entries() {
        let source = entry.source.as_deref().unwrap_or("-");
        let file = entry
            .file
            .as_ref()
            .map_or_else(|| "-".to_string(), |file| file.display().to_string());
        table.add_row(row!(app, entry.version, source, file));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use apk_schleuder::Version;

    #[test]
    fn status_table_lists_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("wire.apk");
        std::fs::write(&apk, b"apk").unwrap();
        let mut catalog = Catalog::load_for(dir.path().join("db.json"), ["wire", "vlc"]).unwrap();
        catalog.record("wire", Version::parse("3.82.38").unwrap(), "wire.com", apk.clone());

        let rendered = status_table(&catalog).to_string();
        let lines: Vec<Vec<&str>> = rendered
            .lines()
            .map(|line| line.split_whitespace().collect())
            .filter(|cells: &Vec<&str>| !cells.is_empty())
            .collect();

        assert_eq!(lines[0], vec!["NAME", "VERSION", "SOURCE", "FILE"]);
        assert_eq!(lines[1], vec!["vlc", "0.0.0", "-", "-"]);
        let wire = apk.display().to_string();
        assert_eq!(lines[2], vec!["wire", "3.82.38", "wire.com", wire.as_str()]);
    }
}
