use std::path::PathBuf;

use anyhow::Context;
use hypernote_sync::config::{ConfigStore, SyncSettings};
use hypernote_sync::sync::SyncEngine;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Sync,
    Status,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    mode: CliMode,
    notes_dir: Option<PathBuf>,
    folder: Option<String>,
    strict: bool,
    json: bool,
}

fn parse_cli<I>(args: I) -> anyhow::Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions {
        mode: CliMode::Sync,
        notes_dir: None,
        folder: None,
        strict: false,
        json: false,
    };
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--notes-dir" => {
                let value = args.next().context("--notes-dir needs a path")?;
                options.notes_dir = Some(PathBuf::from(value));
            }
            "--folder" => {
                let value = args.next().context("--folder needs a name")?;
                options.folder = Some(value);
            }
            "--strict" => options.strict = true,
            "--json" => options.json = true,
            "--status" => options.mode = CliMode::Status,
            "--help" | "-h" => options.mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(options)
}

fn print_help() {
    println!("Usage: hypernote-sync [--notes-dir PATH] [--folder NAME] [--strict] [--json]");
    println!("       hypernote-sync --status");
    println!("  --notes-dir PATH  Local notes directory (default ~/Documents/Hypernote)");
    println!("  --folder NAME     Remote sync folder name (default Hypernote)");
    println!("  --strict          Exit non-zero when any file fails to transfer");
    println!("  --json            Print the sync report as JSON");
    println!("  --status          Show stored drive configuration and exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = parse_cli(std::env::args())?;
    if options.mode == CliMode::Help {
        print_help();
        return Ok(());
    }

    let config_store = ConfigStore::from_env()?;
    if options.mode == CliMode::Status {
        let status = config_store
            .status()
            .await
            .with_context(|| format!("failed to read {}", config_store.path().display()))?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let stored = config_store
        .load()
        .await
        .with_context(|| format!("failed to read {}", config_store.path().display()))?;
    let mut settings = SyncSettings::from_env(&stored)?;
    if let Some(notes_dir) = options.notes_dir {
        settings.notes_dir = notes_dir;
    }
    if let Some(folder) = options.folder {
        settings.sync_folder_name = folder;
    }

    tokio::fs::create_dir_all(&settings.notes_dir)
        .await
        .with_context(|| format!("failed to create {}", settings.notes_dir.display()))?;
    let engine = SyncEngine::from_settings(&settings)?;
    let report = engine
        .sync(&settings.notes_dir)
        .await
        .context("drive sync failed")?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Sync complete. Uploaded: {}, Downloaded: {}",
            report.uploaded.len(),
            report.downloaded.len()
        );
        for error in &report.errors {
            println!("  {error}");
        }
    }

    if options.strict && !report.is_clean() {
        anyhow::bail!("{} file(s) failed to sync", report.errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        std::iter::once("hypernote-sync")
            .chain(items.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults_to_sync() {
        let options = parse_cli(args(&[])).unwrap();
        assert_eq!(options.mode, CliMode::Sync);
        assert!(!options.strict && !options.json);
        assert_eq!(options.notes_dir, None);
    }

    #[test]
    fn parses_sync_flags() {
        let options = parse_cli(args(&[
            "--notes-dir",
            "/tmp/notes",
            "--folder",
            "Vault",
            "--strict",
            "--json",
        ]))
        .unwrap();
        assert_eq!(options.notes_dir, Some(PathBuf::from("/tmp/notes")));
        assert_eq!(options.folder.as_deref(), Some("Vault"));
        assert!(options.strict && options.json);
    }

    #[test]
    fn parses_status_and_help() {
        assert_eq!(parse_cli(args(&["--status"])).unwrap().mode, CliMode::Status);
        assert_eq!(parse_cli(args(&["-h"])).unwrap().mode, CliMode::Help);
    }

    #[test]
    fn rejects_unknown_or_incomplete_arguments() {
        assert!(parse_cli(args(&["--bogus"])).is_err());
        assert!(parse_cli(args(&["--notes-dir"])).is_err());
    }
}
