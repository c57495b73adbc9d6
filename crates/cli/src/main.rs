use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use flowcache_engine::{Checksum, EngineConfig, ResultStore, config::CACHE_DIR_ENV};
use tracing::debug;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    let cache_dir_override = matches.get_one::<String>("cache-dir").map(PathBuf::from);
    let mut config = EngineConfig::load().context("failed to load flowcache configuration")?;
    if let Some(cache_dir) = cache_dir_override {
        config.cache_dir = flowcache_engine::config::expand_tilde(&cache_dir);
    }
    debug!(cache_dir = %config.cache_dir.display(), "using result store");

    match matches.subcommand() {
        Some(("list", _)) => list_records(&config),
        Some(("show", sub)) => show_record(&config, sub),
        Some(("config", _)) => {
            print!("{}", config.to_yaml().context("failed to render configuration")?);
            Ok(())
        }
        _ => {
            build_cli().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = log_subscriber(filter).try_init();
}

fn log_subscriber(filter: String) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).finish()
}

fn build_cli() -> Command {
    Command::new("flowcache")
        .about("Inspect a flowcache result store")
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .global(true)
                .action(ArgAction::Set)
                .help(format!("Result store root (overrides {CACHE_DIR_ENV} and the config file)")),
        )
        .subcommand(Command::new("list").about("List stored results by checksum"))
        .subcommand(
            Command::new("show")
                .about("Print one stored result as JSON")
                .arg(Arg::new("checksum").required(true).action(ArgAction::Set).help("Task checksum, e.g. FunctionTask_3fa9...")),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as YAML"))
}

fn list_records(config: &EngineConfig) -> Result<()> {
    let store = config.open_store();
    let checksums = store
        .list()
        .with_context(|| format!("failed to list results under {}", config.cache_dir.display()))?;
    if checksums.is_empty() {
        println!("No results stored under {}", config.cache_dir.display());
        return Ok(());
    }

    for checksum in checksums {
        let Some(record) = store.load(&checksum).with_context(|| format!("failed to read result {checksum}"))? else {
            continue;
        };
        let status = if record.errored() { "errored" } else { "ok" };
        let fields = record
            .output()
            .map(|bundle| bundle.fields.iter().map(|field| field.name.as_str()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        println!("{checksum}\t{status}\t{}\t{fields}", record.created_at().to_rfc3339());
    }
    Ok(())
}

fn show_record(config: &EngineConfig, matches: &ArgMatches) -> Result<()> {
    let raw = matches.get_one::<String>("checksum").context("checksum is required")?;
    let checksum = Checksum::new(raw.trim());
    let record = config
        .open_store()
        .load(&checksum)
        .with_context(|| format!("failed to read result {checksum}"))?
        .with_context(|| format!("no result stored for {checksum} under {}", config.cache_dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn log_filter_controls_debug_events() {
        let verbose = tracing::subscriber::with_default(log_subscriber("debug".into()), || tracing::enabled!(Level::DEBUG));
        assert!(verbose);

        let quiet = tracing::subscriber::with_default(log_subscriber("info".into()), || tracing::enabled!(Level::DEBUG));
        assert!(!quiet);
    }

    #[test]
    fn show_requires_a_checksum() {
        assert!(build_cli().try_get_matches_from(["flowcache", "show"]).is_err());
        let matches = build_cli()
            .try_get_matches_from(["flowcache", "show", "FunctionTask_abc", "--cache-dir", "/tmp/cache"])
            .expect("matches");
        assert_eq!(matches.get_one::<String>("cache-dir").map(String::as_str), Some("/tmp/cache"));
    }
}
