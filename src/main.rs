use stripsel::cli::Args;
use stripsel::config::{self, PathConfig, Settings};
use stripsel::core::{CoreSelection, EventBus};
use stripsel::script::{self, Script};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;

fn init_logging(args: &Args, settings: &Settings, path_config: &PathConfig) -> Result<()> {
    // -v flags win over the settings file: 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = settings.effective_log_level(args.verbosity);

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::config_file(config::LOG_FILE, path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = log_level.as_str().to_lowercase();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    // Settings come first: they carry the default log level
    let settings_path = config::config_file(config::SETTINGS_FILE, &path_config);
    let loaded = Settings::load(&settings_path);
    let settings = loaded.as_ref().cloned().unwrap_or_default();

    init_logging(&args, &settings, &path_config)?;
    debug!("Command-line args: {:?}", args);
    info!("Settings path: {}", settings_path.display());
    if let Err(e) = &loaded {
        warn!("{:#}, using defaults", e);
    }
    if args.save_settings {
        settings.save(&settings_path)?;
    }

    let script = match &args.script {
        Some(path) => Script::load(path)?,
        None => {
            info!("No script given, running demo session");
            Script::parse(script::DEMO_SCRIPT)?
        }
    };

    let core = Arc::new(CoreSelection::with_events(EventBus::with_queue_limit(settings.event_queue_limit)));
    let report = script::run(&script, core, settings.prune_after_ops)?;

    if args.json || settings.output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.to_text());
    }
    Ok(())
}
