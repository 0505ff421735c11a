use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Replay a mixer selection script and print the resulting selection
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Selection script (JSON). Runs a built-in demo session when omitted
    #[arg(value_name = "SCRIPT")]
    pub script: Option<PathBuf>,

    /// Print the final selection as JSON
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Enable logging to file (default: stripsel.log in the config dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Write the effective settings back to the config file
    #[arg(long = "save-settings")]
    pub save_settings: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from(["stripsel", "ops.json", "-vv", "--json", "-l"]);
        assert_eq!(args.script, Some(PathBuf::from("ops.json")));
        assert_eq!(args.verbosity, 2);
        assert!(args.json);
        assert_eq!(args.log_file, Some(None));
    }

    #[test]
    fn test_log_file_path() {
        let args = Args::parse_from(["stripsel", "--log", "run.log"]);
        assert_eq!(args.log_file, Some(Some(PathBuf::from("run.log"))));
        assert!(args.script.is_none());
    }
}
