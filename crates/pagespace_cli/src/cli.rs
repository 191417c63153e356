//! Command-line definitions for the `pagespace` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pagespace_core::{ExportConfig, DEFAULT_CONCURRENCY};
use pagespace_logging::LogDestination;

pub const BANNER: &str = "P A G E S P A C E: Static Site Generator";

/// Export a Pagespace site as a tree of static files.
#[derive(Parser, Debug)]
#[command(name = "pagespace")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a static copy of every published page.
    // `-h` is the host option here, so only `--help` prints help.
    #[command(name = "static", disable_help_flag = true)]
    Static(StaticArgs),
}

#[derive(Args, Debug)]
pub struct StaticArgs {
    /// Directory to write the site to; omit for a dry run
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Base URL of the running Pagespace instance
    #[arg(short = 'h', long, value_name = "URL")]
    pub host: Option<String>,

    /// Credentials for the pages api
    #[arg(short = 'a', long = "auth", value_name = "USER:PASS")]
    pub auth: Option<String>,

    /// Delete the output directory before writing
    #[arg(short = 'c', long)]
    pub clean: bool,

    /// Log debug output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Pages or resources fetched in parallel
    #[arg(short = 'j', long, value_name = "N", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl StaticArgs {
    pub fn log_destination(&self) -> LogDestination {
        match &self.log_file {
            Some(path) => LogDestination::Both(path.clone()),
            None => LogDestination::Terminal,
        }
    }

    pub fn export_config(&self, source_dir: PathBuf) -> ExportConfig {
        let mut config = ExportConfig::new(source_dir);
        config.host = self.host.clone();
        config.credentials = self.auth.clone();
        config.output_dir = self.output.clone();
        config.clean = self.clean;
        config.concurrency = self.concurrency;
        config
    }

    /// One-line description of the options with the password masked.
    pub fn describe(&self) -> String {
        format!(
            "output={:?} host={:?} auth={:?} clean={} concurrency={} log_file={:?}",
            self.output,
            self.host,
            self.auth.as_deref().map(redact_auth),
            self.clean,
            self.concurrency,
            self.log_file
        )
    }
}

fn redact_auth(auth: &str) -> String {
    match auth.split_once(':') {
        Some((user, _)) => format!("{user}:***"),
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn parse_static(args: &[&str]) -> StaticArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        let Command::Static(args) = cli.command;
        args
    }

    #[test]
    fn short_flags_map_to_options() {
        let args = parse_static(&[
            "pagespace", "static", "-o", "site", "-h", "http://localhost:8080", "-a",
            "admin:secret", "-c", "-v", "-j", "3",
        ]);
        assert_eq!(args.output, Some(PathBuf::from("site")));
        assert_eq!(args.host.as_deref(), Some("http://localhost:8080"));
        assert_eq!(args.auth.as_deref(), Some("admin:secret"));
        assert!(args.clean);
        assert!(args.verbose);
        assert_eq!(args.concurrency, 3);
    }

    #[test]
    fn long_flags_map_to_options() {
        let args = parse_static(&[
            "pagespace",
            "static",
            "--output",
            "out",
            "--host",
            "https://cms.example",
            "--auth",
            "a:b",
            "--clean",
            "--log-file",
            "export.log",
        ]);
        assert_eq!(args.output, Some(PathBuf::from("out")));
        assert!(args.clean);
        assert!(!args.verbose);
        assert_eq!(
            args.log_destination(),
            LogDestination::Both(PathBuf::from("export.log"))
        );
    }

    #[test]
    fn omitted_output_means_dry_run() {
        let args = parse_static(&["pagespace", "static", "-h", "http://x", "-a", "u:p"]);
        let run = args
            .export_config(PathBuf::from("/work"))
            .validate()
            .unwrap();
        assert!(run.is_dry_run());
        assert_eq!(run.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(args.log_destination(), LogDestination::Terminal);
    }

    #[test]
    fn output_is_resolved_against_working_dir() {
        let args = parse_static(&["pagespace", "static", "-o", "site", "-h", "http://x", "-a", "u:p"]);
        let run = args
            .export_config(PathBuf::from("/work"))
            .validate()
            .unwrap();
        assert_eq!(run.output_dir, Some(PathBuf::from("/work/site")));
    }

    #[test]
    fn long_help_is_still_available() {
        let err = Cli::try_parse_from(["pagespace", "static", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn version_flag_shows_version() {
        let err = Cli::try_parse_from(["pagespace", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn missing_subcommand_is_a_usage_error() {
        let err = Cli::try_parse_from(["pagespace"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn describe_masks_the_password() {
        let args = parse_static(&["pagespace", "static", "-a", "admin:top:secret"]);
        let described = args.describe();
        assert!(described.contains("admin:***"), "{described}");
        assert!(!described.contains("secret"), "{described}");
    }
}
