use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("You must supply a host option (-h, --host)")]
    MissingHost,
    #[error("host {host:?} is not an absolute http(s) URL: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("Please provide authorization credentials to contact the pages api (-a, --auth)")]
    MissingCredentials,
    #[error("credentials must be of the form user:pass")]
    MalformedCredentials,
    #[error("concurrency must be at least 1 (got {value})")]
    InvalidConcurrency { value: usize },
}

/// Settings handed over by the command-line layer, not yet validated.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub host: Option<String>,
    pub credentials: Option<String>,
    /// `None` selects a dry run.
    pub output_dir: Option<PathBuf>,
    pub clean: bool,
    /// Working directory; relative output paths resolve against it and it is
    /// never removed by `clean`.
    pub source_dir: PathBuf,
    pub concurrency: usize,
}

impl ExportConfig {
    pub fn new(source_dir: PathBuf) -> Self {
        Self {
            host: None,
            credentials: None,
            output_dir: None,
            clean: false,
            source_dir,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Check the configuration and stamp the start of a run. Performs no I/O.
    pub fn validate(&self) -> Result<ExportRun, ConfigError> {
        let raw_host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingHost)?;
        let host = parse_host(raw_host)?;

        let credentials = self
            .credentials
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingCredentials)
            .and_then(Credentials::parse)?;

        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency,
            });
        }

        let output_dir = self
            .output_dir
            .as_ref()
            .map(|dir| self.source_dir.join(dir));

        Ok(ExportRun {
            host,
            credentials,
            output_dir,
            clean: self.clean,
            source_dir: self.source_dir.clone(),
            concurrency: self.concurrency,
            started_at: Instant::now(),
        })
    }
}

fn parse_host(raw: &str) -> Result<Url, ConfigError> {
    let host = Url::parse(raw).map_err(|err| ConfigError::InvalidHost {
        host: raw.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(host.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidHost {
            host: raw.to_string(),
            reason: format!("unsupported scheme {}", host.scheme()),
        });
    }
    Ok(host)
}

/// Basic-auth credentials for the pages API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Parse `user:pass`. The user must be non-empty; everything after the
    /// first `:` is the password.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (user, password) = raw
            .split_once(':')
            .ok_or(ConfigError::MalformedCredentials)?;
        if user.is_empty() {
            return Err(ConfigError::MalformedCredentials);
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// A validated export invocation. Lives for one run only.
#[derive(Debug, Clone)]
pub struct ExportRun {
    pub host: Url,
    pub credentials: Credentials,
    pub output_dir: Option<PathBuf>,
    pub clean: bool,
    pub source_dir: PathBuf,
    pub concurrency: usize,
    pub started_at: Instant,
}

impl ExportRun {
    pub fn is_dry_run(&self) -> bool {
        self.output_dir.is_none()
    }

    /// Output directory to remove before writing, if any.
    pub fn dir_to_clean(&self) -> Option<&PathBuf> {
        self.output_dir.as_ref().filter(|_| self.clean)
    }
}
