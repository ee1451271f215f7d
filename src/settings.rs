//! Runtime settings, read through the `config` crate from an optional file
//! and `EXHIBIT_*` environment variables.

use std::fmt;
use std::str::FromStr;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{ExhibitError, Result};

// ------------- Error policy -------------
/// What the context does with an error surfacing from an evaluation or
/// a facet update. One policy applies to the whole exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Return the error to the caller untouched.
    Throw,
    /// Log the error, then return it.
    #[default]
    LogAndThrow,
    /// Log the error and carry on.
    Log,
}

impl FromStr for ErrorPolicy {
    type Err = ExhibitError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "throw" => Ok(ErrorPolicy::Throw),
            "log-and-throw" => Ok(ErrorPolicy::LogAndThrow),
            "log" => Ok(ErrorPolicy::Log),
            other => Err(ExhibitError::UnknownTag { kind: "error policy", name: other.to_string() }),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorPolicy::Throw => "throw",
            ErrorPolicy::LogAndThrow => "log-and-throw",
            ErrorPolicy::Log => "log",
        };
        write!(f, "{}", name)
    }
}

/// Applies an [`ErrorPolicy`] to results. `Log` turns an error into `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorReporter {
    policy: ErrorPolicy,
}

impl ErrorReporter {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }
    pub fn report<T>(&self, context: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match self.policy {
                ErrorPolicy::Throw => Err(e),
                ErrorPolicy::LogAndThrow => {
                    error!(error = %e, %context, "exhibit error");
                    Err(e)
                }
                ErrorPolicy::Log => {
                    error!(error = %e, %context, "exhibit error (ignored)");
                    Ok(None)
                }
            },
        }
    }
}

// ------------- Settings -------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub errors: ErrorPolicy,
    pub text_search_delay_ms: u64,
    pub numeric_interval: f64,
    pub alpha_interval: usize,
    pub base_uri: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            errors: ErrorPolicy::default(),
            text_search_delay_ms: 500,
            numeric_interval: 10.0,
            alpha_interval: 7,
            base_uri: "http://localhost/".to_string(),
        }
    }
}

impl Settings {
    /// Merges the optional file at `path` (any format the config crate
    /// recognises by extension) and `EXHIBIT_*` variables over the defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("EXHIBIT").try_parsing(true));
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        debug!(errors = %settings.errors, base_uri = %settings.base_uri, "settings loaded");
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(self.numeric_interval.is_finite() && self.numeric_interval > 0.0) {
            return Err(ExhibitError::Config(format!("numeric_interval must be positive, got {}", self.numeric_interval)));
        }
        if self.alpha_interval == 0 {
            return Err(ExhibitError::Config("alpha_interval must be positive".into()));
        }
        Ok(())
    }

    /// Reads `errors=` from a URL query string such as `?errors=throw&x=1`.
    pub fn apply_url_parameters(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key != "errors" {
                continue;
            }
            let value = urlencoding::decode(value).map(|v| v.into_owned()).unwrap_or_else(|_| value.to_string());
            match value.parse::<ErrorPolicy>() {
                Ok(policy) => self.errors = policy,
                Err(e) => warn!(error = %e, "ignoring errors parameter"),
            }
        }
    }
}
