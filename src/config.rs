use std::{path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, ArgAction, Parser};
use thiserror::Error;

use crate::{
    alphavantage::api_caller::{self, FetchSettings, OutputSize, SeriesFunction},
    retry::RetryPolicy,
    store::{ConflictPolicy, DatabaseTarget},
    symbols::{self, SymbolsError},
};

// Command-line arguments. Every option falls back to an environment variable,
// so the normal invocation takes no arguments at all.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct Args {
    /// postgres://, postgresql:// or sqlite: URL.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "ALPHAVANTAGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Comma separated symbols.
    #[arg(long, env = "SYMBOLS")]
    pub symbols: Option<String>,

    /// File with one symbol per line; takes precedence over --symbols.
    #[arg(long, env = "SYMBOLS_FILE")]
    pub symbols_file: Option<PathBuf>,

    /// Project named in the routing option of pooled PostgreSQL endpoints.
    #[arg(long, env = "DATABASE_PROJECT_ID")]
    pub database_project_id: Option<String>,

    #[arg(long, env = "DATABASE_SCHEMA", default_value = "tickervista")]
    pub database_schema: String,

    #[arg(long, env = "ALPHAVANTAGE_BASE_URL", default_value = api_caller::BASE_URL)]
    pub base_url: String,

    #[arg(long, env = "ALPHAVANTAGE_FUNCTION", value_enum, ignore_case = true,
          default_value_t = SeriesFunction::DailyAdjusted)]
    pub function: SeriesFunction,

    #[arg(long, env = "ALPHAVANTAGE_OUTPUTSIZE", value_enum, ignore_case = true,
          default_value_t = OutputSize::Compact)]
    pub output_size: OutputSize,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 60)]
    pub http_timeout_secs: u64,

    /// Pause between symbols, to stay under the per-minute call allowance.
    #[arg(long, env = "SYMBOL_DELAY_SECS", default_value_t = 15)]
    pub symbol_delay_secs: u64,

    #[arg(long, env = "FETCH_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "ON_CONFLICT", value_enum, ignore_case = true,
          default_value_t = ConflictPolicy::Update)]
    pub on_conflict: ConflictPolicy,

    #[arg(long, env = "SOURCE_LABEL", default_value = "alphavantage")]
    pub source_label: String,

    /// Exit non-zero when any symbol was skipped. The variable accepts
    /// 1/0, yes/no, on/off and true/false.
    #[arg(long, env = "FAIL_ON_SKIP", action = ArgAction::SetTrue,
          value_parser = BoolishValueParser::new())]
    pub fail_on_skip: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("unsupported DATABASE_URL; expected postgres://, postgresql:// or sqlite:")]
    UnsupportedDatabase,
    #[error("invalid DATABASE_SCHEMA '{0}': use letters, digits and underscores")]
    InvalidSchema(String),
    #[error("FETCH_MAX_ATTEMPTS must be at least 1")]
    InvalidAttempts,
    #[error(transparent)]
    Symbols(#[from] SymbolsError),
}

/// Validated settings for one run, built once in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseTarget,
    pub database_project_id: Option<String>,
    pub database_schema: String,
    pub symbols: Vec<String>,
    pub fetch: FetchSettings,
    pub symbol_delay: Duration,
    pub on_conflict: ConflictPolicy,
    pub fail_on_skip: bool,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let database_url = required(args.database_url, "DATABASE_URL")?;
        let api_key = required(args.api_key, "ALPHAVANTAGE_API_KEY")?;
        let database = DatabaseTarget::parse(&database_url).ok_or(ConfigError::UnsupportedDatabase)?;

        if !is_identifier(&args.database_schema) {
            return Err(ConfigError::InvalidSchema(args.database_schema));
        }
        if args.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }

        let symbols = match (&args.symbols_file, &args.symbols) {
            (Some(path), _) => symbols::read_symbols_from_file(path)?,
            (None, Some(list)) => {
                let parsed = symbols::parse_symbol_list(list);
                if parsed.is_empty() {
                    log::warn!("SYMBOLS is empty, using the default list");
                    symbols::default_symbols()
                } else {
                    parsed
                }
            }
            (None, None) => symbols::default_symbols(),
        };

        Ok(Config {
            database,
            database_project_id: args.database_project_id.filter(|p| !p.trim().is_empty()),
            database_schema: args.database_schema,
            symbols,
            fetch: FetchSettings {
                base_url: args.base_url,
                api_key,
                function: args.function,
                output_size: args.output_size,
                source_label: args.source_label,
                timeout: Duration::from_secs(args.http_timeout_secs),
                retry: RetryPolicy::with_max_attempts(args.max_attempts),
            },
            symbol_delay: Duration::from_secs(args.symbol_delay_secs),
            on_conflict: args.on_conflict,
            fail_on_skip: args.fail_on_skip,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
