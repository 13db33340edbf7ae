//! Configuration for the coach
//!
//! CLI arguments with environment fallbacks (a `.env` file is loaded first),
//! resolved once into a `CoachConfig` that the constructors take.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::anthropic::{AnthropicClient, CLAUDE_HAIKU, CLAUDE_SONNET};
use crate::db::{CoachStore, SqliteStore};
use crate::error::CoachError;
use crate::gemini::{GeminiClient, GEMINI_FLASH, GEMINI_FLASH_OLD};
use crate::llm::{ModelClient, ModelRoute, ModelRouter};
use crate::sheet::SheetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Sqlite,
    Sheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Gemini,
    Anthropic,
}

/// Coach - a conversational habit and goal tracker
#[derive(Parser, Debug, Clone)]
#[command(name = "coach")]
#[command(about = "Log workouts, meals and work in plain text, plan the day with a model")]
pub struct Args {
    /// Storage backend
    #[arg(long, env = "COACH_BACKEND", value_enum, default_value_t = Backend::Sqlite)]
    pub backend: Backend,

    /// Database file (SQLite) or workbook file (sheet). Defaults to coach.db / coach.json
    #[arg(long, env = "COACH_DB")]
    pub db: Option<PathBuf>,

    /// Markdown profile the model keeps up to date
    #[arg(long, env = "COACH_PROFILE", default_value = "user_profile.md")]
    pub profile: PathBuf,

    /// Directory for daily log files
    #[arg(long, env = "COACH_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Model provider
    #[arg(long, env = "COACH_PROVIDER", value_enum, default_value_t = Provider::Gemini)]
    pub provider: Provider,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Model tried first (provider default when unset)
    #[arg(long, env = "COACH_PRIMARY_MODEL")]
    pub primary_model: Option<String>,

    /// Older model tried once after the primary gives up
    #[arg(long, env = "COACH_FALLBACK_MODEL")]
    pub fallback_model: Option<String>,

    /// Attempts on the primary model
    #[arg(long, env = "COACH_MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Pause between attempts on the primary model
    #[arg(long, env = "COACH_RETRY_DELAY_MS", default_value = "2000")]
    pub retry_delay_ms: u64,

    /// Per-attempt timeout
    #[arg(long, env = "COACH_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,

    /// Chat turns included in each prompt
    #[arg(long, env = "COACH_HISTORY_WINDOW", default_value = "10")]
    pub history_window: usize,
}

#[derive(Debug, Clone)]
pub struct CoachConfig {
    pub backend: Backend,
    pub db_path: PathBuf,
    pub profile_path: PathBuf,
    pub log_dir: PathBuf,
    pub provider: Provider,
    pub api_key: String,
    pub routes: Vec<ModelRoute>,
    pub retry_delay: Duration,
    pub history_window: usize,
}

impl CoachConfig {
    pub fn from_args(args: Args) -> Result<Self, CoachError> {
        let (key, key_var, default_primary, default_fallback) = match args.provider {
            Provider::Gemini => (args.gemini_api_key, "GEMINI_API_KEY", GEMINI_FLASH, GEMINI_FLASH_OLD),
            Provider::Anthropic => (args.anthropic_api_key, "ANTHROPIC_API_KEY", CLAUDE_SONNET, CLAUDE_HAIKU),
        };
        let api_key = key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| CoachError::Config(format!("{} is not set", key_var)))?;

        if args.max_attempts == 0 {
            return Err(CoachError::Config("COACH_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let timeout = Duration::from_secs(args.timeout_secs.max(1));
        let primary = args.primary_model.unwrap_or_else(|| default_primary.to_string());
        let fallback = args.fallback_model.unwrap_or_else(|| default_fallback.to_string());

        let mut routes = vec![ModelRoute::new(&primary, timeout, args.max_attempts)];
        if !fallback.is_empty() && fallback != primary {
            routes.push(ModelRoute::new(&fallback, timeout, 1));
        }

        let db_path = args.db.unwrap_or_else(|| match args.backend {
            Backend::Sqlite => PathBuf::from("coach.db"),
            Backend::Sheet => PathBuf::from("coach.json"),
        });

        Ok(Self {
            backend: args.backend,
            db_path,
            profile_path: args.profile,
            log_dir: args.log_dir,
            provider: args.provider,
            api_key,
            routes,
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            history_window: args.history_window,
        })
    }

    pub fn open_store(&self) -> Result<Arc<dyn CoachStore>, CoachError> {
        Ok(match self.backend {
            Backend::Sqlite => Arc::new(SqliteStore::open(&self.db_path)?),
            Backend::Sheet => Arc::new(SheetStore::open(&self.db_path)?),
        })
    }

    pub fn model_router(&self) -> Result<ModelRouter, CoachError> {
        let http_error = |e: reqwest::Error| CoachError::Config(format!("could not build HTTP client: {}", e));
        let client: Arc<dyn ModelClient> = match self.provider {
            Provider::Gemini => Arc::new(GeminiClient::new(&self.api_key).map_err(http_error)?),
            Provider::Anthropic => Arc::new(AnthropicClient::new(&self.api_key).map_err(http_error)?),
        };
        Ok(ModelRouter::new(client, self.routes.clone(), self.retry_delay))
    }
}
