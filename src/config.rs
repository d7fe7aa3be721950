//! Defines the configuration settings for the email-scout application.

use anyhow::Context;
use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which extraction strategy turns page text into email candidates.
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExtractionStrategy {
    /// Regex harvesting of every email-shaped substring.
    #[default]
    Regex,
    /// Ask a text-completion model for the subject's address.
    Oracle,
}

/// Configuration overrides shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ConfigArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "EMAIL_SCOUT_CONFIG")]
    pub config_file: Option<String>,

    /// Maximum number of simultaneous page fetches per subject
    #[arg(short, long, env = "EMAIL_SCOUT_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// HTTP request timeout for page fetches in seconds
    #[arg(long, env = "EMAIL_SCOUT_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Maximum number of search attempts per query
    #[arg(long, env = "EMAIL_SCOUT_SEARCH_ATTEMPTS")]
    pub search_attempts: Option<u32>,

    /// Minimum pause between searches (seconds)
    #[arg(long, env = "EMAIL_SCOUT_MIN_SLEEP")]
    pub min_sleep: Option<f32>,

    /// Maximum pause between searches (seconds)
    #[arg(long, env = "EMAIL_SCOUT_MAX_SLEEP")]
    pub max_sleep: Option<f32>,

    /// Text appended to every search query (e.g. "email")
    #[arg(long, env = "EMAIL_SCOUT_QUERY_SUFFIX")]
    pub query_suffix: Option<String>,

    /// Comma-separated list of domains never fetched
    #[arg(long, env = "EMAIL_SCOUT_EXCLUDED_DOMAINS")]
    pub excluded_domains: Option<String>,

    /// Email extraction strategy
    #[arg(long, value_enum, env = "EMAIL_SCOUT_STRATEGY")]
    pub strategy: Option<ExtractionStrategy>,

    /// API key for the completion oracle
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model used by the completion oracle
    #[arg(long, env = "EMAIL_SCOUT_ORACLE_MODEL")]
    pub oracle_model: Option<String>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    search: Option<SearchConfig>,
    fetch: Option<FetchConfig>,
    pipeline: Option<PipelineConfig>,
    oracle: Option<OracleConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchConfig {
    base_url: Option<String>,
    locale: Option<String>,
    user_agents: Option<Vec<String>>,
    max_attempts: Option<u32>,
    backoff_step_ms: Option<u64>,
    backoff_jitter_ms: Option<u64>,
    throttle_penalty_ms: Option<u64>,
    rotate_every_attempts: Option<u32>,
    timeout: Option<u64>,
    query_suffix: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct FetchConfig {
    request_timeout: Option<u64>,
    concurrency: Option<usize>,
    excluded_domains: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct PipelineConfig {
    min_sleep: Option<f32>,
    max_sleep: Option<f32>,
    rotate_sessions_every: Option<usize>,
    strategy: Option<ExtractionStrategy>,
}

#[derive(Deserialize, Debug, Default)]
struct OracleConfig {
    api_base: Option<String>,
    model: Option<String>,
    snippet_chars: Option<usize>,
    max_tokens: Option<u32>,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Origin of the search engine (landing page and `/html/` results endpoint).
    pub search_base_url: String,
    /// Region/locale parameter sent as `kl`.
    pub search_locale: String,
    /// Pool of user agents; one is drawn per session and per request.
    pub user_agents: Vec<String>,
    /// Ceiling on token+query attempts for one search.
    pub search_max_attempts: u32,
    /// Linear backoff step multiplied by the attempt number.
    pub backoff_step: Duration,
    /// Upper bound (exclusive) of the random jitter added to each backoff.
    pub backoff_jitter: Duration,
    /// Extra delay after a throttling status.
    pub throttle_penalty: Duration,
    /// Replace the whole search session every N failed attempts.
    pub rotate_every_attempts: u32,
    /// Timeout for search engine requests.
    pub search_timeout: Duration,
    /// Optional text appended to the identifier when searching.
    pub query_suffix: Option<String>,
    /// Timeout for an individual page fetch.
    pub request_timeout: Duration,
    /// Maximum in-flight page fetches for one subject.
    pub fetch_concurrency: usize,
    /// Hosts (and their subdomains) that never yield a personal address.
    pub excluded_domains: Vec<String>,
    /// Minimum and maximum pause after each search (seconds).
    pub pause_between_searches: (f32, f32),
    /// Rotate the search session every N subjects.
    pub rotate_sessions_every: usize,
    /// Extraction strategy for this run.
    pub strategy: ExtractionStrategy,
    /// Base URL of the OpenAI-compatible completion API.
    pub oracle_api_base: String,
    /// Completion model name.
    pub oracle_model: String,
    /// API key for the completion oracle.
    pub oracle_api_key: Option<String>,
    /// Number of characters of page text included in the prompt.
    pub oracle_snippet_chars: usize,
    /// Completion length cap.
    pub oracle_max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.1 Safari/605.1.15",
            "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0",
        ];

        let excluded_domains = vec![
            "linkedin.com",
            "facebook.com",
            "instagram.com",
            "twitter.com",
            "x.com",
        ];

        Config {
            search_base_url: "https://duckduckgo.com".to_string(),
            search_locale: "us-en".to_string(),
            user_agents: user_agents.iter().map(|s| s.to_string()).collect(),
            search_max_attempts: 8,
            backoff_step: Duration::from_millis(700),
            backoff_jitter: Duration::from_millis(700),
            throttle_penalty: Duration::from_secs(3),
            rotate_every_attempts: 4,
            search_timeout: Duration::from_secs(20),
            query_suffix: None,
            request_timeout: Duration::from_secs(10),
            fetch_concurrency: 5,
            excluded_domains: excluded_domains.iter().map(|s| s.to_string()).collect(),
            pause_between_searches: (0.7, 1.5),
            rotate_sessions_every: 5,
            strategy: ExtractionStrategy::Regex,
            oracle_api_base: "https://api.openai.com/v1".to_string(),
            oracle_model: "gpt-4-turbo".to_string(),
            oracle_api_key: None,
            oracle_snippet_chars: 4000,
            oracle_max_tokens: 60,
        }
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config = parse_config_file(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn parse_config_file(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(search) = &file_config.search {
        if let Some(base_url) = &search.base_url {
            config.search_base_url = base_url.clone();
        }
        if let Some(locale) = &search.locale {
            config.search_locale = locale.clone();
        }
        if let Some(agents) = &search.user_agents {
            config.user_agents = agents.clone();
        }
        if let Some(attempts) = search.max_attempts {
            config.search_max_attempts = attempts;
        }
        if let Some(step) = search.backoff_step_ms {
            config.backoff_step = Duration::from_millis(step);
        }
        if let Some(jitter) = search.backoff_jitter_ms {
            config.backoff_jitter = Duration::from_millis(jitter);
        }
        if let Some(penalty) = search.throttle_penalty_ms {
            config.throttle_penalty = Duration::from_millis(penalty);
        }
        if let Some(every) = search.rotate_every_attempts {
            config.rotate_every_attempts = every;
        }
        if let Some(timeout) = search.timeout {
            config.search_timeout = Duration::from_secs(timeout);
        }
        if let Some(suffix) = &search.query_suffix {
            config.query_suffix = Some(suffix.clone());
        }
    }

    if let Some(fetch) = &file_config.fetch {
        if let Some(timeout) = fetch.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(concurrency) = fetch.concurrency {
            config.fetch_concurrency = concurrency;
        }
        if let Some(domains) = &fetch.excluded_domains {
            config.excluded_domains = domains.clone();
        }
    }

    if let Some(pipeline) = &file_config.pipeline {
        if let Some(min_sleep) = pipeline.min_sleep {
            config.pause_between_searches.0 = min_sleep;
        }
        if let Some(max_sleep) = pipeline.max_sleep {
            config.pause_between_searches.1 = max_sleep;
        }
        if let Some(every) = pipeline.rotate_sessions_every {
            config.rotate_sessions_every = every;
        }
        if let Some(strategy) = pipeline.strategy {
            config.strategy = strategy;
        }
    }

    if let Some(oracle) = &file_config.oracle {
        if let Some(api_base) = &oracle.api_base {
            config.oracle_api_base = api_base.clone();
        }
        if let Some(model) = &oracle.model {
            config.oracle_model = model.clone();
        }
        if let Some(chars) = oracle.snippet_chars {
            config.oracle_snippet_chars = chars;
        }
        if let Some(tokens) = oracle.max_tokens {
            config.oracle_max_tokens = tokens;
        }
    }
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &ConfigArgs) {
    if let Some(concurrency) = args.concurrency {
        config.fetch_concurrency = concurrency;
    }

    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }

    if let Some(attempts) = args.search_attempts {
        config.search_max_attempts = attempts;
    }

    if let Some(min_sleep) = args.min_sleep {
        config.pause_between_searches.0 = min_sleep;
    }

    if let Some(max_sleep) = args.max_sleep {
        config.pause_between_searches.1 = max_sleep;
    }

    if let Some(ref suffix) = args.query_suffix {
        config.query_suffix = Some(suffix.clone());
    }

    if let Some(ref domains) = args.excluded_domains {
        config.excluded_domains = domains
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }

    if let Some(ref key) = args.openai_api_key {
        config.oracle_api_key = Some(key.clone());
    }

    if let Some(ref model) = args.oracle_model {
        config.oracle_model = model.clone();
    }
}

fn validate_config(config: &mut Config) -> anyhow::Result<()> {
    if config.pause_between_searches.0 < 0.0 {
        config.pause_between_searches.0 = 0.0;
        tracing::warn!("Min sleep was negative. Setting to 0.");
    }

    if config.pause_between_searches.0 > config.pause_between_searches.1 {
        config.pause_between_searches.1 = config.pause_between_searches.0;
        tracing::warn!(
            "Min sleep was greater than max sleep. Setting both to {}",
            config.pause_between_searches.0
        );
    }

    if config.search_max_attempts < 3 {
        config.search_max_attempts = 3;
        tracing::warn!("Search attempts below minimum (3). Setting to 3.");
    }

    if config.rotate_every_attempts == 0 {
        config.rotate_every_attempts = 1;
        tracing::warn!("Session rotation interval was 0. Rotating after every attempt.");
    }

    if config.fetch_concurrency == 0 {
        config.fetch_concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.user_agents.is_empty() {
        config.user_agents = Config::default().user_agents;
        tracing::warn!("User agent pool was empty. Restoring the default pool.");
    }

    config.excluded_domains = config
        .excluded_domains
        .iter()
        .map(|d| d.trim().to_lowercase())
        .map(|d| d.trim_start_matches("www.").to_string())
        .filter(|d| !d.is_empty())
        .collect();

    url::Url::parse(&config.search_base_url)
        .with_context(|| format!("Invalid search base URL: {}", config.search_base_url))?;

    if config.strategy == ExtractionStrategy::Oracle && config.oracle_api_key.is_none() {
        anyhow::bail!("The oracle strategy needs an API key (set OPENAI_API_KEY)");
    }

    Ok(())
}

/// Builds the run configuration: defaults, then the TOML file, then CLI/env overrides.
pub(crate) fn build_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        match load_config_file(file_path) {
            Ok(file_config) => apply_file_config(&mut config, &file_config),
            Err(e) => {
                tracing::error!("Failed to load configuration file: {}", e);
            }
        }
    } else {
        for path in ["./email-scout.toml", "./config.toml"].iter() {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}

/// Draws a random pause within the configured bounds.
pub(crate) fn get_random_sleep_duration(bounds: (f32, f32)) -> Duration {
    use rand::Rng;
    let (min, max) = bounds;
    if min >= max {
        return Duration::from_secs_f32(min.max(0.0));
    }
    let duration_secs = rand::thread_rng().gen_range(min..max);
    Duration::from_secs_f32(duration_secs)
}
