use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipeline: PipelineConfig,
    pub bandit: BanditConfig,
    pub golden: GoldenConfig,
    pub aha: AhaConfig,
    pub cold_start: ColdStartConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Timeout and retry policy for collaborator calls
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Five-stage pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum S2 -> S1 loops before proceeding with a low-confidence seed.
    pub seed_retry_limit: u32,
    /// Number of paths requested from the proposer (K).
    pub path_pool_size: usize,
    /// Per-path verification timeout.
    pub verification_timeout_ms: u64,
    pub max_concurrent_verifications: usize,
    pub max_golden_per_pool: usize,
    pub golden_match_threshold: f64,
    /// Reward magnitude applied for instant-learning verdicts.
    pub verification_reward: f64,
}

/// Bandit algorithm selection and statistics decay
#[derive(Debug, Clone)]
pub struct BanditConfig {
    /// Below this many total pulls across the candidates, Thompson sampling is used.
    pub path_cold_pulls: u64,
    pub tool_cold_pulls: u64,
    pub ucb_exploration: f64,
    pub epsilon_initial: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub seed: Option<u64>,
    pub staleness_window_hours: u64,
    pub staleness_decay: f64,
    pub lock_timeout_ms: u64,
    /// Selections during which a newly learned path keeps a decaying bonus.
    pub exploration_boost_rounds: u32,
    /// Initial size of that decaying bonus.
    pub learned_path_bonus: f64,
    /// Bonus a learned path keeps after the boost has run out.
    pub learned_path_permanent_bonus: f64,
}

/// Golden template promotion and demotion
#[derive(Debug, Clone)]
pub struct GoldenConfig {
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    pub min_sample_size: u64,
    pub rolling_window: usize,
    pub max_templates: usize,
}

/// Aha-moment trigger thresholds
#[derive(Debug, Clone)]
pub struct AhaConfig {
    pub confidence_floor: f64,
    pub failure_streak: u32,
    pub batch_size: usize,
}

/// Cold-start detection for tool selection
#[derive(Debug, Clone)]
pub struct ColdStartConfig {
    pub exploration_threshold: f64,
    pub weights: ColdStartWeights,
    pub min_usage_count: u64,
    pub min_reliability: f64,
    pub max_idle_hours: f64,
    pub min_sample_size: u64,
}

/// Weights of the four cold-start factors; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColdStartWeights {
    pub usage_frequency: f64,
    pub reliability: f64,
    pub recency: f64,
    pub sample_sufficiency: f64,
}

impl ColdStartWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.usage_frequency + self.reliability + self.recency + self.sample_sufficiency
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// A value that is set but does not parse is a configuration error.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env_parse_opt(key)? {
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

fn env_parse_opt<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: '{}'", key, raw),
        }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/decisions.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 30000)?,
            max_retries: env_parse("MAX_RETRIES", 2)?,
            retry_delay_ms: env_parse("RETRY_DELAY_MS", 250)?,
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            seed_retry_limit: env_parse("SEED_RETRY_LIMIT", defaults.seed_retry_limit)?,
            path_pool_size: env_parse("PATH_POOL_SIZE", defaults.path_pool_size)?,
            verification_timeout_ms: env_parse(
                "VERIFICATION_TIMEOUT_MS",
                defaults.verification_timeout_ms,
            )?,
            max_concurrent_verifications: env_parse(
                "MAX_CONCURRENT_VERIFICATIONS",
                defaults.max_concurrent_verifications,
            )?,
            max_golden_per_pool: env_parse("MAX_GOLDEN_PER_POOL", defaults.max_golden_per_pool)?,
            golden_match_threshold: env_parse(
                "GOLDEN_MATCH_THRESHOLD",
                defaults.golden_match_threshold,
            )?,
            verification_reward: env_parse("VERIFICATION_REWARD", defaults.verification_reward)?,
        };

        let defaults = BanditConfig::default();
        let bandit = BanditConfig {
            path_cold_pulls: env_parse("BANDIT_COLD_PULLS", defaults.path_cold_pulls)?,
            tool_cold_pulls: env_parse("TOOL_COLD_PULLS", defaults.tool_cold_pulls)?,
            ucb_exploration: env_parse("UCB_EXPLORATION", defaults.ucb_exploration)?,
            epsilon_initial: env_parse("EPSILON_INITIAL", defaults.epsilon_initial)?,
            epsilon_min: env_parse("EPSILON_MIN", defaults.epsilon_min)?,
            epsilon_decay: env_parse("EPSILON_DECAY", defaults.epsilon_decay)?,
            seed: env_parse_opt("BANDIT_SEED")?,
            staleness_window_hours: env_parse(
                "STALENESS_WINDOW_HOURS",
                defaults.staleness_window_hours,
            )?,
            staleness_decay: env_parse("STALENESS_DECAY", defaults.staleness_decay)?,
            lock_timeout_ms: env_parse("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?,
            exploration_boost_rounds: env_parse(
                "EXPLORATION_BOOST_ROUNDS",
                defaults.exploration_boost_rounds,
            )?,
            learned_path_bonus: env_parse("LEARNED_PATH_BONUS", defaults.learned_path_bonus)?,
            learned_path_permanent_bonus: env_parse(
                "LEARNED_PATH_PERMANENT_BONUS",
                defaults.learned_path_permanent_bonus,
            )?,
        };

        let defaults = GoldenConfig::default();
        let golden = GoldenConfig {
            promotion_threshold: env_parse(
                "GOLDEN_PROMOTION_THRESHOLD",
                defaults.promotion_threshold,
            )?,
            demotion_threshold: env_parse("GOLDEN_DEMOTION_THRESHOLD", defaults.demotion_threshold)?,
            min_sample_size: env_parse("GOLDEN_MIN_SAMPLES", defaults.min_sample_size)?,
            rolling_window: env_parse("GOLDEN_ROLLING_WINDOW", defaults.rolling_window)?,
            max_templates: env_parse("GOLDEN_MAX_TEMPLATES", defaults.max_templates)?,
        };

        let defaults = AhaConfig::default();
        let aha = AhaConfig {
            confidence_floor: env_parse("AHA_CONFIDENCE_FLOOR", defaults.confidence_floor)?,
            failure_streak: env_parse("AHA_FAILURE_STREAK", defaults.failure_streak)?,
            batch_size: env_parse("AHA_BATCH_SIZE", defaults.batch_size)?,
        };

        let defaults = ColdStartConfig::default();
        let cold_start = ColdStartConfig {
            exploration_threshold: env_parse(
                "COLD_START_THRESHOLD",
                defaults.exploration_threshold,
            )?,
            weights: ColdStartWeights {
                usage_frequency: env_parse(
                    "COLD_START_WEIGHT_USAGE",
                    defaults.weights.usage_frequency,
                )?,
                reliability: env_parse(
                    "COLD_START_WEIGHT_RELIABILITY",
                    defaults.weights.reliability,
                )?,
                recency: env_parse("COLD_START_WEIGHT_RECENCY", defaults.weights.recency)?,
                sample_sufficiency: env_parse(
                    "COLD_START_WEIGHT_SAMPLES",
                    defaults.weights.sample_sufficiency,
                )?,
            },
            min_usage_count: env_parse("COLD_START_MIN_USAGE", defaults.min_usage_count)?,
            min_reliability: env_parse("COLD_START_MIN_RELIABILITY", defaults.min_reliability)?,
            max_idle_hours: env_parse("COLD_START_MAX_IDLE_HOURS", defaults.max_idle_hours)?,
            min_sample_size: env_parse("COLD_START_MIN_SAMPLES", defaults.min_sample_size)?,
        };

        let config = Config {
            database,
            logging,
            request,
            pipeline,
            bandit,
            golden,
            aha,
            cold_start,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the engine misbehave.
    ///
    /// Invalid thresholds are fatal at startup; nothing here is re-checked
    /// while deciding.
    pub fn validate(&self) -> Result<(), AppError> {
        fn unit(name: &str, value: f64) -> Result<(), AppError> {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(AppError::Config {
                    message: format!("{} must be within [0, 1], got {}", name, value),
                });
            }
            Ok(())
        }

        fn positive(name: &str, value: u64) -> Result<(), AppError> {
            if value == 0 {
                return Err(AppError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
            Ok(())
        }

        positive("PATH_POOL_SIZE", self.pipeline.path_pool_size as u64)?;
        positive(
            "MAX_CONCURRENT_VERIFICATIONS",
            self.pipeline.max_concurrent_verifications as u64,
        )?;
        positive("VERIFICATION_TIMEOUT_MS", self.pipeline.verification_timeout_ms)?;
        positive("REQUEST_TIMEOUT_MS", self.request.timeout_ms)?;
        positive("LOCK_TIMEOUT_MS", self.bandit.lock_timeout_ms)?;
        positive("STALENESS_WINDOW_HOURS", self.bandit.staleness_window_hours)?;
        positive("GOLDEN_ROLLING_WINDOW", self.golden.rolling_window as u64)?;
        positive("GOLDEN_MAX_TEMPLATES", self.golden.max_templates as u64)?;
        unit("GOLDEN_MATCH_THRESHOLD", self.pipeline.golden_match_threshold)?;
        unit("VERIFICATION_REWARD", self.pipeline.verification_reward)?;
        unit("EPSILON_INITIAL", self.bandit.epsilon_initial)?;
        unit("EPSILON_MIN", self.bandit.epsilon_min)?;
        unit("STALENESS_DECAY", self.bandit.staleness_decay)?;
        unit("LEARNED_PATH_BONUS", self.bandit.learned_path_bonus)?;
        unit(
            "LEARNED_PATH_PERMANENT_BONUS",
            self.bandit.learned_path_permanent_bonus,
        )?;
        unit("GOLDEN_PROMOTION_THRESHOLD", self.golden.promotion_threshold)?;
        unit("GOLDEN_DEMOTION_THRESHOLD", self.golden.demotion_threshold)?;
        unit("AHA_CONFIDENCE_FLOOR", self.aha.confidence_floor)?;
        unit("COLD_START_THRESHOLD", self.cold_start.exploration_threshold)?;
        unit("COLD_START_MIN_RELIABILITY", self.cold_start.min_reliability)?;

        if self.bandit.epsilon_min > self.bandit.epsilon_initial {
            return Err(AppError::Config {
                message: "EPSILON_MIN must not exceed EPSILON_INITIAL".to_string(),
            });
        }
        if self.bandit.ucb_exploration < 0.0 || self.bandit.epsilon_decay < 0.0 {
            return Err(AppError::Config {
                message: "UCB_EXPLORATION and EPSILON_DECAY must be non-negative".to_string(),
            });
        }
        if self.golden.demotion_threshold >= self.golden.promotion_threshold {
            return Err(AppError::Config {
                message: format!(
                    "GOLDEN_DEMOTION_THRESHOLD ({}) must be below GOLDEN_PROMOTION_THRESHOLD ({})",
                    self.golden.demotion_threshold, self.golden.promotion_threshold
                ),
            });
        }

        let weights = &self.cold_start.weights;
        for (name, w) in [
            ("COLD_START_WEIGHT_USAGE", weights.usage_frequency),
            ("COLD_START_WEIGHT_RELIABILITY", weights.reliability),
            ("COLD_START_WEIGHT_RECENCY", weights.recency),
            ("COLD_START_WEIGHT_SAMPLES", weights.sample_sufficiency),
        ] {
            unit(name, w)?;
        }
        if (weights.total() - 1.0).abs() > 1e-6 {
            return Err(AppError::Config {
                message: format!("cold-start weights must sum to 1, got {}", weights.total()),
            });
        }
        if self.cold_start.max_idle_hours <= 0.0 {
            return Err(AppError::Config {
                message: "COLD_START_MAX_IDLE_HOURS must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/decisions.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 250,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed_retry_limit: 2,
            path_pool_size: 4,
            verification_timeout_ms: 10000,
            max_concurrent_verifications: 4,
            max_golden_per_pool: 2,
            golden_match_threshold: 0.15,
            verification_reward: 1.0,
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            path_cold_pulls: 15,
            tool_cold_pulls: 10,
            ucb_exploration: std::f64::consts::SQRT_2,
            epsilon_initial: 0.4,
            epsilon_min: 0.1,
            epsilon_decay: 0.008,
            seed: None,
            staleness_window_hours: 168, // one week
            staleness_decay: 0.5,
            lock_timeout_ms: 500,
            exploration_boost_rounds: 10,
            learned_path_bonus: 0.15,
            learned_path_permanent_bonus: 0.05,
        }
    }
}

impl Default for GoldenConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.8,
            demotion_threshold: 0.5,
            min_sample_size: 5,
            rolling_window: 10,
            max_templates: 50,
        }
    }
}

impl Default for AhaConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            failure_streak: 3,
            batch_size: 3,
        }
    }
}

impl Default for ColdStartConfig {
    fn default() -> Self {
        Self {
            exploration_threshold: 0.5,
            weights: ColdStartWeights {
                usage_frequency: 0.3,
                reliability: 0.3,
                recency: 0.2,
                sample_sufficiency: 0.2,
            },
            min_usage_count: 3,
            min_reliability: 0.6,
            max_idle_hours: 72.0,
            min_sample_size: 5,
        }
    }
}
