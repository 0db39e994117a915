use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

pub const DEFAULT_CHUNK_DURATION_SECS: f64 = 3.0;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
pub const DEFAULT_WORKERS: usize = 4;
pub const MODEL_SAMPLE_RATE_HZ: u32 = 16_000;
pub const ENV_MODEL_URL: &str = "VOICE_EMOTION_MODEL_URL";
pub const ENV_MODEL_API_KEY: &str = "VOICE_EMOTION_MODEL_API_KEY";
pub const ENV_CHUNK_SECONDS: &str = "VOICE_EMOTION_CHUNK_SECONDS";
pub const ENV_SAMPLE_RATE: &str = "VOICE_EMOTION_SAMPLE_RATE";
pub const ENV_WORKERS: &str = "VOICE_EMOTION_WORKERS";

/// Length of one analysis window in seconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChunkDuration(f64);

impl ChunkDuration {
    pub fn new(seconds: f64) -> Result<Self, ConfigError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ConfigError::InvalidChunkDuration(seconds));
        }
        Ok(Self(seconds))
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Number of samples in one window at the given rate, never less than one.
    pub fn samples_at(&self, sample_rate: SampleRate) -> usize {
        let n = (self.0 * f64::from(sample_rate.hz())).round();
        (n as usize).max(1)
    }
}

impl Default for ChunkDuration {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_DURATION_SECS)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleRate(u32);

impl SampleRate {
    pub fn new(hz: u32) -> Result<Self, ConfigError> {
        if hz == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        Ok(Self(hz))
    }

    pub fn hz(&self) -> u32 {
        self.0
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self(DEFAULT_SAMPLE_RATE_HZ)
    }
}

/// Upper bound on chunks classified concurrently.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerCount(usize);

impl WorkerCount {
    pub fn new(workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(Self(workers))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self(DEFAULT_WORKERS)
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelConfig {
    pub endpoint: Option<Url>,
    pub api_key: Option<ApiKey>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalysisConfig {
    pub chunk_duration: ChunkDuration,
    pub target_sample_rate: SampleRate,
    pub workers: WorkerCount,
    pub model: ModelConfig,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("chunk duration must be a positive number of seconds, got {0}")]
    InvalidChunkDuration(f64),
    #[error("sample rate must be > 0 Hz")]
    ZeroSampleRate,
    #[error("worker count must be > 0")]
    ZeroWorkers,
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("invalid model url: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

/// CLI value, then parsed environment value, then `default`.
pub fn resolve_parsed_with_default<T>(
    cli_value: Option<T>,
    env_key: &str,
    env: &impl Env,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match env.var(env_key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidEnvValue {
                key: env_key.to_owned(),
                value: raw,
            }),
        None => Ok(default),
    }
}

pub fn resolve_model_config(
    cli_url: Option<String>,
    cli_api_key: Option<String>,
    env: &impl Env,
) -> Result<ModelConfig, ConfigError> {
    let endpoint = resolve_optional_string(cli_url, ENV_MODEL_URL, env)
        .map(|raw| Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(e.to_string())))
        .transpose()?;
    let api_key = resolve_api_key(cli_api_key, ENV_MODEL_API_KEY, env)?;
    Ok(ModelConfig { endpoint, api_key })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_MODEL_API_KEY, "env-key");
        let key = resolve_api_key(Some("cli-key".to_owned()), ENV_MODEL_API_KEY, &env)
            .expect("valid key")
            .expect("present");
        assert_eq!(key.expose(), "cli-key");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("secret").expect("valid key");
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[test]
    fn chunk_duration_rejects_non_positive() {
        assert!(ChunkDuration::new(0.0).is_err());
        assert!(ChunkDuration::new(-1.0).is_err());
        assert!(ChunkDuration::new(f64::NAN).is_err());
        assert!(ChunkDuration::new(0.5).is_ok());
    }

    #[test]
    fn chunk_samples_are_rounded() {
        let d = ChunkDuration::new(3.0).expect("valid");
        assert_eq!(d.samples_at(SampleRate::new(16_000).expect("valid")), 48_000);
        let d = ChunkDuration::new(0.33335).expect("valid");
        assert_eq!(d.samples_at(SampleRate::new(1_000).expect("valid")), 333);
    }

    #[test]
    fn parsed_value_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_WORKERS, "8");
        let v = resolve_parsed_with_default::<usize>(None, ENV_WORKERS, &env, 4).expect("parse");
        assert_eq!(v, 8);
    }

    #[test]
    fn parsed_value_rejects_garbage_env() {
        let env = MapEnv::default().with_var(ENV_SAMPLE_RATE, "fast");
        let err = resolve_parsed_with_default::<u32>(None, ENV_SAMPLE_RATE, &env, 16_000)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvValue { .. }));
    }

    #[test]
    fn parsed_value_default_used_when_both_missing() {
        let env = MapEnv::default();
        let v = resolve_parsed_with_default(None, ENV_CHUNK_SECONDS, &env, 3.0f64).expect("parse");
        assert_eq!(v, 3.0);
    }

    #[test]
    fn model_config_parses_env_url() {
        let env = MapEnv::default().with_var(ENV_MODEL_URL, "http://localhost:8000/");
        let cfg = resolve_model_config(None, None, &env).expect("valid");
        assert_eq!(cfg.endpoint.expect("endpoint").as_str(), "http://localhost:8000/");
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn model_config_rejects_bad_url() {
        let env = MapEnv::default();
        let err = resolve_model_config(Some("not a url".to_owned()), None, &env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl(_)));
    }
}
