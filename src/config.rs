use anyhow::{Context, Result};
use std::path::PathBuf;

pub const STORE_PATH_ENV_VAR: &str = "IMAGE_RETRIEVAL_STORE_PATH";
pub const COLLECTION_ENV_VAR: &str = "IMAGE_RETRIEVAL_COLLECTION";
pub const DATASET_ENV_VAR: &str = "IMAGE_RETRIEVAL_DATASET";
pub const CHECKPOINT_ENV_VAR: &str = "IMAGE_RETRIEVAL_CHECKPOINT_EVERY";

pub const DEFAULT_STORE_PATH: &str = "./vector_store";
pub const DEFAULT_COLLECTION: &str = "cultural_images";
pub const DEFAULT_DATASET: &str = "./dataset";
pub const DEFAULT_CHECKPOINT_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub store_path: PathBuf,
    pub collection: String,
    pub dataset: PathBuf,
    pub checkpoint_every: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            collection: DEFAULT_COLLECTION.to_string(),
            dataset: PathBuf::from(DEFAULT_DATASET),
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

impl AppConfig {
    /// Reads the process environment; call `dotenv` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = lookup(STORE_PATH_ENV_VAR) {
            config.store_path = PathBuf::from(path);
        }
        if let Some(name) = lookup(COLLECTION_ENV_VAR) {
            config.collection = name;
        }
        if let Some(path) = lookup(DATASET_ENV_VAR) {
            config.dataset = PathBuf::from(path);
        }
        if let Some(raw) = lookup(CHECKPOINT_ENV_VAR) {
            config.checkpoint_every = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got '{}'", CHECKPOINT_ENV_VAR, raw))?;
            if config.checkpoint_every == 0 {
                anyhow::bail!("{} must be a positive integer, got '{}'", CHECKPOINT_ENV_VAR, raw);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() -> Result<()> {
        let config = AppConfig::from_lookup(|_| None)?;
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.collection, "cultural_images");
        assert_eq!(config.checkpoint_every, 100);
        Ok(())
    }

    #[test]
    fn test_environment_overrides() -> Result<()> {
        let config = AppConfig::from_lookup(lookup_from(&[
            (STORE_PATH_ENV_VAR, "/tmp/store"),
            (COLLECTION_ENV_VAR, "other"),
            (DATASET_ENV_VAR, "data.csv"),
            (CHECKPOINT_ENV_VAR, " 25 "),
        ]))?;
        assert_eq!(config.store_path, PathBuf::from("/tmp/store"));
        assert_eq!(config.collection, "other");
        assert_eq!(config.dataset, PathBuf::from("data.csv"));
        assert_eq!(config.checkpoint_every, 25);
        Ok(())
    }

    #[test]
    fn test_invalid_checkpoint_is_rejected() {
        for bad in ["zero", "0", "-3"] {
            let result = AppConfig::from_lookup(lookup_from(&[(CHECKPOINT_ENV_VAR, bad)]));
            assert!(result.is_err(), "accepted {}", bad);
        }
    }
}
