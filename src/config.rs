//! Process configuration read from the environment (and `.env` via dotenvy).

use crate::errors::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_NOTIFY_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub notify_queue_capacity: usize,
    pub seed_default_workflows: bool,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Environment("DATABASE_URL is not set".to_string()))?;

        let max_connections = match lookup("DB_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                AppError::Environment(format!("DB_MAX_CONNECTIONS must be a positive integer, got '{raw}'"))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let notify_queue_capacity = match lookup("NOTIFY_QUEUE_CAPACITY") {
            Some(raw) => raw.trim().parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                AppError::Environment(format!("NOTIFY_QUEUE_CAPACITY must be a positive integer, got '{raw}'"))
            })?,
            None => DEFAULT_NOTIFY_QUEUE_CAPACITY,
        };

        let seed_default_workflows = lookup("SEED_DEFAULT_WORKFLOWS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(AppConfig {
            database_url,
            max_connections,
            notify_queue_capacity,
            seed_default_workflows,
        })
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
    fn defaults_apply_when_only_database_url_is_set() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/ideas")])).unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/ideas");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.notify_queue_capacity, 256);
        assert!(!cfg.seed_default_workflows);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Environment(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/ideas"),
            ("DB_MAX_CONNECTIONS", "16"),
            ("NOTIFY_QUEUE_CAPACITY", "10"),
            ("SEED_DEFAULT_WORKFLOWS", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_connections, 16);
        assert_eq!(cfg.notify_queue_capacity, 10);
        assert!(cfg.seed_default_workflows);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/ideas"),
            ("DB_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Environment(_)));
    }
}
