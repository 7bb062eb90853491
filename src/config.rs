use std::collections::HashMap;
use thiserror::Error;

use crate::auth::{AdminTokens, Role};
use crate::domain::Decimal;
use crate::engine::{CommissionSchedule, DistributionPolicy};
use crate::orchestration::PayoutPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rail_api_url: String,
    pub notify_webhook_url: Option<String>,
    pub admin_tokens: AdminTokens,
    pub schedule: CommissionSchedule,
    pub distribution: DistributionPolicy,
    pub payout: PayoutPolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let rail_api_url = env_map
            .get("RAIL_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("RAIL_API_URL".to_string()))?;

        let notify_webhook_url = env_map.get("NOTIFY_WEBHOOK_URL").cloned();

        let admin_tokens = parse_admin_tokens_from_map(&env_map)?;

        let structure_size = int_key(&env_map, "STRUCTURE_SIZE", "1092")?;
        if structure_size <= 0 {
            return Err(ConfigError::InvalidValue(
                "STRUCTURE_SIZE".to_string(),
                "must be positive".to_string(),
            ));
        }
        let max_structures = int_key(&env_map, "COMMISSION_MAX_STRUCTURES", "6")?;
        if max_structures <= 0 {
            return Err(ConfigError::InvalidValue(
                "COMMISSION_MAX_STRUCTURES".to_string(),
                "must be positive".to_string(),
            ));
        }

        let schedule = CommissionSchedule {
            base_rate: decimal_key(&env_map, "COMMISSION_BASE_RATE", "0.10")?,
            step_rate: decimal_key(&env_map, "COMMISSION_STEP_RATE", "0.01")?,
            max_structures,
            structure_size,
        };

        let distribution = DistributionPolicy {
            direct_bonus_amount: decimal_key(&env_map, "DIRECT_BONUS_AMOUNT", "25")?,
            residual_share_rate: decimal_key(&env_map, "RESIDUAL_SHARE_RATE", "0.01")?,
            residual_budget_rate: decimal_key(&env_map, "RESIDUAL_BUDGET_RATE", "0.10")?,
        };

        let payout = PayoutPolicy {
            min_payout_threshold: decimal_key(&env_map, "MIN_PAYOUT_THRESHOLD", "50")?,
            max_payout_amount: decimal_key(&env_map, "MAX_PAYOUT_AMOUNT", "10000")?,
            qualification_min_directs: int_key(&env_map, "QUALIFICATION_MIN_DIRECTS", "3")?,
            max_transfer_retries: int_key(&env_map, "MAX_TRANSFER_RETRIES", "3")?,
        };

        Ok(Config {
            port,
            database_path,
            rail_api_url,
            notify_webhook_url,
            admin_tokens,
            schedule,
            distribution,
            payout,
        })
    }
}

fn decimal_key(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    raw.parse::<Decimal>().map_err(|_| {
        ConfigError::InvalidValue(key.to_string(), "must be a decimal number".to_string())
    })
}

fn int_key(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<i64, ConfigError> {
    let raw = env_map.get(key).map(|s| s.as_str()).unwrap_or(default);
    raw.parse::<i64>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), "must be a valid i64".to_string()))
}

/// `ADMIN_TOKENS` holds comma-separated `token:role` pairs. Leaving it
/// unset is allowed and leaves every admin route denied.
fn parse_admin_tokens_from_map(
    env_map: &HashMap<String, String>,
) -> Result<AdminTokens, ConfigError> {
    let Some(raw) = env_map.get("ADMIN_TOKENS") else {
        return Ok(AdminTokens::default());
    };

    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((token, role_str)) = pair.split_once(':') else {
            return Err(ConfigError::InvalidValue(
                "ADMIN_TOKENS".to_string(),
                format!("expected token:role, got {}", pair),
            ));
        };
        let Some(role) = Role::parse(role_str.trim()) else {
            return Err(ConfigError::InvalidValue(
                "ADMIN_TOKENS".to_string(),
                format!("unknown role {}", role_str.trim()),
            ));
        };
        tokens.insert(token.trim().to_string(), role);
    }
    Ok(AdminTokens::new(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "RAIL_API_URL".to_string(),
            "https://rail.example.test".to_string(),
        );
        map
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_rail_api_url() {
        let mut env_map = setup_required_env();
        env_map.remove("RAIL_API_URL");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "RAIL_API_URL"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.admin_tokens.is_empty());
        assert_eq!(config.schedule.base_rate, Decimal::from_str("0.1").unwrap());
        assert_eq!(config.schedule.structure_size, 1092);
        assert_eq!(
            config.payout.min_payout_threshold,
            Decimal::from_str("50").unwrap()
        );
        assert_eq!(config.payout.max_transfer_retries, 3);
        assert_eq!(
            config.distribution.direct_bonus_amount,
            Decimal::from_str("25").unwrap()
        );
    }

    #[test]
    fn test_invalid_rate_value() {
        let mut env_map = setup_required_env();
        env_map.insert("COMMISSION_BASE_RATE".to_string(), "ten percent".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "COMMISSION_BASE_RATE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_structure_size_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("STRUCTURE_SIZE".to_string(), "0".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "STRUCTURE_SIZE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_admin_tokens_parsed() {
        let mut env_map = setup_required_env();
        env_map.insert(
            "ADMIN_TOKENS".to_string(),
            "tok-1:operator, tok-2:treasury,tok-3:admin".to_string(),
        );
        let config = Config::from_env_map(env_map).unwrap();
        assert!(!config.admin_tokens.is_empty());
    }

    #[test]
    fn test_admin_tokens_bad_role() {
        let mut env_map = setup_required_env();
        env_map.insert("ADMIN_TOKENS".to_string(), "tok-1:root".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ADMIN_TOKENS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_admin_tokens_bad_pair() {
        let mut env_map = setup_required_env();
        env_map.insert("ADMIN_TOKENS".to_string(), "just-a-token".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ADMIN_TOKENS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }
}
