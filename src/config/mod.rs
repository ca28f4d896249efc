//! Configuration Module
//!
//! Centralized configuration management for the platform: database,
//! gamification and payment workflow settings, all read from the environment.

use chrono::FixedOffset;

use crate::database::DatabaseConfig;
use crate::utils::{error::AppError, time::platform_offset};

/// Environment variable helpers
pub mod env {
    use std::env;

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get environment variable as u32 with default
    pub fn get_u32(key: &str, default: u32) -> u32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u64 with default
    pub fn get_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i32 with default
    pub fn get_i32(key: &str, default: i32) -> i32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i64 with default
    pub fn get_i64(key: &str, default: i64) -> i64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// XP, level and streak settings
    pub gamification: GamificationConfig,

    /// Purchase and refund workflow settings
    pub payment: PaymentConfig,
}

/// Gamification configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GamificationConfig {
    /// Hours east of UTC of the timezone days are counted in
    pub utc_offset_hours: i32,
    /// Daily XP goal given to new profiles
    pub default_daily_goal: i32,
    /// Upper bound a learner may set as daily goal
    pub max_daily_goal: i32,
}

/// Longest payment window a checkout may be given (one week)
pub const MAX_PENDING_EXPIRY_MINUTES: i64 = 7 * 24 * 60;

/// Longest refund window after payment
pub const MAX_REFUND_WINDOW_DAYS: i64 = 365;

/// Payment workflow configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfig {
    /// Minutes a pending purchase waits for payment before expiring
    pub pending_expiry_minutes: i64,
    /// Days after payment during which a refund may be requested
    pub refund_window_days: i64,
    /// ISO currency code all prices are expressed in
    pub currency: String,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 7,
            default_daily_goal: 50,
            max_daily_goal: 1000,
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            pending_expiry_minutes: 15,
            refund_window_days: 7,
            currency: "VND".to_string(),
        }
    }
}

impl GamificationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            utc_offset_hours: env::get_i32(
                "GAMIFICATION_UTC_OFFSET_HOURS",
                defaults.utc_offset_hours,
            ),
            default_daily_goal: env::get_i32(
                "GAMIFICATION_DEFAULT_DAILY_GOAL",
                defaults.default_daily_goal,
            ),
            max_daily_goal: env::get_i32("GAMIFICATION_MAX_DAILY_GOAL", defaults.max_daily_goal),
        }
    }

    /// The fixed offset days are counted in
    pub fn offset(&self) -> Result<FixedOffset, AppError> {
        platform_offset(self.utc_offset_hours).ok_or_else(|| {
            AppError::Configuration(format!(
                "UTC offset {} hours is out of range",
                self.utc_offset_hours
            ))
        })
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(AppError::Configuration(
                "Gamification UTC offset must be between -12 and 14 hours".to_string(),
            ));
        }

        if self.default_daily_goal <= 0 {
            return Err(AppError::Configuration(
                "Default daily goal must be greater than 0".to_string(),
            ));
        }

        if self.default_daily_goal > self.max_daily_goal {
            return Err(AppError::Configuration(
                "Default daily goal cannot exceed the maximum daily goal".to_string(),
            ));
        }

        Ok(())
    }
}

impl PaymentConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pending_expiry_minutes: env::get_i64(
                "PAYMENT_PENDING_EXPIRY_MINUTES",
                defaults.pending_expiry_minutes,
            ),
            refund_window_days: env::get_i64(
                "PAYMENT_REFUND_WINDOW_DAYS",
                defaults.refund_window_days,
            ),
            currency: env::get_string("PAYMENT_CURRENCY", &defaults.currency),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=MAX_PENDING_EXPIRY_MINUTES).contains(&self.pending_expiry_minutes) {
            return Err(AppError::Configuration(format!(
                "Pending purchase expiry must be between 1 and {} minutes",
                MAX_PENDING_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_REFUND_WINDOW_DAYS).contains(&self.refund_window_days) {
            return Err(AppError::Configuration(format!(
                "Refund window must be between 1 and {} days",
                MAX_REFUND_WINDOW_DAYS
            )));
        }

        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(AppError::Configuration(format!(
                "Currency '{}' is not a three-letter ISO code",
                self.currency
            )));
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load complete application configuration from environment
    pub fn from_env() -> Result<Self, AppError> {
        let database = DatabaseConfig::from_env()
            .map_err(|_| AppError::Configuration("DATABASE_URL is not set".to_string()))?;

        Ok(Self {
            database,
            gamification: GamificationConfig::from_env(),
            payment: PaymentConfig::from_env(),
        })
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.url.is_empty() {
            return Err(AppError::Configuration(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Configuration(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::Configuration(
                "Database min_connections cannot be greater than max_connections".to_string(),
            ));
        }

        self.gamification.validate()?;
        self.payment.validate()?;

        Ok(())
    }
}
