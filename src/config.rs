use std::env;

use log::warn;

pub struct Config {
    pub port: u16,
    pub database_url: String,
    // Unset means the admin surface stays locked.
    pub admin_password: Option<String>,
    pub auto_hide_threshold: i64,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: parse_or("PORT", 3030),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:modu_vote.db".to_string()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|p| !p.is_empty()),
            auto_hide_threshold: parse_or("REPORT_AUTO_HIDE_THRESHOLD", 5),
        }
    }
}

fn parse_or<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("invalid {} value {:?}, using default {}", key, value, default);
            default
        }),
        Err(_) => default,
    }
}
