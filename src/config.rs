use std::env;

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub supabase_jwt_secret: Option<String>,
    pub supabase_db_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub bill_list_cache_ttl_seconds: u64,
    pub bill_list_cache_max_entries: u64,
    pub default_electricity_rate: f64,
    pub billing_timezone: Tz,
    pub payment_currency: String,
    pub upi_link_scheme: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentbook API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            trusted_hosts: parse_csv(&env_or("TRUSTED_HOSTS", "localhost,127.0.0.1")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_enabled: env_parse_bool_or("RATE_LIMIT_ENABLED", true),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            supabase_url: env_opt("SUPABASE_URL"),
            supabase_service_role_key: env_opt("SUPABASE_SERVICE_ROLE_KEY"),
            supabase_jwt_secret: env_opt("SUPABASE_JWT_SECRET"),
            supabase_db_url: env_opt("SUPABASE_DB_URL").or_else(|| env_opt("DATABASE_URL")),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            bill_list_cache_ttl_seconds: env_parse_or("BILL_LIST_CACHE_TTL_SECONDS", 30),
            bill_list_cache_max_entries: env_parse_or("BILL_LIST_CACHE_MAX_ENTRIES", 2000),
            default_electricity_rate: parse_rate(env_opt("DEFAULT_ELECTRICITY_RATE")),
            billing_timezone: parse_timezone(env_opt("BILLING_TIMEZONE")),
            payment_currency: env_or("PAYMENT_CURRENCY", "INR").to_ascii_uppercase(),
            upi_link_scheme: env_or("UPI_LINK_SCHEME", "upi").to_ascii_lowercase(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }

    pub fn supabase_auth_user_url(&self) -> Option<String> {
        self.supabase_url
            .as_deref()
            .map(|base| format!("{}/auth/v1/user", base.trim_end_matches('/')))
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

/// Falls back to 8 per unit, the rate new buildings are pre-filled with.
fn parse_rate(raw: Option<String>) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .unwrap_or(8.0)
}

fn parse_timezone(raw: Option<String>) -> Tz {
    raw.and_then(|value| value.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::Asia::Kolkata)
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, parse_csv, parse_rate, parse_timezone};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn splits_csv_and_drops_blanks() {
        assert_eq!(
            parse_csv(" localhost, ,127.0.0.1 "),
            vec!["localhost".to_string(), "127.0.0.1".to_string()]
        );
    }

    #[test]
    fn rate_falls_back_on_garbage_or_non_positive() {
        assert_eq!(parse_rate(None), 8.0);
        assert_eq!(parse_rate(Some("abc".to_string())), 8.0);
        assert_eq!(parse_rate(Some("0".to_string())), 8.0);
        assert_eq!(parse_rate(Some("-3".to_string())), 8.0);
        assert_eq!(parse_rate(Some("9.5".to_string())), 9.5);
    }

    #[test]
    fn timezone_defaults_to_kolkata() {
        assert_eq!(parse_timezone(None), chrono_tz::Asia::Kolkata);
        assert_eq!(
            parse_timezone(Some("Not/AZone".to_string())),
            chrono_tz::Asia::Kolkata
        );
        assert_eq!(
            parse_timezone(Some("Europe/London".to_string())),
            chrono_tz::Europe::London
        );
    }
}
