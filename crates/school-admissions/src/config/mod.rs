use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::workflows::admissions::policy::{
    SchedulingPolicy, DEFAULT_GRADE_SEATS, DEFAULT_MAX_COMMIT_ATTEMPTS, DEFAULT_MIN_SLOT_MINUTES,
    DEFAULT_SLOT_CAPACITY, DEFAULT_UTC_OFFSET_MINUTES,
};
use crate::workflows::admissions::GradeSeatRule;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admissions: AdmissionsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            admissions: AdmissionsConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Scheduling dials plus the per-grade seat table.
#[derive(Debug, Clone)]
pub struct AdmissionsConfig {
    pub scheduling: SchedulingPolicy,
    pub grade_seats: Vec<GradeSeatRule>,
}

impl AdmissionsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let scheduling = SchedulingPolicy {
            utc_offset_minutes: parse_var(
                "ADMISSIONS_UTC_OFFSET_MINUTES",
                DEFAULT_UTC_OFFSET_MINUTES,
            )?,
            min_slot_minutes: parse_var("ADMISSIONS_MIN_SLOT_MINUTES", DEFAULT_MIN_SLOT_MINUTES)?,
            default_slot_capacity: parse_var(
                "ADMISSIONS_DEFAULT_SLOT_CAPACITY",
                DEFAULT_SLOT_CAPACITY,
            )?,
            default_grade_seats: parse_var(
                "ADMISSIONS_DEFAULT_GRADE_SEATS",
                DEFAULT_GRADE_SEATS,
            )?,
            reminder_days: parse_reminder_days()?,
            max_commit_attempts: parse_var(
                "ADMISSIONS_MAX_COMMIT_ATTEMPTS",
                DEFAULT_MAX_COMMIT_ATTEMPTS,
            )?,
        };

        if !(-1440..=1440).contains(&scheduling.utc_offset_minutes) {
            return Err(ConfigError::InvalidValue {
                variable: "ADMISSIONS_UTC_OFFSET_MINUTES",
                value: scheduling.utc_offset_minutes.to_string(),
            });
        }
        for (variable, value) in [
            ("ADMISSIONS_MIN_SLOT_MINUTES", scheduling.min_slot_minutes),
            (
                "ADMISSIONS_DEFAULT_SLOT_CAPACITY",
                scheduling.default_slot_capacity,
            ),
            ("ADMISSIONS_MAX_COMMIT_ATTEMPTS", scheduling.max_commit_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    variable,
                    value: value.to_string(),
                });
            }
        }

        Ok(Self {
            scheduling,
            grade_seats: parse_grade_seats()?,
        })
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue {
                variable,
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}

/// `ADMISSIONS_REMINDER_DAYS=1,3`
fn parse_reminder_days() -> Result<Vec<u32>, ConfigError> {
    let Ok(raw) = env::var("ADMISSIONS_REMINDER_DAYS") else {
        return Ok(SchedulingPolicy::default().reminder_days);
    };

    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let day = part
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidValue {
                variable: "ADMISSIONS_REMINDER_DAYS",
                value: raw.clone(),
            })?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Ok(days)
}

/// `ADMISSIONS_GRADE_SEATS=Nursery=40;Class 5=50`
fn parse_grade_seats() -> Result<Vec<GradeSeatRule>, ConfigError> {
    let Ok(raw) = env::var("ADMISSIONS_GRADE_SEATS") else {
        return Ok(Vec::new());
    };

    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(position, entry)| {
            let invalid = || ConfigError::InvalidValue {
                variable: "ADMISSIONS_GRADE_SEATS",
                value: entry.to_string(),
            };
            let (grade, seats) = entry.rsplit_once('=').ok_or_else(invalid)?;
            let grade = grade.trim();
            if grade.is_empty() {
                return Err(invalid());
            }
            let total_seats = seats.trim().parse::<u32>().map_err(|_| invalid())?;
            Ok(GradeSeatRule {
                grade: grade.to_string(),
                total_seats,
                min_age: None,
                order: u32::try_from(position).unwrap_or(u32::MAX),
            })
        })
        .collect()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for variable in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ADMISSIONS_UTC_OFFSET_MINUTES",
            "ADMISSIONS_MIN_SLOT_MINUTES",
            "ADMISSIONS_DEFAULT_SLOT_CAPACITY",
            "ADMISSIONS_DEFAULT_GRADE_SEATS",
            "ADMISSIONS_REMINDER_DAYS",
            "ADMISSIONS_MAX_COMMIT_ATTEMPTS",
            "ADMISSIONS_GRADE_SEATS",
        ] {
            env::remove_var(variable);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.admissions.scheduling, SchedulingPolicy::default());
        assert!(config.admissions.grade_seats.is_empty());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_scheduling_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ADMISSIONS_UTC_OFFSET_MINUTES", "-300");
        env::set_var("ADMISSIONS_MIN_SLOT_MINUTES", "45");
        env::set_var("ADMISSIONS_DEFAULT_SLOT_CAPACITY", "4");
        env::set_var("ADMISSIONS_REMINDER_DAYS", "3, 1,7,3");
        env::set_var("ADMISSIONS_GRADE_SEATS", "Nursery=40; Class 5=50");

        let config = AppConfig::load().expect("config loads");
        let scheduling = &config.admissions.scheduling;
        assert_eq!(scheduling.utc_offset_minutes, -300);
        assert_eq!(scheduling.min_slot_minutes, 45);
        assert_eq!(scheduling.default_slot_capacity, 4);
        assert_eq!(scheduling.reminder_days, vec![1, 3, 7]);
        assert_eq!(scheduling.default_grade_seats, DEFAULT_GRADE_SEATS);

        let grades = &config.admissions.grade_seats;
        assert_eq!(grades.len(), 2);
        assert_eq!(grades[1].grade, "Class 5");
        assert_eq!(grades[1].total_seats, 50);
        reset_env();
    }

    #[test]
    fn rejects_invalid_scheduling_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("ADMISSIONS_DEFAULT_SLOT_CAPACITY", "0");
        match AppConfig::load() {
            Err(ConfigError::InvalidValue { variable, .. }) => {
                assert_eq!(variable, "ADMISSIONS_DEFAULT_SLOT_CAPACITY")
            }
            other => panic!("expected invalid capacity, got {other:?}"),
        }

        reset_env();
        env::set_var("ADMISSIONS_GRADE_SEATS", "Nursery");
        let err = AppConfig::load().expect_err("grade entry without seats");
        assert!(err.to_string().contains("ADMISSIONS_GRADE_SEATS"));

        reset_env();
        env::set_var("ADMISSIONS_REMINDER_DAYS", "one");
        assert!(AppConfig::load().is_err());
        reset_env();
    }
}
