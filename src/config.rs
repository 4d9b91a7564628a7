use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::optimizer::PackingConfig;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub optimizer: OptimizerConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            optimizer: OptimizerConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "SOLID_PACKER_API_HOST";
    const PORT_VAR: &'static str = "SOLID_PACKER_API_PORT";

    fn from_env() -> Self {
        Self::from_values(env_string(Self::HOST_VAR), env_string(Self::PORT_VAR))
    }

    fn from_values(host: Option<String>, port: Option<String>) -> Self {
        let host_value = host.unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, display_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = parse_with_fallback(
            Self::PORT_VAR,
            port.as_deref(),
            Self::DEFAULT_PORT,
            |value| value != 0,
            "must not be 0",
        );

        Self {
            bind_ip,
            display_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Configuration for the packing search.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    packing: PackingConfig,
}

impl OptimizerConfig {
    const BVH_DEPTH_VAR: &'static str = "SOLID_PACKER_BVH_DEPTH";
    const ITERATIONS_VAR: &'static str = "SOLID_PACKER_ANNEAL_ITERATIONS";
    const BUDGET_VAR: &'static str = "SOLID_PACKER_CANDIDATE_BUDGET_SECS";
    const MOVE_ATTEMPTS_VAR: &'static str = "SOLID_PACKER_MAX_MOVE_ATTEMPTS";
    const TEMPERATURE_VAR: &'static str = "SOLID_PACKER_TEMPERATURE_FACTOR";
    const SEED_VAR: &'static str = "SOLID_PACKER_SEED";

    fn from_env() -> Self {
        let bvh_depth = parse_with_fallback(
            Self::BVH_DEPTH_VAR,
            env_string(Self::BVH_DEPTH_VAR).as_deref(),
            PackingConfig::DEFAULT_BVH_DEPTH,
            |value| value <= PackingConfig::MAX_BVH_DEPTH,
            "must be at most 16",
        );

        let annealing_iterations = parse_with_fallback(
            Self::ITERATIONS_VAR,
            env_string(Self::ITERATIONS_VAR).as_deref(),
            PackingConfig::DEFAULT_ANNEALING_ITERATIONS,
            |value| PackingConfig::validate_annealing_iterations(value).is_ok(),
            "must be between 1 and 1000000000",
        );

        let budget_secs = load_f64_with_warning(
            Self::BUDGET_VAR,
            PackingConfig::DEFAULT_CANDIDATE_BUDGET.as_secs_f64(),
            |value| value > 0.0 && value.is_finite(),
            "must be a positive number of seconds",
            "Adjusted candidate budget changes how long each item count is tried",
        );

        let max_move_attempts = parse_with_fallback(
            Self::MOVE_ATTEMPTS_VAR,
            env_string(Self::MOVE_ATTEMPTS_VAR).as_deref(),
            PackingConfig::DEFAULT_MAX_MOVE_ATTEMPTS,
            |value| value > 0,
            "must be greater than 0",
        );

        let temperature_factor = load_f64_with_warning(
            Self::TEMPERATURE_VAR,
            PackingConfig::DEFAULT_TEMPERATURE_FACTOR,
            |value| value > 0.0 && value.is_finite(),
            "must be greater than 0",
            "Adjusted temperature factor changes how often worse layouts are accepted",
        );

        let seed = env_string(Self::SEED_VAR).and_then(|raw| match raw.parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(err) => {
                warn!(
                    "Could not parse {} ('{}'): {}. Using a random seed.",
                    Self::SEED_VAR,
                    raw,
                    err
                );
                None
            }
        });

        let packing = PackingConfig::builder()
            .bvh_depth(bvh_depth)
            .annealing_iterations(annealing_iterations)
            .candidate_budget(Duration::from_secs_f64(budget_secs))
            .max_move_attempts(max_move_attempts)
            .temperature_factor(temperature_factor)
            .seed(seed)
            .build();

        Self { packing }
    }

    /// Returns the configured PackingConfig.
    pub fn packing_config(&self) -> PackingConfig {
        self.packing
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

/// Parses `raw` or falls back to `default` with a warning.
fn parse_with_fallback<T>(
    var_name: &str,
    raw: Option<&str>,
    default: T,
    validator: impl Fn(T) -> bool,
    invalid_hint: &str,
) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if validator(value) => value,
        Ok(_) => {
            warn!(
                "{} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Err(err) => {
            warn!(
                "Could not parse {} ('{}'): {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    let value = parse_with_fallback(
        var_name,
        env_string(var_name).as_deref(),
        default,
        validator,
        invalid_hint,
    );
    let tolerance = (default.abs().max(1.0)) * 1e-9;
    if (value - default).abs() > tolerance {
        println!("⚠️ {} ({} = {}).", warning, var_name, value);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_fallback_accepts_valid_values() {
        assert_eq!(parse_with_fallback("TEST_VAR", Some("12"), 8usize, |v| v <= 16, ""), 12);
        assert_eq!(parse_with_fallback("TEST_VAR", Some(" 3 "), 8usize, |_| true, ""), 3);
        assert_eq!(parse_with_fallback("TEST_VAR", Some("0.25"), 0.5, |v| v > 0.0, ""), 0.25);
    }

    #[test]
    fn test_parse_with_fallback_uses_default() {
        // missing
        assert_eq!(parse_with_fallback("TEST_VAR", None, 8usize, |_| true, ""), 8);
        // unparsable
        assert_eq!(parse_with_fallback("TEST_VAR", Some("deep"), 8usize, |_| true, ""), 8);
        assert_eq!(parse_with_fallback("TEST_VAR", Some("-1"), 8usize, |_| true, ""), 8);
        // rejected by the validator
        assert_eq!(parse_with_fallback("TEST_VAR", Some("40"), 8usize, |v| v <= 16, ""), 8);
        assert_eq!(parse_with_fallback("TEST_VAR", Some("-0.5"), 0.5, |v| v > 0.0, ""), 0.5);
    }

    #[test]
    fn test_api_config_defaults() {
        let config = ApiConfig::from_values(None, None);
        assert_eq!(config.port(), 8080);
        assert!(config.binds_to_all_interfaces());
        assert!(config.uses_default_host());
    }

    #[test]
    fn test_api_config_falls_back_on_invalid_values() {
        let config = ApiConfig::from_values(Some("not-an-ip".to_string()), Some("0".to_string()));
        assert_eq!(config.display_host(), "0.0.0.0");
        assert_eq!(config.port(), 8080);

        let config = ApiConfig::from_values(Some("127.0.0.1".to_string()), Some("9000".to_string()));
        assert!(!config.binds_to_all_interfaces());
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9000");
    }
}
