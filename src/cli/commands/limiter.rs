use clap::{Arg, ArgMatches, Command};

use crate::limiter::LimiterConfig;

pub const ARG_LIMITER_ENABLED: &str = "limiter-enabled";
pub const ARG_LIMITER_RPS: &str = "limiter-rps";
pub const ARG_LIMITER_BURST: &str = "limiter-burst";

fn positive_rps(value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(rps) if rps.is_finite() && rps > 0.0 => Ok(rps),
        _ => Err(format!("invalid rate '{value}', expected a positive number")),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LIMITER_ENABLED)
                .long(ARG_LIMITER_ENABLED)
                .help("Enable per-client rate limiting")
                .env("VOUCH_LIMITER_ENABLED")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_LIMITER_RPS)
                .long(ARG_LIMITER_RPS)
                .help("Requests per second each client may sustain")
                .env("VOUCH_LIMITER_RPS")
                .default_value("2")
                .value_parser(positive_rps),
        )
        .arg(
            Arg::new(ARG_LIMITER_BURST)
                .long(ARG_LIMITER_BURST)
                .help("Requests a client may send at once before being limited")
                .env("VOUCH_LIMITER_BURST")
                .default_value("4")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

/// Build the limiter settings from parsed matches.
#[must_use]
pub fn parse(matches: &ArgMatches) -> LimiterConfig {
    let defaults = LimiterConfig::default();
    LimiterConfig::new(
        matches
            .get_one::<f64>(ARG_LIMITER_RPS)
            .copied()
            .unwrap_or(defaults.rps),
        matches
            .get_one::<u32>(ARG_LIMITER_BURST)
            .copied()
            .unwrap_or(defaults.burst),
    )
    .with_enabled(
        matches
            .get_one::<bool>(ARG_LIMITER_ENABLED)
            .copied()
            .unwrap_or(defaults.enabled),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("vouch"))
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(
            [
                ("VOUCH_LIMITER_ENABLED", None::<&str>),
                ("VOUCH_LIMITER_RPS", None),
                ("VOUCH_LIMITER_BURST", None),
            ],
            || {
                let matches = command().get_matches_from(vec!["vouch"]);
                assert_eq!(parse(&matches), LimiterConfig::new(2.0, 4));
            },
        );
    }

    #[test]
    fn flags() {
        temp_env::with_vars([("VOUCH_LIMITER_ENABLED", None::<&str>)], || {
            let matches = command().get_matches_from(vec![
                "vouch",
                "--limiter-enabled",
                "false",
                "--limiter-rps",
                "0.5",
                "--limiter-burst",
                "10",
            ]);
            let config = parse(&matches);
            assert!(!config.enabled);
            assert!((config.rps - 0.5).abs() < f64::EPSILON);
            assert_eq!(config.burst, 10);
        });
    }

    #[test]
    fn env() {
        temp_env::with_vars(
            [
                ("VOUCH_LIMITER_ENABLED", Some("false")),
                ("VOUCH_LIMITER_RPS", Some("8")),
                ("VOUCH_LIMITER_BURST", Some("16")),
            ],
            || {
                let matches = command().get_matches_from(vec!["vouch"]);
                assert_eq!(
                    parse(&matches),
                    LimiterConfig::new(8.0, 16).with_enabled(false)
                );
            },
        );
    }

    #[test]
    fn rejects_non_positive_rate_and_zero_burst() {
        assert!(
            command()
                .try_get_matches_from(vec!["vouch", "--limiter-rps", "0"])
                .is_err()
        );
        assert!(
            command()
                .try_get_matches_from(vec!["vouch", "--limiter-burst", "0"])
                .is_err()
        );
    }
}
