use clap::{Arg, ArgMatches, Command};

pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_ACTIVATION_TTL_SECONDS: &str = "activation-ttl-seconds";

/// Ten years; longer lifetimes are refused at the command line.
pub const MAX_TTL_SECONDS: i64 = 315_360_000;

pub struct Options {
    pub token_ttl_seconds: i64,
    pub activation_ttl_seconds: i64,
}

impl Options {
    /// Parse token lifetimes from matches.
    ///
    /// # Errors
    /// Returns an error if a lifetime is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds = |id: &str| {
            matches
                .get_one::<i64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            token_ttl_seconds: seconds(ARG_TOKEN_TTL_SECONDS)?,
            activation_ttl_seconds: seconds(ARG_ACTIVATION_TTL_SECONDS)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Authentication token TTL in seconds")
                .env("VOUCH_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
        .arg(
            Arg::new(ARG_ACTIVATION_TTL_SECONDS)
                .long(ARG_ACTIVATION_TTL_SECONDS)
                .help("Activation token TTL in seconds")
                .env("VOUCH_ACTIVATION_TTL_SECONDS")
                .default_value("259200")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TTL_SECONDS)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("VOUCH_TOKEN_TTL_SECONDS", None::<&str>),
                ("VOUCH_ACTIVATION_TTL_SECONDS", None),
            ],
            || {
                let matches = with_args(Command::new("vouch")).get_matches_from(vec!["vouch"]);
                let options = Options::parse(&matches)?;
                assert_eq!(options.token_ttl_seconds, 86_400);
                assert_eq!(options.activation_ttl_seconds, 259_200);
                Ok(())
            },
        )
    }

    #[test]
    fn env_overrides() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("VOUCH_TOKEN_TTL_SECONDS", Some("3600")),
                ("VOUCH_ACTIVATION_TTL_SECONDS", Some("600")),
            ],
            || {
                let matches = with_args(Command::new("vouch")).get_matches_from(vec!["vouch"]);
                let options = Options::parse(&matches)?;
                assert_eq!(options.token_ttl_seconds, 3600);
                assert_eq!(options.activation_ttl_seconds, 600);
                Ok(())
            },
        )
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = with_args(Command::new("vouch")).try_get_matches_from(vec![
            "vouch",
            "--token-ttl-seconds",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn lifetimes_beyond_ten_years_are_rejected() {
        let command = || with_args(Command::new("vouch"));

        assert!(
            command()
                .try_get_matches_from(["vouch", "--token-ttl-seconds", "315360001"])
                .is_err()
        );
        assert!(
            command()
                .try_get_matches_from(["vouch", "--activation-ttl-seconds", "9000000000000"])
                .is_err()
        );
        assert!(
            command()
                .try_get_matches_from(["vouch", "--token-ttl-seconds", "315360000"])
                .is_ok()
        );
    }
}
