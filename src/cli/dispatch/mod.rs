//! Turn validated CLI matches into the action to run.

use crate::{
    api::Environment,
    cli::{
        actions::{Action, server::Args},
        commands::{
            ARG_CORS_TRUSTED_ORIGINS, ARG_DSN, ARG_ENV, ARG_PORT, ARG_STORE_TIMEOUT_SECONDS, auth,
            limiter,
        },
    },
};
use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let environment = matches
        .get_one::<Environment>(ARG_ENV)
        .copied()
        .unwrap_or_default();

    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .map(|dsn| dsn.trim())
        .filter(|dsn| !dsn.is_empty())
        .map(|dsn| -> Result<SecretString> {
            let parsed = Url::parse(dsn).context("invalid --dsn: not a URL")?;
            if !matches!(parsed.scheme(), "postgres" | "postgresql") {
                bail!("invalid --dsn: expected a postgres:// URL");
            }
            Ok(SecretString::from(dsn.to_string()))
        })
        .transpose()?;

    if dsn.is_none() && environment == Environment::Production {
        bail!("missing required argument: --{ARG_DSN} (required in production)");
    }

    let store_timeout_seconds = matches
        .get_one::<u64>(ARG_STORE_TIMEOUT_SECONDS)
        .copied()
        .unwrap_or(3);

    let cors_trusted_origins = matches
        .get_many::<String>(ARG_CORS_TRUSTED_ORIGINS)
        .map(|values| {
            values
                .filter(|origin| !origin.trim().is_empty())
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        environment,
        store_timeout_seconds,
        cors_trusted_origins,
        limiter: limiter::parse(matches),
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        activation_ttl_seconds: auth_opts.activation_ttl_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use secrecy::ExposeSecret;

    const VARS: [&str; 11] = [
        "VOUCH_PORT",
        "VOUCH_DSN",
        "VOUCH_ENV",
        "VOUCH_STORE_TIMEOUT_SECONDS",
        "VOUCH_CORS_TRUSTED_ORIGINS",
        "VOUCH_LIMITER_ENABLED",
        "VOUCH_LIMITER_RPS",
        "VOUCH_LIMITER_BURST",
        "VOUCH_TOKEN_TTL_SECONDS",
        "VOUCH_ACTIVATION_TTL_SECONDS",
        "VOUCH_LOG_LEVEL",
    ];

    fn dispatch(args: &[&str]) -> Result<Args> {
        let vars: Vec<(&str, Option<&str>)> = VARS.iter().map(|var| (*var, None)).collect();
        temp_env::with_vars(vars, || {
            let matches = commands::new().try_get_matches_from(args)?;
            let Action::Server(args) = handler(&matches)?;
            Ok(args)
        })
    }

    #[test]
    fn development_without_dsn_uses_memory() -> Result<()> {
        let args = dispatch(&["vouch"])?;
        assert!(args.dsn.is_none());
        assert_eq!(args.environment, Environment::Development);
        assert_eq!(args.port, 8080);
        assert_eq!(args.store_timeout_seconds, 3);
        assert!(args.limiter.enabled);
        assert_eq!(args.token_ttl_seconds, 86_400);
        assert_eq!(args.activation_ttl_seconds, 259_200);
        assert!(args.cors_trusted_origins.is_empty());
        Ok(())
    }

    #[test]
    fn production_requires_dsn() {
        let result = dispatch(&["vouch", "--env", "production"]);
        assert!(
            result
                .err()
                .is_some_and(|err| err.to_string().contains("required in production"))
        );
    }

    #[test]
    fn dsn_must_be_postgres_url() {
        assert!(dispatch(&["vouch", "--dsn", "not a url"]).is_err());
        assert!(dispatch(&["vouch", "--dsn", "mysql://localhost/vouch"]).is_err());
    }

    #[test]
    fn full_configuration() -> Result<()> {
        let args = dispatch(&[
            "vouch",
            "--env",
            "production",
            "--dsn",
            "postgres://vouch:secret@db:5432/vouch",
            "--cors-trusted-origins",
            "https://vouch.dev",
            "--limiter-burst",
            "8",
        ])?;
        assert_eq!(
            args.dsn.as_ref().map(|dsn| dsn.expose_secret().to_string()),
            Some("postgres://vouch:secret@db:5432/vouch".to_string())
        );
        assert_eq!(args.cors_trusted_origins, ["https://vouch.dev"]);
        assert_eq!(args.limiter.burst, 8);
        Ok(())
    }
}
