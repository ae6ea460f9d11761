pub mod auth;
pub mod limiter;
pub mod logging;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

use crate::api::Environment;

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_ENV: &str = "env";
pub const ARG_STORE_TIMEOUT_SECONDS: &str = "store-timeout-seconds";
pub const ARG_CORS_TRUSTED_ORIGINS: &str = "cors-trusted-origins";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("vouch")
        .about("Bearer token authentication and versioned records API")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("VOUCH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help(
                    "PostgreSQL connection string. Without it an in-memory store is used, which is refused in production.",
                )
                .env("VOUCH_DSN"),
        )
        .arg(
            Arg::new(ARG_ENV)
                .short('e')
                .long(ARG_ENV)
                .help("Environment (development|staging|production)")
                .default_value("development")
                .env("VOUCH_ENV")
                .value_parser(|value: &str| value.parse::<Environment>()),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_SECONDS)
                .long(ARG_STORE_TIMEOUT_SECONDS)
                .help("Deadline for every store call, in seconds")
                .default_value("3")
                .env("VOUCH_STORE_TIMEOUT_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CORS_TRUSTED_ORIGINS)
                .long(ARG_CORS_TRUSTED_ORIGINS)
                .help("Trusted CORS origins, space separated (default: any origin)")
                .env("VOUCH_CORS_TRUSTED_ORIGINS")
                .value_delimiter(' '),
        );

    let command = limiter::with_args(command);
    let command = auth::with_args(command);
    logging::with_args(command)
}
