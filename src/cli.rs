//! Command-line interface for web-shield.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

/// Command-line arguments.
///
/// Unset options leave the file/environment value alone.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// API key for the protected path.
    pub api_key: Option<String>,
    /// Secret for session-bound tokens.
    pub session_secret: Option<String>,
    /// Cross-origin callers to allow (repeatable).
    pub allowed_origins: Vec<String>,
    /// Identify clients by `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Disable rate limiting.
    pub no_rate_limit: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("api-key") => {
                result.api_key = Some(parser.value()?.parse()?);
            }
            Short('s') | Long("session-secret") => {
                result.session_secret = Some(parser.value()?.parse()?);
            }
            Short('o') | Long("allowed-origin") => {
                result.allowed_origins.push(parser.value()?.parse()?);
            }
            Long("trust-proxy") => {
                result.trust_proxy = true;
            }
            Long("no-rate-limit") => {
                result.no_rate_limit = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"web-shield {version}
Layered request defenses in front of a small web application

USAGE:
    web-shield [OPTIONS]

OPTIONS:
    -H, --host <ADDR>             Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>             Port to listen on [default: 3000]
    -c, --config <FILE>           Path to configuration file (JSON)
    -k, --api-key <KEY>           API key for /secure-api
    -s, --session-secret <SECRET> Secret for session-bound CSRF tokens
    -o, --allowed-origin <ORIGIN> Allow a cross-origin caller (repeatable)
    -l, --log-level <LVL>         Log level (error, warn, info, debug, trace)
        --trust-proxy             Identify clients by X-Forwarded-For
        --no-rate-limit           Disable rate limiting
    -h, --help                    Print help
    -V, --version                 Print version

ENVIRONMENT VARIABLES:
    WEB_SHIELD_HOST               Host address (overrides config)
    WEB_SHIELD_PORT               Port number (overrides config)
    WEB_SHIELD_API_KEY            API key (overrides config)
    WEB_SHIELD_SESSION_SECRET     Session secret (overrides config)
    WEB_SHIELD_ALLOWED_ORIGINS    Comma-separated origins (overrides config)
    WEB_SHIELD_LOG_LEVEL          Log level (overrides config)
    RUST_LOG                      Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:3000, API path locked)
    web-shield

    # Start on all interfaces with secrets
    web-shield -H 0.0.0.0 -p 8080 -k my-api-key -s my-session-secret

    # Start with config file
    web-shield -c /etc/web-shield/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("web-shield {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("web-shield")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert!(result.host.is_none());
        assert!(result.port.is_none());
        assert!(result.allowed_origins.is_empty());
        assert!(!result.trust_proxy);
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
        assert_eq!(result.port, Some(8080));
    }

    #[test]
    fn test_secrets() {
        let result = parse_args_from(args(&["-k", "api", "--session-secret", "sess"])).unwrap();
        assert_eq!(result.api_key.as_deref(), Some("api"));
        assert_eq!(result.session_secret.as_deref(), Some("sess"));
    }

    #[test]
    fn test_repeated_origins() {
        let result = parse_args_from(args(&[
            "-o",
            "https://a.example",
            "--allowed-origin",
            "https://b.example",
        ]))
        .unwrap();
        assert_eq!(
            result.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_switches() {
        let result = parse_args_from(args(&["--trust-proxy", "--no-rate-limit"])).unwrap();
        assert!(result.trust_proxy);
        assert!(result.no_rate_limit);
    }

    #[test]
    fn test_help_and_version() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
        assert!(parse_args_from(args(&["-V"])).unwrap().version);
        assert!(parse_args_from(args(&["--version"])).unwrap().version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse_args_from(args(&["-p", "invalid"])).is_err());
        assert!(parse_args_from(args(&["-H", "not-an-ip"])).is_err());
        assert!(parse_args_from(args(&["-o"])).is_err());
    }

    #[test]
    fn test_unexpected_argument() {
        let err = parse_args_from(args(&["serve"])).unwrap_err();
        assert_eq!(err.to_string(), "unexpected argument: 'serve'");
    }
}
