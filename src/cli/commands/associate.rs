use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_OP_ENDPOINT: &str = "op-endpoint";
pub const ARG_VERSION2: &str = "version2";
pub const ARG_MAX_ATTEMPTS: &str = "max-attempts";
pub const ARG_TIMEOUT: &str = "timeout";

#[derive(Debug, Clone)]
pub struct Options {
    pub op_endpoint: String,
    pub version2: bool,
    pub max_attempts: usize,
    pub timeout: u64,
}

impl Options {
    /// Parse associate arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let op_endpoint = matches
            .get_one::<String>(ARG_OP_ENDPOINT)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_OP_ENDPOINT}"))?;

        Ok(Self {
            op_endpoint,
            version2: matches.get_flag(ARG_VERSION2),
            max_attempts: matches
                .get_one::<usize>(ARG_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(4),
            timeout: matches.get_one::<u64>(ARG_TIMEOUT).copied().unwrap_or(10),
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new("associate")
        .about("Negotiate an association with an OpenID Provider")
        .arg(
            Arg::new(ARG_OP_ENDPOINT)
                .long(ARG_OP_ENDPOINT)
                .help("OP endpoint URL")
                .env("OPENID_OP_ENDPOINT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_VERSION2)
                .long(ARG_VERSION2)
                .help("Use OpenID 2.0 instead of 1.1 compatibility mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_MAX_ATTEMPTS)
                .long(ARG_MAX_ATTEMPTS)
                .help("Maximum number of association requests")
                .default_value("4")
                .env("OPENID_MAX_ASSOC_ATTEMPTS")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .long(ARG_TIMEOUT)
                .help("Connect and socket timeout in seconds")
                .default_value("10")
                .env("OPENID_HTTP_TIMEOUT")
                .value_parser(clap::value_parser!(u64)),
        )
}
