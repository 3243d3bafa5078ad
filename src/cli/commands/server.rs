use clap::{Arg, ArgMatches, Command};

pub const ARG_PORT: &str = "port";
pub const ARG_OP_ENDPOINT: &str = "op-endpoint";
pub const ARG_USER_SETUP_URL: &str = "user-setup-url";
pub const ARG_ASSOC_EXPIRE: &str = "assoc-expire";

#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub op_endpoint: String,
    pub user_setup_url: Option<String>,
    pub assoc_expire: u64,
}

impl Options {
    /// Parse server arguments from matches.
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
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            op_endpoint,
            user_setup_url: matches.get_one::<String>(ARG_USER_SETUP_URL).cloned(),
            assoc_expire: matches
                .get_one::<u64>(ARG_ASSOC_EXPIRE)
                .copied()
                .unwrap_or(1800),
        })
    }
}

#[must_use]
pub fn command() -> Command {
    Command::new("server")
        .about("Serve the OpenID Provider direct endpoint")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("OPENID_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_OP_ENDPOINT)
                .long(ARG_OP_ENDPOINT)
                .help("Public URL of this OP endpoint, asserted as openid.op_endpoint")
                .env("OPENID_OP_ENDPOINT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_USER_SETUP_URL)
                .long(ARG_USER_SETUP_URL)
                .help("Where users are sent when an immediate request needs interaction")
                .env("OPENID_USER_SETUP_URL"),
        )
        .arg(
            Arg::new(ARG_ASSOC_EXPIRE)
                .long(ARG_ASSOC_EXPIRE)
                .help("Association lifetime in seconds")
                .default_value("1800")
                .env("OPENID_ASSOC_EXPIRE")
                .value_parser(clap::value_parser!(u64)),
        )
}
