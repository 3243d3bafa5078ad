//! Map parsed CLI arguments to an [`Action`].

use crate::cli::actions::{associate, server, Action};
use crate::cli::commands;
use anyhow::{bail, Result};

/// # Errors
/// Returns an error if required arguments are missing or the subcommand is unknown.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("server", sub_m)) => {
            let options = commands::server::Options::parse(sub_m)?;
            Ok(Action::Server(server::Args {
                port: options.port,
                op_endpoint: options.op_endpoint,
                user_setup_url: options.user_setup_url,
                assoc_expire: options.assoc_expire,
            }))
        }
        Some(("associate", sub_m)) => {
            let options = commands::associate::Options::parse(sub_m)?;
            Ok(Action::Associate(associate::Args {
                op_endpoint: options.op_endpoint,
                version2: options.version2,
                max_attempts: options.max_attempts,
                timeout: options.timeout,
            }))
        }
        Some((name, _)) => bail!("unknown subcommand: {name}"),
        None => bail!("missing subcommand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "openid",
            "server",
            "--op-endpoint",
            "https://op.example/openid",
        ]);
        let Action::Server(args) = handler(&matches)? else {
            bail!("expected a server action");
        };
        assert_eq!(args.port, 8080);
        assert_eq!(args.op_endpoint, "https://op.example/openid");
        Ok(())
    }

    #[test]
    fn test_associate_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "openid",
            "associate",
            "--op-endpoint",
            "https://op.example/openid",
            "--version2",
        ]);
        let Action::Associate(args) = handler(&matches)? else {
            bail!("expected an associate action");
        };
        assert!(args.version2);
        Ok(())
    }
}
