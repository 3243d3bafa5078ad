use crate::consumer::{ConsumerConfig, ConsumerManager};
use crate::discovery::{DiscoveryInformation, StaticDiscovery, OPENID11_SERVICE};
use crate::http::{ReqwestFetcher, RequestOptions};
use crate::APP_USER_AGENT;
use anyhow::{bail, Result};
use std::{sync::Arc, time::Duration};
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub op_endpoint: String,
    pub version2: bool,
    pub max_attempts: usize,
    pub timeout: u64,
}

impl Args {
    fn service(&self) -> DiscoveryInformation {
        if self.version2 {
            DiscoveryInformation::op_identifier(self.op_endpoint.clone())
        } else {
            DiscoveryInformation::claimed(
                self.op_endpoint.clone(),
                self.op_endpoint.clone(),
                None,
                OPENID11_SERVICE,
            )
        }
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            connect_timeout: Duration::from_secs(self.timeout),
            socket_timeout: Duration::from_secs(self.timeout),
            ..RequestOptions::default()
        }
    }

    /// Consumer settings: attempt budget and HTTP timeouts.
    #[must_use]
    pub fn config(&self) -> ConsumerConfig {
        ConsumerConfig::new()
            .with_max_assoc_attempts(self.max_attempts)
            .with_request_options(self.request_options())
    }
}

/// Execute the associate action.
/// # Errors
/// Returns an error if no association could be established.
pub async fn execute(args: Args) -> Result<()> {
    let fetcher = ReqwestFetcher::new(APP_USER_AGENT, &args.request_options())?;
    let consumer = ConsumerManager::new(
        args.config(),
        Arc::new(fetcher),
        Arc::new(StaticDiscovery::new()),
    );

    let discovery = args.service();
    debug!(version = discovery.version(), "associating");
    consumer.associate(std::slice::from_ref(&discovery)).await;

    match consumer.association(&args.op_endpoint) {
        Some(association) => {
            println!("handle:     {}", association.handle());
            println!("assoc_type: {}", association.assoc_type());
            println!("expires_in: {}", association.expires_in());
            Ok(())
        }
        None => bail!("no association established with {}", args.op_endpoint),
    }
}
