//! Runnable CLI actions: the Provider endpoint and a one-shot association.

pub mod associate;
pub mod server;

use tracing::debug;

#[derive(Debug)]
pub enum Action {
    /// Serve `associate` and `check_authentication` over HTTP.
    Server(server::Args),
    /// Establish an association with an OP and print it.
    Associate(associate::Args),
}

impl Action {
    /// OP endpoint the action talks for or to.
    #[must_use]
    pub fn op_endpoint(&self) -> &str {
        match self {
            Self::Server(args) => &args.op_endpoint,
            Self::Associate(args) => &args.op_endpoint,
        }
    }

    /// # Errors
    /// Returns an error if the server cannot run or no association is established.
    pub async fn execute(self) -> anyhow::Result<()> {
        debug!(op_endpoint = self.op_endpoint(), "running action");
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::Associate(args) => associate::execute(args).await,
        }
    }
}
