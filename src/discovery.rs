//! Discovered OpenID services and the discovery collaborator contract.
//!
//! Parsing XRDS or HTML documents is out of scope: callers plug in their own
//! [`Discovery`] implementation. [`StaticDiscovery`] answers from a fixed
//! table and is what the tests and the CLI use.

use crate::message::OPENID2_NS;
use crate::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

pub const OPENID10_SERVICE: &str = "http://openid.net/signon/1.0";
pub const OPENID11_SERVICE: &str = "http://openid.net/signon/1.1";
pub const OPENID2_SERVICE: &str = "http://specs.openid.net/auth/2.0/signon";
/// OP identifier element: the user picks an identifier at the OP.
pub const OPENID2_OP_SERVICE: &str = "http://specs.openid.net/auth/2.0/server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInformation {
    op_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claimed_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delegate: Option<String>,
    version: String,
}

impl DiscoveryInformation {
    /// OP identifier service (identifier selection at the OP).
    #[must_use]
    pub fn op_identifier(op_endpoint: impl Into<String>) -> Self {
        Self {
            op_endpoint: op_endpoint.into(),
            claimed_identifier: None,
            delegate: None,
            version: OPENID2_OP_SERVICE.to_string(),
        }
    }

    /// Claimed identifier service.
    #[must_use]
    pub fn claimed(
        op_endpoint: impl Into<String>,
        claimed_identifier: impl Into<String>,
        delegate: Option<String>,
        version: &str,
    ) -> Self {
        Self {
            op_endpoint: op_endpoint.into(),
            claimed_identifier: Some(claimed_identifier.into()),
            delegate,
            version: version.to_string(),
        }
    }

    #[must_use]
    pub fn op_endpoint(&self) -> &str {
        &self.op_endpoint
    }

    #[must_use]
    pub fn claimed_identifier(&self) -> Option<&str> {
        self.claimed_identifier.as_deref()
    }

    /// Local identifier at the OP: the delegate, else the claimed identifier.
    #[must_use]
    pub fn delegate_identifier(&self) -> Option<&str> {
        self.delegate.as_deref().or(self.claimed_identifier.as_deref())
    }

    #[must_use]
    pub fn has_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.version == OPENID2_SERVICE || self.version == OPENID2_OP_SERVICE
    }

    #[must_use]
    pub fn is_op_identifier(&self) -> bool {
        self.version == OPENID2_OP_SERVICE
    }

    /// Namespace value for messages sent to this service.
    #[must_use]
    pub fn message_namespace(&self) -> Option<&'static str> {
        self.is_version2().then_some(OPENID2_NS)
    }
}

/// Resolves a user-supplied identifier to candidate services, best first.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// # Errors
    ///
    /// Returns a discovery error if no service can be found.
    async fn discover(&self, identifier: &str) -> Result<Vec<DiscoveryInformation>, Error>;
}

#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Vec<DiscoveryInformation>>>,
}

/// Identifiers compare without their fragment.
fn lookup_key(identifier: &str) -> &str {
    identifier
        .split_once('#')
        .map_or(identifier, |(base, _)| base)
}

impl StaticDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identifier: &str, services: Vec<DiscoveryInformation>) {
        self.services
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(lookup_key(identifier).to_string(), services);
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn discover(&self, identifier: &str) -> Result<Vec<DiscoveryInformation>, Error> {
        let services = self
            .services
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(lookup_key(identifier))
            .cloned()
            .unwrap_or_default();
        if services.is_empty() {
            return Err(Error::Discovery(format!(
                "no OpenID service found for {identifier}"
            )));
        }
        Ok(services)
    }
}
