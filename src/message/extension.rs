//! Extension plumbing for indirect messages.
//!
//! Extensions live under their own alias (`openid.ns.<alias>=<type uri>` plus
//! `openid.<alias>.<field>` parameters). Factories are looked up in an
//! [`ExtensionRegistry`] handed to each message at construction time, so two
//! managers can run with different extension sets in the same process.

use crate::message::parameter::ParameterList;
use crate::Error;
use std::{any::Any, collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

pub trait MessageExtension: Send + Sync + fmt::Debug {
    fn type_uri(&self) -> &str;

    /// Alias to use when the message does not already declare one.
    fn preferred_alias(&self) -> Option<&str> {
        None
    }

    /// Extension fields without the `openid.<alias>.` prefix.
    fn parameters(&self) -> ParameterList;

    /// Whether the extension's fields must be covered by the assertion signature.
    fn signature_required(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

pub trait MessageExtensionFactory: Send + Sync {
    fn type_uri(&self) -> &str;

    /// Build an extension from its unprefixed fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the fields do not form a valid extension payload.
    fn create(
        &self,
        params: &ParameterList,
        is_request: bool,
    ) -> Result<Box<dyn MessageExtension>, Error>;
}

#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    factories: HashMap<String, Arc<dyn MessageExtensionFactory>>,
}

impl ExtensionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Simple Registration factory.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::message::sreg::SRegFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn MessageExtensionFactory>) {
        self.factories
            .insert(factory.type_uri().to_string(), factory);
    }

    #[must_use]
    pub fn get(&self, type_uri: &str) -> Option<&Arc<dyn MessageExtensionFactory>> {
        self.factories.get(type_uri)
    }

    #[must_use]
    pub fn has(&self, type_uri: &str) -> bool {
        self.factories.contains_key(type_uri)
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uris: Vec<&String> = self.factories.keys().collect();
        uris.sort();
        f.debug_struct("ExtensionRegistry")
            .field("factories", &uris)
            .finish()
    }
}

/// Bidirectional type-URI/alias map derived from `openid.ns.*` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionAliases {
    by_uri: BTreeMap<String, String>,
    by_alias: BTreeMap<String, String>,
}

impl ExtensionAliases {
    pub(crate) fn insert(&mut self, alias: &str, type_uri: &str) {
        self.by_uri.insert(type_uri.to_string(), alias.to_string());
        self.by_alias.insert(alias.to_string(), type_uri.to_string());
    }

    #[must_use]
    pub fn alias(&self, type_uri: &str) -> Option<&str> {
        self.by_uri.get(type_uri).map(String::as_str)
    }

    #[must_use]
    pub fn type_uri(&self, alias: &str) -> Option<&str> {
        self.by_alias.get(alias).map(String::as_str)
    }

    pub fn type_uris(&self) -> impl Iterator<Item = &str> {
        self.by_uri.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty()
    }
}
