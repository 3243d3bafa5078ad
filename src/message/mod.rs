//! OpenID message model.
//!
//! Every message is a [`ParameterList`] tagged with a [`MessageKind`]. The kind
//! selects the required-field table and the validation routine; typed wrappers
//! in the submodules (`AuthSuccess`, `AssociationRequest`, ...) add semantic
//! accessors and constructors on top of the shared [`Message`] core.
//!
//! Protocol version is carried by the messages themselves: `openid.ns` (or
//! bare `ns` in direct responses) equal to [`OPENID2_NS`] selects OpenID 2.0
//! rules, anything else falls back to OpenID 1.x compatibility rules.

pub mod association;
pub mod auth;
pub mod error;
pub mod extension;
pub mod parameter;
pub mod sreg;
pub mod verify;

use self::extension::{ExtensionAliases, ExtensionRegistry, MessageExtension};
use self::parameter::{ParameterList, OPENID_PREFIX};
use crate::realm::UrlRealmVerifier;
use crate::{Error, ErrorCode};
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";
pub const OPENID11_NS: &str = "http://openid.net/signon/1.1";
pub const OPENID10_NS: &str = "http://openid.net/signon/1.0";

/// Identifier used when the OP is asked to choose the user's identifier.
pub const SELECT_ID: &str = "http://specs.openid.net/auth/2.0/identifier_select";

pub mod mode {
    pub const ASSOCIATE: &str = "associate";
    pub const CHECKID_SETUP: &str = "checkid_setup";
    pub const CHECKID_IMMEDIATE: &str = "checkid_immediate";
    pub const ID_RES: &str = "id_res";
    pub const CANCEL: &str = "cancel";
    pub const SETUP_NEEDED: &str = "setup_needed";
    pub const ERROR: &str = "error";
    pub const CHECK_AUTHENTICATION: &str = "check_authentication";
}

/// Field names that can never be used as an extension alias.
const RESERVED_ALIASES: &[&str] = &[
    "ns",
    "mode",
    "identity",
    "claimed_id",
    "return_to",
    "realm",
    "trust_root",
    "assoc_handle",
    "signed",
    "sig",
    "op_endpoint",
    "response_nonce",
    "invalidate_handle",
    "error",
    "user_setup_url",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AssociationRequest,
    AssociationResponse,
    AssociationError,
    AuthRequest,
    AuthSuccess,
    AuthFailure,
    AuthImmediateFailure,
    VerifyRequest,
    VerifyResponse,
    DirectError,
    IndirectError,
}

impl MessageKind {
    /// Direct responses travel in key-value form without the `openid.` prefix.
    #[must_use]
    pub const fn is_direct_response(self) -> bool {
        matches!(
            self,
            Self::AssociationResponse | Self::AssociationError | Self::VerifyResponse | Self::DirectError
        )
    }

    /// Error code attached to validation failures of this kind.
    #[must_use]
    pub const fn error_code(self) -> ErrorCode {
        match self {
            Self::AssociationRequest | Self::AssociationResponse | Self::AssociationError => {
                ErrorCode::Association
            }
            Self::AuthRequest
            | Self::AuthSuccess
            | Self::AuthFailure
            | Self::AuthImmediateFailure => ErrorCode::Auth,
            Self::VerifyRequest | Self::VerifyResponse => ErrorCode::Verify,
            Self::DirectError | Self::IndirectError => ErrorCode::Message,
        }
    }

    #[must_use]
    pub fn required_fields(self, version2: bool) -> &'static [&'static str] {
        match (self, version2) {
            (Self::AssociationRequest, true) => &["ns", "mode", "assoc_type", "session_type"],
            (Self::AssociationRequest, false) => &["mode", "assoc_type"],
            (Self::AssociationResponse, true) => &[
                "ns",
                "assoc_handle",
                "assoc_type",
                "session_type",
                "expires_in",
            ],
            (Self::AssociationResponse, false) => &["assoc_handle", "assoc_type", "expires_in"],
            (Self::AssociationError, true) => &["ns", "error", "error_code"],
            (Self::AssociationError, false) => &["error"],
            (Self::AuthRequest, true) => &["ns", "mode"],
            (Self::AuthRequest, false) => &["mode", "identity", "return_to"],
            (Self::AuthSuccess | Self::VerifyRequest, true) => &[
                "ns",
                "mode",
                "op_endpoint",
                "return_to",
                "response_nonce",
                "assoc_handle",
                "signed",
                "sig",
            ],
            (Self::AuthSuccess | Self::VerifyRequest, false) => &[
                "mode",
                "identity",
                "return_to",
                "assoc_handle",
                "signed",
                "sig",
            ],
            (Self::AuthFailure, true) => &["ns", "mode"],
            (Self::AuthFailure, false) => &["mode"],
            (Self::AuthImmediateFailure, true) => &["ns", "mode"],
            (Self::AuthImmediateFailure, false) => &["mode", "user_setup_url"],
            (Self::VerifyResponse, true) => &["ns", "is_valid"],
            (Self::VerifyResponse, false) => &["is_valid"],
            (Self::DirectError, true) => &["ns", "error"],
            (Self::DirectError, false) => &["error"],
            (Self::IndirectError, true) => &["ns", "mode", "error"],
            (Self::IndirectError, false) => &["mode", "error"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    params: ParameterList,
    registry: Arc<ExtensionRegistry>,
    aliases: OnceLock<ExtensionAliases>,
}

impl Message {
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self::from_parameters(kind, ParameterList::new())
    }

    #[must_use]
    pub fn from_parameters(kind: MessageKind, params: ParameterList) -> Self {
        Self {
            kind,
            params,
            registry: Arc::new(ExtensionRegistry::with_defaults()),
            aliases: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn parameters(&self) -> &ParameterList {
        &self.params
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    fn key<'a>(&self, field: &'a str) -> Cow<'a, str> {
        if self.kind.is_direct_response() || field.starts_with(OPENID_PREFIX) {
            Cow::Borrowed(field)
        } else {
            Cow::Owned(format!("{OPENID_PREFIX}{field}"))
        }
    }

    /// Look up a protocol field by its unprefixed name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.params.get(&self.key(name))
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.params.has(&self.key(name))
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let key = self.key(name).into_owned();
        self.aliases = OnceLock::new();
        self.params.set(key, value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        let key = self.key(name).into_owned();
        self.aliases = OnceLock::new();
        self.params.remove(&key)
    }

    pub(crate) fn set_kind(&mut self, kind: MessageKind) {
        self.kind = kind;
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.field("ns") == Some(OPENID2_NS)
    }

    #[must_use]
    pub fn required_fields(&self) -> &'static [&'static str] {
        self.kind.required_fields(self.is_version2())
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> Error {
        Error::with_code(self.kind.error_code(), message)
    }

    /// Check the message against the rules of its kind.
    ///
    /// Order: required fields, parameter syntax, namespace, then kind-specific
    /// rules. Authentication requests are checked against the default realm
    /// verifier; use [`auth::AuthRequest`] to supply a different one.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule, tagged with the kind's error code.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_common()?;
        match self.kind {
            MessageKind::AssociationRequest => association::validate_request(self),
            MessageKind::AssociationResponse => association::validate_response(self),
            MessageKind::AssociationError => association::validate_error(self),
            MessageKind::AuthRequest => auth::validate_request(self, &UrlRealmVerifier::new()),
            MessageKind::AuthSuccess => auth::validate_success(self),
            MessageKind::AuthFailure => auth::validate_failure(self),
            MessageKind::AuthImmediateFailure => auth::validate_immediate_failure(self),
            MessageKind::VerifyRequest => verify::validate_request(self),
            MessageKind::VerifyResponse => verify::validate_response(self),
            MessageKind::DirectError => error::validate_direct(self),
            MessageKind::IndirectError => error::validate_indirect(self),
        }
    }

    pub(crate) fn validate_common(&self) -> Result<(), Error> {
        if let Some(missing) = self
            .required_fields()
            .iter()
            .find(|field| !self.has_field(field))
        {
            return Err(self.error(format!("missing required field: {missing}")));
        }

        self.params
            .validate()
            .map_err(|e| self.error(e.description()))?;

        if let Some(ns) = self.field("ns") {
            if ns != OPENID2_NS && ns != OPENID11_NS && ns != OPENID10_NS {
                return Err(self.error(format!("invalid OpenID namespace: {ns}")));
            }
        }

        Ok(())
    }

    pub(crate) fn expect_mode(&self, expected: &[&str]) -> Result<(), Error> {
        match self.field("mode") {
            Some(mode) if expected.contains(&mode) => Ok(()),
            Some(mode) => Err(self.error(format!("unexpected openid.mode: {mode}"))),
            None => Err(self.error("missing openid.mode")),
        }
    }

    #[must_use]
    pub fn key_value_form_encoding(&self) -> String {
        self.params.key_value_form()
    }

    #[must_use]
    pub fn www_form_encoding(&self) -> String {
        self.params.www_form()
    }

    /// Append the URL-encoded message to `endpoint` for an indirect (redirect) transfer.
    #[must_use]
    pub fn destination_url(&self, endpoint: &str) -> String {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        format!("{endpoint}{separator}{}", self.www_form_encoding())
    }

    #[must_use]
    pub fn extension_aliases(&self) -> &ExtensionAliases {
        self.aliases.get_or_init(|| self.scan_aliases())
    }

    fn scan_aliases(&self) -> ExtensionAliases {
        let ns_prefix = self.key("ns.").into_owned();
        let mut aliases = ExtensionAliases::default();
        for param in self.params.iter() {
            if let Some(alias) = param.key().strip_prefix(&ns_prefix) {
                aliases.insert(alias, param.value());
            }
        }

        // OpenID 1.x used `openid.sreg.*` without declaring a namespace.
        if !self.is_version2() && aliases.type_uri(sreg::SREG_ALIAS).is_none() {
            let implicit = self.key("sreg.").into_owned();
            if self.params.iter().any(|p| p.key().starts_with(&implicit)) {
                aliases.insert(sreg::SREG_ALIAS, sreg::SREG11_NS);
            }
        }
        aliases
    }

    #[must_use]
    pub fn has_extension(&self, type_uri: &str) -> bool {
        self.extension_aliases().alias(type_uri).is_some()
    }

    /// Unprefixed parameters stored under `alias`.
    #[must_use]
    pub fn extension_parameters(&self, alias: &str) -> ParameterList {
        let prefix = self.key(&format!("{alias}.")).into_owned();
        self.params
            .iter()
            .filter_map(|p| {
                p.key()
                    .strip_prefix(&prefix)
                    .map(|field| (field.to_string(), p.value().to_string()))
            })
            .collect()
    }

    /// Attach an extension, returning the alias it was written under.
    ///
    /// # Errors
    ///
    /// Returns an error for direct responses, which cannot carry extensions.
    pub fn add_extension(&mut self, extension: &dyn MessageExtension) -> Result<String, Error> {
        if self.kind.is_direct_response() {
            return Err(self.error("direct responses cannot carry extensions"));
        }

        let type_uri = extension.type_uri().to_string();
        let alias = match self.extension_aliases().alias(&type_uri) {
            Some(alias) => alias.to_string(),
            None => self.allocate_alias(extension.preferred_alias()),
        };

        self.set_field(&format!("ns.{alias}"), type_uri);
        for param in extension.parameters().iter() {
            self.set_field(&format!("{alias}.{}", param.key()), param.value());
        }
        self.aliases = OnceLock::new();
        Ok(alias)
    }

    fn allocate_alias(&self, preferred: Option<&str>) -> String {
        let aliases = self.extension_aliases();
        let free = |alias: &str| -> bool {
            !RESERVED_ALIASES.contains(&alias)
                && !alias.contains('.')
                && aliases.type_uri(alias).is_none()
        };
        if let Some(preferred) = preferred.filter(|alias| free(*alias)) {
            return preferred.to_string();
        }
        (1..)
            .map(|n| format!("ext{n}"))
            .find(|alias| free(alias.as_str()))
            .unwrap_or_else(|| "ext0".to_string())
    }

    /// Parse the extension registered for `type_uri`, if the message declares it.
    ///
    /// # Errors
    ///
    /// Returns an error if no factory is registered for a declared extension or
    /// the factory rejects the payload.
    pub fn extension(&self, type_uri: &str) -> Result<Option<Box<dyn MessageExtension>>, Error> {
        let Some(alias) = self.extension_aliases().alias(type_uri) else {
            return Ok(None);
        };
        let factory = self
            .registry
            .get(type_uri)
            .ok_or_else(|| Error::Message(format!("no extension factory for {type_uri}")))?;
        let params = self.extension_parameters(alias);
        factory
            .create(&params, self.kind == MessageKind::AuthRequest)
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_responses_use_bare_keys() {
        let mut msg = Message::new(MessageKind::VerifyResponse);
        msg.set_field("is_valid", "true");
        assert_eq!(msg.parameters().get("is_valid"), Some("true"));

        let mut msg = Message::new(MessageKind::AuthFailure);
        msg.set_field("mode", mode::CANCEL);
        assert_eq!(msg.parameters().get("openid.mode"), Some("cancel"));
        assert_eq!(msg.field("openid.mode"), Some("cancel"));
    }

    #[test]
    fn version_follows_namespace() {
        let mut msg = Message::new(MessageKind::AuthFailure);
        msg.set_field("mode", mode::CANCEL);
        assert!(!msg.is_version2());
        msg.set_field("ns", OPENID2_NS);
        assert!(msg.is_version2());
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let mut msg = Message::new(MessageKind::AuthFailure);
        msg.set_field("ns", "http://example.com/not-openid");
        msg.set_field("mode", mode::CANCEL);
        let err = msg.validate().err();
        assert!(matches!(err, Some(Error::Auth(_))));
    }

    #[test]
    fn missing_required_field_reports_kind_code() {
        let mut msg = Message::new(MessageKind::AssociationResponse);
        msg.set_field("ns", OPENID2_NS);
        let err = msg.validate().err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::Association));
    }

    #[test]
    fn destination_url_appends_query() {
        let mut msg = Message::new(MessageKind::AuthFailure);
        msg.set_field("mode", mode::CANCEL);
        assert_eq!(
            msg.destination_url("http://rp.example/cb?x=1"),
            "http://rp.example/cb?x=1&openid.mode=cancel"
        );
        assert_eq!(
            msg.destination_url("http://rp.example/cb"),
            "http://rp.example/cb?openid.mode=cancel"
        );
    }

    #[test]
    fn aliases_are_scanned_from_ns_declarations() {
        let params: ParameterList = [
            ("openid.ns", OPENID2_NS),
            ("openid.mode", "id_res"),
            ("openid.ns.ax", "http://openid.net/srv/ax/1.0"),
            ("openid.ax.mode", "fetch_response"),
        ]
        .into_iter()
        .collect();
        let msg = Message::from_parameters(MessageKind::AuthSuccess, params);
        assert_eq!(
            msg.extension_aliases().alias("http://openid.net/srv/ax/1.0"),
            Some("ax")
        );
        assert_eq!(msg.extension_parameters("ax").get("mode"), Some("fetch_response"));
    }

    #[test]
    fn implicit_sreg_alias_in_compat_mode() {
        let params: ParameterList = [
            ("openid.mode", "id_res"),
            ("openid.sreg.email", "user@example.com"),
        ]
        .into_iter()
        .collect();
        let msg = Message::from_parameters(MessageKind::AuthSuccess, params);
        assert!(msg.has_extension(sreg::SREG11_NS));
    }
}
