//! Authentication request and response messages.

use crate::association::Association;
use crate::message::association::is_valid_handle;
use crate::message::extension::MessageExtension;
use crate::message::parameter::ParameterList;
use crate::message::{mode, Message, MessageKind, OPENID2_NS, SELECT_ID};
use crate::nonce;
use crate::realm::RealmVerifier;
use crate::Error;
use url::Url;

const SIGNED_V1: &[&str] = &["return_to", "identity"];
const SIGNED_V2_IDENTITY: &[&str] = &[
    "op_endpoint",
    "claimed_id",
    "identity",
    "return_to",
    "response_nonce",
    "assoc_handle",
];
const SIGNED_V2_NO_IDENTITY: &[&str] = &["op_endpoint", "return_to", "response_nonce", "assoc_handle"];

fn realm_field(message: &Message) -> &'static str {
    if message.is_version2() {
        "realm"
    } else {
        "trust_root"
    }
}

#[derive(Debug, Clone)]
pub struct AuthRequest {
    message: Message,
}

impl AuthRequest {
    /// Build a `checkid_setup` request.
    ///
    /// In OpenID 2.0 both `claimed_id` and `identity` are sent; OpenID 1.x
    /// only sends the delegate as `identity`.
    ///
    /// # Errors
    ///
    /// Returns an auth error for an inconsistent request, or an auth-realm
    /// error when `return_to` is outside `realm`.
    pub fn create(
        version2: bool,
        claimed_id: &str,
        delegate: &str,
        return_to: Option<&str>,
        realm: Option<&str>,
        verifier: &dyn RealmVerifier,
    ) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AuthRequest);
        if version2 {
            message.set_field("ns", OPENID2_NS);
            message.set_field("claimed_id", claimed_id);
        }
        message.set_field("mode", mode::CHECKID_SETUP);
        message.set_field("identity", delegate);
        if let Some(return_to) = return_to {
            message.set_field("return_to", return_to);
        }
        if let Some(realm) = realm {
            message.set_field(realm_field(&message), realm);
        }

        let request = Self { message };
        request.validate(verifier)?;
        Ok(request)
    }

    /// Validate a received request with the default extension registry.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(
        params: ParameterList,
        verifier: &dyn RealmVerifier,
    ) -> Result<Self, Error> {
        Self::from_message(Message::from_parameters(MessageKind::AuthRequest, params), verifier)
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_message(mut message: Message, verifier: &dyn RealmVerifier) -> Result<Self, Error> {
        message.set_kind(MessageKind::AuthRequest);
        let request = Self { message };
        request.validate(verifier)?;
        Ok(request)
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self, verifier: &dyn RealmVerifier) -> Result<(), Error> {
        self.message.validate_common()?;
        validate_request(&self.message, verifier)
    }

    pub fn set_handle(&mut self, handle: &str) {
        self.message.set_field("assoc_handle", handle);
    }

    pub fn set_immediate(&mut self, immediate: bool) {
        let mode = if immediate {
            mode::CHECKID_IMMEDIATE
        } else {
            mode::CHECKID_SETUP
        };
        self.message.set_field("mode", mode);
    }

    /// # Errors
    ///
    /// Propagates [`Message::add_extension`] failures.
    pub fn add_extension(&mut self, extension: &dyn MessageExtension) -> Result<String, Error> {
        self.message.add_extension(extension)
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.message.is_version2()
    }

    #[must_use]
    pub fn is_immediate(&self) -> bool {
        self.message.field("mode") == Some(mode::CHECKID_IMMEDIATE)
    }

    #[must_use]
    pub fn claimed_id(&self) -> Option<&str> {
        self.message.field("claimed_id")
    }

    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.message.field("identity")
    }

    #[must_use]
    pub fn return_to(&self) -> Option<&str> {
        self.message.field("return_to")
    }

    /// `realm` (2.0) or `trust_root` (1.x), defaulting to `return_to`.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.message
            .field(realm_field(&self.message))
            .or_else(|| self.return_to())
    }

    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.message.field("assoc_handle")
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}

pub(crate) fn validate_request(message: &Message, verifier: &dyn RealmVerifier) -> Result<(), Error> {
    message.expect_mode(&[mode::CHECKID_SETUP, mode::CHECKID_IMMEDIATE])?;

    let identity = message.field("identity");
    let claimed_id = message.field("claimed_id");

    if message.is_version2() {
        if identity.is_some() != claimed_id.is_some() {
            return Err(message.error("claimed_id and identity must be sent together"));
        }
        if (identity == Some(SELECT_ID)) != (claimed_id == Some(SELECT_ID)) {
            return Err(message.error(
                "identifier select must be used for both claimed_id and identity",
            ));
        }
        if !message.has_field("return_to") && !message.has_field("realm") {
            return Err(message.error("realm is required when return_to is absent"));
        }
    } else {
        if identity == Some(SELECT_ID) {
            return Err(message.error("identifier select is not supported in OpenID 1.x"));
        }
        if claimed_id.is_some() || message.has_field("realm") {
            return Err(message.error("OpenID 2.0 field in an OpenID 1.x request"));
        }
    }

    if let Some(handle) = message.field("assoc_handle") {
        if !is_valid_handle(handle) {
            return Err(message.error("invalid assoc_handle"));
        }
    }

    if let (Some(realm), Some(return_to)) =
        (message.field(realm_field(message)), message.field("return_to"))
    {
        let result = verifier.matches(realm, return_to);
        if !result.is_ok() {
            return Err(Error::AuthRealm(format!(
                "return_to {return_to} does not match realm {realm}: {result}"
            )));
        }
    }
    Ok(())
}

/// Values asserted by a positive authentication response.
#[derive(Debug, Clone, Default)]
pub struct Assertion<'a> {
    pub version2: bool,
    pub op_endpoint: &'a str,
    pub claimed_id: Option<&'a str>,
    pub identity: Option<&'a str>,
    pub return_to: &'a str,
    pub response_nonce: Option<&'a str>,
    pub invalidate_handle: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct AuthSuccess {
    message: Message,
    sign_fields: Vec<String>,
    sign_extensions: Vec<String>,
}

impl AuthSuccess {
    /// Build a positive assertion bound to `association`. With
    /// `sign_now = false` the `sig` field is left empty so extensions can be
    /// attached before [`AuthSuccess::sign`].
    ///
    /// # Errors
    ///
    /// Returns an auth error if the assertion is inconsistent, or an
    /// association error if signing fails.
    pub fn create(
        assertion: &Assertion<'_>,
        association: &Association,
        sign_now: bool,
    ) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AuthSuccess);
        if assertion.version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("mode", mode::ID_RES);
        if assertion.version2 {
            message.set_field("op_endpoint", assertion.op_endpoint);
            if let Some(claimed_id) = assertion.claimed_id {
                message.set_field("claimed_id", claimed_id);
            }
        }
        if let Some(identity) = assertion.identity {
            message.set_field("identity", identity);
        }
        message.set_field("return_to", assertion.return_to);
        if assertion.version2 {
            if let Some(nonce) = assertion.response_nonce {
                message.set_field("response_nonce", nonce);
            }
        }
        if let Some(handle) = assertion.invalidate_handle {
            message.set_field("invalidate_handle", handle);
        }
        message.set_field("assoc_handle", association.handle());
        message.set_field("signed", "");
        message.set_field("sig", "");

        let mut success = Self {
            message,
            sign_fields: Vec::new(),
            sign_extensions: Vec::new(),
        };
        success.build_signed_list();
        if sign_now {
            success.sign(association)?;
            success.validate()?;
        }
        Ok(success)
    }

    /// Parse a received assertion with the default extension registry.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        Self::from_message(Message::from_parameters(MessageKind::AuthSuccess, params))
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_message(mut message: Message) -> Result<Self, Error> {
        message.set_kind(MessageKind::AuthSuccess);
        message.validate()?;
        Ok(Self {
            message,
            sign_fields: Vec::new(),
            sign_extensions: Vec::new(),
        })
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), Error> {
        self.message.validate()
    }

    /// Require an extra protocol field to be covered by the signature.
    pub fn add_sign_field(&mut self, name: &str) {
        if !self.sign_fields.iter().any(|f| f == name) {
            self.sign_fields.push(name.to_string());
        }
    }

    /// Require every field of an extension to be covered by the signature.
    pub fn add_sign_extension(&mut self, type_uri: &str) {
        if !self.sign_extensions.iter().any(|t| t == type_uri) {
            self.sign_extensions.push(type_uri.to_string());
        }
    }

    /// Attach an extension; extensions that demand it are added to the
    /// signed list.
    ///
    /// # Errors
    ///
    /// Propagates [`Message::add_extension`] failures.
    pub fn add_extension(&mut self, extension: &dyn MessageExtension) -> Result<String, Error> {
        let alias = self.message.add_extension(extension)?;
        if extension.signature_required() {
            self.add_sign_extension(extension.type_uri());
        }
        self.build_signed_list();
        Ok(alias)
    }

    /// Recompute the `signed` field: the version baseline, then extra fields,
    /// then extension namespaces and their parameters.
    pub fn build_signed_list(&mut self) {
        let baseline = if !self.message.is_version2() {
            SIGNED_V1
        } else if self.message.has_field("identity") {
            SIGNED_V2_IDENTITY
        } else {
            SIGNED_V2_NO_IDENTITY
        };
        let mut signed: Vec<String> = baseline.iter().map(|f| (*f).to_string()).collect();

        let mut push = |name: String| {
            if !signed.contains(&name) {
                signed.push(name);
            }
        };

        for field in &self.sign_fields {
            push(field.clone());
        }

        for type_uri in &self.sign_extensions {
            let Some(alias) = self.message.extension_aliases().alias(type_uri) else {
                continue;
            };
            let ns_field = format!("ns.{alias}");
            if self.message.has_field(&ns_field) {
                push(ns_field);
            }
            for field in self.message.extension_parameters(alias).iter() {
                push(format!("{alias}.{}", field.key()));
            }
        }

        self.message.set_field("signed", signed.join(","));
    }

    /// Fields listed in `signed`, in order.
    #[must_use]
    pub fn signed_fields(&self) -> Vec<&str> {
        self.message
            .field("signed")
            .unwrap_or_default()
            .split(',')
            .filter(|f| !f.is_empty())
            .collect()
    }

    /// `name:value\n` for every signed field; missing values render empty.
    #[must_use]
    pub fn signed_text(&self) -> String {
        signed_text(&self.message, &self.signed_fields())
    }

    /// Bind to `association` and sign the current signed list.
    ///
    /// # Errors
    ///
    /// Returns an association error if the association cannot sign.
    pub fn sign(&mut self, association: &Association) -> Result<(), Error> {
        self.message.set_field("assoc_handle", association.handle());
        self.build_signed_list();
        let signature = association.sign(&self.signed_text())?;
        self.message.set_field("sig", signature);
        Ok(())
    }

    pub fn set_signature(&mut self, signature: &str) {
        self.message.set_field("sig", signature);
    }

    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.message.field("sig").filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.message.is_version2()
    }

    #[must_use]
    pub fn op_endpoint(&self) -> Option<&str> {
        self.message.field("op_endpoint")
    }

    #[must_use]
    pub fn claimed_id(&self) -> Option<&str> {
        self.message.field("claimed_id")
    }

    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.message.field("identity")
    }

    #[must_use]
    pub fn return_to(&self) -> Option<&str> {
        self.message.field("return_to")
    }

    #[must_use]
    pub fn response_nonce(&self) -> Option<&str> {
        self.message.field("response_nonce")
    }

    #[must_use]
    pub fn handle(&self) -> Option<&str> {
        self.message.field("assoc_handle")
    }

    #[must_use]
    pub fn invalidate_handle(&self) -> Option<&str> {
        self.message.field("invalidate_handle")
    }

    /// URL the user agent is redirected to.
    #[must_use]
    pub fn destination_url(&self) -> String {
        self.message
            .destination_url(self.return_to().unwrap_or_default())
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}

pub(crate) fn signed_text(message: &Message, fields: &[&str]) -> String {
    let mut text = String::new();
    for field in fields {
        text.push_str(field);
        text.push(':');
        text.push_str(message.field(field).unwrap_or_default());
        text.push('\n');
    }
    text
}

pub(crate) fn validate_success(message: &Message) -> Result<(), Error> {
    message.expect_mode(&[mode::ID_RES])?;
    validate_assertion(message)
}

/// Shared by positive assertions and their `check_authentication` echo.
pub(crate) fn validate_assertion(message: &Message) -> Result<(), Error> {
    let signed: Vec<&str> = message
        .field("signed")
        .unwrap_or_default()
        .split(',')
        .collect();
    let require_signed = |field: &str| -> Result<(), Error> {
        if signed.contains(&field) {
            Ok(())
        } else {
            Err(message.error(format!("{field} must be signed")))
        }
    };

    let identity = message.field("identity");
    if message.is_version2() {
        let op_endpoint = message.field("op_endpoint").unwrap_or_default();
        if Url::parse(op_endpoint).is_err() {
            return Err(message.error(format!("invalid op_endpoint: {op_endpoint}")));
        }
        if identity.is_some() != message.has_field("claimed_id") {
            return Err(message.error("claimed_id and identity must be sent together"));
        }
        if identity == Some(SELECT_ID) {
            return Err(message.error("positive assertion cannot carry identifier select"));
        }
        let nonce = message.field("response_nonce").unwrap_or_default();
        if !nonce::is_well_formed(nonce) {
            return Err(message.error(format!("malformed response_nonce: {nonce}")));
        }
        for field in ["op_endpoint", "return_to", "response_nonce", "assoc_handle"] {
            require_signed(field)?;
        }
        if identity.is_some() {
            require_signed("claimed_id")?;
            require_signed("identity")?;
        }
    } else {
        for field in ["op_endpoint", "claimed_id", "response_nonce"] {
            if message.has_field(field) {
                return Err(message.error(format!("{field} is not allowed in OpenID 1.x")));
            }
        }
        if identity == Some(SELECT_ID) {
            return Err(message.error("positive assertion cannot carry identifier select"));
        }
        require_signed("return_to")?;
        require_signed("identity")?;
    }

    let return_to = message.field("return_to").unwrap_or_default();
    if Url::parse(return_to).is_err() {
        return Err(message.error(format!("invalid return_to: {return_to}")));
    }
    if !is_valid_handle(message.field("assoc_handle").unwrap_or_default()) {
        return Err(message.error("invalid assoc_handle"));
    }
    if let Some(handle) = message.field("invalidate_handle") {
        if !is_valid_handle(handle) {
            return Err(message.error("invalid invalidate_handle"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AuthFailure {
    message: Message,
    return_to: String,
}

impl AuthFailure {
    /// Negative assertion (`cancel`).
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not validate.
    pub fn create(version2: bool, return_to: &str) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AuthFailure);
        if version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("mode", mode::CANCEL);
        message.validate()?;
        Ok(Self {
            message,
            return_to: return_to.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::AuthFailure, params);
        message.validate()?;
        let return_to = message.field("return_to").unwrap_or_default().to_string();
        Ok(Self { message, return_to })
    }

    #[must_use]
    pub fn destination_url(&self) -> String {
        self.message.destination_url(&self.return_to)
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }
}

pub(crate) fn validate_failure(message: &Message) -> Result<(), Error> {
    message.expect_mode(&[mode::CANCEL])
}

#[derive(Debug, Clone)]
pub struct AuthImmediateFailure {
    message: Message,
    return_to: String,
}

impl AuthImmediateFailure {
    /// Answer to a `checkid_immediate` request that needs user interaction.
    /// OpenID 2.0 uses `setup_needed`; OpenID 1.x uses `id_res` with a
    /// mandatory `user_setup_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message does not validate.
    pub fn create(version2: bool, user_setup_url: &str, return_to: &str) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AuthImmediateFailure);
        if version2 {
            message.set_field("ns", OPENID2_NS);
            message.set_field("mode", mode::SETUP_NEEDED);
        } else {
            message.set_field("mode", mode::ID_RES);
        }
        message.set_field("user_setup_url", user_setup_url);
        message.validate()?;
        Ok(Self {
            message,
            return_to: return_to.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::AuthImmediateFailure, params);
        message.validate()?;
        let return_to = message.field("return_to").unwrap_or_default().to_string();
        Ok(Self { message, return_to })
    }

    #[must_use]
    pub fn user_setup_url(&self) -> Option<&str> {
        self.message.field("user_setup_url")
    }

    #[must_use]
    pub fn destination_url(&self) -> String {
        self.message.destination_url(&self.return_to)
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }
}

pub(crate) fn validate_immediate_failure(message: &Message) -> Result<(), Error> {
    if message.is_version2() {
        message.expect_mode(&[mode::SETUP_NEEDED])
    } else {
        message.expect_mode(&[mode::ID_RES])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::AssociationType;
    use crate::realm::UrlRealmVerifier;
    use crate::ErrorCode;

    const NONCE: &str = "2026-10-19T12:00:00Z01J8X7Q0ABCDEFGHJKMNPQRSTV";

    fn v2_assertion<'a>() -> Assertion<'a> {
        Assertion {
            version2: true,
            op_endpoint: "https://op.example/server",
            claimed_id: Some("https://user.example/"),
            identity: Some("https://op.example/id/user"),
            return_to: "https://rp.example/return",
            response_nonce: Some(NONCE),
            invalidate_handle: None,
        }
    }

    #[test]
    fn realm_mismatch_is_rejected() {
        let err = AuthRequest::create(
            true,
            "http://user.example/",
            "http://user.example/",
            Some("http://evil.com/cb"),
            Some("http://example.com/"),
            &UrlRealmVerifier::new(),
        )
        .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::AuthRealm));
    }

    #[test]
    fn request_round_trips_through_query_string() -> Result<(), Error> {
        let verifier = UrlRealmVerifier::new();
        let mut request = AuthRequest::create(
            true,
            SELECT_ID,
            SELECT_ID,
            Some("https://rp.example/return"),
            Some("https://rp.example/"),
            &verifier,
        )?;
        request.set_handle("assoc-1");
        request.set_immediate(true);

        let url = request.message().destination_url("https://op.example/server");
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
        let parsed = AuthRequest::from_parameters(ParameterList::from_query_string(query)?, &verifier)?;
        assert!(parsed.is_immediate());
        assert_eq!(parsed.handle(), Some("assoc-1"));
        assert_eq!(parsed.realm(), Some("https://rp.example/"));
        Ok(())
    }

    #[test]
    fn v1_rejects_identifier_select() {
        let err = AuthRequest::create(
            false,
            SELECT_ID,
            SELECT_ID,
            Some("http://rp.example/return"),
            None,
            &UrlRealmVerifier::new(),
        )
        .err();
        assert!(matches!(err, Some(Error::Auth(_))));
    }

    #[test]
    fn v1_uses_trust_root() -> Result<(), Error> {
        let request = AuthRequest::create(
            false,
            "http://user.example/",
            "http://op.example/user",
            Some("http://rp.example/return"),
            Some("http://rp.example/"),
            &UrlRealmVerifier::new(),
        )?;
        assert_eq!(request.message().field("trust_root"), Some("http://rp.example/"));
        assert_eq!(request.claimed_id(), None);
        assert_eq!(request.identity(), Some("http://op.example/user"));
        Ok(())
    }

    #[test]
    fn signed_list_baselines() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);

        let success = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        assert_eq!(
            success.signed_fields(),
            vec!["op_endpoint", "claimed_id", "identity", "return_to", "response_nonce", "assoc_handle"]
        );

        let anonymous = Assertion {
            claimed_id: None,
            identity: None,
            ..v2_assertion()
        };
        let success = AuthSuccess::create(&anonymous, &assoc, true)?;
        assert_eq!(
            success.signed_fields(),
            vec!["op_endpoint", "return_to", "response_nonce", "assoc_handle"]
        );

        let v1 = Assertion {
            version2: false,
            claimed_id: None,
            response_nonce: None,
            ..v2_assertion()
        };
        let assoc = Association::generate(AssociationType::HmacSha1, "h1", 60);
        let success = AuthSuccess::create(&v1, &assoc, true)?;
        assert_eq!(success.signed_fields(), vec!["return_to", "identity"]);
        assert!(!success.message().has_field("op_endpoint"));
        Ok(())
    }

    #[test]
    fn signed_text_is_deterministic() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let a = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        let b = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        assert_eq!(a.signed_text(), a.signed_text());
        assert_eq!(a.signed_text(), b.signed_text());
        assert_eq!(a.signature(), b.signature());
        assert!(a
            .signed_text()
            .starts_with("op_endpoint:https://op.example/server\nclaimed_id:https://user.example/\n"));
        Ok(())
    }

    #[test]
    fn missing_signed_value_renders_empty() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let mut success = AuthSuccess::create(&v2_assertion(), &assoc, false)?;
        success.add_sign_field("absent");
        success.build_signed_list();
        assert!(success.signed_text().ends_with("assoc_handle:h\nabsent:\n"));
        Ok(())
    }

    #[test]
    fn signature_verifies_after_parse() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let success = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        let parsed = AuthSuccess::from_parameters(success.message().parameters().clone())?;
        let sig = parsed.signature().unwrap_or_default();
        assert!(assoc.verify_signature(&parsed.signed_text(), sig));
        Ok(())
    }

    #[test]
    fn extensions_join_signed_list() -> Result<(), Error> {
        use crate::message::sreg::{SRegResponse, SREG11_NS};

        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let mut success = AuthSuccess::create(&v2_assertion(), &assoc, false)?;
        let mut sreg = SRegResponse::new();
        sreg.add_attribute("email", "user@example.com")?;
        let alias = success.add_extension(&sreg)?;
        success.sign(&assoc)?;
        success.validate()?;

        let signed = success.signed_fields();
        assert!(signed.contains(&format!("ns.{alias}").as_str()));
        assert!(signed.contains(&format!("{alias}.email").as_str()));
        assert!(success.message().has_extension(SREG11_NS));
        Ok(())
    }

    #[test]
    fn v2_requires_signed_nonce() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let success = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        let mut params = success.message().parameters().clone();
        params.set("openid.signed", "op_endpoint,return_to,assoc_handle,claimed_id,identity");
        assert!(AuthSuccess::from_parameters(params).is_err());
        Ok(())
    }

    #[test]
    fn v1_assertion_rejects_v2_fields_and_identifier_select() -> Result<(), Error> {
        let v1 = Assertion {
            version2: false,
            claimed_id: None,
            response_nonce: None,
            ..v2_assertion()
        };
        let assoc = Association::generate(AssociationType::HmacSha1, "h1", 60);
        let success = AuthSuccess::create(&v1, &assoc, true)?;
        let params = success.message().parameters().clone();
        assert!(AuthSuccess::from_parameters(params.clone()).is_ok());

        for (field, value) in [
            ("openid.op_endpoint", "https://op.example/server"),
            ("openid.claimed_id", "https://user.example/"),
            ("openid.response_nonce", NONCE),
            ("openid.identity", SELECT_ID),
        ] {
            let mut tampered = params.clone();
            tampered.set(field, value);
            let err = AuthSuccess::from_parameters(tampered).err();
            assert_eq!(err.map(|e| e.code()), Some(ErrorCode::Auth), "{field}");
        }
        Ok(())
    }

    #[test]
    fn malformed_nonce_is_rejected() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "h", 60);
        let success = AuthSuccess::create(&v2_assertion(), &assoc, true)?;
        let mut params = success.message().parameters().clone();
        params.set("openid.response_nonce", "yesterday-ish");
        assert!(AuthSuccess::from_parameters(params).is_err());
        Ok(())
    }

    #[test]
    fn immediate_failure_modes() -> Result<(), Error> {
        let v2 = AuthImmediateFailure::create(true, "https://op.example/setup", "https://rp.example/r")?;
        assert_eq!(v2.message().field("mode"), Some(mode::SETUP_NEEDED));

        let v1 = AuthImmediateFailure::create(false, "http://op.example/setup", "http://rp.example/r")?;
        assert_eq!(v1.message().field("mode"), Some(mode::ID_RES));
        assert_eq!(v1.user_setup_url(), Some("http://op.example/setup"));
        assert!(v1.destination_url().starts_with("http://rp.example/r?openid.mode=id_res"));
        Ok(())
    }

    #[test]
    fn failure_redirects_to_return_to() -> Result<(), Error> {
        let failure = AuthFailure::create(true, "https://rp.example/r")?;
        assert!(failure.destination_url().contains("openid.mode=cancel"));
        Ok(())
    }
}
