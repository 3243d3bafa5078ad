//! Identity Provider side of the protocol.
//!
//! The OP answers three requests:
//! - `associate` (direct): negotiate a shared association.
//! - `checkid_setup` / `checkid_immediate` (indirect): assert or deny.
//! - `check_authentication` (direct): verify a stateless assertion.
//!
//! Shared associations are handed to RPs; private associations sign
//! assertions for RPs running without one and are only ever checked by the
//! OP itself, at most once.

mod config;

pub use self::config::ServerConfig;

use crate::association::store::{
    same_store, InMemoryServerAssociationStore, ServerAssociationStore,
};
use crate::association::{Association, AssociationType};
use crate::message::association::{
    AssociationError, AssociationRequest, AssociationResponse, AssociationSessionType,
};
use crate::message::auth::{Assertion, AuthFailure, AuthImmediateFailure, AuthRequest, AuthSuccess};
use crate::message::error::{DirectError, IndirectError};
use crate::message::extension::ExtensionRegistry;
use crate::message::parameter::ParameterList;
use crate::message::verify::{VerifyRequest, VerifyResponse};
use crate::message::{mode, Message, MessageKind, OPENID2_NS, SELECT_ID};
use crate::nonce::NonceGenerator;
use crate::realm::{RealmVerifier, UrlRealmVerifier};
use crate::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of [`ServerManager::auth_response`].
#[derive(Debug, Clone)]
pub enum AuthResponse {
    Success(AuthSuccess),
    Failure(AuthFailure),
    SetupNeeded(AuthImmediateFailure),
    IndirectError(IndirectError),
    /// Only used when no `return_to` is known.
    DirectError(DirectError),
}

impl AuthResponse {
    #[must_use]
    pub fn message(&self) -> &Message {
        match self {
            Self::Success(success) => success.message(),
            Self::Failure(failure) => failure.message(),
            Self::SetupNeeded(failure) => failure.message(),
            Self::IndirectError(error) => error.message(),
            Self::DirectError(error) => error.message(),
        }
    }

    /// Redirect target for the user agent; `None` for a direct error.
    #[must_use]
    pub fn destination_url(&self) -> Option<String> {
        match self {
            Self::Success(success) => Some(success.destination_url()),
            Self::Failure(failure) => Some(failure.destination_url()),
            Self::SetupNeeded(failure) => Some(failure.destination_url()),
            Self::IndirectError(error) => Some(error.destination_url()),
            Self::DirectError(_) => None,
        }
    }
}

/// HTTP status for a direct response: 400 for errors, 200 otherwise.
#[must_use]
pub fn response_status(message: &Message) -> u16 {
    match message.kind() {
        MessageKind::AssociationError | MessageKind::DirectError => 400,
        _ => 200,
    }
}

fn is_version2(params: &ParameterList) -> bool {
    params.get("openid.ns") == Some(OPENID2_NS)
}

pub struct ServerManager {
    config: ServerConfig,
    shared_associations: Arc<dyn ServerAssociationStore>,
    private_associations: Arc<dyn ServerAssociationStore>,
    realm_verifier: Arc<dyn RealmVerifier>,
    registry: Arc<ExtensionRegistry>,
    nonces: NonceGenerator,
}

impl fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ServerManager {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shared_associations: Arc::new(InMemoryServerAssociationStore::new()),
            private_associations: Arc::new(InMemoryServerAssociationStore::new()),
            realm_verifier: Arc::new(UrlRealmVerifier::new()),
            registry: Arc::new(ExtensionRegistry::with_defaults()),
            nonces: NonceGenerator,
        }
    }

    /// Replace both association stores.
    ///
    /// # Errors
    ///
    /// Returns an error if `shared` and `private` are the same store.
    pub fn with_association_stores(
        mut self,
        shared: Arc<dyn ServerAssociationStore>,
        private: Arc<dyn ServerAssociationStore>,
    ) -> Result<Self, Error> {
        if same_store(&shared, &private) {
            return Err(Error::Association(
                "shared and private association stores must differ".to_string(),
            ));
        }
        self.shared_associations = shared;
        self.private_associations = private;
        Ok(self)
    }

    #[must_use]
    pub fn with_realm_verifier(mut self, verifier: Arc<dyn RealmVerifier>) -> Self {
        self.realm_verifier = verifier;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn shared_associations(&self) -> &Arc<dyn ServerAssociationStore> {
        &self.shared_associations
    }

    #[must_use]
    pub fn private_associations(&self) -> &Arc<dyn ServerAssociationStore> {
        &self.private_associations
    }

    /// Answer a direct request, dispatching on `openid.mode`.
    #[instrument(skip(self, params))]
    pub fn process(&self, params: ParameterList) -> Message {
        let version2 = is_version2(&params);
        match params.get("openid.mode") {
            Some(mode::ASSOCIATE) => self.association_response(params),
            Some(mode::CHECK_AUTHENTICATION) => self.verify(params),
            other => {
                debug!(mode = other, "unsupported direct request");
                DirectError::create(
                    &format!("unsupported openid.mode: {}", other.unwrap_or_default()),
                    None,
                    version2,
                )
                .into_message()
            }
        }
    }

    /// Answer an `associate` request.
    #[instrument(skip(self, params))]
    pub fn association_response(&self, params: ParameterList) -> Message {
        let version2 = is_version2(&params);
        match self.try_associate(params) {
            Ok(response) => response.into_message(),
            Err(e) if version2 => {
                warn!(error = %e, "association refused");
                let preferred = self.config.pref_assoc_session();
                let suggestion = preferred.is_version2().then_some(preferred);
                AssociationError::create_unsupported(&e.description(), suggestion, true)
                    .map_or_else(
                        |e| DirectError::from_error(&e, true).into_message(),
                        AssociationError::into_message,
                    )
            }
            Err(e) => {
                warn!(error = %e, "association refused, answering with an expired compat association");
                self.shared_associations
                    .generate(AssociationType::HmacSha1, 0)
                    .and_then(|dummy| AssociationResponse::create_compat_fallback(&dummy))
                    .map_or_else(
                        |e| DirectError::from_error(&e, false).into_message(),
                        AssociationResponse::into_message,
                    )
            }
        }
    }

    fn try_associate(&self, params: ParameterList) -> Result<AssociationResponse, Error> {
        let request = AssociationRequest::from_parameters(params)?;
        let session_type = request.session_type()?;
        self.check_session_type(session_type)?;

        let association = self
            .shared_associations
            .generate(session_type.association_type(), self.config.expire_in())?;
        let response = AssociationResponse::create(&request, &association)?;
        info!(
            handle = association.handle(),
            %session_type,
            "association established"
        );
        Ok(response)
    }

    fn check_session_type(&self, session_type: AssociationSessionType) -> Result<(), Error> {
        if self.config.min_assoc_session().is_better(&session_type) {
            return Err(Error::Association(format!(
                "{session_type} is below the minimum accepted session type {}",
                self.config.min_assoc_session()
            )));
        }
        Ok(())
    }

    /// Answer an authentication request.
    ///
    /// `selected_id` / `selected_claimed_id` override the identifiers in the
    /// request and are mandatory when the RP asked the OP to select one.
    /// With `sign_now = false` the success is returned unsigned; attach
    /// extensions and call [`ServerManager::sign`].
    #[instrument(skip(self, request), fields(version2 = request.is_version2()))]
    pub fn auth_response(
        &self,
        request: &AuthRequest,
        selected_id: Option<&str>,
        selected_claimed_id: Option<&str>,
        approved: bool,
        op_endpoint: Option<&str>,
        sign_now: bool,
    ) -> AuthResponse {
        let version2 = request.is_version2();
        let result = if approved {
            self.positive_assertion(request, selected_id, selected_claimed_id, op_endpoint, sign_now)
                .map(AuthResponse::Success)
        } else {
            self.negative_assertion(request, op_endpoint)
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "authentication response failed");
                match request.return_to() {
                    Some(return_to) => {
                        AuthResponse::IndirectError(IndirectError::from_error(&e, return_to, version2))
                    }
                    None => AuthResponse::DirectError(DirectError::from_error(&e, version2)),
                }
            }
        }
    }

    fn resolve_op_endpoint<'a>(&'a self, op_endpoint: Option<&'a str>) -> Result<&'a str, Error> {
        op_endpoint
            .or(self.config.op_endpoint_url())
            .ok_or_else(|| Error::Auth("OP endpoint URL is not configured".to_string()))
    }

    fn negative_assertion(
        &self,
        request: &AuthRequest,
        op_endpoint: Option<&str>,
    ) -> Result<AuthResponse, Error> {
        let return_to = request
            .return_to()
            .ok_or_else(|| Error::Auth("cannot deny a request without return_to".to_string()))?;

        if request.is_immediate() {
            let base = match self.config.user_setup_url() {
                Some(url) => url,
                None => self.resolve_op_endpoint(op_endpoint)?,
            };
            let mut setup = request.message().clone();
            setup.set_field("mode", mode::CHECKID_SETUP);
            let setup_url = setup.destination_url(base);
            debug!(setup_url, "immediate request needs user interaction");
            return AuthImmediateFailure::create(request.is_version2(), &setup_url, return_to)
                .map(AuthResponse::SetupNeeded);
        }

        AuthFailure::create(request.is_version2(), return_to).map(AuthResponse::Failure)
    }

    fn positive_assertion(
        &self,
        request: &AuthRequest,
        selected_id: Option<&str>,
        selected_claimed_id: Option<&str>,
        op_endpoint: Option<&str>,
        sign_now: bool,
    ) -> Result<AuthSuccess, Error> {
        let version2 = request.is_version2();
        let op_endpoint = self.resolve_op_endpoint(op_endpoint)?;
        let return_to = request
            .return_to()
            .ok_or_else(|| Error::Auth("cannot assert without return_to".to_string()))?;

        let (identity, claimed_id) = match request.identity() {
            Some(SELECT_ID) => {
                let identity = selected_id.ok_or_else(|| {
                    Error::Auth("identifier selection requires a selected identifier".to_string())
                })?;
                (Some(identity), Some(selected_claimed_id.unwrap_or(identity)))
            }
            Some(requested) => (
                Some(selected_id.unwrap_or(requested)),
                selected_claimed_id.or(request.claimed_id()),
            ),
            None => (None, None),
        };

        let mut invalidate_handle = None;
        let association = match request.handle() {
            Some(handle) => match self.shared_associations.load(handle) {
                Some(association) => association,
                None => {
                    debug!(handle, "unknown association, signing statelessly");
                    invalidate_handle = Some(handle);
                    self.private_association(version2)?
                }
            },
            None => self.private_association(version2)?,
        };

        let nonce = version2.then(|| self.nonces.generate());
        let assertion = Assertion {
            version2,
            op_endpoint,
            claimed_id,
            identity,
            return_to,
            response_nonce: nonce.as_deref(),
            invalidate_handle,
        };
        let success = AuthSuccess::create(&assertion, &association, sign_now)?;
        info!(
            identity,
            handle = association.handle(),
            signed = sign_now,
            "positive assertion"
        );
        Ok(success)
    }

    fn private_association(&self, version2: bool) -> Result<Association, Error> {
        let assoc_type = if version2 {
            AssociationType::HmacSha256
        } else {
            AssociationType::HmacSha1
        };
        self.private_associations
            .generate(assoc_type, self.config.expire_in())
    }

    /// Sign a success produced with `sign_now = false`, after extensions
    /// have been attached.
    ///
    /// # Errors
    ///
    /// Returns an association error if the association expired meanwhile.
    pub fn sign(&self, success: &mut AuthSuccess) -> Result<(), Error> {
        let handle = success
            .handle()
            .ok_or_else(|| Error::Auth("assertion has no assoc_handle".to_string()))?
            .to_string();
        let association = self
            .shared_associations
            .load(&handle)
            .or_else(|| self.private_associations.load(&handle))
            .ok_or_else(|| Error::Association(format!("no association for handle {handle}")))?;
        success.sign(&association)?;
        success.validate()
    }

    /// Answer a `check_authentication` request.
    ///
    /// A private association verifies at most one assertion; it is removed
    /// whatever the outcome.
    #[instrument(skip(self, params))]
    pub fn verify(&self, params: ParameterList) -> Message {
        let version2 = is_version2(&params);
        let request = match VerifyRequest::from_parameters(params) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "invalid check_authentication request");
                return DirectError::from_error(&e, version2).into_message();
            }
        };
        let handle = request.handle();

        let verified = if self.config.check_private_shared_associations()
            && self.shared_associations.load(handle).is_some()
        {
            warn!(handle, "check_authentication for a shared association refused");
            false
        } else {
            match self.private_associations.load(handle) {
                Some(association) => {
                    let verified =
                        association.verify_signature(&request.signed_text(), request.signature());
                    self.private_associations.remove(handle);
                    verified
                }
                None => {
                    debug!(handle, "unknown private association");
                    false
                }
            }
        };

        let invalidate_handle = request
            .invalidate_handle()
            .filter(|handle| self.shared_associations.load(handle).is_none());

        info!(handle, verified, "check_authentication");
        VerifyResponse::create(version2, verified, invalidate_handle).map_or_else(
            |e| DirectError::from_error(&e, version2).into_message(),
            VerifyResponse::into_message,
        )
    }

    /// Parse an indirect authentication request with this manager's realm
    /// verifier and extension registry.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn parse_auth_request(&self, params: ParameterList) -> Result<AuthRequest, Error> {
        let message = Message::from_parameters(MessageKind::AuthRequest, params)
            .with_registry(Arc::clone(&self.registry));
        AuthRequest::from_message(message, self.realm_verifier.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::dh::DiffieHellmanSession;
    use crate::message::sreg::{SRegRequest, SRegResponse};
    use std::collections::HashMap;

    const OP: &str = "https://op.example/server";
    const RETURN_TO: &str = "https://rp.example/return";

    fn manager() -> ServerManager {
        ServerManager::new(ServerConfig::new().with_op_endpoint_url(OP))
    }

    fn request_params(message: &Message) -> ParameterList {
        message
            .parameters()
            .prefixed_pairs()
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }

    fn v2_auth_request(identity: &str) -> Result<AuthRequest, Error> {
        AuthRequest::create(
            true,
            identity,
            identity,
            Some(RETURN_TO),
            Some("https://rp.example/"),
            &UrlRealmVerifier::new(),
        )
    }

    #[test]
    fn no_encryption_association_over_https() -> Result<(), Error> {
        let server = manager();
        let request =
            AssociationRequest::create(AssociationSessionType::NO_ENCRYPTION_SHA1MAC, None)?;
        let message = server.association_response(request_params(request.message()));
        assert_eq!(message.kind(), MessageKind::AssociationResponse);

        let response = AssociationResponse::from_parameters(message.parameters().clone())?;
        let association = response.association(None)?;
        assert_eq!(association.mac_key().len(), 20);
        assert!(server.shared_associations().load(association.handle()).is_some());
        Ok(())
    }

    #[test]
    fn dh_association_decrypts_to_full_key() -> Result<(), Error> {
        let server = manager();
        let dh = DiffieHellmanSession::with_defaults(AssociationSessionType::DH_SHA256)?;
        let request = AssociationRequest::create(AssociationSessionType::DH_SHA256, Some(&dh))?;
        assert!(!request.message().has_field("dh_modulus"));

        let message = server.association_response(request_params(request.message()));
        let response = AssociationResponse::from_parameters(message.parameters().clone())?;
        assert!(response.message().has_field("enc_mac_key"));
        let association = response.association(Some(&dh))?;
        assert_eq!(association.mac_key().len(), 32);

        let stored = server.shared_associations().load(association.handle());
        assert_eq!(stored.map(|a| a.mac_key().to_vec()), Some(association.mac_key().to_vec()));
        Ok(())
    }

    #[test]
    fn refused_v2_association_suggests_preferred_type() -> Result<(), Error> {
        let server = ServerManager::new(
            ServerConfig::new().with_min_assoc_session(AssociationSessionType::DH_SHA1),
        );
        let request =
            AssociationRequest::create(AssociationSessionType::NO_ENCRYPTION_SHA256MAC, None)?;
        let message = server.association_response(request_params(request.message()));
        assert_eq!(message.kind(), MessageKind::AssociationError);
        assert_eq!(response_status(&message), 400);

        let error = AssociationError::from_parameters(message.parameters().clone())?;
        assert_eq!(
            error.suggested_session_type(),
            Some(AssociationSessionType::DH_SHA256)
        );
        Ok(())
    }

    #[test]
    fn refused_v1_association_gets_expired_compat_association() -> Result<(), Error> {
        let server = ServerManager::new(
            ServerConfig::new().with_min_assoc_session(AssociationSessionType::DH_COMPAT_SHA1),
        );
        let request =
            AssociationRequest::create(AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC, None)?;
        let message = server.association_response(request_params(request.message()));
        assert_eq!(message.kind(), MessageKind::AssociationResponse);
        assert_eq!(message.field("expires_in"), Some("0"));
        assert!(!message.has_field("session_type"));
        Ok(())
    }

    #[test]
    fn unknown_direct_mode_is_a_direct_error() {
        let mut params = ParameterList::new();
        params.set("openid.ns", OPENID2_NS);
        params.set("openid.mode", "checkid_setup");
        let message = manager().process(params);
        assert_eq!(message.kind(), MessageKind::DirectError);
        assert_eq!(response_status(&message), 400);
    }

    #[test]
    fn stateless_assertion_verifies_once() -> Result<(), Error> {
        let server = manager();
        let request = v2_auth_request("https://user.example/")?;
        let AuthResponse::Success(success) =
            server.auth_response(&request, None, None, true, None, true)
        else {
            panic!("expected a positive assertion");
        };
        assert!(success.response_nonce().is_some());

        let verify = VerifyRequest::from_auth_success(&success)?;
        let params = request_params(verify.message());

        let first = VerifyResponse::from_parameters(server.verify(params.clone()).parameters().clone())?;
        assert!(first.is_signature_verified());

        let second = VerifyResponse::from_parameters(server.verify(params).parameters().clone())?;
        assert!(!second.is_signature_verified());
        Ok(())
    }

    #[test]
    fn unknown_handle_is_invalidated() -> Result<(), Error> {
        let server = manager();
        let mut request = v2_auth_request("https://user.example/")?;
        request.set_handle("stale-handle");
        let AuthResponse::Success(success) =
            server.auth_response(&request, None, None, true, None, true)
        else {
            panic!("expected a positive assertion");
        };
        assert_eq!(success.invalidate_handle(), Some("stale-handle"));
        assert_ne!(success.handle(), Some("stale-handle"));

        let verify = VerifyRequest::from_auth_success(&success)?;
        let message = server.verify(request_params(verify.message()));
        let response = VerifyResponse::from_parameters(message.parameters().clone())?;
        assert!(response.is_signature_verified());
        assert_eq!(response.invalidate_handle(), Some("stale-handle"));
        Ok(())
    }

    #[test]
    fn shared_handle_is_refused_by_check_authentication() -> Result<(), Error> {
        let server = manager();
        let shared = server
            .shared_associations()
            .generate(AssociationType::HmacSha256, 60)?;
        let mut request = v2_auth_request("https://user.example/")?;
        request.set_handle(shared.handle());
        let AuthResponse::Success(success) =
            server.auth_response(&request, None, None, true, None, true)
        else {
            panic!("expected a positive assertion");
        };
        assert_eq!(success.handle(), Some(shared.handle()));

        let verify = VerifyRequest::from_auth_success(&success)?;
        let message = server.verify(request_params(verify.message()));
        let response = VerifyResponse::from_parameters(message.parameters().clone())?;
        assert!(!response.is_signature_verified());
        Ok(())
    }

    #[test]
    fn identifier_select_requires_selection() -> Result<(), Error> {
        let server = manager();
        let request = v2_auth_request(SELECT_ID)?;

        let response = server.auth_response(&request, None, None, true, None, true);
        let AuthResponse::IndirectError(error) = response else {
            panic!("expected an indirect error");
        };
        assert_eq!(error.error_code(), Some("auth-error"));
        assert!(error.destination_url().starts_with(RETURN_TO));

        let response = server.auth_response(
            &request,
            Some("https://op.example/id/alice"),
            Some("https://alice.example/"),
            true,
            None,
            true,
        );
        let AuthResponse::Success(success) = response else {
            panic!("expected a positive assertion");
        };
        assert_eq!(success.identity(), Some("https://op.example/id/alice"));
        assert_eq!(success.claimed_id(), Some("https://alice.example/"));
        Ok(())
    }

    #[test]
    fn denied_requests() -> Result<(), Error> {
        let server = ServerManager::new(
            ServerConfig::new()
                .with_op_endpoint_url(OP)
                .with_user_setup_url("https://op.example/setup"),
        );
        let mut request = v2_auth_request("https://user.example/")?;

        let response = server.auth_response(&request, None, None, false, None, true);
        assert!(matches!(response, AuthResponse::Failure(_)));
        assert_eq!(response.message().field("mode"), Some(mode::CANCEL));

        request.set_immediate(true);
        let AuthResponse::SetupNeeded(failure) =
            server.auth_response(&request, None, None, false, None, true)
        else {
            panic!("expected setup_needed");
        };
        let setup_url = failure.user_setup_url().unwrap_or_default();
        assert!(setup_url.starts_with("https://op.example/setup?"));
        assert!(setup_url.contains("openid.mode=checkid_setup"));
        Ok(())
    }

    #[test]
    fn deferred_signing_covers_extensions() -> Result<(), Error> {
        let server = manager();
        let request = v2_auth_request("https://user.example/")?;
        let AuthResponse::Success(mut success) =
            server.auth_response(&request, None, None, true, None, false)
        else {
            panic!("expected a positive assertion");
        };
        assert!(success.signature().is_none());
        assert_eq!(success.message().field("sig"), Some(""));

        let mut sreg = SRegRequest::new();
        sreg.add_attribute("email", true)?;
        let profile = HashMap::from([("email".to_string(), "alice@example.com".to_string())]);
        success.add_extension(&SRegResponse::from_request(&sreg, &profile))?;
        server.sign(&mut success)?;

        assert!(success.signature().is_some());
        assert!(success.signed_fields().contains(&"sreg.email"));
        let verify = VerifyRequest::from_auth_success(&success)?;
        let response = VerifyResponse::from_parameters(
            server.verify(request_params(verify.message())).parameters().clone(),
        )?;
        assert!(response.is_signature_verified());
        Ok(())
    }

    #[test]
    fn identical_stores_are_rejected() {
        let store: Arc<dyn ServerAssociationStore> =
            Arc::new(InMemoryServerAssociationStore::new());
        let result = manager().with_association_stores(Arc::clone(&store), store);
        assert!(matches!(result, Err(Error::Association(_))));
    }
}
