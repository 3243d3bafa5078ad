//! Relying Party side of the protocol.
//!
//! Flow:
//! - `associate` negotiates a shared secret with the best reachable OP,
//!   walking a fallback stack of session types within an attempt budget.
//! - `authenticate` builds the `checkid_*` request the user agent is sent
//!   to. OpenID 1.x requests get a signed consumer nonce in `return_to`.
//! - `verify` checks a returned assertion in four short-circuiting steps:
//!   `return_to`, discovered information, nonce, signature.

mod config;
pub mod return_to;

pub use self::config::ConsumerConfig;

use self::return_to::ConsumerNonce;

use crate::association::dh::DiffieHellmanSession;
use crate::association::store::{
    same_store, ConsumerAssociationStore, InMemoryConsumerAssociationStore,
};
use crate::association::{Association, AssociationType, FAILED_ASSOC_HANDLE};
use crate::discovery::{Discovery, DiscoveryInformation};
use crate::http::HttpFetcher;
use crate::message::association::{
    AssociationError, AssociationRequest, AssociationResponse, AssociationSessionType,
};
use crate::message::auth::{AuthFailure, AuthImmediateFailure, AuthRequest, AuthSuccess};
use crate::message::error::IndirectError;
use crate::message::extension::ExtensionRegistry;
use crate::message::parameter::ParameterList;
use crate::message::verify::{VerifyRequest, VerifyResponse};
use crate::message::{mode, Message, MessageKind, SELECT_ID};
use crate::nonce::{InMemoryNonceVerifier, NonceGenerator, NonceVerifier};
use crate::realm::{RealmVerifier, UrlRealmVerifier};
use crate::Error;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

/// Outcome of [`ConsumerManager::verify`].
#[derive(Debug, Clone)]
pub struct VerificationResult {
    verified_id: Option<String>,
    discovery: Option<DiscoveryInformation>,
    auth_response: Message,
    op_setup_url: Option<String>,
    status: String,
}

impl VerificationResult {
    fn failed(auth_response: Message, status: impl Into<String>) -> Self {
        Self {
            verified_id: None,
            discovery: None,
            auth_response,
            op_setup_url: None,
            status: status.into(),
        }
    }

    /// Identifier the user proved ownership of, if verification succeeded.
    #[must_use]
    pub fn verified_id(&self) -> Option<&str> {
        self.verified_id.as_deref()
    }

    /// Discovered information the assertion was checked against.
    #[must_use]
    pub fn discovery(&self) -> Option<&DiscoveryInformation> {
        self.discovery.as_ref()
    }

    #[must_use]
    pub fn auth_response(&self) -> &Message {
        &self.auth_response
    }

    /// Where to send the user after a failed immediate request.
    #[must_use]
    pub fn op_setup_url(&self) -> Option<&str> {
        self.op_setup_url.as_deref()
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.verified_id.is_some()
    }
}

pub struct ConsumerManager {
    config: ConsumerConfig,
    fetcher: Arc<dyn HttpFetcher>,
    discovery: Arc<dyn Discovery>,
    associations: Arc<dyn ConsumerAssociationStore>,
    private_associations: Arc<dyn ConsumerAssociationStore>,
    nonce_verifier: Arc<dyn NonceVerifier>,
    realm_verifier: Arc<dyn RealmVerifier>,
    registry: Arc<ExtensionRegistry>,
    nonces: NonceGenerator,
}

impl fmt::Debug for ConsumerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn form_fields(message: &Message) -> Vec<(String, String)> {
    message
        .parameters()
        .prefixed_pairs()
        .into_iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect()
}

fn without_fragment(identifier: &str) -> &str {
    identifier
        .split_once('#')
        .map_or(identifier, |(base, _)| base)
}

impl ConsumerManager {
    /// Manager with in-memory stores and the default realm verifier.
    #[must_use]
    pub fn new(
        config: ConsumerConfig,
        fetcher: Arc<dyn HttpFetcher>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let nonce_verifier = Arc::new(InMemoryNonceVerifier::new(config.max_nonce_age()));
        Self {
            config,
            fetcher,
            discovery,
            associations: Arc::new(InMemoryConsumerAssociationStore::new()),
            private_associations: Arc::new(InMemoryConsumerAssociationStore::new()),
            nonce_verifier,
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
        shared: Arc<dyn ConsumerAssociationStore>,
        private: Arc<dyn ConsumerAssociationStore>,
    ) -> Result<Self, Error> {
        if same_store(&shared, &private) {
            return Err(Error::Association(
                "shared and private association stores must differ".to_string(),
            ));
        }
        self.associations = shared;
        self.private_associations = private;
        Ok(self)
    }

    #[must_use]
    pub fn with_nonce_verifier(mut self, verifier: Arc<dyn NonceVerifier>) -> Self {
        self.nonce_verifier = verifier;
        self
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
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    #[must_use]
    pub fn associations(&self) -> &Arc<dyn ConsumerAssociationStore> {
        &self.associations
    }

    #[must_use]
    pub fn nonce_verifier(&self) -> &Arc<dyn NonceVerifier> {
        &self.nonce_verifier
    }

    /// Usable association for `op_url`.
    #[must_use]
    pub fn association(&self, op_url: &str) -> Option<Association> {
        self.associations.load_latest(op_url)
    }

    /// Associate with the first reachable service in priority order.
    ///
    /// Returns the service an association exists for, or the first service
    /// (stateless fallback) when none could be established.
    #[instrument(skip(self, discoveries), fields(candidates = discoveries.len()))]
    pub async fn associate(
        &self,
        discoveries: &[DiscoveryInformation],
    ) -> Option<DiscoveryInformation> {
        let mut attempts_left = self.config.max_assoc_attempts();
        for discovery in discoveries {
            if attempts_left == 0 {
                break;
            }
            let used = self.associate_endpoint(discovery, attempts_left).await;
            attempts_left = attempts_left.saturating_sub(used);
            if self.association(discovery.op_endpoint()).is_some() {
                return Some(discovery.clone());
            }
        }
        let fallback = discoveries.first().cloned();
        if let Some(fallback) = &fallback {
            info!(
                op_endpoint = fallback.op_endpoint(),
                "no association established, falling back to stateless mode"
            );
        }
        fallback
    }

    /// Candidate session types for `discovery`; the last entry is tried first.
    fn session_stack(&self, discovery: &DiscoveryInformation) -> Vec<AssociationSessionType> {
        let mut stack = if discovery.is_version2() {
            vec![
                AssociationSessionType::NO_ENCRYPTION_SHA1MAC,
                AssociationSessionType::NO_ENCRYPTION_SHA256MAC,
                AssociationSessionType::DH_SHA1,
                AssociationSessionType::DH_SHA256,
            ]
        } else {
            vec![
                AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC,
                AssociationSessionType::DH_COMPAT_SHA1,
            ]
        };
        let preferred = self.config.pref_assoc_session();
        if preferred.is_version2() == discovery.is_version2() {
            stack.retain(|t| *t != preferred);
            stack.push(preferred);
        }
        stack
    }

    fn is_acceptable(&self, session_type: AssociationSessionType, op_url: &str) -> bool {
        if self.config.min_assoc_session().is_better(&session_type) {
            debug!(%session_type, "below minimum session type");
            return false;
        }
        if session_type.is_version2()
            && !session_type.is_encrypted()
            && !op_url.starts_with("https://")
        {
            debug!(%session_type, "no-encryption session refused over plain HTTP");
            return false;
        }
        true
    }

    /// Try to associate with one OP; returns the number of attempts spent.
    async fn associate_endpoint(&self, discovery: &DiscoveryInformation, max_attempts: usize) -> usize {
        let op_url = discovery.op_endpoint();

        if self.associations.load(op_url, FAILED_ASSOC_HANDLE).is_some() {
            debug!(op_url, "recent association failure cached");
            return 0;
        }
        if let Some(existing) = self.associations.load_latest(op_url) {
            if existing.expires_in() > self.config.pre_expiry_assoc_lock_interval() {
                debug!(op_url, handle = existing.handle(), "association already cached");
                return 0;
            }
        }

        let mut stack = self.session_stack(discovery);
        let mut tried: Vec<AssociationSessionType> = Vec::new();
        let mut attempts = 0;

        while attempts < max_attempts {
            let Some(session_type) = stack.pop() else {
                break;
            };
            if tried.contains(&session_type) {
                continue;
            }
            tried.push(session_type);
            if !self.is_acceptable(session_type, op_url) {
                continue;
            }
            attempts += 1;

            match self.try_associate(op_url, session_type).await {
                AttemptOutcome::Associated(association) => {
                    info!(
                        op_url,
                        handle = association.handle(),
                        %session_type,
                        "association established"
                    );
                    self.associations.remove(op_url, FAILED_ASSOC_HANDLE);
                    self.associations.save(op_url, association);
                    return attempts;
                }
                AttemptOutcome::Suggested(suggestion) => {
                    if tried.contains(&suggestion) {
                        debug!(%suggestion, "suggested session type already tried");
                    } else {
                        stack.push(suggestion);
                    }
                }
                AttemptOutcome::Failed => {}
            }
        }

        warn!(op_url, attempts, "association failed");
        if self.config.failed_assoc_expire() > 0 {
            self.associations
                .save(op_url, Association::failed(self.config.failed_assoc_expire()));
        }
        attempts
    }

    async fn try_associate(
        &self,
        op_url: &str,
        session_type: AssociationSessionType,
    ) -> AttemptOutcome {
        let dh = if session_type.is_encrypted() {
            match DiffieHellmanSession::with_defaults(session_type) {
                Ok(dh) => Some(dh),
                Err(e) => {
                    warn!(error = %e, "cannot start DH session");
                    return AttemptOutcome::Failed;
                }
            }
        } else {
            None
        };

        let request = match AssociationRequest::create(session_type, dh.as_ref()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "cannot build association request");
                return AttemptOutcome::Failed;
            }
        };

        let response = match self
            .fetcher
            .post(
                op_url,
                &form_fields(request.message()),
                self.config.request_options(),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "association request failed");
                return AttemptOutcome::Failed;
            }
        };

        if response.body_size_exceeded {
            warn!(status = response.status, "association response truncated");
            return AttemptOutcome::Failed;
        }

        let params = match ParameterList::from_key_value_form(&response.body) {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, status = response.status, "unparsable association response");
                return AttemptOutcome::Failed;
            }
        };

        match response.status {
            200 => match self.accept_association(params, session_type, dh.as_ref()) {
                Ok(association) => AttemptOutcome::Associated(association),
                Err(e) => {
                    warn!(error = %e, %session_type, "association response rejected");
                    AttemptOutcome::Failed
                }
            },
            400 => match AssociationError::from_parameters(params) {
                Ok(error) => {
                    debug!(error = error.error(), "OP refused association type");
                    error
                        .suggested_session_type()
                        .map_or(AttemptOutcome::Failed, AttemptOutcome::Suggested)
                }
                Err(e) => {
                    warn!(error = %e, "invalid association error");
                    AttemptOutcome::Failed
                }
            },
            status => {
                warn!(status, "unexpected association response status");
                AttemptOutcome::Failed
            }
        }
    }

    fn accept_association(
        &self,
        params: ParameterList,
        requested: AssociationSessionType,
        dh: Option<&DiffieHellmanSession>,
    ) -> Result<Association, Error> {
        let response = AssociationResponse::from_parameters(params)?;
        let received = response.session_type()?;
        let compat_fallback = !requested.is_version2()
            && received == AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC;
        if received != requested && !compat_fallback {
            return Err(Error::Association(format!(
                "requested {requested}, received {received}"
            )));
        }
        response.association(dh)
    }

    /// Discover `identifier`, associate, and build the authentication request.
    ///
    /// # Errors
    ///
    /// Returns discovery errors and the errors of [`ConsumerManager::authenticate`].
    pub async fn begin(
        &self,
        identifier: &str,
        return_to: &str,
        realm: Option<&str>,
    ) -> Result<(DiscoveryInformation, AuthRequest), Error> {
        let discoveries = self.discovery.discover(identifier).await?;
        let discovery = self
            .associate(&discoveries)
            .await
            .ok_or_else(|| Error::Discovery(format!("no OpenID service for {identifier}")))?;
        let request = self.authenticate(&discovery, return_to, realm).await?;
        Ok((discovery, request))
    }

    /// Build the authentication request for `discovery`.
    ///
    /// # Errors
    ///
    /// Fails if no association exists and stateless mode is disabled, or if
    /// the request does not validate (e.g. `return_to` outside `realm`).
    #[instrument(skip(self, discovery), fields(op_endpoint = discovery.op_endpoint()))]
    pub async fn authenticate(
        &self,
        discovery: &DiscoveryInformation,
        return_to: &str,
        realm: Option<&str>,
    ) -> Result<AuthRequest, Error> {
        let op_url = discovery.op_endpoint();
        if self.association(op_url).is_none() {
            self.associate_endpoint(discovery, self.config.max_assoc_attempts())
                .await;
        }
        let association = self.association(op_url);
        if association.is_none() && !self.config.allow_stateless() {
            return Err(Error::Association(format!(
                "no association with {op_url} and stateless mode is disabled"
            )));
        }

        let claimed_id = discovery.claimed_identifier().unwrap_or(SELECT_ID);
        let delegate = discovery.delegate_identifier().unwrap_or(SELECT_ID);

        let return_to = if discovery.is_version2() {
            return_to.to_string()
        } else {
            self.insert_consumer_nonce(op_url, return_to)?
        };

        let mut request = AuthRequest::create(
            discovery.is_version2(),
            claimed_id,
            delegate,
            Some(&return_to),
            realm,
            self.realm_verifier.as_ref(),
        )?;
        request.set_immediate(self.config.immediate_auth());
        if let Some(association) = &association {
            request.set_handle(association.handle());
        }
        Ok(request)
    }

    fn private_association(&self, op_url: &str) -> Association {
        if let Some(existing) = self.private_associations.load_latest(op_url) {
            if existing.expires_in() > self.config.max_nonce_age() {
                return existing;
            }
        }
        let association = Association::generate(
            AssociationType::HmacSha256,
            format!("rp.{}", Ulid::new()),
            self.config.private_assoc_expire(),
        );
        self.private_associations.save(op_url, association.clone());
        association
    }

    /// Add a signed consumer nonce to an OpenID 1.x `return_to`.
    ///
    /// # Errors
    ///
    /// Returns an error if `return_to` is not an absolute URL.
    pub fn insert_consumer_nonce(&self, op_url: &str, return_to: &str) -> Result<String, Error> {
        let association = self.private_association(op_url);
        let nonce = self.nonces.generate();
        let signature = association.sign(&nonce)?;
        let nonce = ConsumerNonce {
            nonce,
            handle: association.handle().to_string(),
            signature,
        };
        return_to::insert_nonce(return_to, &nonce)
            .ok_or_else(|| Error::Auth(format!("invalid return_to: {return_to}")))
    }

    /// Consumer nonce from `return_to`, if present and correctly signed.
    #[must_use]
    pub fn extract_consumer_nonce(&self, op_url: &str, return_to: &str) -> Option<String> {
        let carried = return_to::extract_nonce(return_to)?;
        let association = self.private_associations.load(op_url, &carried.handle)?;
        association
            .verify_signature(&carried.nonce, &carried.signature)
            .then_some(carried.nonce)
    }

    /// Verify the response received at `receiving_url`.
    ///
    /// `discovered` is the service the request was sent to, typically kept in
    /// the user's session.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed responses. Failed checks on a
    /// well-formed response are reported through the result instead.
    #[instrument(skip(self, params, discovered))]
    pub async fn verify(
        &self,
        receiving_url: &str,
        params: ParameterList,
        discovered: Option<&DiscoveryInformation>,
    ) -> Result<VerificationResult, Error> {
        let message = Message::from_parameters(MessageKind::AuthSuccess, params)
            .with_registry(Arc::clone(&self.registry));
        let mode = message.field("mode").unwrap_or_default().to_string();
        let is_v1_setup = !message.is_version2() && message.has_field("user_setup_url");

        if mode == mode::CANCEL {
            let failure = AuthFailure::from_parameters(message.parameters().clone())?;
            return Ok(VerificationResult::failed(
                failure.message().clone(),
                "authentication cancelled",
            ));
        }
        if mode == mode::SETUP_NEEDED || (mode == mode::ID_RES && is_v1_setup) {
            let failure = AuthImmediateFailure::from_parameters(message.parameters().clone())?;
            let mut result =
                VerificationResult::failed(failure.message().clone(), "setup needed");
            result.op_setup_url = failure.user_setup_url().map(str::to_string);
            return Ok(result);
        }
        if mode == mode::ERROR {
            let error = IndirectError::from_parameters(message.parameters().clone())?;
            let status = format!("OP error: {}", error.error());
            return Ok(VerificationResult::failed(error.message().clone(), status));
        }

        let success = AuthSuccess::from_message(message)?;
        let auth_response = success.message().clone();

        // 1. return_to
        let return_to = success.return_to().unwrap_or_default();
        if !return_to::matches(receiving_url, return_to) {
            return Ok(VerificationResult::failed(
                auth_response,
                "return_to does not match the receiving URL",
            ));
        }

        // 2. discovered information
        let Some(discovery) = self.verify_discovered(&success, discovered).await else {
            return Ok(VerificationResult::failed(
                auth_response,
                "discovered information verification failed",
            ));
        };
        let op_url = discovery.op_endpoint().to_string();

        // 3. nonce
        let nonce = if success.is_version2() {
            success.response_nonce().map(str::to_string)
        } else {
            self.extract_consumer_nonce(&op_url, return_to)
        };
        let Some(nonce) = nonce else {
            return Ok(VerificationResult::failed(
                auth_response,
                "missing or invalid nonce",
            ));
        };
        let seen = self.nonce_verifier.seen(&op_url, &nonce);
        if !seen.is_ok() {
            return Ok(VerificationResult::failed(
                auth_response,
                format!("nonce verification failed: {seen}"),
            ));
        }

        // 4. signature
        let handle = success.handle().unwrap_or_default();
        let verified = match self.associations.load(&op_url, handle) {
            Some(association) => {
                debug!(handle, "verifying signature locally");
                association
                    .verify_signature(&success.signed_text(), success.signature().unwrap_or_default())
            }
            None => self.verify_remote(&op_url, &success).await,
        };
        if !verified {
            return Ok(VerificationResult::failed(
                auth_response,
                "signature verification failed",
            ));
        }

        let verified_id = if success.is_version2() {
            success.claimed_id().map(str::to_string)
        } else {
            discovery.claimed_identifier().map(str::to_string)
        };
        info!(verified_id = verified_id.as_deref(), op_url, "assertion verified");
        Ok(VerificationResult {
            status: if verified_id.is_some() {
                "verified".to_string()
            } else {
                "verified without identifier".to_string()
            },
            verified_id,
            discovery: Some(discovery),
            auth_response,
            op_setup_url: None,
        })
    }

    async fn verify_discovered(
        &self,
        success: &AuthSuccess,
        discovered: Option<&DiscoveryInformation>,
    ) -> Option<DiscoveryInformation> {
        if success.is_version2() {
            self.verify_discovered_v2(success, discovered).await
        } else {
            self.verify_discovered_v1(success, discovered).await
        }
    }

    async fn verify_discovered_v1(
        &self,
        success: &AuthSuccess,
        discovered: Option<&DiscoveryInformation>,
    ) -> Option<DiscoveryInformation> {
        let identity = success.identity()?;

        if let Some(discovered) = discovered {
            let matches = discovered.delegate_identifier() == Some(identity)
                || discovered.claimed_identifier() == Some(identity);
            if !discovered.is_version2() && matches {
                return Some(discovered.clone());
            }
        }

        let services = match self.discovery.discover(identity).await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, identity, "rediscovery failed");
                return None;
            }
        };
        let handle = success.handle().unwrap_or_default();
        let matching: Vec<&DiscoveryInformation> = services
            .iter()
            .filter(|d| !d.is_version2() && d.delegate_identifier() == Some(identity))
            .collect();
        matching
            .iter()
            .find(|d| self.associations.load(d.op_endpoint(), handle).is_some())
            .or_else(|| matching.first())
            .map(|d| (*d).clone())
    }

    async fn verify_discovered_v2(
        &self,
        success: &AuthSuccess,
        discovered: Option<&DiscoveryInformation>,
    ) -> Option<DiscoveryInformation> {
        let op_endpoint = success.op_endpoint()?;

        let Some(claimed_id) = success.claimed_id() else {
            // Assertion about nothing but the OP itself (extension-only).
            return Some(DiscoveryInformation::op_identifier(op_endpoint));
        };
        let claimed = without_fragment(claimed_id);
        let identity = success.identity();

        let consistent = |d: &DiscoveryInformation| {
            d.is_version2()
                && !d.is_op_identifier()
                && d.op_endpoint() == op_endpoint
                && d.claimed_identifier().map(without_fragment) == Some(claimed)
                && d.delegate_identifier().map(without_fragment) == identity.map(without_fragment)
        };

        if let Some(discovered) = discovered {
            if consistent(discovered) {
                return Some(discovered.clone());
            }
            debug!("session discovery does not match assertion, rediscovering");
        }

        match self.discovery.discover(claimed).await {
            Ok(services) => services.into_iter().find(|d| consistent(d)),
            Err(e) => {
                warn!(error = %e, claimed, "rediscovery failed");
                None
            }
        }
    }

    /// Ask the OP to check the signature (`check_authentication`).
    async fn verify_remote(&self, op_url: &str, success: &AuthSuccess) -> bool {
        let request = match VerifyRequest::from_auth_success(success) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "cannot build verification request");
                return false;
            }
        };

        let response = match self
            .fetcher
            .post(
                op_url,
                &form_fields(request.message()),
                self.config.request_options(),
            )
            .await
        {
            Ok(response) if response.status == 200 => response,
            Ok(response) => {
                warn!(status = response.status, "check_authentication refused");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "check_authentication failed");
                return false;
            }
        };

        let verified = ParameterList::from_key_value_form(&response.body)
            .and_then(VerifyResponse::from_parameters);
        match verified {
            Ok(verify) => {
                if let Some(handle) = verify.invalidate_handle() {
                    debug!(handle, "OP invalidated association");
                    self.associations.remove(op_url, handle);
                }
                verify.is_signature_verified()
            }
            Err(e) => {
                warn!(error = %e, "invalid check_authentication response");
                false
            }
        }
    }
}

enum AttemptOutcome {
    Associated(Association),
    Suggested(AssociationSessionType),
    Failed,
}
