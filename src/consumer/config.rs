use crate::http::RequestOptions;
use crate::message::association::AssociationSessionType;
use crate::nonce::DEFAULT_MAX_AGE;

/// Relying Party tuning knobs. All durations are in seconds.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    max_assoc_attempts: usize,
    min_assoc_session: AssociationSessionType,
    pref_assoc_session: AssociationSessionType,
    failed_assoc_expire: u64,
    pre_expiry_assoc_lock_interval: u64,
    immediate_auth: bool,
    allow_stateless: bool,
    private_assoc_expire: u64,
    max_nonce_age: u64,
    request_options: RequestOptions,
}

impl ConsumerConfig {
    /// Defaults: 4 association attempts, any session type accepted with
    /// DH-SHA256 preferred, failed associations cached for 5 minutes,
    /// stateless fallback allowed, consumer nonces valid for 60s.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_assoc_attempts: 4,
            min_assoc_session: AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC,
            pref_assoc_session: AssociationSessionType::DH_SHA256,
            failed_assoc_expire: 300,
            pre_expiry_assoc_lock_interval: 0,
            immediate_auth: false,
            allow_stateless: true,
            private_assoc_expire: 1800,
            max_nonce_age: DEFAULT_MAX_AGE,
            request_options: RequestOptions::default(),
        }
    }

    #[must_use]
    pub fn with_max_assoc_attempts(mut self, attempts: usize) -> Self {
        self.max_assoc_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_min_assoc_session(mut self, session_type: AssociationSessionType) -> Self {
        self.min_assoc_session = session_type;
        self
    }

    #[must_use]
    pub fn with_pref_assoc_session(mut self, session_type: AssociationSessionType) -> Self {
        self.pref_assoc_session = session_type;
        self
    }

    #[must_use]
    pub fn with_failed_assoc_expire(mut self, seconds: u64) -> Self {
        self.failed_assoc_expire = seconds;
        self
    }

    /// Treat associations expiring within `seconds` as absent.
    #[must_use]
    pub fn with_pre_expiry_assoc_lock_interval(mut self, seconds: u64) -> Self {
        self.pre_expiry_assoc_lock_interval = seconds;
        self
    }

    #[must_use]
    pub fn with_immediate_auth(mut self, immediate: bool) -> Self {
        self.immediate_auth = immediate;
        self
    }

    #[must_use]
    pub fn with_allow_stateless(mut self, allow: bool) -> Self {
        self.allow_stateless = allow;
        self
    }

    #[must_use]
    pub fn with_private_assoc_expire(mut self, seconds: u64) -> Self {
        self.private_assoc_expire = seconds;
        self
    }

    #[must_use]
    pub fn with_max_nonce_age(mut self, seconds: u64) -> Self {
        self.max_nonce_age = seconds;
        self
    }

    #[must_use]
    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    #[must_use]
    pub fn max_assoc_attempts(&self) -> usize {
        self.max_assoc_attempts
    }

    #[must_use]
    pub fn min_assoc_session(&self) -> AssociationSessionType {
        self.min_assoc_session
    }

    #[must_use]
    pub fn pref_assoc_session(&self) -> AssociationSessionType {
        self.pref_assoc_session
    }

    #[must_use]
    pub fn failed_assoc_expire(&self) -> u64 {
        self.failed_assoc_expire
    }

    #[must_use]
    pub fn pre_expiry_assoc_lock_interval(&self) -> u64 {
        self.pre_expiry_assoc_lock_interval
    }

    #[must_use]
    pub fn immediate_auth(&self) -> bool {
        self.immediate_auth
    }

    #[must_use]
    pub fn allow_stateless(&self) -> bool {
        self.allow_stateless
    }

    #[must_use]
    pub fn private_assoc_expire(&self) -> u64 {
        self.private_assoc_expire
    }

    #[must_use]
    pub fn max_nonce_age(&self) -> u64 {
        self.max_nonce_age
    }

    #[must_use]
    pub fn request_options(&self) -> &RequestOptions {
        &self.request_options
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.max_assoc_attempts(), 4);
        assert_eq!(
            config.min_assoc_session(),
            AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC
        );
        assert_eq!(config.pref_assoc_session(), AssociationSessionType::DH_SHA256);
        assert_eq!(config.failed_assoc_expire(), 300);
        assert!(config.allow_stateless());
        assert!(!config.immediate_auth());
        assert_eq!(config.max_nonce_age(), 60);
    }

    #[test]
    fn builders_override() {
        let config = ConsumerConfig::new()
            .with_max_assoc_attempts(1)
            .with_allow_stateless(false)
            .with_failed_assoc_expire(0);
        assert_eq!(config.max_assoc_attempts(), 1);
        assert!(!config.allow_stateless());
        assert_eq!(config.failed_assoc_expire(), 0);
    }
}
