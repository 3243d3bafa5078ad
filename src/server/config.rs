use crate::message::association::AssociationSessionType;

/// Identity Provider settings. Durations are in seconds.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    expire_in: u64,
    min_assoc_session: AssociationSessionType,
    pref_assoc_session: AssociationSessionType,
    check_private_shared_associations: bool,
    op_endpoint_url: Option<String>,
    user_setup_url: Option<String>,
}

impl ServerConfig {
    /// Defaults: associations live 30 minutes, every session type is
    /// accepted, DH-SHA256 is suggested on refusal, and `check_authentication`
    /// refuses handles that also exist in the shared store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expire_in: 1800,
            min_assoc_session: AssociationSessionType::NO_ENCRYPTION_COMPAT_SHA1MAC,
            pref_assoc_session: AssociationSessionType::DH_SHA256,
            check_private_shared_associations: true,
            op_endpoint_url: None,
            user_setup_url: None,
        }
    }

    #[must_use]
    pub fn with_expire_in(mut self, seconds: u64) -> Self {
        self.expire_in = seconds;
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
    pub fn with_check_private_shared_associations(mut self, check: bool) -> Self {
        self.check_private_shared_associations = check;
        self
    }

    #[must_use]
    pub fn with_op_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.op_endpoint_url = Some(url.into());
        self
    }

    /// Where users are sent when an immediate request needs interaction.
    #[must_use]
    pub fn with_user_setup_url(mut self, url: impl Into<String>) -> Self {
        self.user_setup_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn expire_in(&self) -> u64 {
        self.expire_in
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
    pub fn check_private_shared_associations(&self) -> bool {
        self.check_private_shared_associations
    }

    #[must_use]
    pub fn op_endpoint_url(&self) -> Option<&str> {
        self.op_endpoint_url.as_deref()
    }

    #[must_use]
    pub fn user_setup_url(&self) -> Option<&str> {
        self.user_setup_url.as_deref()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
