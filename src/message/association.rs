//! Association messages and the session type catalogue.

use crate::association::dh::{
    btwoc_from_base64, default_modulus, DiffieHellmanSession, MAX_MODULUS_BITS,
};
use crate::association::{Association, AssociationType};
use crate::message::parameter::ParameterList;
use crate::message::{mode, Message, MessageKind, OPENID2_NS};
use crate::Error;
use base64ct::{Base64, Encoding};
use std::fmt;

/// Wire value of `error_code` in an association error.
pub const UNSUPPORTED_TYPE: &str = "unsupported-type";

/// A legal (session type, association type, protocol version) triple.
///
/// Ordering follows the constant list below: later entries offer stronger
/// protection of the MAC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssociationSessionType {
    session_type: &'static str,
    hash: Option<AssociationType>,
    assoc_type: AssociationType,
    version2: bool,
    order: u8,
}

impl AssociationSessionType {
    pub const NO_ENCRYPTION_COMPAT_SHA1MAC: Self = Self {
        session_type: "",
        hash: None,
        assoc_type: AssociationType::HmacSha1,
        version2: false,
        order: 0,
    };
    pub const NO_ENCRYPTION_SHA1MAC: Self = Self {
        session_type: "no-encryption",
        hash: None,
        assoc_type: AssociationType::HmacSha1,
        version2: true,
        order: 1,
    };
    pub const NO_ENCRYPTION_SHA256MAC: Self = Self {
        session_type: "no-encryption",
        hash: None,
        assoc_type: AssociationType::HmacSha256,
        version2: true,
        order: 2,
    };
    pub const DH_COMPAT_SHA1: Self = Self {
        session_type: "DH-SHA1",
        hash: Some(AssociationType::HmacSha1),
        assoc_type: AssociationType::HmacSha1,
        version2: false,
        order: 3,
    };
    pub const DH_SHA1: Self = Self {
        session_type: "DH-SHA1",
        hash: Some(AssociationType::HmacSha1),
        assoc_type: AssociationType::HmacSha1,
        version2: true,
        order: 4,
    };
    pub const DH_SHA256: Self = Self {
        session_type: "DH-SHA256",
        hash: Some(AssociationType::HmacSha256),
        assoc_type: AssociationType::HmacSha256,
        version2: true,
        order: 5,
    };

    pub const ALL: [Self; 6] = [
        Self::NO_ENCRYPTION_COMPAT_SHA1MAC,
        Self::NO_ENCRYPTION_SHA1MAC,
        Self::NO_ENCRYPTION_SHA256MAC,
        Self::DH_COMPAT_SHA1,
        Self::DH_SHA1,
        Self::DH_SHA256,
    ];

    /// Resolve wire strings into a session type legal for the protocol version.
    ///
    /// # Errors
    ///
    /// Returns an association error for unknown or version-illegal combinations.
    pub fn create(session_type: &str, assoc_type: &str, version2: bool) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|t| {
                t.session_type == session_type
                    && t.assoc_type.as_str() == assoc_type
                    && t.version2 == version2
            })
            .ok_or_else(|| {
                Error::Association(format!(
                    "unsupported association session type for OpenID {}: session_type={session_type:?} assoc_type={assoc_type:?}",
                    if version2 { "2.0" } else { "1.x" }
                ))
            })
    }

    #[must_use]
    pub const fn session_type(&self) -> &'static str {
        self.session_type
    }

    #[must_use]
    pub const fn association_type(&self) -> AssociationType {
        self.assoc_type
    }

    /// Hash used to derive the DH pad, `None` for no-encryption sessions.
    #[must_use]
    pub const fn hash_algorithm(&self) -> Option<AssociationType> {
        self.hash
    }

    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.hash.is_some()
    }

    #[must_use]
    pub const fn is_version2(&self) -> bool {
        self.version2
    }

    #[must_use]
    pub fn is_better(&self, other: &Self) -> bool {
        self.order > other.order
    }
}

impl fmt::Display for AssociationSessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = if self.session_type.is_empty() {
            "(none)"
        } else {
            self.session_type
        };
        write!(
            f,
            "{session}/{}/{}",
            self.assoc_type,
            if self.version2 { "v2" } else { "v1" }
        )
    }
}

fn session_type_of(message: &Message) -> Result<AssociationSessionType, Error> {
    AssociationSessionType::create(
        message.field("session_type").unwrap_or_default(),
        message.field("assoc_type").unwrap_or_default(),
        message.is_version2(),
    )
    .map_err(|e| message.error(e.description()))
}

/// Handles are 1 to 255 printable ASCII characters.
pub(crate) fn is_valid_handle(handle: &str) -> bool {
    (1..=255).contains(&handle.len()) && handle.bytes().all(|b| (33..=126).contains(&b))
}

#[derive(Debug, Clone)]
pub struct AssociationRequest {
    message: Message,
}

impl AssociationRequest {
    /// Build a request for `session_type`. DH session types need the
    /// consumer's `dh` session; the group is only sent when non-default.
    ///
    /// # Errors
    ///
    /// Returns an error if a DH type is requested without a DH session.
    pub fn create(
        session_type: AssociationSessionType,
        dh: Option<&DiffieHellmanSession>,
    ) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AssociationRequest);
        if session_type.is_version2() {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("mode", mode::ASSOCIATE);
        message.set_field("assoc_type", session_type.association_type().as_str());
        if !session_type.session_type().is_empty() {
            message.set_field("session_type", session_type.session_type());
        }

        if session_type.is_encrypted() {
            let dh = dh.ok_or_else(|| {
                Error::Association(format!("{session_type} requires a DH session"))
            })?;
            message.set_field("dh_consumer_public", dh.public_key_base64());
            if !dh.is_default_group() {
                message.set_field("dh_modulus", dh.modulus_base64());
                message.set_field("dh_gen", dh.generator_base64());
            }
        }

        let request = Self { message };
        request.message.validate()?;
        Ok(request)
    }

    /// Parse and validate a received request.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::AssociationRequest, params);
        message.validate()?;
        Ok(Self { message })
    }

    /// # Errors
    ///
    /// Returns an error if the request names an illegal type combination.
    pub fn session_type(&self) -> Result<AssociationSessionType, Error> {
        session_type_of(&self.message)
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.message.is_version2()
    }

    #[must_use]
    pub fn dh_consumer_public(&self) -> Option<&str> {
        self.message.field("dh_consumer_public")
    }

    #[must_use]
    pub fn dh_modulus(&self) -> Option<&str> {
        self.message.field("dh_modulus")
    }

    #[must_use]
    pub fn dh_gen(&self) -> Option<&str> {
        self.message.field("dh_gen")
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

pub(crate) fn validate_request(message: &Message) -> Result<(), Error> {
    message.expect_mode(&[mode::ASSOCIATE])?;
    let session_type = session_type_of(message)?;

    if session_type.is_encrypted() {
        let public = message
            .field("dh_consumer_public")
            .ok_or_else(|| message.error("missing dh_consumer_public for DH session"))?;
        let modulus = match message.field("dh_modulus") {
            Some(value) => btwoc_from_base64(value)
                .map_err(|e| message.error(format!("dh_modulus: {e}")))?,
            None => default_modulus(),
        };
        if modulus.bits() > MAX_MODULUS_BITS {
            return Err(message.error(format!(
                "dh_modulus larger than {MAX_MODULUS_BITS} bits"
            )));
        }
        if let Some(value) = message.field("dh_gen") {
            let generator =
                btwoc_from_base64(value).map_err(|e| message.error(format!("dh_gen: {e}")))?;
            if generator >= modulus {
                return Err(message.error("dh_gen is not below dh_modulus"));
            }
        }
        let public = btwoc_from_base64(public)
            .map_err(|e| message.error(format!("dh_consumer_public: {e}")))?;
        if public >= modulus {
            return Err(message.error("dh_consumer_public is not below dh_modulus"));
        }
    } else if message.has_field("dh_consumer_public") {
        return Err(message.error("dh_consumer_public sent for a no-encryption session"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AssociationResponse {
    message: Message,
}

impl AssociationResponse {
    /// Answer `request` with `association`, encrypting the MAC key when the
    /// request asked for a DH session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request's DH values are unusable.
    pub fn create(request: &AssociationRequest, association: &Association) -> Result<Self, Error> {
        let session_type = request.session_type()?;
        let mut message = Message::new(MessageKind::AssociationResponse);
        if session_type.is_version2() {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("assoc_handle", association.handle());
        message.set_field("assoc_type", association.assoc_type().as_str());
        if !session_type.session_type().is_empty() {
            message.set_field("session_type", session_type.session_type());
        }
        message.set_field("expires_in", association.expires_in().to_string());

        if session_type.is_encrypted() {
            let consumer_public = request
                .dh_consumer_public()
                .ok_or_else(|| Error::Association("missing dh_consumer_public".to_string()))?;
            let dh = DiffieHellmanSession::from_base64(
                session_type,
                request.dh_modulus(),
                request.dh_gen(),
            )?;
            message.set_field(
                "enc_mac_key",
                dh.encrypt_mac_key(association.mac_key(), consumer_public)?,
            );
            message.set_field("dh_server_public", dh.public_key_base64());
        } else {
            message.set_field("mac_key", Base64::encode_string(association.mac_key()));
        }

        let response = Self { message };
        response.message.validate()?;
        Ok(response)
    }

    /// OpenID 1.x answer to a request the OP will not honour: a plain
    /// HMAC-SHA1 association sent without encryption.
    ///
    /// # Errors
    ///
    /// Returns an error if the association is not HMAC-SHA1.
    pub fn create_compat_fallback(association: &Association) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AssociationResponse);
        message.set_field("assoc_handle", association.handle());
        message.set_field("assoc_type", association.assoc_type().as_str());
        message.set_field("expires_in", association.expires_in().to_string());
        message.set_field("mac_key", Base64::encode_string(association.mac_key()));
        let response = Self { message };
        response.message.validate()?;
        Ok(response)
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::AssociationResponse, params);
        message.validate()?;
        Ok(Self { message })
    }

    /// # Errors
    ///
    /// Returns an error if the response names an illegal type combination.
    pub fn session_type(&self) -> Result<AssociationSessionType, Error> {
        session_type_of(&self.message)
    }

    #[must_use]
    pub fn assoc_handle(&self) -> Option<&str> {
        self.message.field("assoc_handle")
    }

    /// Build the association described by this response. `dh` is the
    /// consumer session used for the request, needed for encrypted keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC key cannot be recovered or its length
    /// disagrees with the association type.
    pub fn association(&self, dh: Option<&DiffieHellmanSession>) -> Result<Association, Error> {
        let assoc_type = self
            .message
            .field("assoc_type")
            .and_then(AssociationType::parse)
            .ok_or_else(|| self.message.error("unknown assoc_type"))?;
        let handle = self
            .assoc_handle()
            .ok_or_else(|| self.message.error("missing assoc_handle"))?;
        let expires_in = parse_expires_in(&self.message)?;

        let mac_key = match self.message.field("enc_mac_key") {
            Some(enc_mac_key) => {
                let dh = dh.ok_or_else(|| {
                    self.message.error("encrypted MAC key received without a DH session")
                })?;
                let server_public = self
                    .message
                    .field("dh_server_public")
                    .ok_or_else(|| self.message.error("missing dh_server_public"))?;
                dh.decrypt_mac_key(enc_mac_key, server_public)?
            }
            None => {
                let mac_key = self
                    .message
                    .field("mac_key")
                    .ok_or_else(|| self.message.error("missing mac_key"))?;
                Base64::decode_vec(mac_key)
                    .map_err(|e| self.message.error(format!("invalid mac_key: {e}")))?
            }
        };

        Association::new(assoc_type, handle, mac_key, expires_in)
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

fn parse_expires_in(message: &Message) -> Result<u64, Error> {
    let value = message.field("expires_in").unwrap_or_default();
    value
        .parse::<u64>()
        .map_err(|_| message.error(format!("invalid expires_in: {value}")))
}

pub(crate) fn validate_response(message: &Message) -> Result<(), Error> {
    let session_type = session_type_of(message)?;
    parse_expires_in(message)?;

    let handle = message.field("assoc_handle").unwrap_or_default();
    if !is_valid_handle(handle) {
        return Err(message.error("invalid assoc_handle"));
    }

    let key_bits = session_type.association_type().mac_key_bits();
    if session_type.is_encrypted() {
        if message.has_field("mac_key") {
            return Err(message.error("mac_key sent in a DH session"));
        }
        let server_public = message
            .field("dh_server_public")
            .ok_or_else(|| message.error("missing dh_server_public"))?;
        btwoc_from_base64(server_public)
            .map_err(|e| message.error(format!("dh_server_public: {e}")))?;
        let enc_mac_key = message
            .field("enc_mac_key")
            .ok_or_else(|| message.error("missing enc_mac_key"))?;
        check_key_bits(message, "enc_mac_key", enc_mac_key, key_bits)
    } else {
        if message.has_field("dh_server_public") || message.has_field("enc_mac_key") {
            return Err(message.error("DH fields sent in a no-encryption session"));
        }
        let mac_key = message
            .field("mac_key")
            .ok_or_else(|| message.error("missing mac_key"))?;
        check_key_bits(message, "mac_key", mac_key, key_bits)
    }
}

fn check_key_bits(message: &Message, field: &str, value: &str, expected: usize) -> Result<(), Error> {
    let bytes =
        Base64::decode_vec(value).map_err(|e| message.error(format!("invalid {field}: {e}")))?;
    if bytes.len() * 8 == expected {
        Ok(())
    } else {
        Err(message.error(format!(
            "{field} is {} bits, association type requires {expected}",
            bytes.len() * 8
        )))
    }
}

#[derive(Debug, Clone)]
pub struct AssociationError {
    message: Message,
}

impl AssociationError {
    /// Refuse an association, optionally suggesting a type the OP accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting message does not validate.
    pub fn create_unsupported(
        error: &str,
        suggestion: Option<AssociationSessionType>,
        version2: bool,
    ) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::AssociationError);
        if version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("error", error);
        message.set_field("error_code", UNSUPPORTED_TYPE);
        if let Some(suggestion) = suggestion {
            message.set_field("session_type", suggestion.session_type());
            message.set_field("assoc_type", suggestion.association_type().as_str());
        }
        let response = Self { message };
        response.message.validate()?;
        Ok(response)
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::AssociationError, params);
        message.validate()?;
        Ok(Self { message })
    }

    #[must_use]
    pub fn error(&self) -> &str {
        self.message.field("error").unwrap_or_default()
    }

    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.message.field("error_code")
    }

    /// The OP's preferred session type, if it named a legal one.
    #[must_use]
    pub fn suggested_session_type(&self) -> Option<AssociationSessionType> {
        let session = self.message.field("session_type")?;
        let assoc = self.message.field("assoc_type")?;
        AssociationSessionType::create(session, assoc, self.message.is_version2()).ok()
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

pub(crate) fn validate_error(message: &Message) -> Result<(), Error> {
    if !message.is_version2() {
        return Ok(());
    }
    if message.field("error_code") != Some(UNSUPPORTED_TYPE) {
        return Err(message.error(format!("error_code must be {UNSUPPORTED_TYPE}")));
    }
    match (message.field("session_type"), message.field("assoc_type")) {
        (None, None) => Ok(()),
        (Some(_), Some(_)) => session_type_of(message).map(|_| ()),
        _ => Err(message.error("session_type and assoc_type must be suggested together")),
    }
}
