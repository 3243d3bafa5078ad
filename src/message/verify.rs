//! Direct verification (`check_authentication`) messages.

use crate::message::auth::{signed_text, validate_assertion, AuthSuccess};
use crate::message::parameter::ParameterList;
use crate::message::{mode, Message, MessageKind, OPENID2_NS};
use crate::Error;

/// An assertion echoed back to its OP with `mode=check_authentication`.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    message: Message,
}

impl VerifyRequest {
    /// # Errors
    ///
    /// Returns a verify error if the echoed assertion does not validate.
    pub fn from_auth_success(success: &AuthSuccess) -> Result<Self, Error> {
        let mut message = success.message().clone();
        message.set_kind(MessageKind::VerifyRequest);
        message.set_field("mode", mode::CHECK_AUTHENTICATION);
        message.validate()?;
        Ok(Self { message })
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::VerifyRequest, params);
        message.validate()?;
        Ok(Self { message })
    }

    /// Signed text computed from the request's own `signed` list.
    #[must_use]
    pub fn signed_text(&self) -> String {
        let fields: Vec<&str> = self
            .message
            .field("signed")
            .unwrap_or_default()
            .split(',')
            .filter(|f| !f.is_empty())
            .collect();
        // The OP signed the assertion with mode=id_res.
        let mut original = self.message.clone();
        original.set_field("mode", mode::ID_RES);
        signed_text(&original, &fields)
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        self.message.field("sig").unwrap_or_default()
    }

    #[must_use]
    pub fn handle(&self) -> &str {
        self.message.field("assoc_handle").unwrap_or_default()
    }

    #[must_use]
    pub fn invalidate_handle(&self) -> Option<&str> {
        self.message.field("invalidate_handle")
    }

    #[must_use]
    pub fn is_version2(&self) -> bool {
        self.message.is_version2()
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }
}

pub(crate) fn validate_request(message: &Message) -> Result<(), Error> {
    message.expect_mode(&[mode::CHECK_AUTHENTICATION])?;
    validate_assertion(message)
}

#[derive(Debug, Clone)]
pub struct VerifyResponse {
    message: Message,
}

impl VerifyResponse {
    /// # Errors
    ///
    /// Returns an error if `invalidate_handle` breaks key-value encoding.
    pub fn create(
        version2: bool,
        is_valid: bool,
        invalidate_handle: Option<&str>,
    ) -> Result<Self, Error> {
        let mut message = Message::new(MessageKind::VerifyResponse);
        if version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("is_valid", if is_valid { "true" } else { "false" });
        if let Some(handle) = invalidate_handle {
            message.set_field("invalidate_handle", handle);
        }
        message.validate()?;
        Ok(Self { message })
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::VerifyResponse, params);
        message.validate()?;
        Ok(Self { message })
    }

    #[must_use]
    pub fn is_signature_verified(&self) -> bool {
        self.message.field("is_valid") == Some("true")
    }

    #[must_use]
    pub fn invalidate_handle(&self) -> Option<&str> {
        self.message.field("invalidate_handle")
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

pub(crate) fn validate_response(message: &Message) -> Result<(), Error> {
    match message.field("is_valid") {
        Some("true" | "false") => Ok(()),
        Some(other) => Err(message.error(format!("invalid is_valid value: {other}"))),
        None => Err(message.error("missing is_valid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{Association, AssociationType};
    use crate::message::auth::Assertion;
    use crate::ErrorCode;

    fn success(assoc: &Association) -> Result<AuthSuccess, Error> {
        AuthSuccess::create(
            &Assertion {
                version2: true,
                op_endpoint: "https://op.example/server",
                claimed_id: Some("https://user.example/"),
                identity: Some("https://user.example/"),
                return_to: "https://rp.example/return",
                response_nonce: Some("2026-10-19T12:00:00Zabc"),
                invalidate_handle: None,
            },
            assoc,
            true,
        )
    }

    #[test]
    fn request_swaps_mode_and_keeps_signed_text() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "private-1", 60);
        let success = success(&assoc)?;
        let request = VerifyRequest::from_auth_success(&success)?;

        assert_eq!(request.message().field("mode"), Some(mode::CHECK_AUTHENTICATION));
        assert_eq!(request.signed_text(), success.signed_text());
        assert!(assoc.verify_signature(&request.signed_text(), request.signature()));
        Ok(())
    }

    #[test]
    fn request_requires_check_authentication_mode() -> Result<(), Error> {
        let assoc = Association::generate(AssociationType::HmacSha256, "private-1", 60);
        let params = success(&assoc)?.message().parameters().clone();
        let err = VerifyRequest::from_parameters(params).err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::Verify));
        Ok(())
    }

    #[test]
    fn response_encodes_verdict() -> Result<(), Error> {
        let response = VerifyResponse::create(true, true, Some("stale"))?;
        assert_eq!(
            response.message().key_value_form_encoding(),
            format!("ns:{OPENID2_NS}\nis_valid:true\ninvalidate_handle:stale\n")
        );

        let parsed = VerifyResponse::from_parameters(ParameterList::from_key_value_form(
            "ns:http://specs.openid.net/auth/2.0\nis_valid:false\n",
        )?)?;
        assert!(!parsed.is_signature_verified());
        assert_eq!(parsed.invalidate_handle(), None);
        Ok(())
    }

    #[test]
    fn response_rejects_odd_verdict() -> Result<(), Error> {
        let params = ParameterList::from_key_value_form("is_valid:maybe\n")?;
        assert!(VerifyResponse::from_parameters(params).is_err());
        Ok(())
    }
}
