//! Protocol-level error responses.

use crate::message::parameter::ParameterList;
use crate::message::{mode, Message, MessageKind, OPENID2_NS};
use crate::Error;

/// Error text safe for key-value encoding.
fn one_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Error answer to a direct (POST) request.
#[derive(Debug, Clone)]
pub struct DirectError {
    message: Message,
}

impl DirectError {
    #[must_use]
    pub fn create(error: &str, error_code: Option<&str>, version2: bool) -> Self {
        let mut message = Message::new(MessageKind::DirectError);
        if version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("error", one_line(error));
        if let Some(code) = error_code {
            message.set_field("error_code", one_line(code));
        }
        Self { message }
    }

    /// Direct error carrying the code of `error`.
    #[must_use]
    pub fn from_error(error: &Error, version2: bool) -> Self {
        Self::create(&error.description(), Some(error.code().as_str()), version2)
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::DirectError, params);
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

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn into_message(self) -> Message {
        self.message
    }
}

pub(crate) fn validate_direct(_message: &Message) -> Result<(), Error> {
    Ok(())
}

/// Error delivered to the RP through the user agent (`mode=error`).
#[derive(Debug, Clone)]
pub struct IndirectError {
    message: Message,
    return_to: String,
}

impl IndirectError {
    #[must_use]
    pub fn create(error: &str, error_code: Option<&str>, return_to: &str, version2: bool) -> Self {
        let mut message = Message::new(MessageKind::IndirectError);
        if version2 {
            message.set_field("ns", OPENID2_NS);
        }
        message.set_field("mode", mode::ERROR);
        message.set_field("error", one_line(error));
        if let Some(code) = error_code {
            message.set_field("error_code", one_line(code));
        }
        Self {
            message,
            return_to: return_to.to_string(),
        }
    }

    #[must_use]
    pub fn from_error(error: &Error, return_to: &str, version2: bool) -> Self {
        Self::create(
            &error.description(),
            Some(error.code().as_str()),
            return_to,
            version2,
        )
    }

    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_parameters(params: ParameterList) -> Result<Self, Error> {
        let message = Message::from_parameters(MessageKind::IndirectError, params);
        message.validate()?;
        let return_to = message.field("return_to").unwrap_or_default().to_string();
        Ok(Self { message, return_to })
    }

    #[must_use]
    pub fn error(&self) -> &str {
        self.message.field("error").unwrap_or_default()
    }

    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.message.field("error_code")
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

pub(crate) fn validate_indirect(message: &Message) -> Result<(), Error> {
    message.expect_mode(&[mode::ERROR])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_error_carries_code() -> Result<(), Error> {
        let err = Error::Verify("bad signature".to_string());
        let direct = DirectError::from_error(&err, true);
        assert_eq!(direct.error(), "bad signature");
        assert_eq!(direct.error_code(), Some("verify-error"));
        direct.message().validate()?;
        Ok(())
    }

    #[test]
    fn newlines_are_flattened() -> Result<(), Error> {
        let direct = DirectError::create("line one\nline two", None, false);
        assert_eq!(direct.error(), "line one line two");
        direct.message().validate()?;
        Ok(())
    }

    #[test]
    fn indirect_error_redirects_to_return_to() -> Result<(), Error> {
        let err = Error::AuthRealm("return_to outside realm".to_string());
        let indirect = IndirectError::from_error(&err, "https://rp.example/cb", true);
        let url = indirect.destination_url();
        assert!(url.starts_with("https://rp.example/cb?openid.ns="));
        assert!(url.contains("openid.mode=error"));
        assert!(url.contains("openid.error_code=auth-realm-error"));
        indirect.message().validate()?;
        Ok(())
    }
}
