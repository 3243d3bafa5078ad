//! Simple Registration 1.1 extension.

use crate::message::extension::{MessageExtension, MessageExtensionFactory};
use crate::message::parameter::ParameterList;
use crate::Error;
use std::any::Any;
use std::collections::HashMap;

pub const SREG11_NS: &str = "http://openid.net/extensions/sreg/1.1";
pub const SREG_ALIAS: &str = "sreg";

/// Profile fields defined by Simple Registration.
pub const FIELDS: &[&str] = &[
    "nickname", "email", "fullname", "dob", "gender", "postcode", "country", "language",
    "timezone",
];

fn check_field(name: &str) -> Result<(), Error> {
    if FIELDS.contains(&name) {
        Ok(())
    } else {
        Err(Error::Message(format!("unknown sreg field: {name}")))
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SRegRequest {
    required: Vec<String>,
    optional: Vec<String>,
    policy_url: Option<String>,
}

impl SRegRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a profile field.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a Simple Registration field.
    pub fn add_attribute(&mut self, name: &str, required: bool) -> Result<(), Error> {
        check_field(name)?;
        if self.required.iter().chain(&self.optional).any(|f| f == name) {
            return Ok(());
        }
        if required {
            self.required.push(name.to_string());
        } else {
            self.optional.push(name.to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn with_policy_url(mut self, url: impl Into<String>) -> Self {
        self.policy_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    #[must_use]
    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    #[must_use]
    pub fn policy_url(&self) -> Option<&str> {
        self.policy_url.as_deref()
    }

    /// Parse the unprefixed `required`/`optional`/`policy_url` fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a listed field is unknown.
    pub fn from_parameters(params: &ParameterList) -> Result<Self, Error> {
        let mut request = Self::new();
        for name in split_list(params.get("required")) {
            request.add_attribute(&name, true)?;
        }
        for name in split_list(params.get("optional")) {
            request.add_attribute(&name, false)?;
        }
        request.policy_url = params.get("policy_url").map(str::to_string);
        Ok(request)
    }
}

impl MessageExtension for SRegRequest {
    fn type_uri(&self) -> &str {
        SREG11_NS
    }

    fn preferred_alias(&self) -> Option<&str> {
        Some(SREG_ALIAS)
    }

    fn parameters(&self) -> ParameterList {
        let mut params = ParameterList::new();
        if !self.required.is_empty() {
            params.set("required", self.required.join(","));
        }
        if !self.optional.is_empty() {
            params.set("optional", self.optional.join(","));
        }
        if let Some(url) = &self.policy_url {
            params.set("policy_url", url.clone());
        }
        params
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SRegResponse {
    values: ParameterList,
}

impl SRegResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `request` from the user's profile, including only requested fields.
    #[must_use]
    pub fn from_request(request: &SRegRequest, profile: &HashMap<String, String>) -> Self {
        let mut response = Self::new();
        for name in request.required().iter().chain(request.optional()) {
            if let Some(value) = profile.get(name) {
                response.values.set(name.clone(), value.clone());
            }
        }
        response
    }

    /// # Errors
    ///
    /// Returns an error if `name` is not a Simple Registration field.
    pub fn add_attribute(&mut self, name: &str, value: impl Into<String>) -> Result<(), Error> {
        check_field(name)?;
        self.values.set(name, value);
        Ok(())
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.values.get(name)
    }

    #[must_use]
    pub fn attributes(&self) -> &ParameterList {
        &self.values
    }

    /// # Errors
    ///
    /// Returns an error if the payload carries an unknown field.
    pub fn from_parameters(params: &ParameterList) -> Result<Self, Error> {
        let mut response = Self::new();
        for param in params.iter() {
            response.add_attribute(param.key(), param.value())?;
        }
        Ok(response)
    }
}

impl MessageExtension for SRegResponse {
    fn type_uri(&self) -> &str {
        SREG11_NS
    }

    fn preferred_alias(&self) -> Option<&str> {
        Some(SREG_ALIAS)
    }

    fn parameters(&self) -> ParameterList {
        self.values.clone()
    }

    fn signature_required(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SRegFactory;

impl MessageExtensionFactory for SRegFactory {
    fn type_uri(&self) -> &str {
        SREG11_NS
    }

    fn create(
        &self,
        params: &ParameterList,
        is_request: bool,
    ) -> Result<Box<dyn MessageExtension>, Error> {
        if is_request {
            Ok(Box::new(SRegRequest::from_parameters(params)?))
        } else {
            Ok(Box::new(SRegResponse::from_parameters(params)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_encodes_lists() -> Result<(), Error> {
        let mut request = SRegRequest::new().with_policy_url("https://rp.example/policy");
        request.add_attribute("email", true)?;
        request.add_attribute("nickname", false)?;
        request.add_attribute("email", false)?;

        let params = request.parameters();
        assert_eq!(params.get("required"), Some("email"));
        assert_eq!(params.get("optional"), Some("nickname"));
        assert_eq!(SRegRequest::from_parameters(&params)?, request);
        Ok(())
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut request = SRegRequest::new();
        assert!(request.add_attribute("shoe_size", true).is_err());
    }

    #[test]
    fn response_only_answers_requested_fields() -> Result<(), Error> {
        let mut request = SRegRequest::new();
        request.add_attribute("email", true)?;
        let profile: HashMap<String, String> = [
            ("email".to_string(), "user@example.com".to_string()),
            ("fullname".to_string(), "Example User".to_string()),
        ]
        .into_iter()
        .collect();

        let response = SRegResponse::from_request(&request, &profile);
        assert_eq!(response.attribute("email"), Some("user@example.com"));
        assert_eq!(response.attribute("fullname"), None);
        assert!(response.signature_required());
        Ok(())
    }

    #[test]
    fn factory_picks_shape_by_direction() -> Result<(), Error> {
        let params: ParameterList = [("email", "user@example.com")].into_iter().collect();
        let ext = SRegFactory.create(&params, false)?;
        let response = ext.as_any().downcast_ref::<SRegResponse>();
        assert_eq!(
            response.and_then(|r| r.attribute("email")),
            Some("user@example.com")
        );

        let params: ParameterList = [("required", "email,dob")].into_iter().collect();
        let ext = SRegFactory.create(&params, true)?;
        let request = ext.as_any().downcast_ref::<SRegRequest>();
        assert_eq!(request.map(|r| r.required().len()), Some(2));
        Ok(())
    }
}
