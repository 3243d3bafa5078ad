//! Ordered key/value parameters, the wire representation of every message.
//!
//! Two encodings exist: key-value form (`key:value\n`, used for direct
//! responses) and `application/x-www-form-urlencoded` (used for requests and
//! indirect messages, where every key carries the `openid.` prefix).

use crate::Error;
use std::collections::HashMap;
use url::form_urlencoded;

pub const OPENID_PREFIX: &str = "openid.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    key: String,
    value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Keys may not contain `:` and neither side may contain a newline.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
            && !self.key.contains(':')
            && !self.key.contains('\n')
            && !self.value.contains('\n')
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterList {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl ParameterList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter. A replaced key keeps its original position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(&pos) = self.index.get(&key) {
            self.params[pos].value = value;
        } else {
            self.index.insert(key.clone(), self.params.len());
            self.params.push(Parameter { key, value });
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&pos| self.params[pos].value.as_str())
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.index.remove(key)?;
        let removed = self.params.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(removed.value)
    }

    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Copy every parameter of `other` into this list.
    pub fn extend(&mut self, other: &Self) {
        for param in other.iter() {
            self.set(param.key.clone(), param.value.clone());
        }
    }

    /// Parse a key-value form body.
    ///
    /// # Errors
    ///
    /// Returns an error if any non-empty line has no `:` separator.
    pub fn from_key_value_form(text: &str) -> Result<Self, Error> {
        let mut list = Self::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::Message(format!("key-value form line without a colon: {line}"))
            })?;
            list.set(key, value);
        }
        Ok(list)
    }

    /// Parse a URL query string; keys and values are percent-decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if a pair has no `=` separator.
    pub fn from_query_string(query: &str) -> Result<Self, Error> {
        let query = query.strip_prefix('?').unwrap_or(query);
        if let Some(pair) = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .find(|pair| !pair.contains('='))
        {
            return Err(Error::Message(format!(
                "query string pair without a value: {pair}"
            )));
        }

        let mut list = Self::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            list.set(key.into_owned(), value.into_owned());
        }
        Ok(list)
    }

    /// Build from a multi-valued map as produced by web frameworks.
    ///
    /// # Errors
    ///
    /// Returns an error if an `openid.*` key carries more than one value.
    pub fn from_multi_map<I, K, V>(map: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = String>,
    {
        let mut list = Self::new();
        for (key, values) in map {
            let key = key.into();
            let mut values = values.into_iter();
            let Some(first) = values.next() else {
                continue;
            };
            if values.next().is_some() && key.starts_with(OPENID_PREFIX) {
                return Err(Error::Message(format!(
                    "multiple values for OpenID parameter: {key}"
                )));
            }
            list.set(key, first);
        }
        Ok(list)
    }

    /// Fail on the first parameter that would corrupt key-value encoding.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending key.
    pub fn validate(&self) -> Result<(), Error> {
        match self.params.iter().find(|param| !param.is_valid()) {
            Some(param) => Err(Error::Message(format!(
                "invalid parameter: {}",
                param.key.escape_debug()
            ))),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn key_value_form(&self) -> String {
        let mut out = String::new();
        for param in &self.params {
            out.push_str(&param.key);
            out.push(':');
            out.push_str(&param.value);
            out.push('\n');
        }
        out
    }

    /// URL-encode every parameter, adding the `openid.` prefix where absent.
    #[must_use]
    pub fn www_form(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.prefixed_pairs() {
            serializer.append_pair(&key, value);
        }
        serializer.finish()
    }

    /// Key/value pairs as sent in a form POST, with the `openid.` prefix.
    #[must_use]
    pub fn prefixed_pairs(&self) -> Vec<(String, &str)> {
        self.params
            .iter()
            .map(|param| {
                let key = if param.key.starts_with(OPENID_PREFIX) {
                    param.key.clone()
                } else {
                    format!("{OPENID_PREFIX}{}", param.key)
                };
                (key, param.value.as_str())
            })
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ParameterList
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut list = Self::new();
        for (key, value) in iter {
            list.set(key, value);
        }
        list
    }
}
