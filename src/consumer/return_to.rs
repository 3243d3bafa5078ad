//! `return_to` handling: matching against the receiving URL and the
//! consumer nonce carried in its query for OpenID 1.x.

use std::collections::HashMap;
use url::Url;

pub const RP_NONCE: &str = "openid.rpnonce";
pub const RP_HANDLE: &str = "openid.rphandle";
pub const RP_SIG: &str = "openid.rpsig";

/// Consumer nonce as carried in an OpenID 1.x `return_to`, signed with the
/// private association named by `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerNonce {
    pub nonce: String,
    pub handle: String,
    pub signature: String,
}

fn query_multimap(url: &Url) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url.query_pairs() {
        map.entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    for values in map.values_mut() {
        values.sort();
    }
    map
}

/// Whether the URL the response arrived at satisfies the asserted `return_to`.
///
/// Scheme, host and port must match, paths compare without a trailing
/// slash, and every `return_to` query parameter must be present on the
/// receiving side with the same values. Extra receiving parameters are fine.
#[must_use]
pub fn matches(receiving_url: &str, return_to: &str) -> bool {
    let (Ok(receiving), Ok(return_to)) = (Url::parse(receiving_url), Url::parse(return_to)) else {
        return false;
    };

    if receiving.scheme() != return_to.scheme()
        || receiving.host_str() != return_to.host_str()
        || receiving.port_or_known_default() != return_to.port_or_known_default()
    {
        return false;
    }

    let trim = |path: &str| path.trim_end_matches('/').to_string();
    if trim(receiving.path()) != trim(return_to.path()) {
        return false;
    }

    let received = query_multimap(&receiving);
    query_multimap(&return_to)
        .iter()
        .all(|(key, values)| received.get(key) == Some(values))
}

/// Append the signed consumer nonce to `return_to`.
#[must_use]
pub fn insert_nonce(return_to: &str, nonce: &ConsumerNonce) -> Option<String> {
    let mut url = Url::parse(return_to).ok()?;
    url.query_pairs_mut()
        .append_pair(RP_NONCE, &nonce.nonce)
        .append_pair(RP_HANDLE, &nonce.handle)
        .append_pair(RP_SIG, &nonce.signature);
    Some(url.to_string())
}

/// Consumer nonce carried by `return_to`; all three parameters are required.
#[must_use]
pub fn extract_nonce(return_to: &str) -> Option<ConsumerNonce> {
    let url = Url::parse(return_to).ok()?;
    let (mut nonce, mut handle, mut signature) = (None, None, None);
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            RP_NONCE => nonce = Some(value.into_owned()),
            RP_HANDLE => handle = Some(value.into_owned()),
            RP_SIG => signature = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(ConsumerNonce {
        nonce: nonce?,
        handle: handle?,
        signature: signature?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_and_extra_params_are_tolerated() {
        assert!(matches(
            "https://rp.example/cb/?x=1&openid.mode=id_res",
            "https://rp.example/cb?x=1"
        ));
        assert!(matches("https://RP.example:443/cb", "https://rp.example/cb"));
    }

    #[test]
    fn mismatches() {
        assert!(!matches("http://rp.example/cb", "https://rp.example/cb"));
        assert!(!matches("https://rp.example:8443/cb", "https://rp.example/cb"));
        assert!(!matches("https://rp.example/other", "https://rp.example/cb"));
        assert!(!matches("https://rp.example/cb?x=2", "https://rp.example/cb?x=1"));
        assert!(!matches("https://rp.example/cb", "https://rp.example/cb?x=1"));
    }

    #[test]
    fn repeated_values_must_match_as_multiset() {
        assert!(matches(
            "https://rp.example/cb?a=2&a=1",
            "https://rp.example/cb?a=1&a=2"
        ));
        assert!(!matches(
            "https://rp.example/cb?a=1",
            "https://rp.example/cb?a=1&a=1"
        ));
    }

    #[test]
    fn nonce_round_trip() {
        let nonce = ConsumerNonce {
            nonce: "2026-10-19T12:00:00Zabc".to_string(),
            handle: "rp.01J00000000000000000000000".to_string(),
            signature: "c2ln+/=".to_string(),
        };
        let Some(with_nonce) = insert_nonce("http://rp.example/cb?x=1", &nonce) else {
            panic!("return_to should parse");
        };
        assert!(with_nonce.starts_with("http://rp.example/cb?x=1&openid.rpnonce="));
        assert!(with_nonce.contains("openid.rphandle=rp.01J"));
        assert_eq!(extract_nonce(&with_nonce), Some(nonce));
        assert_eq!(extract_nonce("http://rp.example/cb?x=1"), None);
    }

    #[test]
    fn nonce_without_handle_is_ignored() {
        assert_eq!(
            extract_nonce("http://rp.example/cb?openid.rpnonce=n&openid.rpsig=s"),
            None
        );
    }
}
