//! Realm (trust root) matching against `return_to` URLs.

use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealmMatch {
    Ok,
    DeniedRealm,
    MalformedRealm,
    MalformedReturnTo,
    FragmentNotAllowed,
    ProtocolMismatch,
    PortMismatch,
    PathMismatch,
    DomainMismatch,
}

impl RealmMatch {
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::DeniedRealm => "denied realm",
            Self::MalformedRealm => "malformed realm",
            Self::MalformedReturnTo => "malformed return_to",
            Self::FragmentNotAllowed => "fragment not allowed in realm",
            Self::ProtocolMismatch => "protocol mismatch",
            Self::PortMismatch => "port mismatch",
            Self::PathMismatch => "path mismatch",
            Self::DomainMismatch => "domain mismatch",
        }
    }
}

impl fmt::Display for RealmMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a `return_to` URL falls under a realm.
pub trait RealmVerifier: Send + Sync {
    fn matches(&self, realm: &str, return_to: &str) -> RealmMatch;
}

/// OpenID 2.0 realm matching with an optional list of denied domains.
///
/// A realm host written as `*.example.com` matches `example.com` and any of
/// its subdomains. A denied domain matches itself and its subdomains.
#[derive(Debug, Clone, Default)]
pub struct UrlRealmVerifier {
    denied_domains: Vec<String>,
}

impl UrlRealmVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_denied_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_domains = domains
            .into_iter()
            .map(|d| d.into().to_ascii_lowercase())
            .collect();
        self
    }

    fn is_denied(&self, host: &str) -> bool {
        self.denied_domains
            .iter()
            .any(|denied| domain_matches(denied, host))
    }
}

fn domain_matches(domain: &str, host: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Split `scheme://*.host/...` into a parseable URL and the wildcard flag.
fn strip_wildcard(realm: &str) -> (String, bool) {
    match realm.split_once("://") {
        Some((scheme, rest)) if rest.starts_with("*.") => {
            (format!("{scheme}://{}", &rest[2..]), true)
        }
        _ => (realm.to_string(), false),
    }
}

fn path_matches(realm_path: &str, path: &str) -> bool {
    path == realm_path
        || path.strip_prefix(realm_path).is_some_and(|rest| {
            realm_path.ends_with('/') || rest.starts_with('/')
        })
}

impl RealmVerifier for UrlRealmVerifier {
    fn matches(&self, realm: &str, return_to: &str) -> RealmMatch {
        if realm.contains('#') {
            return RealmMatch::FragmentNotAllowed;
        }

        let (realm_url, wildcard) = strip_wildcard(realm);
        let Ok(realm_url) = Url::parse(&realm_url) else {
            return RealmMatch::MalformedRealm;
        };
        let Some(realm_host) = realm_url.host_str().map(str::to_ascii_lowercase) else {
            return RealmMatch::MalformedRealm;
        };
        if wildcard && !realm_host.contains('.') {
            return RealmMatch::MalformedRealm;
        }

        let Ok(return_to) = Url::parse(return_to) else {
            return RealmMatch::MalformedReturnTo;
        };
        let Some(host) = return_to.host_str().map(str::to_ascii_lowercase) else {
            return RealmMatch::MalformedReturnTo;
        };

        if self.is_denied(&realm_host) {
            return RealmMatch::DeniedRealm;
        }
        if realm_url.scheme() != return_to.scheme() {
            return RealmMatch::ProtocolMismatch;
        }
        if realm_url.port_or_known_default() != return_to.port_or_known_default() {
            return RealmMatch::PortMismatch;
        }

        let domain_ok = if wildcard {
            domain_matches(&realm_host, &host)
        } else {
            realm_host == host
        };
        if !domain_ok {
            return RealmMatch::DomainMismatch;
        }

        if !path_matches(realm_url.path(), return_to.path()) {
            return RealmMatch::PathMismatch;
        }

        RealmMatch::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(realm: &str, return_to: &str) -> RealmMatch {
        UrlRealmVerifier::new().matches(realm, return_to)
    }

    #[test]
    fn exact_and_subpath_match() {
        assert_eq!(check("http://example.com/", "http://example.com/cb"), RealmMatch::Ok);
        assert_eq!(
            check("http://example.com/app", "http://example.com/app/return?x=1"),
            RealmMatch::Ok
        );
        assert_eq!(
            check("http://example.com/app", "http://example.com/application"),
            RealmMatch::PathMismatch
        );
    }

    #[test]
    fn domain_mismatch() {
        assert_eq!(
            check("http://example.com/", "http://evil.com/cb"),
            RealmMatch::DomainMismatch
        );
        assert_eq!(
            check("http://example.com/", "http://www.example.com/cb"),
            RealmMatch::DomainMismatch
        );
    }

    #[test]
    fn wildcard_covers_subdomains() {
        assert_eq!(
            check("http://*.example.com/", "http://www.example.com/cb"),
            RealmMatch::Ok
        );
        assert_eq!(
            check("http://*.example.com/", "http://example.com/cb"),
            RealmMatch::Ok
        );
        assert_eq!(
            check("http://*.example.com/", "http://badexample.com/cb"),
            RealmMatch::DomainMismatch
        );
        assert_eq!(check("http://*.com/", "http://a.com/"), RealmMatch::MalformedRealm);
    }

    #[test]
    fn scheme_and_port_must_agree() {
        assert_eq!(
            check("https://example.com/", "http://example.com/"),
            RealmMatch::ProtocolMismatch
        );
        assert_eq!(
            check("http://example.com:8080/", "http://example.com/"),
            RealmMatch::PortMismatch
        );
        assert_eq!(
            check("http://example.com:80/", "http://example.com/"),
            RealmMatch::Ok
        );
    }

    #[test]
    fn malformed_inputs() {
        assert_eq!(
            check("http://example.com/#frag", "http://example.com/"),
            RealmMatch::FragmentNotAllowed
        );
        assert_eq!(check("not a url", "http://example.com/"), RealmMatch::MalformedRealm);
        assert_eq!(
            check("http://example.com/", "::nope"),
            RealmMatch::MalformedReturnTo
        );
    }

    #[test]
    fn denied_domains() {
        let verifier = UrlRealmVerifier::new().with_denied_domains(["Blocked.example"]);
        assert_eq!(
            verifier.matches("http://*.blocked.example/", "http://a.blocked.example/"),
            RealmMatch::DeniedRealm
        );
        assert_eq!(
            verifier.matches("http://fine.example/", "http://fine.example/"),
            RealmMatch::Ok
        );
    }
}
