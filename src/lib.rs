//! # OpenID Engine
//!
//! Protocol engine for OpenID Authentication 1.1 and 2.0, covering both the
//! Relying Party ([`consumer::ConsumerManager`]) and the Identity Provider
//! ([`server::ServerManager`]).
//!
//! ## Layers
//!
//! - [`message`]: parameter lists, the wire codecs and the typed messages
//!   with their per-version validation rules.
//! - [`association`]: shared secrets, HMAC signing and Diffie-Hellman MAC
//!   key exchange, plus pluggable association stores.
//! - [`nonce`], [`realm`]: replay protection and `return_to` scoping.
//! - [`consumer`], [`server`]: the two orchestrating managers.
//!
//! Discovery and HTTP transport are collaborators behind the
//! [`discovery::Discovery`] and [`http::HttpFetcher`] traits.
//!
//! ## Compatibility
//!
//! A message whose `openid.ns` is the OpenID 2.0 namespace follows 2.0
//! rules; any other message is handled in OpenID 1.x compatibility mode.

pub mod association;
pub mod cli;
pub mod consumer;
pub mod discovery;
pub mod error;
pub mod http;
pub mod message;
pub mod nonce;
pub mod realm;
pub mod server;

pub use self::error::{Error, ErrorCode};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
