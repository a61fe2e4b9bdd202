//! Caller identity resolution.

use std::fmt;
use std::net::IpAddr;

/// Transport-neutral view of a request, as far as identity is concerned.
///
/// The HTTP layer fills this from the authenticated-user extension, the
/// `x-forwarded-for` header and the peer socket address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Identity established by an upstream authentication layer
    pub user_id: Option<String>,
    /// Raw `x-forwarded-for` header value, if present
    pub forwarded_for: Option<String>,
    /// Address of the directly connected peer
    pub peer_addr: Option<IpAddr>,
}

impl RequestContext {
    /// Context for an authenticated caller.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Context for an anonymous caller connecting directly from `addr`.
    pub fn for_peer(addr: IpAddr) -> Self {
        Self {
            peer_addr: Some(addr),
            ..Self::default()
        }
    }

    /// First address of the forwarded-for chain, i.e. the originating client.
    pub fn forwarded_client(&self) -> Option<&str> {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }
}

/// Stable identity a quota is charged against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Authenticated caller
    User(String),
    /// Anonymous caller, by source address
    Ip(String),
    /// Nothing identified the caller
    Unknown,
}

impl ClientKey {
    /// Resolve the caller's identity.
    ///
    /// An authenticated user wins over any address; a forwarded-for client wins
    /// over the direct peer.
    pub fn resolve(ctx: &RequestContext) -> Self {
        if let Some(user) = ctx.user_id.as_deref().filter(|id| !id.is_empty()) {
            return ClientKey::User(user.to_string());
        }

        if let Some(addr) = ctx.forwarded_client() {
            return ClientKey::Ip(addr.to_string());
        }

        match ctx.peer_addr {
            Some(addr) => ClientKey::Ip(addr.to_string()),
            None => ClientKey::Unknown,
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{}", id),
            ClientKey::Ip(addr) => write!(f, "ip:{}", addr),
            ClientKey::Unknown => f.write_str("unknown"),
        }
    }
}

/// Key derivation used by a policy.
pub type KeyFn = fn(&RequestContext) -> String;

/// The default key derivation shared by all built-in policies.
pub fn resolve_key(ctx: &RequestContext) -> String {
    ClientKey::resolve(ctx).to_string()
}
