//! Voter identity resolution.
//!
//! Every request resolves to exactly one [`Identity`]: an authenticated user
//! ID, or an anonymous IP + user-agent fingerprint. The two schemes are
//! mutually exclusive and deduplicated separately, so they can never collide.

use std::net::IpAddr;

use rocket::{
    request::{FromRequest, Outcome, Request},
    State,
};

use crate::config::Config;
use crate::model::{
    auth::{AuthToken, AUTH_TOKEN_COOKIE},
    mongodb::Id,
};

/// Sentinel for a client address that could not be established. An identity
/// carrying this value cannot be safely deduplicated, so the eligibility
/// validator fails closed on it.
pub const UNKNOWN_IP: &str = "unknown";

/// The dedup key for voting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated { user_id: Id },
    Anonymous { ip: String, user_agent: String },
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// True iff this is an anonymous identity whose address never resolved.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Anonymous { ip, .. } if ip == UNKNOWN_IP)
    }

    /// Rate-limit key for this identity. Authenticated and anonymous keys
    /// live in disjoint namespaces.
    pub fn rate_key(&self, category: &str) -> String {
        match self {
            Self::Authenticated { user_id } => format!("{}:user:{}", category, user_id),
            Self::Anonymous { ip, .. } => format!("{}:ip:{}", category, ip),
        }
    }
}

/// The resolved caller of a request: identity plus session metadata the
/// security gateway needs.
#[derive(Debug, Clone)]
pub struct VoterContext {
    pub identity: Identity,
    /// An auth cookie was present but invalid, expired, or past the absolute
    /// session age bound. Where authentication is required this yields
    /// `SessionInvalid` rather than `LoginRequired`.
    pub stale_session: bool,
    /// Any auth cookie was presented, valid or not. Forgery-token
    /// verification applies to such session-bearing requests.
    pub session_bearing: bool,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VoterContext {
    type Error = ();

    /// Resolution never fails: an unusable session degrades to an anonymous
    /// identity, and an unknown address degrades to the fail-closed sentinel.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let mut stale_session = false;
        let mut session_bearing = false;
        if let Some(cookie) = req.cookies().get(AUTH_TOKEN_COOKIE) {
            session_bearing = true;
            match AuthToken::from_cookie(cookie, config) {
                Ok(token) if token.is_fresh(config) => {
                    return Outcome::Success(VoterContext {
                        identity: Identity::Authenticated {
                            user_id: token.user_id,
                        },
                        stale_session: false,
                        session_bearing,
                    });
                }
                _ => stale_session = true,
            }
        }

        let ip = resolve_client_ip(
            req.remote().map(|addr| addr.ip()),
            req.headers().get_one("X-Forwarded-For"),
            config.trusted_proxies(),
        );
        let user_agent = req
            .headers()
            .get_one("User-Agent")
            .unwrap_or("")
            .to_string();

        Outcome::Success(VoterContext {
            identity: Identity::Anonymous {
                ip: ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| UNKNOWN_IP.to_string()),
                user_agent,
            },
            stale_session,
            session_bearing,
        })
    }
}

/// Establish the client network address.
///
/// The forwarded-address header is only honoured when the immediate peer is a
/// configured reverse proxy; otherwise it is freely client-settable and the
/// raw transport-layer peer address is used instead.
fn resolve_client_ip(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = peer?;
    if trusted_proxies.contains(&peer) {
        if let Some(forwarded) = forwarded_for {
            if let Some(ip) = forwarded
                .split(',')
                .next()
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
            {
                return Some(ip);
            }
        }
        // A trusted proxy that sends no usable header gives us nothing to
        // deduplicate on.
        return None;
    }
    Some(peer)
}
