//! Forgery protection for session-bearing requests.
//!
//! Double-submit scheme: the server issues a random token in a cookie, and
//! the client must echo it back in a header. The two values are compared in
//! constant time by comparing their keyed HMACs; comparing tags rather than
//! raw strings keeps the comparison timing-independent of where a mismatch
//! occurs.

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rocket::{
    http::{Cookie, SameSite},
    request::{FromRequest, Outcome, Request},
    State,
};
use sha2::Sha256;

use crate::config::Config;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

const TOKEN_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh forgery token.
pub fn new_csrf_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// The cookie half of the double-submit pair. Not `HttpOnly`: the client
/// script must be able to read it to echo it into the header.
pub fn csrf_cookie(token: String) -> Cookie<'static> {
    Cookie::build(CSRF_COOKIE, token)
        .same_site(SameSite::Strict)
        .http_only(false)
        .finish()
}

/// Constant-time equality of the two submitted tokens.
fn tokens_match(secret: &[u8], cookie_token: &str, header_token: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(cookie_token.as_bytes());
    let cookie_tag = mac.finalize().into_bytes();

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(header_token.as_bytes());
    mac.verify_slice(&cookie_tag).is_ok()
}

/// The forgery-check verdict for a request. Fails closed: a missing cookie,
/// missing header, or mismatch all verify as failed, and the reason carries
/// no detail about which.
#[derive(Debug, Copy, Clone)]
pub struct CsrfVerdict {
    pub passed: bool,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CsrfVerdict {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let passed = match (
            req.cookies().get(CSRF_COOKIE),
            req.headers().get_one(CSRF_HEADER),
        ) {
            (Some(cookie), Some(header)) => {
                tokens_match(config.csrf_secret(), cookie.value(), header)
            }
            _ => false,
        };

        Outcome::Success(CsrfVerdict { passed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-csrf-secret";

    #[test]
    fn tokens_are_long_and_unique() {
        let a = new_csrf_token();
        let b = new_csrf_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn matching_tokens_verify() {
        let token = new_csrf_token();
        assert!(tokens_match(SECRET, &token, &token));
    }

    #[test]
    fn mismatched_tokens_fail() {
        assert!(!tokens_match(SECRET, &new_csrf_token(), &new_csrf_token()));
    }

    #[test]
    fn near_miss_fails() {
        let token = new_csrf_token();
        let mut altered = token.clone();
        altered.pop();
        altered.push(if token.ends_with('0') { '1' } else { '0' });
        assert!(!tokens_match(SECRET, &token, &altered));
    }

    #[test]
    fn cookie_is_script_readable() {
        let cookie = csrf_cookie(new_csrf_token());
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }
}
