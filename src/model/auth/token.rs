use chrono::{serde::ts_seconds, DateTime, Utc};
#[cfg(test)]
use chrono::Duration;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::{Cookie, SameSite},
    request::{FromRequest, Outcome, Request},
    time,
    State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::model::mongodb::Id;

use super::User;

pub const AUTH_TOKEN_COOKIE: &str = "auth_token";

/// An authentication token representing a logged-in user.
///
/// Lives in a JWT inside an `HttpOnly`, `SameSite=Strict` cookie. The JWT
/// `exp` claim bounds how long a session stays usable without re-login
/// (`auth_ttl`); the `iat` claim additionally bounds the absolute session age
/// (`session_max_age`), checked via [`AuthToken::is_fresh`].
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "uid")]
    pub user_id: Id,
    #[serde(rename = "iat", with = "ts_seconds")]
    pub issued_at: DateTime<Utc>,
}

impl AuthToken {
    /// Create a new token for the given user, issued now.
    pub fn new(user: &User) -> Self {
        Self {
            user_id: user.id,
            issued_at: Utc::now(),
        }
    }

    /// Is this token within the absolute session age bound?
    pub fn is_fresh(&self, config: &Config) -> bool {
        Utc::now() - self.issued_at < config.session_max_age()
    }

    #[allow(clippy::missing_panics_doc)]
    /// Serialize this token into a cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let max_age = config.auth_ttl();
        let claims = Claims {
            token: self,
            expire_at: Utc::now() + max_age,
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .expect("JWT encoding is infallible with default settings");

        Cookie::build(AUTH_TOKEN_COOKIE, token)
            .max_age(time::Duration::seconds(max_age.num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize and validate a token from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, Error> {
        let token = jsonwebtoken::decode(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &validation(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }
}

/// Cookie claims: the token itself plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

/// Expiry validation without leeway: a session one second past its TTL is
/// stale, and the eligibility tests rely on the boundary being sharp.
fn validation() -> Validation {
    let mut validation = Validation::default();
    validation.leeway = 0;
    validation
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    /// Require a valid, fresh authentication token. Routes that can degrade
    /// to anonymous use [`crate::model::identity::VoterContext`] instead.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        let cookie = match req.cookies().get(AUTH_TOKEN_COOKIE) {
            Some(cookie) => cookie,
            None => {
                return Outcome::Failure((
                    rocket::http::Status::Unauthorized,
                    Error::Status(
                        rocket::http::Status::Unauthorized,
                        "No authentication token".to_string(),
                    ),
                ))
            }
        };

        match Self::from_cookie(cookie, config) {
            Ok(token) if token.is_fresh(config) => Outcome::Success(token),
            Ok(_) => Outcome::Failure((
                rocket::http::Status::Unauthorized,
                Error::Status(
                    rocket::http::Status::Unauthorized,
                    "Session exceeded maximum age".to_string(),
                ),
            )),
            Err(e) => Outcome::Failure((rocket::http::Status::Unauthorized, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_round_trip() {
        let config = Config::example();
        let user = User {
            id: Id::new(),
            user: crate::model::auth::UserCore::example(),
        };

        let token = AuthToken::new(&user);
        let cookie = token.into_cookie(&config);
        let decoded = AuthToken::from_cookie(&cookie, &config).unwrap();
        assert_eq!(decoded.user_id, user.id);
        assert!(decoded.is_fresh(&config));
    }

    #[test]
    fn expired_token_is_rejected() {
        let config = Config::example();
        let claims = Claims {
            token: AuthToken {
                user_id: Id::new(),
                issued_at: Utc::now() - Duration::hours(2),
            },
            expire_at: Utc::now() - Duration::hours(1),
        };
        let jwt = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap();
        let cookie = Cookie::new(AUTH_TOKEN_COOKIE, jwt);

        assert!(AuthToken::from_cookie(&cookie, &config).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let config = Config::example();
        let user = User {
            id: Id::new(),
            user: crate::model::auth::UserCore::example(),
        };
        let cookie = AuthToken::new(&user).into_cookie(&config);

        let mut tampered = cookie.value().to_string();
        tampered.pop();
        tampered.push('A');
        let cookie = Cookie::new(AUTH_TOKEN_COOKIE, tampered);
        assert!(AuthToken::from_cookie(&cookie, &config).is_err());
    }

    #[test]
    fn old_session_is_not_fresh() {
        let config = Config::example();
        let token = AuthToken {
            user_id: Id::new(),
            issued_at: Utc::now() - config.session_max_age() - Duration::seconds(1),
        };
        assert!(!token.is_fresh(&config));
    }
}
