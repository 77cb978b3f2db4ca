//! The minimal session provider: login, logout, and forgery-token issuance.

use mongodb::bson::doc;
use rocket::{
    http::{Cookie, CookieJar, Status},
    serde::json::Json,
    Route, State,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        auth::{AuthToken, User, AUTH_TOKEN_COOKIE},
        identity::VoterContext,
        mongodb::Coll,
        security::{csrf_cookie, new_csrf_token, Limiters, RateLimitDecision},
    },
};

pub fn routes() -> Vec<Route> {
    routes![login, logout, issue_csrf]
}

#[derive(Debug, Deserialize, Serialize)]
struct LoginCredentials {
    username: String,
    password: String,
}

#[post("/auth/login", data = "<credentials>", format = "json")]
async fn login(
    ctx: VoterContext,
    cookies: &CookieJar<'_>,
    credentials: Json<LoginCredentials>,
    users: Coll<User>,
    limiters: &State<Limiters>,
    config: &State<Config>,
) -> Result<()> {
    // Credential guessing shares the auth rate-limit category.
    if let RateLimitDecision::Limited { retry_after } =
        limiters.auth.check(&ctx.identity.rate_key("auth"))
    {
        return Err(Error::Status(
            Status::TooManyRequests,
            format!("Too many login attempts, retry in {}s", retry_after),
        ));
    }

    let with_username = doc! {
        "username": &credentials.username,
    };
    let user = users
        .find_one(with_username, None)
        .await?
        .filter(|user| user.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Status(
                Status::Unauthorized,
                "No user found with the provided username and password combination.".to_string(),
            )
        })?;

    let token = AuthToken::new(&user);
    cookies.add(token.into_cookie(config));

    Ok(())
}

#[delete("/auth")]
fn logout(cookies: &CookieJar) -> Status {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
    Status::Ok
}

#[derive(Debug, Serialize, Deserialize)]
struct CsrfTokenResponse {
    token: String,
}

/// Issue the cookie half of the double-submit forgery-token pair, and return
/// the same value for the client to echo in the `X-CSRF-Token` header.
#[get("/csrf")]
fn issue_csrf(cookies: &CookieJar) -> Json<CsrfTokenResponse> {
    let token = new_csrf_token();
    cookies.add(csrf_cookie(token.clone()));
    Json(CsrfTokenResponse { token })
}
