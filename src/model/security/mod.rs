mod csrf;
mod rate_limit;

pub use csrf::{CsrfVerdict, new_csrf_token, csrf_cookie, CSRF_COOKIE, CSRF_HEADER};
pub use rate_limit::{Limiters, RateLimitDecision, RateLimiter, RateQuota, WindowRateLimiter};
