use std::marker::PhantomData;

use chrono::{serde::ts_seconds, DateTime, Duration, Utc};
use jsonwebtoken::{
    errors::ErrorKind as JwtErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use mongodb::Database;
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    Request,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::id::ApiId,
    common::Role,
    db::user::User,
    mongodb::{Coll, Id},
};

pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";
pub const REFRESH_TOKEN_HEADER: &str = "X-Refresh-Token";
pub const REFRESH_TOKEN_QUERY: &str = "refreshToken";

/// JWT claims shared by access and refresh tokens. They differ only in the
/// secret they are signed with and their lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: ApiId,
    pub role: Role,
    #[serde(rename = "exp", with = "ts_seconds")]
    pub expire_at: DateTime<Utc>,
}

impl Claims {
    pub fn new(id: Id, role: Role, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            role,
            expire_at: Utc::now() + ttl,
        }
    }

    /// Sign these claims into a compact token.
    pub fn encode(&self, secret: &[u8]) -> Result<String> {
        Ok(jsonwebtoken::encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret),
        )?)
    }

    /// Verify a token's signature and expiry, then extract its claims.
    pub fn decode(token: &str, secret: &[u8]) -> Result<Self> {
        let data = jsonwebtoken::decode::<Self>(
            token,
            &DecodingKey::from_secret(secret),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

/// A freshly issued access and refresh token for one user.
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn issue(user: &User, config: &Config) -> Result<Self> {
        let access = Claims::new(user.id, user.role, config.access_ttl())
            .encode(config.access_token_secret())?;
        let refresh = Claims::new(user.id, user.role, config.refresh_ttl())
            .encode(config.refresh_token_secret())?;
        Ok(Self { access, refresh })
    }
}

/// Issue only a new access token, as on refresh.
pub fn issue_access_token(user: &User, config: &Config) -> Result<String> {
    Claims::new(user.id, user.role, config.access_ttl()).encode(config.access_token_secret())
}

/// The httpOnly cookie carrying a refresh token.
pub fn refresh_cookie(token: String, config: &Config) -> Cookie<'static> {
    Cookie::build((REFRESH_TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies())
        .same_site(SameSite::Strict)
        .max_age(rocket::time::Duration::seconds(
            config.refresh_ttl().num_seconds(),
        ))
        .build()
}

/// A removal cookie matching [`refresh_cookie`].
pub fn expired_refresh_cookie() -> Cookie<'static> {
    Cookie::build(REFRESH_TOKEN_COOKIE).path("/").build()
}

/// Which roles a route admits.
pub trait Clearance: Send + Sync + 'static {
    fn permits(role: Role) -> bool;
}

/// Any signed-in user.
pub struct Anyone;

impl Clearance for Anyone {
    fn permits(_role: Role) -> bool {
        true
    }
}

/// Admins and super admins.
pub struct Staff;

impl Clearance for Staff {
    fn permits(role: Role) -> bool {
        role.is_staff()
    }
}

/// A verified bearer access token whose user exists and whose role is
/// permitted by the clearance `C`.
#[derive(Debug)]
pub struct AuthToken<C> {
    pub id: Id,
    pub role: Role,
    phantom: PhantomData<C>,
}

impl<C> AuthToken<C> {
    fn new(id: Id, role: Role) -> Self {
        Self {
            id,
            role,
            phantom: PhantomData,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

/// The message of the most recent guard failure on this request, for the
/// catchers to report.
#[derive(Debug, Default)]
pub struct GuardFailure(pub Option<String>);

fn reject<T>(req: &Request<'_>, error: Error) -> Outcome<T, Error> {
    let status = error.status();
    let message = match &error {
        Error::Jwt(e) if matches!(e.kind(), JwtErrorKind::ExpiredSignature) => {
            "Token expired".to_string()
        }
        Error::Jwt(_) => "Invalid token".to_string(),
        other if status == Status::InternalServerError => {
            error!("Authentication failed on {}: {other}", req.uri());
            "Server error".to_string()
        }
        other => other.to_string(),
    };
    debug!("Rejected credentials on {} {}: {message}", req.method(), req.uri());
    req.local_cache(|| GuardFailure(Some(message)));
    Outcome::Error((status, error))
}

/// Pull the bearer token out of the `Authorization` header.
fn bearer<'r>(req: &'r Request<'_>) -> Option<&'r str> {
    req.headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[rocket::async_trait]
impl<'r, C> FromRequest<'r> for AuthToken<C>
where
    C: Clearance,
{
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let (Some(config), Some(db)) = (
            req.rocket().state::<Config>(),
            req.rocket().state::<Database>(),
        ) else {
            return reject(
                req,
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "config or database not managed",
                )),
            );
        };

        let Some(token) = bearer(req) else {
            return reject(
                req,
                Error::Unauthorized("Authentication required".to_string()),
            );
        };

        let claims = match Claims::decode(token, config.access_token_secret()) {
            Ok(claims) => claims,
            Err(e) => return reject(req, e),
        };

        if !C::permits(claims.role) {
            return reject(
                req,
                Error::Forbidden("Forbidden - Insufficient permissions".to_string()),
            );
        }

        // The user must still exist.
        let users = Coll::<User>::from_db(db);
        match users.find_one(claims.id.as_doc(), None).await {
            Ok(Some(user)) if C::permits(user.role) => {
                Outcome::Success(Self::new(user.id, user.role))
            }
            Ok(Some(_)) => reject(
                req,
                Error::Forbidden("Forbidden - Insufficient permissions".to_string()),
            ),
            Ok(None) => reject(req, Error::Unauthorized("User not found".to_string())),
            Err(e) => reject(req, e.into()),
        }
    }
}

/// A refresh token presented by the client, from the cookie, the
/// `X-Refresh-Token` header or the `refreshToken` query parameter, in that
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedRefreshToken(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PresentedRefreshToken {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let from_cookie = req
            .cookies()
            .get(REFRESH_TOKEN_COOKIE)
            .map(|c| c.value().to_string());
        let from_header = || {
            req.headers()
                .get_one(REFRESH_TOKEN_HEADER)
                .map(str::to_string)
        };
        let from_query = || {
            req.query_value::<String>(REFRESH_TOKEN_QUERY)
                .and_then(|v| v.ok())
        };
        let token = from_cookie
            .or_else(from_header)
            .or_else(from_query)
            .filter(|t| !t.trim().is_empty());
        Outcome::Success(Self(token))
    }
}
