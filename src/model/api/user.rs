use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::id::ApiId, cipher::FieldCipher, common::Role, db::user::User, otp::Code,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;

/// Canonical form of an email address: trimmed and lowercased.
pub fn normalise_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Canonical form of a phone number: its digits only.
pub fn normalise_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Loose shape check on an already normalised email address.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"))
        .is_match(email)
}

/// Length check on an already normalised phone number.
pub fn is_valid_phone(phone: &str) -> bool {
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&phone.len())
}

/// Normalise and validate an email, for lookups.
pub fn parse_email(raw: &str) -> Result<String> {
    let email = normalise_email(raw);
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(Error::Validation("Invalid email format".to_string()))
    }
}

pub fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn required(field: Option<&str>) -> Result<&str> {
    field
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::Validation("All fields are required".to_string()))
}

/// A user's personal details in plaintext, normalised and validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
}

impl Profile {
    /// Validate raw input. Every field is required.
    pub fn parse(
        name: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
        address: Option<&str>,
    ) -> Result<Self> {
        let name = required(name)?;
        let email = required(email)?;
        let phone = required(phone)?;
        let address = required(address)?;

        let email = parse_email(email)?;
        let phone = normalise_phone(phone);
        if !is_valid_phone(&phone) {
            return Err(Error::Validation(format!(
                "Phone number must have {MIN_PHONE_DIGITS} to {MAX_PHONE_DIGITS} digits"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            email,
            phone,
            address: address.to_string(),
        })
    }
}

/// Body of `POST /api/auth/register`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

impl RegisterRequest {
    pub fn profile(&self) -> Result<Profile> {
        Profile::parse(
            self.name.as_deref(),
            self.email.as_deref(),
            self.phone.as_deref(),
            self.address.as_deref(),
        )
    }

    /// The password exactly as given. Blank passwords are rejected, but
    /// surrounding whitespace is part of the password.
    pub fn password(&self) -> Result<&str> {
        required(self.password.as_deref())?;
        let password = self.password.as_deref().unwrap_or_default();
        check_password(password)?;
        Ok(password)
    }
}

/// Body of `POST /api/auth/login`. Exactly one of `password` or `otp`
/// is expected; a present OTP wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

/// How a login request proves identity.
#[derive(Debug, PartialEq, Eq)]
pub enum Credential<'a> {
    Otp(Code),
    Password(&'a str),
}

impl LoginRequest {
    pub fn credential(&self) -> Result<Credential<'_>> {
        let otp = self.otp.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let password = self.password.as_deref().filter(|s| !s.is_empty());
        match (otp, password) {
            (Some(otp), _) => otp
                .parse()
                .map(Credential::Otp)
                .map_err(|_| Error::Unauthorized("Invalid or expired OTP".to_string())),
            (None, Some(password)) => Ok(Credential::Password(password)),
            (None, None) => Err(Error::Validation(
                "Please provide OTP or password".to_string(),
            )),
        }
    }
}

/// Body of `POST /api/auth/otp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRequest {
    pub email: String,
}

/// Optional body of `POST /api/auth/logout`, for clients that hold the
/// refresh token themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Query of `GET /api/auth/count`.
#[derive(Debug, Clone, Default, FromForm)]
pub struct CountQuery {
    #[field(name = "adminId")]
    pub admin_id: Option<String>,
}

/// The public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl UserSummary {
    pub fn open(user: &User, cipher: &FieldCipher) -> Result<Self> {
        Ok(Self {
            id: user.id.into(),
            name: cipher.open(&user.name)?,
            email: cipher.open(&user.email)?,
            role: user.role,
        })
    }
}

/// Response to a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(flatten)]
    pub user: UserSummary,
    pub access_token: String,
}

/// Response to a successful login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserSummary,
}

/// A decrypted user record as listed to admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: ApiId,
    #[serde(flatten)]
    pub profile: Profile,
    pub role: Role,
}

impl UserRecord {
    pub fn open(user: &User, cipher: &FieldCipher) -> Result<Self> {
        Ok(Self {
            id: user.id.into(),
            profile: user.open(cipher)?,
            role: user.role,
        })
    }
}

/// Response of `GET /api/auth/count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub total_users: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<UserRecord>>,
}

/// A bare `{ "message": ... }` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
