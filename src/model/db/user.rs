use std::ops::{Deref, DerefMut};

use argon2::Config as Argon2Config;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::user::{check_password, Profile},
    cipher::{hash_value, FieldCipher, Sealed},
    common::Role,
    mongodb::{Coll, Id},
    otp::OtpChallenge,
};

/// Core user data, as stored. Personal fields are sealed; email and phone
/// also carry a lookup hash of their normalised plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCore {
    pub name: Sealed,
    pub email: Sealed,
    pub phone: Sealed,
    pub address: Sealed,
    pub email_hash: String,
    pub phone_hash: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<OtpChallenge>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl UserCore {
    /// Seal a validated profile into a storable user.
    pub fn new(
        profile: &Profile,
        password: &str,
        role: Role,
        uploaded_by: Option<Id>,
        cipher: &FieldCipher,
    ) -> Result<Self> {
        Ok(Self {
            name: cipher.seal(&profile.name),
            email: cipher.seal(&profile.email),
            phone: cipher.seal(&profile.phone),
            address: cipher.seal(&profile.address),
            email_hash: hash_value(&profile.email),
            phone_hash: hash_value(&profile.phone),
            password_hash: hash_password(password)?,
            role,
            otp: None,
            refresh_token: None,
            uploaded_by,
            created_at: Utc::now(),
        })
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }

    /// Decrypt the personal fields.
    pub fn open(&self, cipher: &FieldCipher) -> Result<Profile> {
        Ok(Profile {
            name: cipher.open(&self.name)?,
            email: cipher.open(&self.email)?,
            phone: cipher.open(&self.phone)?,
            address: cipher.open(&self.address)?,
        })
    }

    /// Filter on a normalised email address.
    pub fn by_email(email: &str) -> Document {
        doc! { "email_hash": hash_value(email) }
    }

    /// Filter on a normalised phone number.
    pub fn by_phone(phone: &str) -> Document {
        doc! { "phone_hash": hash_value(phone) }
    }
}

/// Credentials for the super admin created on first launch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuperBootstrap {
    pub super_name: Option<String>,
    pub super_email: Option<String>,
    pub super_phone: Option<String>,
    pub super_password: Option<String>,
}

/// Create the configured super admin if there is no super user yet.
/// Returns whether a user was created.
pub async fn ensure_super_exists(
    users: &Coll<User>,
    new_users: &Coll<NewUser>,
    bootstrap: &SuperBootstrap,
    cipher: &FieldCipher,
) -> Result<bool> {
    if users
        .find_one(doc! { "role": Role::Super }, None)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let (Some(email), Some(phone), Some(password)) = (
        bootstrap.super_email.as_deref(),
        bootstrap.super_phone.as_deref(),
        bootstrap.super_password.as_deref(),
    ) else {
        warn!("No super admin exists and none is configured; set `super_email`, `super_phone` and `super_password`");
        return Ok(false);
    };

    let profile = Profile::parse(
        Some(bootstrap.super_name.as_deref().unwrap_or("Super Admin")),
        Some(email),
        Some(phone),
        Some("-"),
    )?;
    check_password(password)?;
    let user = NewUser::new(&profile, password, Role::Super, None, cipher)?;
    new_users
        .insert_one(&user, None)
        .await
        .map_err(|e| Error::conflict_on_duplicate(e, "Super admin email or phone already registered"))?;
    info!("Created super admin account");
    Ok(true)
}

/// Hash a password with argon2 and a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    Ok(argon2::hash_encoded(
        password.as_bytes(),
        &salt,
        &Argon2Config::default(),
    )?)
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}
