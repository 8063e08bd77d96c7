use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

mod code;
pub use code::{Code, ParseError, LENGTH as CODE_LENGTH};

/// An outstanding OTP login challenge, stored on the user it was sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub code: Code,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl OtpChallenge {
    /// A fresh random code, valid for `ttl` from now.
    pub fn new(ttl: Duration) -> Self {
        Self {
            code: Code::random(),
            expires_at: Utc::now() + ttl,
        }
    }

    /// Does the submitted code answer this challenge at time `now`?
    pub fn accepts(&self, submitted: &Code, now: DateTime<Utc>) -> bool {
        self.code == *submitted && now <= self.expires_at
    }
}

impl From<OtpChallenge> for Bson {
    fn from(challenge: OtpChallenge) -> Self {
        to_bson(&challenge).expect("Serialisation is infallible")
    }
}
