use mongodb::bson::{doc, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REJECT_REASON: &str = "Rejected by Admin";

/// Review state of an application.
///
/// An application starts out pending and is moved exactly once, to either
/// verified or rejected. Only verified applications can receive votes or
/// appear in results.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Verified,
    Rejected { reason: String },
}

impl ApplicationStatus {
    /// A rejection, falling back to the default reason for a blank one.
    pub fn rejected(reason: Option<&str>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REJECT_REASON);
        Self::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn reject_reason(&self) -> Option<&str> {
        match self {
            Self::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    /// The bare state name, as stored under `status.state`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// Filter matching applications currently in this state.
    pub fn filter(&self) -> Document {
        doc! { "status.state": self.label() }
    }
}

impl From<ApplicationStatus> for Bson {
    fn from(status: ApplicationStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::{serde_json, serde_json::json};

    use super::*;

    #[test]
    fn rejection_keeps_reason_or_defaults() {
        assert_eq!(
            ApplicationStatus::rejected(Some("Incomplete profile")).reject_reason(),
            Some("Incomplete profile")
        );
        assert_eq!(
            ApplicationStatus::rejected(None).reject_reason(),
            Some(DEFAULT_REJECT_REASON)
        );
        assert_eq!(
            ApplicationStatus::rejected(Some("   ")).reject_reason(),
            Some(DEFAULT_REJECT_REASON)
        );
    }

    #[test]
    fn verified_and_rejected_are_exclusive() {
        let verified = ApplicationStatus::Verified;
        let rejected = ApplicationStatus::rejected(None);
        assert!(verified.is_verified() && verified.reject_reason().is_none());
        assert!(!rejected.is_verified() && rejected.reject_reason().is_some());
        assert_eq!(ApplicationStatus::default(), ApplicationStatus::Pending);
    }

    #[test]
    fn status_is_tagged_by_state() {
        assert_eq!(
            serde_json::to_value(ApplicationStatus::rejected(Some("dup"))).unwrap(),
            json!({ "state": "rejected", "reason": "dup" })
        );
        assert_eq!(
            serde_json::to_value(ApplicationStatus::Verified).unwrap(),
            json!({ "state": "verified" })
        );
        let bson = Bson::from(ApplicationStatus::Pending);
        assert_eq!(
            bson.as_document().unwrap().get_str("state").unwrap(),
            "pending"
        );
        assert_eq!(
            ApplicationStatus::Pending.filter(),
            doc! { "status.state": "pending" }
        );
    }
}
