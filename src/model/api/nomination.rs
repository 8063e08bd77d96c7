use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::id::ApiId,
    cipher::FieldCipher,
    common::{tally::Standing, ApplicationStatus, Position},
    db::{
        nomination::{position_hash, Announcement, Application, Nomination, VoteRecord, WinnerRecord},
        user::User,
    },
    mongodb::Id,
};

/// Parse a position title from a request, reporting a 400 on failure.
pub fn parse_position(raw: &str) -> Result<Position> {
    raw.parse()
        .map_err(|_| Error::Validation("Invalid position title".to_string()))
}

/// Body of `POST /api/nomination/create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNominationRequest {
    pub position: Option<String>,
    pub description: Option<String>,
}

impl CreateNominationRequest {
    pub fn validate(&self) -> Result<(Position, &str)> {
        let (Some(position), Some(description)) = (
            self.position.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            self.description
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        ) else {
            return Err(Error::Validation("All fields are required".to_string()));
        };
        Ok((parse_position(position)?, description))
    }
}

/// Body of `POST /api/nomination/publish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub eligibility: Option<String>,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(Position, &str, Option<&str>)> {
        let (Some(title), Some(message)) = (
            self.title.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            self.message.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        ) else {
            return Err(Error::Validation(
                "Title and message are required".to_string(),
            ));
        };
        let eligibility = self
            .eligibility
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        Ok((parse_position(title)?, message, eligibility))
    }
}

/// Optional body of `PUT /api/nomination/reject/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

/// The nomination being voted for. `"NOTA"` or `0` abstain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BallotChoice {
    Number(i64),
    Text(String),
}

/// A resolved [`BallotChoice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    NoneOfTheAbove,
    Nomination(Id),
}

pub const NOTA: &str = "NOTA";

impl BallotChoice {
    pub fn resolve(&self) -> Result<Choice> {
        match self {
            Self::Number(0) => Ok(Choice::NoneOfTheAbove),
            Self::Text(text) if text.trim() == NOTA => Ok(Choice::NoneOfTheAbove),
            Self::Text(text) => text
                .trim()
                .parse()
                .map(Choice::Nomination)
                .map_err(|_| Error::Validation("Invalid nomination ID".to_string())),
            Self::Number(_) => Err(Error::Validation("Invalid nomination ID".to_string())),
        }
    }
}

/// Body of `POST /api/nomination/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub nomination_id: BallotChoice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The decrypted name and email of a nomination's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerView {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub name: String,
    pub email: String,
}

impl OwnerView {
    pub fn open(user: &User, cipher: &FieldCipher) -> Result<Self> {
        Ok(Self {
            id: user.id.into(),
            name: cipher.open(&user.name)?,
            email: cipher.open(&user.email)?,
        })
    }
}

/// Owners keyed by user ID, for populating views.
pub type Owners = HashMap<Id, OwnerView>;

/// A raw vote entry, shown to staff only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub ip: Option<String>,
    pub signature: Option<String>,
    pub user: ApiId,
    pub voted_at: DateTime<Utc>,
}

impl From<&VoteRecord> for VoteView {
    fn from(vote: &VoteRecord) -> Self {
        Self {
            ip: vote.ip.clone(),
            signature: vote.signature.clone(),
            user: vote.user.into(),
            voted_at: vote.voted_at,
        }
    }
}

/// An application as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub user: Option<OwnerView>,
    pub position: Position,
    pub description: String,
    pub status: ApplicationStatus,
    pub is_verified: bool,
    pub is_rejected: bool,
    pub reject_reason: Option<String>,
    pub vote_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<Vec<VoteView>>,
    pub is_election_completed: bool,
    pub completed_count: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApplicationView {
    /// Decrypt an application. Raw votes are only included when
    /// `with_votes` is set.
    pub fn open(
        app: &Application,
        owners: &Owners,
        with_votes: bool,
        cipher: &FieldCipher,
    ) -> Result<Self> {
        Ok(Self {
            id: app.id.into(),
            user: owners.get(&app.user).cloned(),
            position: app.position(cipher)?,
            description: cipher.open(&app.description)?,
            status: app.status.clone(),
            is_verified: app.status.is_verified(),
            is_rejected: app.status.reject_reason().is_some(),
            reject_reason: app.status.reject_reason().map(str::to_string),
            vote_count: app.unique_votes(),
            votes: with_votes.then(|| app.votes.iter().map(VoteView::from).collect()),
            is_election_completed: app.is_election_completed,
            completed_count: app.completed_count,
            completed_at: app.completed_at,
            created_at: app.created_at,
        })
    }
}

/// The public content of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementBody {
    pub title: Position,
    pub message: String,
    pub eligibility: Option<String>,
}

impl AnnouncementBody {
    pub fn open(announcement: &Announcement, cipher: &FieldCipher) -> Result<Self> {
        let title = cipher.open(&announcement.title)?;
        Ok(Self {
            title: title
                .parse()
                .map_err(|_| Error::Cipher(format!("stored title '{title}' is not a position")))?,
            message: cipher.open(&announcement.message)?,
            eligibility: cipher.open_opt(announcement.eligibility.as_ref())?,
        })
    }
}

/// An announcement as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementView {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub user: Option<OwnerView>,
    pub announcement: AnnouncementBody,
    pub is_election_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl AnnouncementView {
    pub fn open(
        announcement: &Announcement,
        owners: &Owners,
        cipher: &FieldCipher,
    ) -> Result<Self> {
        Ok(Self {
            id: announcement.id.into(),
            user: owners.get(&announcement.user).cloned(),
            announcement: AnnouncementBody::open(announcement, cipher)?,
            is_election_completed: announcement.is_election_completed,
            created_at: announcement.created_at,
        })
    }
}

/// Either kind of nomination, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NominationView {
    Application(ApplicationView),
    Announcement(AnnouncementView),
}

impl NominationView {
    pub fn open(
        nomination: &Nomination,
        owners: &Owners,
        with_votes: bool,
        cipher: &FieldCipher,
    ) -> Result<Self> {
        Ok(match nomination {
            Nomination::Application(app) => {
                Self::Application(ApplicationView::open(app, owners, with_votes, cipher)?)
            }
            Nomination::Announcement(ann) => {
                Self::Announcement(AnnouncementView::open(ann, owners, cipher)?)
            }
        })
    }
}

/// Query of `GET /api/nomination/getall`.
#[derive(Debug, Clone, Default, FromForm)]
pub struct ListQuery {
    #[field(name = "type")]
    pub kind: Option<String>,
}

/// Which nominations `GET /api/nomination/getall` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Applications,
    Announcements,
    Everything,
}

impl ListFilter {
    /// Restrict a nominations filter to the requested kind.
    pub fn filter(self) -> Document {
        match self {
            Self::Applications => Application::filter(),
            Self::Announcements => Announcement::filter(),
            Self::Everything => Document::new(),
        }
    }

    pub fn from_query(kind: Option<&str>) -> Self {
        match kind {
            Some("nominations") => Self::Applications,
            Some("announcements") => Self::Announcements,
            _ => Self::Everything,
        }
    }
}

/// Response of `POST /api/nomination/create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedNomination {
    pub message: String,
    pub nomination: ApplicationView,
    pub applied: bool,
}

/// Response of the single-nomination endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominationEnvelope {
    pub nomination: NominationView,
}

/// Response of the verify and reject endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewedNomination {
    pub message: String,
    pub nomination: ApplicationView,
}

/// Response of `POST /api/nomination/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedAnnouncement {
    pub message: String,
    pub announcement: AnnouncementBody,
    pub is_election_completed: bool,
}

/// One entry of `GET /api/auth/published`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedView {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub announcement: AnnouncementBody,
    pub created_at: DateTime<Utc>,
    pub is_election_completed: bool,
}

/// One entry of `GET /api/auth/myNom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyNominationView {
    #[serde(rename = "_id")]
    pub id: ApiId,
    pub position: Position,
    pub status: ApplicationStatus,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_election_completed: bool,
}

impl MyNominationView {
    pub fn open(app: &Application, cipher: &FieldCipher) -> Result<Self> {
        Ok(Self {
            id: app.id.into(),
            position: app.position(cipher)?,
            status: app.status.clone(),
            reject_reason: app.status.reject_reason().map(str::to_string),
            created_at: app.created_at,
            is_election_completed: app.is_election_completed,
        })
    }
}

/// Response of `POST /api/nomination/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nomination_id: Option<ApiId>,
}

/// A candidate's line in the results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingView {
    pub nomination_id: ApiId,
    pub candidate: Option<OwnerView>,
    pub votes: usize,
    pub raw_votes: usize,
    pub created_at: DateTime<Utc>,
}

/// The best candidate for a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerView {
    pub position: Position,
    pub nomination_id: ApiId,
    pub candidate: Option<OwnerView>,
    pub votes: usize,
}

/// All candidates for one position, best first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionStandings {
    pub position: Position,
    pub candidates: Vec<StandingView>,
}

/// A tally of verified applications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tally {
    pub winners: BTreeMap<String, WinnerView>,
    pub standings: Vec<PositionStandings>,
}

impl Tally {
    /// The winners in the form stored on completed applications.
    pub fn winner_records(&self) -> Vec<WinnerRecord> {
        self.winners
            .values()
            .map(|winner| WinnerRecord {
                position_hash: position_hash(winner.position),
                nomination: winner.nomination_id.into(),
                votes: winner.votes as i64,
            })
            .collect()
    }

    /// Rank already-decrypted standings. Each entry carries its owner and
    /// raw vote count.
    pub fn from_standings(standings: Vec<Standing<(Option<OwnerView>, usize)>>) -> Self {
        let ranked = crate::model::common::tally::rank(standings);
        let mut winners = BTreeMap::new();
        let mut positions = Vec::with_capacity(ranked.len());
        for (position, entries) in ranked {
            let candidates: Vec<StandingView> = entries
                .into_iter()
                .map(|s| StandingView {
                    nomination_id: s.id.into(),
                    candidate: s.candidate.0,
                    votes: s.votes,
                    raw_votes: s.candidate.1,
                    created_at: s.created_at,
                })
                .collect();
            if let Some(best) = candidates.first() {
                winners.insert(
                    position.title().to_string(),
                    WinnerView {
                        position,
                        nomination_id: best.nomination_id,
                        candidate: best.candidate.clone(),
                        votes: best.votes,
                    },
                );
            }
            positions.push(PositionStandings {
                position,
                candidates,
            });
        }
        Self {
            winners,
            standings: positions,
        }
    }
}

/// `status: "thanks"` body of `GET /api/auth/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThanksBody {
    pub message: String,
    pub remaining_ms: i64,
    pub total_duration: i64,
}

/// `status: "results"` body of `GET /api/auth/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsBody {
    #[serde(flatten)]
    pub tally: Tally,
    pub completed_at: DateTime<Utc>,
    pub remaining_ms: i64,
    pub total_duration: i64,
}

/// Response of `GET /api/auth/result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResultsResponse {
    Thanks(ThanksBody),
    Results(ResultsBody),
}

impl ResultsResponse {
    pub fn thanks(remaining: Duration, window: Duration) -> Self {
        Self::Thanks(ThanksBody {
            message: "Thank you for voting".to_string(),
            remaining_ms: remaining.num_milliseconds(),
            total_duration: window.num_milliseconds(),
        })
    }

    pub fn results(tally: Tally, window: Duration) -> Self {
        Self::Results(ResultsBody {
            tally,
            completed_at: Utc::now(),
            remaining_ms: 0,
            total_duration: window.num_milliseconds(),
        })
    }
}


#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rocket::serde::json::{serde_json, serde_json::json};

    use super::*;
    use crate::model::db::nomination::ApplicationCore;

    #[test]
    fn create_request_needs_both_fields_and_a_real_position() {
        let ok = CreateNominationRequest::example(Position::Cfo);
        assert_eq!(ok.validate().unwrap().0, Position::Cfo);

        let missing = CreateNominationRequest {
            description: None,
            ..CreateNominationRequest::example(Position::Cfo)
        };
        assert!(matches!(missing.validate(), Err(Error::Validation(_))));

        let unknown = CreateNominationRequest {
            position: Some("Chief Vibes Officer".into()),
            ..CreateNominationRequest::example(Position::Cfo)
        };
        assert!(matches!(unknown.validate(), Err(Error::Validation(m)) if m == "Invalid position title"));
    }

    #[test]
    fn publish_request_drops_blank_eligibility() {
        let request = PublishRequest {
            eligibility: Some("   ".into()),
            ..PublishRequest::example(Position::Coo)
        };
        let (title, _, eligibility) = request.validate().unwrap();
        assert_eq!(title, Position::Coo);
        assert_eq!(eligibility, None);

        let empty = PublishRequest::default();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn ballot_choices_resolve() {
        let nota: VoteRequest = serde_json::from_value(json!({ "nominationId": "NOTA" })).unwrap();
        assert_eq!(nota.nomination_id.resolve().unwrap(), Choice::NoneOfTheAbove);

        let zero: VoteRequest = serde_json::from_value(json!({ "nominationId": 0 })).unwrap();
        assert_eq!(zero.nomination_id.resolve().unwrap(), Choice::NoneOfTheAbove);

        let id = Id::new();
        let real: VoteRequest =
            serde_json::from_value(json!({ "nominationId": id.to_string(), "ip": "1.2.3.4" }))
                .unwrap();
        assert_eq!(real.nomination_id.resolve().unwrap(), Choice::Nomination(id));
        assert_eq!(real.ip.as_deref(), Some("1.2.3.4"));

        assert!(BallotChoice::Number(7).resolve().is_err());
        assert!(BallotChoice::Text("garbage".into()).resolve().is_err());
    }

    #[test]
    fn list_filter_reads_type_query() {
        assert_eq!(ListFilter::from_query(Some("nominations")), ListFilter::Applications);
        assert_eq!(ListFilter::from_query(Some("announcements")), ListFilter::Announcements);
        assert_eq!(ListFilter::from_query(Some("whatever")), ListFilter::Everything);
        assert_eq!(ListFilter::from_query(None), ListFilter::Everything);
    }

    #[test]
    fn application_view_hides_votes_unless_asked() {
        let cipher = FieldCipher::example();
        let owner = Id::new();
        let mut core = ApplicationCore::verified_example(owner, Position::Developer);
        core.votes = vec![
            VoteRecord::example("10.1.1.1", "a"),
            VoteRecord::example("10.1.1.1", "b"),
        ];
        let app = Application {
            id: Id::new(),
            application: core,
        };

        let public = ApplicationView::open(&app, &Owners::new(), false, &cipher).unwrap();
        assert_eq!(public.vote_count, 1);
        assert!(public.votes.is_none());
        assert!(public.is_verified && !public.is_rejected);
        assert_eq!(public.position, Position::Developer);
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("votes").is_none());
        assert_eq!(json["voteCount"], 1);

        let staff = ApplicationView::open(&app, &Owners::new(), true, &cipher).unwrap();
        assert_eq!(staff.votes.unwrap().len(), 2);
    }

    #[test]
    fn tally_picks_winners_per_position() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let standing = |position, votes, minutes| Standing {
            id: Id::new(),
            position,
            created_at: t0 + Duration::minutes(minutes),
            votes,
            candidate: (None, votes),
        };
        let tally = Tally::from_standings(vec![
            standing(Position::Cto, 1, 0),
            standing(Position::Cto, 4, 5),
            standing(Position::HrManager, 0, 0),
        ]);
        assert_eq!(tally.winners.len(), 2);
        assert_eq!(tally.winners["CTO"].votes, 4);
        assert_eq!(tally.winners["HR Manager"].votes, 0);
        let cto = tally
            .standings
            .iter()
            .find(|s| s.position == Position::Cto)
            .unwrap();
        assert_eq!(cto.candidates.len(), 2);
        assert_eq!(cto.candidates[0].votes, 4);

        let records = tally.winner_records();
        assert_eq!(records.len(), 2);
        let cto_record = records
            .iter()
            .find(|r| r.position_hash == position_hash(Position::Cto))
            .unwrap();
        assert_eq!(cto_record.votes, 4);
        assert_eq!(ApiId::from(cto_record.nomination), cto.candidates[0].nomination_id);
    }

    #[test]
    fn results_response_is_tagged_by_status() {
        let thanks = ResultsResponse::thanks(Duration::hours(2), Duration::hours(24));
        let json = serde_json::to_value(&thanks).unwrap();
        assert_eq!(json["status"], "thanks");
        assert_eq!(json["remainingMs"], 7_200_000);
        assert_eq!(json["totalDuration"], 86_400_000);

        let results = ResultsResponse::results(Tally::from_standings(vec![]), Duration::hours(24));
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["status"], "results");
        assert_eq!(json["remainingMs"], 0);
        assert!(json["winners"].is_object());
        assert!(json["standings"].is_array());
    }
}
