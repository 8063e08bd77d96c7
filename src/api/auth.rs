use chrono::Utc;
use mongodb::{
    bson::{doc, Bson},
    options::FindOptions,
};
use rocket::{
    futures::TryStreamExt,
    http::{CookieJar, Status},
    serde::json::Json,
    Route, State,
};

use super::common::load_owners;
use crate::{
    config::Config,
    error::{Error, Result},
    mailer::{Email, Mailer},
    model::{
        api::{
            auth::{
                expired_refresh_cookie, issue_access_token, refresh_cookie, Anyone, AuthToken,
                Claims, PresentedRefreshToken, TokenPair,
            },
            nomination::{
                AnnouncementBody, MyNominationView, NominationEnvelope, NominationView,
                PublishedView,
            },
            user::{
                parse_email, AuthResponse, CountQuery, CountResponse, Credential, LoginRequest,
                LogoutRequest, MessageResponse, OtpRequest, RegisterRequest, RegisterResponse,
                UserRecord, UserSummary,
            },
        },
        cipher::FieldCipher,
        common::Role,
        db::{
            nomination::{Announcement, Application, Nomination},
            user::{User, UserCore},
        },
        mongodb::{Coll, Id},
        otp::OtpChallenge,
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        register,
        login,
        request_otp,
        refresh,
        logout,
        user_count,
        my_nominations,
        published,
        get_nomination,
    ]
}

/// Store a freshly issued refresh token on the user and hand it to the
/// client as a cookie.
async fn remember_refresh_token(
    user: &User,
    tokens: &TokenPair,
    users: &Coll<User>,
    cookies: &CookieJar<'_>,
    config: &Config,
) -> Result<()> {
    let update = doc! {
        "$set": { "refresh_token": &tokens.refresh },
        "$unset": { "otp": "" },
    };
    users.update_one(user.id.as_doc(), update, None).await?;
    cookies.add(refresh_cookie(tokens.refresh.clone(), config));
    Ok(())
}

#[post("/api/auth/register", data = "<request>", format = "json")]
pub async fn register(
    request: Json<RegisterRequest>,
    caller: Option<AuthToken<Anyone>>,
    cookies: &CookieJar<'_>,
    users: Coll<User>,
    config: &State<Config>,
    cipher: &State<FieldCipher>,
) -> Result<(Status, Json<RegisterResponse>)> {
    let profile = request.profile()?;
    let password = request.password()?;

    // Only a super admin may hand out staff roles.
    let role = request.role.unwrap_or_default();
    if role.is_staff() && caller.map(|c| c.role) != Some(Role::Super) {
        return Err(Error::Forbidden(
            "Only a super admin can create admin accounts".to_string(),
        ));
    }

    // Check identity uniqueness. The unique indexes catch any race.
    if users
        .find_one(UserCore::by_email(&profile.email), None)
        .await?
        .is_some()
    {
        return Err(Error::Conflict("Email already registered".to_string()));
    }
    if users
        .find_one(UserCore::by_phone(&profile.phone), None)
        .await?
        .is_some()
    {
        return Err(Error::Conflict("Phone already registered".to_string()));
    }

    let user = User {
        id: Id::new(),
        user: UserCore::new(&profile, password, role, None, cipher)?,
    };
    users
        .insert_one(&user, None)
        .await
        .map_err(|e| Error::conflict_on_duplicate(e, "Email or phone already registered"))?;
    info!("Registered {role} {}", user.id);

    let tokens = TokenPair::issue(&user, config)?;
    remember_refresh_token(&user, &tokens, &users, cookies, config).await?;

    Ok((
        Status::Created,
        Json(RegisterResponse {
            user: UserSummary::open(&user, cipher)?,
            access_token: tokens.access,
        }),
    ))
}

#[post("/api/auth/login", data = "<request>", format = "json")]
pub async fn login(
    request: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    users: Coll<User>,
    config: &State<Config>,
    cipher: &State<FieldCipher>,
) -> Result<Json<AuthResponse>> {
    let email = parse_email(&request.email)?;
    let user = users
        .find_one(UserCore::by_email(&email), None)
        .await?
        .ok_or_else(|| Error::Unauthorized("User not found".to_string()))?;

    match request.credential()? {
        Credential::Otp(code) => {
            let accepted = user
                .otp
                .as_ref()
                .map_or(false, |challenge| challenge.accepts(&code, Utc::now()));
            if !accepted {
                return Err(Error::Unauthorized("Invalid or expired OTP".to_string()));
            }
        }
        Credential::Password(password) => {
            if !user.verify_password(password) {
                return Err(Error::Unauthorized("Invalid credentials".to_string()));
            }
        }
    }

    let tokens = TokenPair::issue(&user, config)?;
    remember_refresh_token(&user, &tokens, &users, cookies, config).await?;
    debug!("User {} logged in", user.id);

    Ok(Json(AuthResponse {
        access_token: tokens.access,
        user: UserSummary::open(&user, cipher)?,
    }))
}

#[post("/api/auth/otp", data = "<request>", format = "json")]
pub async fn request_otp(
    request: Json<OtpRequest>,
    users: Coll<User>,
    config: &State<Config>,
    mailer: &State<Mailer>,
) -> Result<Json<MessageResponse>> {
    let email = parse_email(&request.email)?;
    let user = users
        .find_one(UserCore::by_email(&email), None)
        .await?
        .ok_or_else(|| Error::not_found("User"))?;

    let challenge = OtpChallenge::new(config.otp_ttl());
    let message = Email::otp(&email, &challenge.code, config.otp_ttl());
    users
        .update_one(
            user.id.as_doc(),
            doc! { "$set": { "otp": Bson::from(challenge) } },
            None,
        )
        .await?;
    mailer.send(config.mail_from(), &message).await?;

    Ok(Json(MessageResponse::new("OTP sent to your email")))
}

#[get("/api/auth/refresh")]
pub async fn refresh(
    presented: PresentedRefreshToken,
    users: Coll<User>,
    config: &State<Config>,
    cipher: &State<FieldCipher>,
) -> Result<Json<AuthResponse>> {
    let token = presented
        .0
        .ok_or_else(|| Error::Unauthorized("Refresh token missing".to_string()))?;
    let claims = Claims::decode(&token, config.refresh_token_secret())
        .map_err(|_| Error::Forbidden("Invalid or expired refresh token".to_string()))?;

    // Only the most recently issued refresh token is accepted.
    let user = users
        .find_one(claims.id.as_doc(), None)
        .await?
        .filter(|user| user.refresh_token.as_deref() == Some(token.as_str()))
        .ok_or_else(|| Error::Forbidden("Invalid refresh token".to_string()))?;

    Ok(Json(AuthResponse {
        access_token: issue_access_token(&user, config)?,
        user: UserSummary::open(&user, cipher)?,
    }))
}

#[post("/api/auth/logout", data = "<body>")]
pub async fn logout(
    _token: AuthToken<Anyone>,
    presented: PresentedRefreshToken,
    body: Option<Json<LogoutRequest>>,
    cookies: &CookieJar<'_>,
    users: Coll<User>,
    config: &State<Config>,
) -> Result<Status> {
    let token = presented
        .0
        .or_else(|| body.and_then(|b| b.into_inner().refresh_token))
        .filter(|t| !t.trim().is_empty());
    let Some(token) = token else {
        return Ok(Status::NoContent);
    };

    let claims = Claims::decode(&token, config.refresh_token_secret())
        .map_err(|_| Error::Forbidden("Invalid refresh token".to_string()))?;
    users
        .update_one(
            claims.id.as_doc(),
            doc! { "$set": { "refresh_token": Bson::Null } },
            None,
        )
        .await?;
    cookies.remove(expired_refresh_cookie());
    debug!("User {} logged out", claims.id);

    Ok(Status::NoContent)
}

#[get("/api/auth/count?<query..>")]
pub async fn user_count(
    token: AuthToken<Anyone>,
    query: CountQuery,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<CountResponse>> {
    let total_users = users.count_documents(None, None).await?;
    let Some(admin_id) = query.admin_id.filter(|id| !id.trim().is_empty()) else {
        return Ok(Json(CountResponse {
            total_users,
            uploaded_count: None,
            users: None,
        }));
    };

    if !token.is_staff() {
        return Err(Error::Forbidden(
            "Forbidden - Insufficient permissions".to_string(),
        ));
    }
    let admin_id: Id = admin_id
        .trim()
        .parse()
        .map_err(|_| Error::Validation("Invalid admin ID".to_string()))?;

    let uploaded: Vec<User> = users
        .find(doc! { "uploaded_by": admin_id }, None)
        .await?
        .try_collect()
        .await?;
    let records = uploaded
        .iter()
        .map(|user| UserRecord::open(user, cipher))
        .collect::<Result<Vec<_>>>()?;

    Ok(Json(CountResponse {
        total_users,
        uploaded_count: Some(records.len() as u64),
        users: Some(records),
    }))
}

#[get("/api/auth/myNom")]
pub async fn my_nominations(
    token: AuthToken<Anyone>,
    applications: Coll<Application>,
    cipher: &State<FieldCipher>,
) -> Result<Json<Vec<MyNominationView>>> {
    let mut filter = Application::filter();
    filter.insert("user", token.id);
    let newest_first = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let mine: Vec<Application> = applications
        .find(filter, newest_first)
        .await?
        .try_collect()
        .await?;

    let views = mine
        .iter()
        .map(|app| MyNominationView::open(app, cipher))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

#[get("/api/auth/published")]
pub async fn published(
    _token: AuthToken<Anyone>,
    announcements: Coll<Announcement>,
    cipher: &State<FieldCipher>,
) -> Result<Json<Vec<PublishedView>>> {
    let newest_first = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
    let found: Vec<Announcement> = announcements
        .find(Announcement::filter(), newest_first)
        .await?
        .try_collect()
        .await?;

    let views = found
        .iter()
        .map(|announcement| {
            Ok(PublishedView {
                id: announcement.id.into(),
                announcement: AnnouncementBody::open(announcement, cipher)?,
                created_at: announcement.created_at,
                is_election_completed: announcement.is_election_completed,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

/// Fetch one nomination of either kind, with its owner populated.
pub(super) async fn find_nomination(
    id: Id,
    with_votes: bool,
    nominations: &Coll<Nomination>,
    users: &Coll<User>,
    cipher: &FieldCipher,
) -> Result<NominationView> {
    let nomination = nominations
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Nomination"))?;
    let owners = load_owners([nomination.user()], users, cipher).await?;
    NominationView::open(&nomination, &owners, with_votes, cipher)
}

#[get("/api/auth/<id>")]
pub async fn get_nomination(
    token: AuthToken<Anyone>,
    id: Id,
    nominations: Coll<Nomination>,
    users: Coll<User>,
    cipher: &State<FieldCipher>,
) -> Result<Json<NominationEnvelope>> {
    let nomination = find_nomination(id, token.is_staff(), &nominations, &users, cipher).await?;
    Ok(Json(NominationEnvelope { nomination }))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Header, local::asynchronous::Client, serde::json::serde_json::json};

    use super::*;
    use crate::api::testing::{self, json_body, post_json};
    use crate::model::{
        api::{
            auth::{REFRESH_TOKEN_COOKIE, REFRESH_TOKEN_HEADER},
            user::Profile,
        },
        common::Position,
        db::{
            nomination::{AnnouncementCore, ApplicationCore},
            user::examples::EXAMPLE_PASSWORD,
        },
    };

    #[backend_test]
    async fn register_issues_tokens(client: Client, users: Coll<User>) {
        let response = post_json(
            &client,
            uri!(register).to_string(),
            None,
            &json!(RegisterRequest::example()),
        )
        .await;
        let body = json_body(response, Status::Created).await;
        assert_eq!(body["email"], Profile::example().email);
        assert_eq!(body["role"], "employee");
        assert!(body["accessToken"].as_str().is_some());
        assert!(client.cookies().get(REFRESH_TOKEN_COOKIE).is_some());

        // The stored user is sealed and carries the refresh token.
        let stored = users
            .find_one(UserCore::by_email(&Profile::example().email), None)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.email.as_str(), Profile::example().email);
        assert_eq!(
            stored.refresh_token.as_deref(),
            client
                .cookies()
                .get(REFRESH_TOKEN_COOKIE)
                .map(|c| c.value())
        );
    }

    #[backend_test]
    async fn register_rejects_duplicate_identity(client: Client, users: Coll<User>) {
        let request = json!(RegisterRequest::example());
        let response = post_json(&client, uri!(register).to_string(), None, &request).await;
        assert_eq!(Status::Created, response.status());

        // Same email.
        let response = post_json(&client, uri!(register).to_string(), None, &request).await;
        let body = json_body(response, Status::Conflict).await;
        assert_eq!(body["message"], "Email already registered");

        // Same phone, different email.
        let mut other = RegisterRequest::example();
        other.email = Some("someone.else@example.com".to_string());
        let response =
            post_json(&client, uri!(register).to_string(), None, &json!(other)).await;
        assert_eq!(Status::Conflict, response.status());

        assert_eq!(users.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn register_validates_fields(client: Client, users: Coll<User>) {
        let mut missing = RegisterRequest::example();
        missing.address = None;
        let response =
            post_json(&client, uri!(register).to_string(), None, &json!(missing)).await;
        let body = json_body(response, Status::BadRequest).await;
        assert_eq!(body["message"], "All fields are required");

        let mut bad_phone = RegisterRequest::example();
        bad_phone.phone = Some("12345".to_string());
        let response =
            post_json(&client, uri!(register).to_string(), None, &json!(bad_phone)).await;
        assert_eq!(Status::BadRequest, response.status());

        assert_eq!(users.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn only_super_creates_staff(client: Client, users: Coll<User>) {
        let mut request = RegisterRequest::from_profile(&Profile::example(), EXAMPLE_PASSWORD);
        request.role = Some(Role::Admin);

        // Anonymous.
        let response =
            post_json(&client, uri!(register).to_string(), None, &json!(request)).await;
        assert_eq!(Status::Forbidden, response.status());

        // An admin is not enough.
        let admin = testing::admin(&client, &users).await;
        let response =
            post_json(&client, uri!(register).to_string(), Some(&admin), &json!(request)).await;
        assert_eq!(Status::Forbidden, response.status());

        // A super admin may.
        let boss = testing::super_admin(&client, &users).await;
        let response =
            post_json(&client, uri!(register).to_string(), Some(&boss), &json!(request)).await;
        let body = json_body(response, Status::Created).await;
        assert_eq!(body["role"], "admin");
    }

    #[backend_test]
    async fn login_with_password(client: Client, users: Coll<User>) {
        users
            .insert_one(
                User {
                    id: Id::new(),
                    user: UserCore::example(Role::Employee),
                },
                None,
            )
            .await
            .unwrap();

        let good = json!({ "email": Profile::example().email, "password": EXAMPLE_PASSWORD });
        let response = post_json(&client, uri!(login).to_string(), None, &good).await;
        let body = json_body(response, Status::Ok).await;
        assert!(body["accessToken"].as_str().is_some());
        assert_eq!(body["user"]["name"], Profile::example().name);

        let wrong = json!({ "email": Profile::example().email, "password": "not the password" });
        let response = post_json(&client, uri!(login).to_string(), None, &wrong).await;
        assert_eq!(Status::Unauthorized, response.status());

        let unknown = json!({ "email": "nobody@example.com", "password": EXAMPLE_PASSWORD });
        let response = post_json(&client, uri!(login).to_string(), None, &unknown).await;
        assert_eq!(Status::Unauthorized, response.status());

        let neither = json!({ "email": Profile::example().email });
        let response = post_json(&client, uri!(login).to_string(), None, &neither).await;
        assert_eq!(Status::BadRequest, response.status());

        let malformed = json!({ "email": "not-an-email", "password": EXAMPLE_PASSWORD });
        let response = post_json(&client, uri!(login).to_string(), None, &malformed).await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test]
    async fn login_with_otp(client: Client, users: Coll<User>) {
        let login = testing::employee(&client, &users).await;

        let request = json!({ "email": Profile::example().email });
        let response = post_json(&client, uri!(request_otp).to_string(), None, &request).await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body["message"], "OTP sent to your email");

        let stored = users.find_one(login.id.as_doc(), None).await.unwrap().unwrap();
        let challenge = stored.user.otp.unwrap();

        // A wrong code is refused.
        let wrong = if challenge.code.to_string() == "000000" {
            "111111"
        } else {
            "000000"
        };
        let attempt = json!({ "email": Profile::example().email, "otp": wrong });
        let response = post_json(&client, uri!(login).to_string(), None, &attempt).await;
        assert_eq!(Status::Unauthorized, response.status());

        // The right one logs in and is consumed.
        let attempt = json!({ "email": Profile::example().email, "otp": challenge.code });
        let response = post_json(&client, uri!(login).to_string(), None, &attempt).await;
        assert_eq!(Status::Ok, response.status());
        let stored = users.find_one(login.id.as_doc(), None).await.unwrap().unwrap();
        assert!(stored.otp.is_none());

        let response = post_json(&client, uri!(login).to_string(), None, &attempt).await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn otp_for_unknown_user_is_not_found(client: Client) {
        let request = json!({ "email": "ghost@example.com" });
        let response = post_json(&client, uri!(request_otp).to_string(), None, &request).await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn refresh_and_logout(client: Client, users: Coll<User>) {
        let response = post_json(
            &client,
            uri!(register).to_string(),
            None,
            &json!(RegisterRequest::example()),
        )
        .await;
        let body = json_body(response, Status::Created).await;
        let access = body["accessToken"].as_str().unwrap().to_string();

        // The cookie alone is enough to refresh.
        let response = client.get(uri!(refresh)).dispatch().await;
        let body = json_body(response, Status::Ok).await;
        assert!(body["accessToken"].as_str().is_some());

        // The cookie takes precedence over a bogus header.
        let response = client
            .get(uri!(refresh))
            .header(Header::new(REFRESH_TOKEN_HEADER, "not-a-jwt"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        // Log out, which clears the stored token.
        let response = client
            .post(uri!(logout))
            .header(Header::new("Authorization", format!("Bearer {access}")))
            .dispatch()
            .await;
        assert_eq!(Status::NoContent, response.status());
        let stored = users
            .find_one(UserCore::by_email(&Profile::example().email), None)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.refresh_token.is_none());

        // No cookie is left, so refresh now fails.
        let response = client.get(uri!(refresh)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn refresh_rejects_stale_tokens(client: Client, users: Coll<User>) {
        let login = testing::employee(&client, &users).await;
        let config = client.rocket().state::<Config>().unwrap();
        let stale = Claims::new(login.id, Role::Employee, config.refresh_ttl())
            .encode(config.refresh_token_secret())
            .unwrap();

        // Validly signed, but not the one stored on the user.
        let response = client
            .get(uri!(refresh))
            .header(Header::new(REFRESH_TOKEN_HEADER, stale))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());

        let response = client
            .get(uri!(refresh))
            .header(Header::new(REFRESH_TOKEN_HEADER, "garbage"))
            .dispatch()
            .await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test]
    async fn guards_report_json_messages(client: Client, users: Coll<User>) {
        let response = client.get(uri!(published)).dispatch().await;
        let body = json_body(response, Status::Unauthorized).await;
        assert_eq!(body["message"], "Authentication required");

        let response = client
            .get(uri!(published))
            .header(Header::new("Authorization", "Bearer nonsense"))
            .dispatch()
            .await;
        let body = json_body(response, Status::Forbidden).await;
        assert_eq!(body["message"], "Invalid token");

        let config = client.rocket().state::<Config>().unwrap();
        let ghost = Claims::new(Id::new(), Role::Employee, config.access_ttl())
            .encode(config.access_token_secret())
            .unwrap();
        let response = client
            .get(uri!(published))
            .header(Header::new("Authorization", format!("Bearer {ghost}")))
            .dispatch()
            .await;
        let body = json_body(response, Status::Unauthorized).await;
        assert_eq!(body["message"], "User not found");

        let login = testing::employee(&client, &users).await;
        let response = client
            .get(uri!(published))
            .header(login.bearer())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn count_users(client: Client, users: Coll<User>) {
        let admin = testing::admin(&client, &users).await;
        let employee = testing::employee(&client, &users).await;

        // Pretend the admin imported the employee.
        users
            .update_one(
                employee.id.as_doc(),
                doc! { "$set": { "uploaded_by": admin.id } },
                None,
            )
            .await
            .unwrap();

        let response = client
            .get("/api/auth/count")
            .header(employee.bearer())
            .dispatch()
            .await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body["totalUsers"], 2);
        assert!(body.get("users").is_none());

        let uri = format!("/api/auth/count?adminId={}", admin.id);
        let response = client.get(uri.clone()).header(employee.bearer()).dispatch().await;
        assert_eq!(Status::Forbidden, response.status());

        let response = client.get(uri).header(admin.bearer()).dispatch().await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body["uploadedCount"], 1);
        assert_eq!(body["users"][0]["email"], Profile::example().email);
    }

    #[backend_test]
    async fn own_nominations_and_announcements(
        client: Client,
        users: Coll<User>,
        nominations: Coll<Nomination>,
    ) {
        let employee = testing::employee(&client, &users).await;
        let admin = testing::admin(&client, &users).await;

        let app = Application {
            id: Id::new(),
            application: ApplicationCore::example(employee.id, Position::Developer),
        };
        let announcement = Announcement {
            id: Id::new(),
            announcement: AnnouncementCore::example(admin.id, Position::Developer),
        };
        nominations
            .insert_one(Nomination::Application(app.clone()), None)
            .await
            .unwrap();
        nominations
            .insert_one(Nomination::Announcement(announcement.clone()), None)
            .await
            .unwrap();

        let response = client
            .get(uri!(my_nominations))
            .header(employee.bearer())
            .dispatch()
            .await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["position"], "Developer");
        assert_eq!(body[0]["status"]["state"], "pending");

        let response = client
            .get(uri!(published))
            .header(employee.bearer())
            .dispatch()
            .await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["announcement"]["title"], "Developer");

        // Single lookup, with the owner populated.
        let response = client
            .get(format!("/api/auth/{}", app.id))
            .header(employee.bearer())
            .dispatch()
            .await;
        let body = json_body(response, Status::Ok).await;
        assert_eq!(body["nomination"]["kind"], "application");
        assert_eq!(body["nomination"]["user"]["name"], Profile::example().name);

        let response = client
            .get(format!("/api/auth/{}", Id::new()))
            .header(employee.bearer())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }
}
