//! Helpers shared by the endpoint tests.

use rocket::{
    http::{ContentType, Header, Status},
    local::asynchronous::{Client, LocalResponse},
    serde::json::serde_json::{self, Value},
};

use crate::config::Config;
use crate::model::{
    api::{auth::Claims, user::Profile},
    cipher::FieldCipher,
    common::{Position, Role},
    db::{
        nomination::{Application, ApplicationCore, Nomination},
        user::{User, UserCore},
    },
    mongodb::{Coll, Id},
};

/// A signed-in user: their ID and a valid access token.
pub struct Login {
    pub id: Id,
    pub token: String,
}

impl Login {
    pub fn bearer(&self) -> Header<'static> {
        Header::new("Authorization", format!("Bearer {}", self.token))
    }
}

/// Insert a user directly and mint an access token for them.
pub async fn sign_in(client: &Client, users: &Coll<User>, core: UserCore) -> Login {
    let user = User {
        id: Id::new(),
        user: core,
    };
    users.insert_one(&user, None).await.unwrap();
    let config = client.rocket().state::<Config>().unwrap();
    let token = Claims::new(user.id, user.role, config.access_ttl())
        .encode(config.access_token_secret())
        .unwrap();
    Login { id: user.id, token }
}

pub async fn employee(client: &Client, users: &Coll<User>) -> Login {
    sign_in(client, users, UserCore::example(Role::Employee)).await
}

pub async fn admin(client: &Client, users: &Coll<User>) -> Login {
    sign_in(client, users, UserCore::example2(Role::Admin)).await
}

pub async fn super_admin(client: &Client, users: &Coll<User>) -> Login {
    sign_in(client, users, UserCore::example3(Role::Super)).await
}

/// An employee distinct from every example user, for scenarios needing
/// many voters.
pub async fn numbered_employee(client: &Client, users: &Coll<User>, n: u32) -> Login {
    let profile = Profile {
        name: format!("Voter {n}"),
        email: format!("voter{n}@example.com"),
        phone: format!("3531{n:08}"),
        address: "1 Ballot Box Lane".to_string(),
    };
    let core = UserCore::new(
        &profile,
        "voter-password",
        Role::Employee,
        None,
        &FieldCipher::example(),
    )
    .unwrap();
    sign_in(client, users, core).await
}

/// Insert a verified application straight into the database.
pub async fn verified_application(
    nominations: &Coll<Nomination>,
    owner: Id,
    position: Position,
) -> Id {
    let app = Application {
        id: Id::new(),
        application: ApplicationCore::verified_example(owner, position),
    };
    let id = app.id;
    nominations
        .insert_one(Nomination::Application(app), None)
        .await
        .unwrap();
    id
}

/// POST a JSON body as the given user.
pub async fn post_json<'c>(
    client: &'c Client,
    uri: String,
    login: Option<&Login>,
    body: &Value,
) -> LocalResponse<'c> {
    let mut request = client
        .post(uri)
        .header(ContentType::JSON)
        .body(body.to_string());
    if let Some(login) = login {
        request = request.header(login.bearer());
    }
    request.dispatch().await
}

/// Read a JSON response body, checking its status first.
pub async fn json_body(response: LocalResponse<'_>, expected: Status) -> Value {
    assert_eq!(expected, response.status());
    serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
}
