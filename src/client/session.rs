use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation};

use super::{ClientError, ClientResult};
use crate::model::api::{
    auth::Claims,
    user::{AuthResponse, UserSummary},
};
use crate::scheduled_task::ScheduledTask;

/// Read the expiry of an access token without checking its signature.
/// The client never holds the signing secret.
pub fn token_expiry(token: &str) -> ClientResult<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims.expire_at)
}

#[derive(Debug, Clone)]
struct Active {
    access_token: String,
    user: UserSummary,
    expires_at: DateTime<Utc>,
    generation: u64,
}

/// The logged-in state of one client.
///
/// A session is either active or expired. It becomes active on
/// [`Session::login`], stays active across [`Session::refresh`], and expires
/// either explicitly or when its access token runs out, whichever is first.
#[derive(Default)]
pub struct Session {
    state: Arc<Mutex<Option<Active>>>,
    expiry: Option<ScheduledTask<()>>,
    generation: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session from a login (or refresh) response.
    pub async fn login(&mut self, response: AuthResponse) -> ClientResult<()> {
        let expires_at = token_expiry(&response.access_token)?;
        info!("Logged in as {} until {expires_at}", response.user.email);
        self.activate(response.access_token, response.user, expires_at)
            .await;
        Ok(())
    }

    /// Swap in a new access token for the same user.
    pub async fn refresh(&mut self, access_token: String) -> ClientResult<()> {
        let expires_at = token_expiry(&access_token)?;
        let user = self.user().ok_or(ClientError::LoggedOut)?;
        self.activate(access_token, user, expires_at).await;
        debug!("Session refreshed until {expires_at}");
        Ok(())
    }

    /// End the session now.
    pub async fn expire(&mut self) {
        if let Some(task) = self.expiry.take() {
            task.cancel().await;
        }
        if self.lock().take().is_some() {
            info!("Session expired");
        }
    }

    async fn activate(
        &mut self,
        access_token: String,
        user: UserSummary,
        expires_at: DateTime<Utc>,
    ) {
        if let Some(task) = self.expiry.take() {
            task.cancel().await;
        }
        self.generation += 1;
        let generation = self.generation;
        *self.lock() = Some(Active {
            access_token,
            user,
            expires_at,
            generation,
        });

        let state = Arc::clone(&self.state);
        self.expiry = Some(ScheduledTask::new(
            async move {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                // Only clear the session this task was scheduled for.
                if state.as_ref().map(|a| a.generation) == Some(generation) {
                    *state = None;
                    info!("Access token expired, session ended");
                }
            },
            expires_at,
        ));
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().as_ref().map(|a| a.access_token.clone())
    }

    pub fn user(&self) -> Option<UserSummary> {
        self.lock().as_ref().map(|a| a.user.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().map(|a| a.expires_at)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = &self.expiry {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::tokio::time::sleep;

    use super::*;
    use crate::model::{common::Role, mongodb::Id};

    const SECRET: &[u8] = b"not the client's business";

    fn token(ttl: Duration) -> String {
        Claims::new(Id::new(), Role::Employee, ttl)
            .encode(SECRET)
            .unwrap()
    }

    fn response(token: String) -> AuthResponse {
        AuthResponse {
            access_token: token,
            user: UserSummary {
                id: Id::new().into(),
                name: "Asha Verma".to_string(),
                email: "asha.verma@example.com".to_string(),
                role: Role::Employee,
            },
        }
    }

    #[test]
    fn expiry_is_read_without_the_secret() {
        let before = Utc::now();
        let expiry = token_expiry(&token(Duration::minutes(15))).unwrap();
        assert!(expiry > before + Duration::minutes(14));
        assert!(expiry <= Utc::now() + Duration::minutes(15));

        // Already expired tokens still report their expiry.
        let expiry = token_expiry(&token(Duration::minutes(-5))).unwrap();
        assert!(expiry < Utc::now());

        assert!(matches!(
            token_expiry("not.a.jwt"),
            Err(ClientError::MalformedToken(_))
        ));
    }

    #[rocket::async_test]
    async fn login_refresh_expire() {
        let mut session = Session::new();
        assert!(!session.is_active());
        assert!(matches!(
            session.refresh(token(Duration::minutes(15))).await,
            Err(ClientError::LoggedOut)
        ));

        let first = token(Duration::minutes(15));
        session.login(response(first.clone())).await.unwrap();
        assert!(session.is_active());
        assert_eq!(session.access_token(), Some(first));
        assert_eq!(session.user().unwrap().name, "Asha Verma");

        let second = token(Duration::minutes(30));
        session.refresh(second.clone()).await.unwrap();
        assert_eq!(session.access_token(), Some(second));
        assert_eq!(session.user().unwrap().name, "Asha Verma");
        assert!(session.expires_at().unwrap() > Utc::now() + Duration::minutes(29));

        session.expire().await;
        assert!(!session.is_active());
        assert_eq!(session.access_token(), None);
        assert_eq!(session.user(), None);
    }

    #[rocket::async_test]
    async fn session_ends_when_token_runs_out() {
        let mut session = Session::new();
        session
            .login(response(token(Duration::seconds(-1))))
            .await
            .unwrap();
        sleep(std::time::Duration::from_millis(200)).await;
        assert!(!session.is_active());
    }

    #[rocket::async_test]
    async fn new_login_cancels_old_expiry() {
        let mut session = Session::new();
        session
            .login(response(token(Duration::seconds(1))))
            .await
            .unwrap();
        session
            .login(response(token(Duration::hours(1))))
            .await
            .unwrap();
        sleep(std::time::Duration::from_millis(1500)).await;
        assert!(session.is_active());
    }

    #[rocket::async_test]
    async fn dropping_the_session_stops_its_expiry() {
        let mut session = Session::new();
        session
            .login(response(token(Duration::hours(1))))
            .await
            .unwrap();
        // Held by the session and by its pending expiry task.
        let state = Arc::downgrade(&session.state);
        assert_eq!(state.strong_count(), 2);

        drop(session);
        sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(state.strong_count(), 0);
    }
}
