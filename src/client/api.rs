use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{ClientError, ClientResult, Session};
use crate::model::api::{
    nomination::{
        BallotChoice, NominationView, PublishedView, ResultsResponse, VoteReceipt, VoteRequest,
    },
    user::{AuthResponse, LoginRequest, MessageResponse, OtpRequest},
};

const NO_BODY: Option<&()> = None;

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Turn a response into its body, or into the error it carries.
async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// An HTTP client for one user of the election server.
///
/// The refresh token lives in the cookie store; the access token lives in
/// the [`Session`]. A request rejected with 401 triggers one refresh and one
/// retry; if the refresh fails too, the session is expired.
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Session,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: Session::new(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
    ) -> ClientResult<Response> {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = self.session.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Send an authenticated request, refreshing once on 401.
    async fn call<T, B>(&mut self, method: Method, path: &str, body: Option<&B>) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut response = self.send(&method, path, body).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("{method} {path} was unauthorised, refreshing");
            if let Err(e) = self.refresh().await {
                warn!("Refresh failed: {e}");
                self.session.expire().await;
                return Err(e);
            }
            response = self.send(&method, path, body).await?;
        }
        decode(response).await
    }

    /// Exchange the refresh cookie for a new access token.
    pub async fn refresh(&mut self) -> ClientResult<()> {
        let response = self
            .send(&Method::GET, "/api/auth/refresh", NO_BODY)
            .await?;
        let auth: AuthResponse = decode(response).await?;
        if self.session.is_active() {
            self.session.refresh(auth.access_token).await
        } else {
            self.session.login(auth).await
        }
    }

    async fn login(&mut self, request: &LoginRequest) -> ClientResult<()> {
        let response = self
            .send(&Method::POST, "/api/auth/login", Some(request))
            .await?;
        let auth: AuthResponse = decode(response).await?;
        self.session.login(auth).await
    }

    pub async fn login_with_password(&mut self, email: &str, password: &str) -> ClientResult<()> {
        self.login(&LoginRequest {
            email: email.to_string(),
            password: Some(password.to_string()),
            otp: None,
        })
        .await
    }

    pub async fn login_with_otp(&mut self, email: &str, otp: &str) -> ClientResult<()> {
        self.login(&LoginRequest {
            email: email.to_string(),
            password: None,
            otp: Some(otp.to_string()),
        })
        .await
    }

    /// Ask the server to email a login code.
    pub async fn request_otp(&mut self, email: &str) -> ClientResult<String> {
        let request = OtpRequest {
            email: email.to_string(),
        };
        let response = self
            .send(&Method::POST, "/api/auth/otp", Some(&request))
            .await?;
        let body: MessageResponse = decode(response).await?;
        Ok(body.message)
    }

    /// Invalidate the refresh token and end the session.
    pub async fn logout(&mut self) -> ClientResult<()> {
        let response = self
            .send(&Method::POST, "/api/auth/logout", NO_BODY)
            .await?;
        self.session.expire().await;
        if response.status().is_success() {
            Ok(())
        } else {
            decode(response).await
        }
    }

    pub async fn published(&mut self) -> ClientResult<Vec<PublishedView>> {
        self.call(Method::GET, "/api/auth/published", NO_BODY).await
    }

    /// List nominations, optionally filtered by `"nominations"` or
    /// `"announcements"`.
    pub async fn nominations(&mut self, kind: Option<&str>) -> ClientResult<Vec<NominationView>> {
        let path = match kind {
            Some(kind) => format!("/api/nomination/getall?type={kind}"),
            None => "/api/nomination/getall".to_string(),
        };
        self.call(Method::GET, &path, NO_BODY).await
    }

    pub async fn vote(
        &mut self,
        choice: BallotChoice,
        signature: Option<String>,
    ) -> ClientResult<VoteReceipt> {
        let request = VoteRequest {
            nomination_id: choice,
            signature,
            ip: None,
        };
        self.call(Method::POST, "/api/nomination/vote", Some(&request))
            .await
    }

    pub async fn results(&mut self) -> ClientResult<ResultsResponse> {
        self.call(Method::GET, "/api/auth/result", NO_BODY).await
    }
}
