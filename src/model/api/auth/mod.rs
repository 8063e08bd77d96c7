mod token;

pub use token::{
    expired_refresh_cookie, issue_access_token, refresh_cookie, Anyone, AuthToken, Claims,
    Clearance, GuardFailure, PresentedRefreshToken, Staff, TokenPair, REFRESH_TOKEN_COOKIE,
    REFRESH_TOKEN_HEADER,
};
