use aws_sdk_sesv2::{
    types::{Body, Content, Destination, EmailContent, Message},
    Client as SesClient,
};
use chrono::Duration;

use crate::error::{Error, Result};
use crate::model::otp::Code;

/// Outgoing email, sent through Amazon SES.
pub struct Mailer {
    client: SesClient,
}

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl Email {
    /// The message carrying a login code.
    pub fn otp(to: &str, code: &Code, ttl: Duration) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your OTP Code".to_string(),
            text: format!(
                "Your OTP code is {code}. It is valid for {} minutes.",
                ttl.num_minutes()
            ),
        }
    }
}

impl Mailer {
    pub fn new(client: SesClient) -> Self {
        Self { client }
    }

    fn content(data: &str) -> Result<Content> {
        Content::builder()
            .data(data)
            .charset("UTF-8")
            .build()
            .map_err(|e| Error::Mail(e.to_string()))
    }

    /// Send an email from `from`.
    #[cfg_attr(test, allow(unused_variables))]
    pub async fn send(&self, from: &str, email: &Email) -> Result<()> {
        let message = Message::builder()
            .subject(Self::content(&email.subject)?)
            .body(Body::builder().text(Self::content(&email.text)?).build())
            .build();
        let content = EmailContent::builder().simple(message).build();
        let destination = Destination::builder().to_addresses(&email.to).build();

        #[cfg(not(test))]
        self.client
            .send_email()
            .from_email_address(from)
            .destination(destination)
            .content(content)
            .send()
            .await
            .map_err(|e| Error::Mail(e.to_string()))?;

        debug!("Sent \"{}\" email", email.subject);
        Ok(())
    }
}
