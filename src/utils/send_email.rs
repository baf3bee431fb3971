use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use futures::future::BoxFuture;
use itertools::Itertools;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::json;

use crate::{config::NotifierConfig, error::ReportError};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const BOUNDARY: &str = "warehouse-report-part";
/// RFC 2045 line limit for base64 bodies
const BASE64_LINE: usize = 76;
/// Bytes per RFC 2047 encoded word, keeps each word under 75 chars
const ENCODED_WORD_BYTES: usize = 45;

/// One report email, the html is the composed report page.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub trait Notifier: Send + Sync {
    fn send<'a>(&'a self, email: &'a Email) -> BoxFuture<'a, Result<(), ReportError>>;
}

/// Base64 with CRLF line breaks every 76 characters
fn encode_body(body: &str) -> String {
    let encoded = STANDARD.encode(body.as_bytes());
    encoded
        .as_bytes()
        .chunks(BASE64_LINE)
        .map(String::from_utf8_lossy)
        .join("\r\n")
}

/// ASCII passes through, anything else becomes folded RFC 2047 `B` words
/// split on char boundaries.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let mut words = Vec::new();
    let mut word = String::new();
    for c in value.chars() {
        if word.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(std::mem::take(&mut word));
        }
        word.push(c);
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
        .iter()
        .map(|w| format!("=?UTF-8?B?{}?=", STANDARD.encode(w.as_bytes())))
        .join("\r\n ")
}

/// Send the email and only log a failure, the caller never sees it.
pub async fn notify(notifier: &dyn Notifier, email: &Email) {
    match notifier.send(email).await {
        Ok(()) => info!("Email sent successfully: {}", email.subject),
        Err(e) => error!("Failed to send email {:?}: {}", email.subject, e),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Sends through the Gmail API, authenticating with an OAuth2 refresh token.
pub struct GmailNotifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl GmailNotifier {
    pub fn new(config: NotifierConfig) -> Self {
        GmailNotifier {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Access tokens expire after about an hour, so get a fresh one for every email.
    async fn access_token(&self) -> Result<String, ReportError> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(uri) = &self.config.redirect_uri {
            form.push(("redirect_uri", uri.as_str()));
        }
        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ReportError::Notify(format!("token refresh: {}", e)))?
            .json()
            .await
            .map_err(|e| ReportError::Notify(format!("token response: {}", e)))?;
        Ok(response.access_token)
    }

    /// RFC 822 message with a plain text and an html alternative
    pub fn mime_message(&self, email: &Email) -> String {
        let mut headers = vec![
            format!("From: {}", self.config.from),
            format!("To: {}", self.config.to.join(", ")),
        ];
        if !self.config.cc.is_empty() {
            headers.push(format!("Cc: {}", self.config.cc.join(", ")));
        }
        headers.push(format!("Subject: {}", encode_header(&email.subject)));
        headers.push("MIME-Version: 1.0".to_string());
        headers.push(format!(
            "Content-Type: multipart/alternative; boundary=\"{}\"",
            BOUNDARY
        ));

        format!(
            "{headers}\r\n\r\n\
             --{b}\r\n\
             Content-Type: text/plain; charset=\"UTF-8\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             {text}\r\n\
             --{b}\r\n\
             Content-Type: text/html; charset=\"UTF-8\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n\
             {html}\r\n\
             --{b}--\r\n",
            headers = headers.join("\r\n"),
            b = BOUNDARY,
            text = encode_body(&email.text),
            html = encode_body(&email.html),
        )
    }

    pub async fn send_email(&self, email: &Email) -> Result<(), ReportError> {
        let token = self.access_token().await?;
        let raw = URL_SAFE.encode(self.mime_message(email));
        debug!("Sending {} byte message to {:?}", raw.len(), self.config.to);

        let response = self
            .client
            .post(GMAIL_SEND_URL)
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| ReportError::Notify(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Notify(format!(
                "Gmail returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

impl Notifier for GmailNotifier {
    fn send<'a>(&'a self, email: &'a Email) -> BoxFuture<'a, Result<(), ReportError>> {
        Box::pin(self.send_email(email))
    }
}
