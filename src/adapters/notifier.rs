//! Completion-email adapter for a Mailgun-style messages API.
//!
//! Sends one message per completed job. Delivery failures surface to the
//! caller as errors; the orchestrator records them on the job and moves on.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::PipelineError;

use super::Notifier;

/// Mailgun-style email client
pub struct MailgunNotifier {
    api_base: String,
    domain: String,
    api_key: String,
    from: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    message: Option<String>,
}

impl MailgunNotifier {
    pub fn new(
        api_base: impl Into<String>,
        domain: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            domain: domain.into(),
            api_key: api_key.into(),
            from: from.into(),
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/v3/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.domain
        )
    }

    fn compose(job_id: Uuid, report_key: &str) -> (String, String) {
        let subject = format!("Your pitch deck evaluation is ready (job {})", job_id);
        let body = format!(
            "Your pitch deck evaluation is complete.\n\n\
             Job: {}\nReport: {}\n\n\
             Fetch the report with: deckard report {}\n",
            job_id, report_key, job_id
        );
        (subject, body)
    }
}

#[async_trait]
impl Notifier for MailgunNotifier {
    async fn send_completion(
        &self,
        recipient: &str,
        job_id: Uuid,
        report_key: &str,
    ) -> Result<(), PipelineError> {
        let (subject, body) = Self::compose(job_id, report_key);

        let form = reqwest::multipart::Form::new()
            .text("from", self.from.clone())
            .text("to", recipient.to_string())
            .text("subject", subject)
            .text("text", body);

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::TransientService(format!("email send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail: MessagesResponse = response.json().await.unwrap_or(MessagesResponse {
                message: None,
            });
            return Err(PipelineError::TransientService(format!(
                "email API returned {}: {}",
                status,
                detail.message.unwrap_or_default()
            )));
        }

        info!(%job_id, recipient, "Completion email sent");
        Ok(())
    }
}
