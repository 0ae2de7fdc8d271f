//! Outbound notification (download-link email)

use crate::config::MailSettings;
use crate::error::{Result, SpiderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Subject of the download-link mail
pub const DOWNLOAD_SUBJECT: &str = "web template download link";

/// Template of the download-link mail
pub const DOWNLOAD_TEMPLATE: &str = "email-download.html";

/// Templates compiled into the binary, used when the template directory lacks them
const BUILTIN_TEMPLATES: [(&str, &str); 1] = [(
    DOWNLOAD_TEMPLATE,
    include_str!("../mail_templates/email-download.html"),
)];

/// A templated message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub template: String,
    /// Substituted for `{{key}}` in the template
    pub variables: HashMap<String, String>,
    pub recipient: String,
}

impl Notification {
    /// The mail sent when a template archive is ready
    pub fn download_ready(file_id: &str, recipient: &str) -> Self {
        let mut variables = HashMap::new();
        variables.insert("template_id".to_string(), file_id.to_string());

        Self {
            subject: DOWNLOAD_SUBJECT.to_string(),
            template: DOWNLOAD_TEMPLATE.to_string(),
            variables,
            recipient: recipient.to_string(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification. Callers log failures and move on.
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Replace every `{{key}}` in `template`
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    variables.iter().fold(template.to_string(), |body, (key, value)| {
        body.replace(&format!("{{{{{}}}}}", key), value)
    })
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Sends rendered HTML mail through an HTTP mail relay
pub struct MailNotifier {
    client: Client,
    relay_url: String,
    api_key: Option<String>,
    sender: String,
    template_dir: PathBuf,
}

impl MailNotifier {
    pub fn new(
        relay_url: &str,
        api_key: Option<&str>,
        sender: &str,
        template_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SpiderError::NotifyError(e.to_string()))?;

        Ok(Self {
            client,
            relay_url: relay_url.to_string(),
            api_key: api_key.map(str::to_string),
            sender: sender.to_string(),
            template_dir: template_dir.into(),
        })
    }

    async fn load_template(&self, name: &str) -> Result<String> {
        // Template names are plain file names
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(SpiderError::NotifyError(format!("invalid template name: {}", name)));
        }
        let path = self.template_dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => builtin_template(name)
                .map(|body| {
                    debug!("Template {} not found, using built-in copy", path.display());
                    body.to_string()
                })
                .ok_or_else(|| {
                    SpiderError::NotifyError(format!("template not found: {}", path.display()))
                }),
            Err(e) => Err(SpiderError::NotifyError(format!(
                "cannot read template {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let template = self.load_template(&notification.template).await?;
        let html = render_template(&template, &notification.variables);

        let message = RelayMessage {
            from: &self.sender,
            to: &notification.recipient,
            subject: &notification.subject,
            html: &html,
        };

        let mut request = self.client.post(&self.relay_url).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpiderError::NotifyError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpiderError::NotifyError(format!(
                "mail relay returned HTTP {}",
                status.as_u16()
            )));
        }

        info!("Sent '{}' to {}", notification.subject, notification.recipient);
        Ok(())
    }
}

fn builtin_template(name: &str) -> Option<&'static str> {
    BUILTIN_TEMPLATES
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, body)| *body)
}

/// Optional notifier wrapper
///
/// Logs instead of sending when no relay is configured
pub struct OptionalNotifier {
    inner: Option<MailNotifier>,
}

impl OptionalNotifier {
    /// Build from settings; log-only when `relay_url` is unset
    pub fn from_settings(settings: &MailSettings) -> Result<Self> {
        let inner = match &settings.relay_url {
            Some(url) if !url.trim().is_empty() => Some(MailNotifier::new(
                url,
                settings.api_key.as_deref(),
                &settings.sender,
                settings.template_dir.clone(),
            )?),
            _ => None,
        };
        Ok(Self { inner })
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }
}

#[async_trait]
impl Notifier for OptionalNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match &self.inner {
            Some(mailer) => mailer.notify(notification).await,
            None => {
                debug!(
                    "Mail relay not configured, skipping '{}' to {} ({:?})",
                    notification.subject, notification.recipient, notification.variables
                );
                Ok(())
            }
        }
    }
}

/// Notify and log the failure instead of returning it
pub async fn notify_logged(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification).await {
        warn!("Notification to {} failed: {}", notification.recipient, e);
    }
}
