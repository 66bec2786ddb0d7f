pub mod smtp;
pub mod template;

use sitewatch_core::config::{EmailConfig, SmtpConfig};
use sitewatch_core::{Error, NotificationEvent, Result, SmtpStage};
use tracing::{debug, info, warn};

pub use smtp::{Connector, LettreConnector, LettreSession, MailSession};
pub use template::{BodyTemplate, TemplateFields};

// ── Message ──

/// Email settings for one event with its body template already parsed.
#[derive(Debug, Clone)]
pub struct Message {
    pub email: EmailConfig,
    pub template: BodyTemplate,
}

impl Message {
    /// Parse the configured template files. Fails before any network use.
    pub fn load(email: EmailConfig) -> Result<Self> {
        let template = BodyTemplate::load(&email.body_tmpl)?;
        Ok(Self { email, template })
    }
}

// ── Dispatch ──

/// Recipients that received one event's message, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event: NotificationEvent,
    pub delivered: Vec<String>,
}

/// Sends one message to every recipient over a single SMTP session.
pub struct Dispatcher<C: Connector = LettreConnector> {
    connector: C,
    smtp: SmtpConfig,
}

impl Dispatcher<LettreConnector> {
    pub fn new(smtp: SmtpConfig) -> Self {
        Self::with_connector(LettreConnector, smtp)
    }
}

impl<C: Connector> Dispatcher<C> {
    pub fn with_connector(connector: C, smtp: SmtpConfig) -> Self {
        Self { connector, smtp }
    }

    /// Recipients are processed in order. The first failure quits the session
    /// and returns `Error::PartialDelivery`; recipients after it are not
    /// attempted and recipients before it have already been sent.
    pub fn dispatch(
        &self,
        event: NotificationEvent,
        message: &Message,
        url: &str,
    ) -> Result<DispatchReport> {
        let mut session = self.connector.open(&self.smtp)?;
        info!(%event, server = %self.smtp.address(), "smtp session open");

        let mut delivered = Vec::with_capacity(message.email.to.len());
        for (index, to) in message.email.to.iter().enumerate() {
            if let Err(e) = send_one(&mut session, message, to, url) {
                if let Err(q) = session.quit() {
                    warn!("quit after failed recipient: {q}");
                }
                let (stage, detail) = match e {
                    Error::Smtp { stage, message: msg } => (stage, msg),
                    Error::Template(msg) => (SmtpStage::Expand, msg),
                    other => (SmtpStage::Data, other.to_string()),
                };
                return Err(Error::PartialDelivery {
                    delivered: delivered.len(),
                    index,
                    recipient: to.clone(),
                    stage,
                    message: detail,
                });
            }
            info!(%event, to = %to, "emailed");
            delivered.push(to.clone());
        }

        // Every message was accepted; a failed QUIT loses nothing.
        if let Err(e) = session.quit() {
            warn!("{e}");
        }
        Ok(DispatchReport { event, delivered })
    }
}

fn send_one<S: MailSession>(
    session: &mut S,
    message: &Message,
    to: &str,
    url: &str,
) -> Result<()> {
    let email = &message.email;
    let body = message.template.render(&TemplateFields {
        to,
        from: &email.from,
        subject: &email.subject,
        url,
    })?;
    debug!(to, bytes = body.len(), "expanded body");
    session.mail_from(&email.from)?;
    session.rcpt_to(to)?;
    session.data(&template::to_crlf(&body))
}

// ── Notifier ──

/// Delivers a notification event. The pipeline only sees this trait.
pub trait Notifier {
    fn notify(&self, event: NotificationEvent, url: &str) -> Result<DispatchReport>;
}

/// Email delivery with one message per event.
pub struct EmailNotifier<C: Connector = LettreConnector> {
    dispatcher: Dispatcher<C>,
    content_changed: Message,
    marker_detected: Message,
}

impl<C: Connector> EmailNotifier<C> {
    pub fn new(
        dispatcher: Dispatcher<C>,
        content_changed: Message,
        marker_detected: Message,
    ) -> Self {
        Self {
            dispatcher,
            content_changed,
            marker_detected,
        }
    }

    fn message(&self, event: NotificationEvent) -> &Message {
        match event {
            NotificationEvent::ContentChanged => &self.content_changed,
            NotificationEvent::MarkerDetected => &self.marker_detected,
        }
    }
}

impl<C: Connector> Notifier for EmailNotifier<C> {
    fn notify(&self, event: NotificationEvent, url: &str) -> Result<DispatchReport> {
        self.dispatcher.dispatch(event, self.message(event), url)
    }
}

/// Logs instead of sending (dry runs).
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: NotificationEvent, url: &str) -> Result<DispatchReport> {
        info!(%event, url, "dry run: notification not sent");
        Ok(DispatchReport {
            event,
            delivered: Vec::new(),
        })
    }
}

// ── Tests ──
