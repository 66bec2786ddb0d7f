use std::fmt;

/// Reason a run sends email. Each event carries its own recipients and
/// template; the two are independent failure domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationEvent {
    ContentChanged,
    MarkerDetected,
}

impl NotificationEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            NotificationEvent::ContentChanged => "content_changed",
            NotificationEvent::MarkerDetected => "marker_detected",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Stage of an SMTP dispatch, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStage {
    Connect,
    StartTls,
    Authenticate,
    /// Template expansion for one recipient; no SMTP verb has been sent yet.
    Expand,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl SmtpStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmtpStage::Connect => "connect",
            SmtpStage::StartTls => "starttls",
            SmtpStage::Authenticate => "auth",
            SmtpStage::Expand => "expand",
            SmtpStage::MailFrom => "mail-from",
            SmtpStage::RcptTo => "rcpt-to",
            SmtpStage::Data => "data",
            SmtpStage::Quit => "quit",
        }
    }
}

impl fmt::Display for SmtpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
