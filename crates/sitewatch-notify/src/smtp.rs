//! SMTP session: connect, STARTTLS, AUTH PLAIN, then per-recipient
//! transactions over the one connection.

use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use sitewatch_core::config::SmtpConfig;
use sitewatch_core::{Error, Result, SmtpStage};
use tracing::{debug, warn};

/// An authenticated, encrypted session ready for mail transactions.
/// Every error is an `Error::Smtp` naming the failed stage.
pub trait MailSession {
    fn mail_from(&mut self, from: &str) -> Result<()>;
    fn rcpt_to(&mut self, to: &str) -> Result<()>;
    /// Send DATA, the payload, and the terminating dot.
    fn data(&mut self, body: &[u8]) -> Result<()>;
    fn quit(&mut self) -> Result<()>;
}

/// Opens sessions. `open` either returns a session past AUTH or has already
/// quit the connection it made.
pub trait Connector {
    type Session: MailSession;

    fn open(&self, smtp: &SmtpConfig) -> Result<Self::Session>;
}

/// Real relay connection backed by lettre's low-level client.
#[derive(Debug, Default, Clone, Copy)]
pub struct LettreConnector;

pub struct LettreSession {
    conn: SmtpConnection,
}

impl Connector for LettreConnector {
    type Session = LettreSession;

    fn open(&self, smtp: &SmtpConfig) -> Result<LettreSession> {
        let hello = match &smtp.helo_name {
            Some(name) => ClientId::Domain(name.clone()),
            None => ClientId::default(),
        };
        let mut conn = SmtpConnection::connect(
            (smtp.host.as_str(), smtp.port),
            Some(smtp.timeout()),
            &hello,
            None,
            None,
        )
        .map_err(|e| Error::smtp(SmtpStage::Connect, e))?;
        debug!(server = %smtp.address(), "connected");

        // No plaintext fallback: credentials only cross an encrypted channel.
        if !conn.can_starttls() {
            abort(&mut conn);
            return Err(Error::smtp(
                SmtpStage::StartTls,
                "server does not offer STARTTLS",
            ));
        }
        let tls = match TlsParameters::new(smtp.host.clone()) {
            Ok(tls) => tls,
            Err(e) => {
                abort(&mut conn);
                return Err(Error::smtp(SmtpStage::StartTls, e));
            }
        };
        // A failed upgrade leaves no usable stream; lettre has already
        // quit or dropped the socket.
        conn.starttls(&tls, &hello)
            .map_err(|e| Error::smtp(SmtpStage::StartTls, e))?;
        debug!("tls established");

        let credentials = Credentials::new(smtp.username.clone(), smtp.password.clone());
        if let Err(e) = conn.auth(&[Mechanism::Plain], &credentials) {
            abort(&mut conn);
            return Err(Error::smtp(SmtpStage::Authenticate, e));
        }
        debug!(username = %smtp.username, "authenticated");

        Ok(LettreSession { conn })
    }
}

fn abort(conn: &mut SmtpConnection) {
    if let Err(e) = conn.quit() {
        warn!("quit after failed setup: {e}");
    }
}

fn parse_address(stage: SmtpStage, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| Error::smtp(stage, format!("invalid address {raw:?}: {e}")))
}

impl MailSession for LettreSession {
    fn mail_from(&mut self, from: &str) -> Result<()> {
        let addr = parse_address(SmtpStage::MailFrom, from)?;
        self.conn
            .command(Mail::new(Some(addr), vec![]))
            .map_err(|e| Error::smtp(SmtpStage::MailFrom, e))?;
        Ok(())
    }

    fn rcpt_to(&mut self, to: &str) -> Result<()> {
        let addr = parse_address(SmtpStage::RcptTo, to)?;
        self.conn
            .command(Rcpt::new(addr, vec![]))
            .map_err(|e| Error::smtp(SmtpStage::RcptTo, e))?;
        Ok(())
    }

    fn data(&mut self, body: &[u8]) -> Result<()> {
        self.conn
            .command(Data)
            .map_err(|e| Error::smtp(SmtpStage::Data, e))?;
        self.conn
            .message(body)
            .map_err(|e| Error::smtp(SmtpStage::Data, e))?;
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        self.conn
            .quit()
            .map_err(|e| Error::smtp(SmtpStage::Quit, e))?;
        Ok(())
    }
}
