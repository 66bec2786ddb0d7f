mod logging;
mod pipeline;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sitewatch_core::config::{EmailConfig, SmtpConfig};
use sitewatch_core::detect::{MarkerDetector, DEFAULT_MARKER};
use sitewatch_core::redact::RedactionRules;
use sitewatch_fetch::{HttpSource, DEFAULT_MAX_BYTES};
use sitewatch_notify::{Dispatcher, EmailNotifier, LogNotifier, Message, Notifier};
use tracing::{debug, info};

use crate::pipeline::MonitorConfig;

#[derive(Parser, Debug)]
#[command(
    name = "sitewatch",
    version,
    about = "Check a web page once and email operators when it changes"
)]
struct Cli {
    /// URL to monitor
    #[arg(long)]
    url: String,
    /// Snapshot file holding the last redacted download
    /// (default: <tmpdir>/sitewatch-snapshot.html)
    #[arg(long)]
    file: Option<PathBuf>,
    /// SMTP server config file (JSON)
    #[arg(long)]
    smtp: PathBuf,
    /// Change notification email config file (JSON)
    #[arg(long)]
    email: PathBuf,
    /// "Buy Tickets" notification email config file (JSON)
    #[arg(long)]
    tickets: PathBuf,
    /// Hidden field whose value is blanked before comparison (repeatable;
    /// replaces the default __VIEWSTATE and __EVENTVALIDATION)
    #[arg(long = "redact-field", value_name = "NAME")]
    redact_fields: Vec<String>,
    /// `alt` text that signals tickets are on sale
    #[arg(long, default_value = DEFAULT_MARKER)]
    marker: String,
    /// HTTP deadline in seconds
    #[arg(long, default_value_t = 30)]
    fetch_timeout: u64,
    /// Largest accepted response body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    max_bytes: u64,
    /// Update the snapshot but log notifications instead of sending them
    #[arg(long)]
    dry_run: bool,
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_file.as_deref())?;

    // All configuration is validated before any network activity.
    let smtp = SmtpConfig::load(&cli.smtp)?;
    debug!(?smtp, "smtp config");
    let changed = Message::load(EmailConfig::load(&cli.email)?)
        .with_context(|| format!("email config {}", cli.email.display()))?;
    info!(email = ?changed.email, "change email");
    let tickets = Message::load(EmailConfig::load(&cli.tickets)?)
        .with_context(|| format!("tickets config {}", cli.tickets.display()))?;
    info!(tickets = ?tickets.email, "tickets email");

    let rules = if cli.redact_fields.is_empty() {
        RedactionRules::default()
    } else {
        RedactionRules::for_fields(cli.redact_fields.iter().cloned())?
    };
    let config = MonitorConfig {
        url: cli.url,
        snapshot: cli
            .file
            .unwrap_or_else(|| std::env::temp_dir().join("sitewatch-snapshot.html")),
        rules,
        marker: MarkerDetector::new(&cli.marker),
    };
    debug!(?config, "monitor config");

    let source = HttpSource::new(Duration::from_secs(cli.fetch_timeout.max(1)), cli.max_bytes);
    let notifier: Box<dyn Notifier> = if cli.dry_run {
        Box::new(LogNotifier)
    } else {
        Box::new(EmailNotifier::new(Dispatcher::new(smtp), changed, tickets))
    };

    let report = pipeline::run(&config, &source, notifier.as_ref())?;

    let failed: Vec<String> = report
        .failures()
        .map(|(event, e)| format!("{event}: {e}"))
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} notification(s) failed: {}", failed.len(), failed.join("; "));
    }
    if report.changed {
        let sent: usize = report
            .dispatches
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|r| r.delivered.len())
            .sum();
        info!(marker = report.marker, emails = sent, "done");
    }
    Ok(())
}
