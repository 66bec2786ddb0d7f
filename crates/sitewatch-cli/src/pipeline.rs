//! One monitoring run: lock → load → fetch+redact → persist → detect → notify.

use std::path::PathBuf;

use sitewatch_core::detect::{self, MarkerDetector};
use sitewatch_core::redact::RedactionRules;
use sitewatch_core::{Digest, Error, NotificationEvent, Result};
use sitewatch_fetch::{fetch_redacted, Source};
use sitewatch_notify::{DispatchReport, Notifier};
use sitewatch_store::SnapshotStore;
use tracing::{error, info};

/// Everything a run needs, assembled once in `main`.
#[derive(Debug)]
pub struct MonitorConfig {
    pub url: String,
    pub snapshot: PathBuf,
    pub rules: RedactionRules,
    pub marker: MarkerDetector,
}

#[derive(Debug)]
pub struct RunReport {
    pub previous: Digest,
    pub current: Digest,
    /// Snapshot file did not exist before this run.
    pub created: bool,
    pub changed: bool,
    pub marker: bool,
    pub dispatches: Vec<(NotificationEvent, Result<DispatchReport>)>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = (NotificationEvent, &Error)> {
        self.dispatches
            .iter()
            .filter_map(|(event, result)| result.as_ref().err().map(|e| (*event, e)))
    }
}

/// Execute one run. Storage, fetch, and redaction failures abort the run with
/// the snapshot untouched. Notification failures are collected in the report;
/// a failed ContentChanged dispatch does not prevent MarkerDetected.
pub fn run(
    config: &MonitorConfig,
    source: &dyn Source,
    notifier: &dyn Notifier,
) -> Result<RunReport> {
    let (store, snapshot) = SnapshotStore::open(&config.snapshot)?;
    info!(path = %store.path().display(), digest = %snapshot.digest, "current hash");

    let fetched = fetch_redacted(source, &config.url, &config.rules)?;
    store.replace(&fetched.bytes)?;

    let change = detect::detect(snapshot.digest, &fetched.bytes);
    info!(digest = %change.current, "new hash");

    let mut report = RunReport {
        previous: change.previous,
        current: change.current,
        created: snapshot.created,
        changed: change.changed(),
        marker: false,
        dispatches: Vec::new(),
    };
    if !report.changed {
        info!("unchanged");
        return Ok(report);
    }

    info!(url = %config.url, "the page has changed");
    send(notifier, NotificationEvent::ContentChanged, &config.url, &mut report);

    report.marker = config.marker.has_marker(&fetched.bytes);
    if report.marker {
        info!("found the marker");
        send(notifier, NotificationEvent::MarkerDetected, &config.url, &mut report);
    }
    Ok(report)
}

fn send(notifier: &dyn Notifier, event: NotificationEvent, url: &str, report: &mut RunReport) {
    let result = notifier.notify(event, url);
    if let Err(e) = &result {
        error!(%event, "notification failed: {e}");
    }
    report.dispatches.push((event, result));
}
