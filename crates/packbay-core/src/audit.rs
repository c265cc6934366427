//! Append-only audit log of verification events.

use crate::Result;
use packbay_store::{now_millis, EventKind, SecurityEvent, Store, VerificationStats};
use std::sync::Arc;

/// Writer/reader over the `security_events` collection.
///
/// Every completed verification attempt records exactly one event through
/// one of the three `record_*` methods.
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: Arc<Store>,
}

impl AuditLog {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn record_success(&self, name: &str, version: &str, digest: &str) -> Result<()> {
        self.append(SecurityEvent {
            package_name: name.to_string(),
            version: version.to_string(),
            kind: EventKind::Success,
            observed_digest: Some(digest.to_string()),
            expected_digest: Some(digest.to_string()),
            at: now_millis(),
            details: "integrity verified".to_string(),
        })
    }

    pub fn record_threat(
        &self,
        name: &str,
        version: &str,
        observed: &str,
        expected: &str,
    ) -> Result<()> {
        self.append(SecurityEvent {
            package_name: name.to_string(),
            version: version.to_string(),
            kind: EventKind::ThreatDetected,
            observed_digest: Some(observed.to_string()),
            expected_digest: Some(expected.to_string()),
            at: now_millis(),
            details: "digest mismatch, cached file deleted".to_string(),
        })
    }

    pub fn record_failure(&self, name: &str, version: &str, details: &str) -> Result<()> {
        self.append(SecurityEvent {
            package_name: name.to_string(),
            version: version.to_string(),
            kind: EventKind::Failure,
            observed_digest: None,
            expected_digest: None,
            at: now_millis(),
            details: details.to_string(),
        })
    }

    /// The `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        Ok(self.store.recent_events(limit)?)
    }

    pub fn stats(&self) -> Result<VerificationStats> {
        Ok(self.store.verification_stats()?)
    }

    fn append(&self, event: SecurityEvent) -> Result<()> {
        tracing::info!(
            package = %event.package_name,
            version = %event.version,
            kind = event.kind.as_str(),
            "verification event"
        );
        self.store.append_event(&event)?;
        Ok(())
    }
}
