//! Audit & compliance event model.
//!
//! Every personal-data access, consent decision, and security incident is an
//! immutable [`AuditEvent`]. Sinks append events and never fail toward the
//! caller; storage-backed sinks degrade to a fallback channel instead. The
//! pattern detector and the GDPR report builder are pure functions over event
//! slices so they can be tested without a store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    DataAccess,
    Consent,
    SecurityIncident,
    Conversation,
    Provider,
    Retention,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataAccess => "data_access",
            Self::Consent => "consent",
            Self::SecurityIncident => "security_incident",
            Self::Conversation => "conversation",
            Self::Provider => "provider",
            Self::Retention => "retention",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "data_access" => Some(Self::DataAccess),
            "consent" => Some(Self::Consent),
            "security_incident" => Some(Self::SecurityIncident),
            "conversation" => Some(Self::Conversation),
            "provider" => Some(Self::Provider),
            "retention" => Some(Self::Retention),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    High,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Subject/actor/correlation carried through an operation so audit records
/// stay joinable across components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub subject: Option<String>,
    pub actor: String,
    pub correlation_id: String,
}

impl AuditContext {
    pub fn new(
        subject: Option<String>,
        actor: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self { subject, actor: actor.into(), correlation_id: correlation_id.into() }
    }
}

/// Immutable compliance record. Once emitted, events are never mutated or
/// individually deleted; only the retention purge removes them in bulk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    /// Data subject the event is about (canonical phone or email), if any.
    pub subject: Option<String>,
    /// User or system component that performed the action.
    pub actor: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: AuditCategory,
        severity: AuditSeverity,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            category,
            severity,
            subject: None,
            actor: actor.into(),
            ip_address: None,
            user_agent: None,
            details: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required compliance field `{field}` is missing")]
    MissingField { field: &'static str },
}

/// Consent grant/withdrawal, as a typed audit event.
pub fn consent_event(
    subject: impl Into<String>,
    consent_type: impl Into<String>,
    granted: bool,
    purpose: impl Into<String>,
    method: impl Into<String>,
    actor: impl Into<String>,
) -> AuditEvent {
    AuditEvent::new("consent_recorded", AuditCategory::Consent, AuditSeverity::Info, actor)
        .with_subject(subject)
        .with_detail("consent_type", consent_type)
        .with_detail("granted", if granted { "true" } else { "false" })
        .with_detail("purpose", purpose)
        .with_detail("method", method)
}

/// Personal-data access. `purpose` and `legal_basis` are mandatory; an empty
/// value is a validation error, never a silent default.
pub fn data_access_event(
    subject: impl Into<String>,
    resource: impl Into<String>,
    purpose: &str,
    legal_basis: &str,
    actor: impl Into<String>,
) -> Result<AuditEvent, ValidationError> {
    if purpose.trim().is_empty() {
        return Err(ValidationError::MissingField { field: "purpose" });
    }
    if legal_basis.trim().is_empty() {
        return Err(ValidationError::MissingField { field: "legal_basis" });
    }

    Ok(AuditEvent::new("data_access", AuditCategory::DataAccess, AuditSeverity::Info, actor)
        .with_subject(subject)
        .with_detail("resource", resource)
        .with_detail("purpose", purpose)
        .with_detail("legal_basis", legal_basis))
}

pub fn security_incident_event(
    description: impl Into<String>,
    severity: AuditSeverity,
    actor: impl Into<String>,
) -> AuditEvent {
    AuditEvent::new("security_incident", AuditCategory::SecurityIncident, severity, actor)
        .with_detail("description", description)
}

/// Append-only event destination. `emit` must be infallible from the
/// caller's point of view and must not block the emitting task on I/O.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Query filters for the audit API. All filters are conjunctive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub category: Option<AuditCategory>,
    pub severity: Option<AuditSeverity>,
    pub subject: Option<String>,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 500;

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// One page of query results plus the unpaginated total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPage {
    pub total: u64,
    pub events: Vec<AuditEvent>,
}

/// Heuristic thresholds for the repeated-failure detector. Configuration,
/// not inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuspicionThresholds {
    pub window_minutes: i64,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl Default for SuspicionThresholds {
    fn default() -> Self {
        Self { window_minutes: 15, medium: 3, high: 5, critical: 10 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousFinding {
    pub severity: FindingSeverity,
    /// `actor:<id>` or `ip:<address>` the cluster is keyed on.
    pub cluster_key: String,
    pub occurrences: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub description: String,
}

/// Scan recent events for repeated warning-or-worse clusters per actor and
/// per source IP inside a sliding window.
pub fn detect_suspicious_patterns(
    events: &[AuditEvent],
    thresholds: &SuspicionThresholds,
) -> Vec<SuspiciousFinding> {
    let mut flagged: Vec<&AuditEvent> = events
        .iter()
        .filter(|event| {
            event.severity >= AuditSeverity::Warning
                || event.category == AuditCategory::SecurityIncident
        })
        .collect();
    flagged.sort_by_key(|event| event.occurred_at);

    let window = Duration::minutes(thresholds.window_minutes);
    let mut findings = Vec::new();
    let mut seen_keys: Vec<String> = Vec::new();

    for event in &flagged {
        let mut keys = vec![format!("actor:{}", event.actor)];
        if let Some(ip) = &event.ip_address {
            keys.push(format!("ip:{ip}"));
        }

        for key in keys {
            if seen_keys.contains(&key) {
                continue;
            }

            let cluster: Vec<DateTime<Utc>> = flagged
                .iter()
                .filter(|candidate| {
                    cluster_keys(candidate).contains(&key)
                        && candidate.occurred_at >= event.occurred_at
                        && candidate.occurred_at <= event.occurred_at + window
                })
                .map(|candidate| candidate.occurred_at)
                .collect();

            let count = cluster.len();
            let severity = if count >= thresholds.critical {
                Some(FindingSeverity::Critical)
            } else if count >= thresholds.high {
                Some(FindingSeverity::High)
            } else if count >= thresholds.medium {
                Some(FindingSeverity::Medium)
            } else {
                None
            };

            if let Some(severity) = severity {
                let window_end =
                    cluster.iter().copied().max().unwrap_or(event.occurred_at);
                findings.push(SuspiciousFinding {
                    severity,
                    occurrences: count,
                    window_start: event.occurred_at,
                    window_end,
                    description: format!(
                        "{count} warning-or-worse events for {key} within {} minutes",
                        thresholds.window_minutes
                    ),
                    cluster_key: key.clone(),
                });
                // One finding per key; later anchors for the same key would
                // report a subset of the same cluster.
                seen_keys.push(key);
            }
        }
    }

    findings
}

fn cluster_keys(event: &AuditEvent) -> Vec<String> {
    let mut keys = vec![format!("actor:{}", event.actor)];
    if let Some(ip) = &event.ip_address {
        keys.push(format!("ip:{ip}"));
    }
    keys
}

/// Everything the ledger holds about one data subject in a window, shaped
/// for export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdprReport {
    pub subject: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub access_log: Vec<AuditEvent>,
    pub consent_history: Vec<AuditEvent>,
    pub incidents: Vec<AuditEvent>,
    pub generated_at: DateTime<Utc>,
}

/// Aggregate pre-queried subject events into a report. The caller supplies
/// events already filtered to the subject and window.
pub fn build_gdpr_report(
    subject: impl Into<String>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    events: &[AuditEvent],
) -> GdprReport {
    let mut access_log = Vec::new();
    let mut consent_history = Vec::new();
    let mut incidents = Vec::new();

    for event in events {
        match event.category {
            AuditCategory::Consent => consent_history.push(event.clone()),
            AuditCategory::SecurityIncident => incidents.push(event.clone()),
            _ => access_log.push(event.clone()),
        }
    }

    GdprReport {
        subject: subject.into(),
        window_start,
        window_end,
        access_log,
        consent_history,
        incidents,
        generated_at: Utc::now(),
    }
}
