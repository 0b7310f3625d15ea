//! Compliance & audit API.
//!
//! Read access to the append-only audit ledger (filterable, paginated,
//! exportable), typed write endpoints for consent / data-access / incident
//! records, the suspicious-pattern scan, the per-subject GDPR report, and
//! the retention cleanup trigger. There is deliberately no endpoint that
//! mutates or deletes an individual event.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use citabot_core::audit::{
    build_gdpr_report, consent_event, data_access_event, detect_suspicious_patterns,
    security_incident_event, AuditEvent, AuditQuery, AuditSeverity, SuspicionThresholds,
};
use citabot_core::config::RetentionConfig;
use citabot_db::repositories::{AuditLogRepository, SqlAuditLogRepository};
use citabot_db::{DbPool, RetentionSweeper};

#[derive(Clone)]
pub struct ComplianceState {
    repo: Arc<SqlAuditLogRepository>,
    sweeper: Arc<RetentionSweeper>,
    thresholds: SuspicionThresholds,
    audit_floor_days: i64,
}

pub fn router(pool: DbPool, sweeper: Arc<RetentionSweeper>, retention: &RetentionConfig) -> Router {
    let state = ComplianceState {
        repo: Arc::new(SqlAuditLogRepository::new(pool)),
        sweeper,
        thresholds: retention.suspicion_thresholds(),
        audit_floor_days: i64::from(retention.audit_floor_days),
    };

    Router::new()
        .route("/audit/events", get(query_events))
        .route("/audit/export", get(export_events))
        .route("/audit/gdpr-report", get(gdpr_report))
        .route("/audit/suspicious-activity", get(suspicious_activity))
        .route("/audit/consent", post(record_consent))
        .route("/audit/data-access", post(record_data_access))
        .route("/audit/security-incident", post(record_security_incident))
        .route("/audit/cleanup", delete(run_cleanup))
        .with_state(state)
}

/// Query parameters for `/audit/events` and `/audit/export`, in the wire
/// casing the original integrations use.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditQueryParams {
    event_type: Option<String>,
    severity: Option<String>,
    user_id: Option<String>,
    data_subject: Option<String>,
    ip_address: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl AuditQueryParams {
    fn into_query(self) -> Result<AuditQuery, String> {
        let severity = match self.severity.as_deref() {
            None => None,
            Some(raw) => Some(
                AuditSeverity::parse(raw)
                    .ok_or_else(|| format!("unknown severity `{raw}`"))?,
            ),
        };

        Ok(AuditQuery {
            event_type: self.event_type,
            category: None,
            severity,
            subject: self.data_subject,
            actor: self.user_id,
            ip_address: self.ip_address,
            start: self.start_date,
            end: self.end_date,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error(context: &str, error: impl std::fmt::Display) -> Response {
    error!(event_name = "compliance.request_failed", context, error = %error, "audit API failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal audit storage failure" })),
    )
        .into_response()
}

/// Windows reaching past the audit retention floor cannot be served; data
/// that old no longer exists and must not be implied to.
fn check_window_within_floor(
    start: Option<DateTime<Utc>>,
    audit_floor_days: i64,
) -> Result<(), Response> {
    if let Some(start) = start {
        let floor = Utc::now() - Duration::days(audit_floor_days);
        if start < floor {
            return Err(bad_request(format!(
                "retention policy violation: window start predates the {audit_floor_days}-day audit retention floor"
            )));
        }
    }
    Ok(())
}

async fn query_events(
    State(state): State<ComplianceState>,
    Query(params): Query<AuditQueryParams>,
) -> Response {
    let query = match params.into_query() {
        Ok(query) => query,
        Err(message) => return bad_request(message),
    };
    if let Err(response) = check_window_within_floor(query.start, state.audit_floor_days) {
        return response;
    }

    match state.repo.query(&query).await {
        Ok(page) => (
            StatusCode::OK,
            Json(json!({
                "total": page.total,
                "limit": query.effective_limit(),
                "offset": query.effective_offset(),
                "events": page.events,
            })),
        )
            .into_response(),
        Err(error) => internal_error("query_events", error),
    }
}

async fn export_events(
    State(state): State<ComplianceState>,
    Query(params): Query<ExportParams>,
) -> Response {
    let (format, filters) = params.into_parts();
    let query = match filters.into_query() {
        Ok(query) => query,
        Err(message) => return bad_request(message),
    };
    if let Err(response) = check_window_within_floor(query.start, state.audit_floor_days) {
        return response;
    }

    let page = match state.repo.query(&query).await {
        Ok(page) => page,
        Err(error) => return internal_error("export_events", error),
    };

    match format.as_str() {
        "json" => (StatusCode::OK, Json(json!({ "events": page.events }))).into_response(),
        "csv" => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            render_csv(&page.events),
        )
            .into_response(),
        "txt" => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_txt(&page.events),
        )
            .into_response(),
        other => bad_request(format!("unsupported export format `{other}` (json|csv|txt)")),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportParams {
    format: Option<String>,
    event_type: Option<String>,
    severity: Option<String>,
    user_id: Option<String>,
    data_subject: Option<String>,
    ip_address: Option<String>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl ExportParams {
    fn into_parts(self) -> (String, AuditQueryParams) {
        let format = self.format.unwrap_or_else(|| "json".to_string());
        let filters = AuditQueryParams {
            event_type: self.event_type,
            severity: self.severity,
            user_id: self.user_id,
            data_subject: self.data_subject,
            ip_address: self.ip_address,
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.limit,
            offset: self.offset,
        };
        (format, filters)
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv(events: &[AuditEvent]) -> String {
    let mut output = String::from(
        "event_id,event_type,category,severity,subject,actor,ip_address,timestamp,details\n",
    );
    for event in events {
        let details = serde_json::to_string(&event.details).unwrap_or_else(|_| "{}".to_string());
        let row = [
            event.event_id.as_str(),
            event.event_type.as_str(),
            event.category.as_str(),
            event.severity.as_str(),
            event.subject.as_deref().unwrap_or(""),
            event.actor.as_str(),
            event.ip_address.as_deref().unwrap_or(""),
            &event.occurred_at.to_rfc3339(),
            details.as_str(),
        ]
        .map(csv_escape)
        .join(",");
        output.push_str(&row);
        output.push('\n');
    }
    output
}

fn render_txt(events: &[AuditEvent]) -> String {
    events
        .iter()
        .map(|event| {
            format!(
                "{} [{}] {} subject={} actor={}",
                event.occurred_at.to_rfc3339(),
                event.severity.as_str(),
                event.event_type,
                event.subject.as_deref().unwrap_or("-"),
                event.actor,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GdprReportParams {
    data_subject: String,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

async fn gdpr_report(
    State(state): State<ComplianceState>,
    Query(params): Query<GdprReportParams>,
) -> Response {
    // Only an explicitly requested window is checked against the floor; the
    // default window is exactly the retained range.
    if let Err(response) = check_window_within_floor(params.start_date, state.audit_floor_days) {
        return response;
    }
    let end = params.end_date.unwrap_or_else(Utc::now);
    let start =
        params.start_date.unwrap_or_else(|| end - Duration::days(state.audit_floor_days));

    match state.repo.events_for_subject(&params.data_subject, start, end).await {
        Ok(events) => {
            let report = build_gdpr_report(params.data_subject, start, end, &events);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(error) => internal_error("gdpr_report", error),
    }
}

async fn suspicious_activity(State(state): State<ComplianceState>) -> Response {
    let since = Utc::now() - Duration::minutes(state.thresholds.window_minutes * 4);
    match state.repo.events_since(since).await {
        Ok(events) => {
            let findings = detect_suspicious_patterns(&events, &state.thresholds);
            (StatusCode::OK, Json(json!({ "findings": findings }))).into_response()
        }
        Err(error) => internal_error("suspicious_activity", error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentBody {
    data_subject: String,
    consent_type: String,
    granted: bool,
    purpose: String,
    method: String,
    user_id: Option<String>,
}

async fn record_consent(
    State(state): State<ComplianceState>,
    Json(body): Json<ConsentBody>,
) -> Response {
    let actor = body.user_id.unwrap_or_else(|| "compliance-api".to_string());
    let event = consent_event(
        body.data_subject,
        body.consent_type,
        body.granted,
        body.purpose,
        body.method,
        actor,
    );

    match state.repo.append(event.clone()).await {
        Ok(()) => {
            (StatusCode::CREATED, Json(json!({ "eventId": event.event_id }))).into_response()
        }
        Err(error) => internal_error("record_consent", error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataAccessBody {
    data_subject: String,
    resource: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    legal_basis: String,
    user_id: Option<String>,
    ip_address: Option<String>,
}

async fn record_data_access(
    State(state): State<ComplianceState>,
    Json(body): Json<DataAccessBody>,
) -> Response {
    let actor = body.user_id.unwrap_or_else(|| "compliance-api".to_string());
    let event = match data_access_event(
        body.data_subject,
        body.resource,
        &body.purpose,
        &body.legal_basis,
        actor,
    ) {
        Ok(event) => match body.ip_address {
            Some(ip) => event.with_ip(ip),
            None => event,
        },
        // Missing purpose/legal basis is a validation error; nothing is
        // appended.
        Err(error) => return bad_request(error.to_string()),
    };

    match state.repo.append(event.clone()).await {
        Ok(()) => {
            (StatusCode::CREATED, Json(json!({ "eventId": event.event_id }))).into_response()
        }
        Err(error) => internal_error("record_data_access", error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecurityIncidentBody {
    description: String,
    severity: String,
    data_subject: Option<String>,
    user_id: Option<String>,
    ip_address: Option<String>,
}

async fn record_security_incident(
    State(state): State<ComplianceState>,
    Json(body): Json<SecurityIncidentBody>,
) -> Response {
    let Some(severity) = AuditSeverity::parse(&body.severity) else {
        return bad_request(format!("unknown severity `{}`", body.severity));
    };

    let actor = body.user_id.unwrap_or_else(|| "compliance-api".to_string());
    let mut event = security_incident_event(body.description, severity, actor);
    if let Some(subject) = body.data_subject {
        event = event.with_subject(subject);
    }
    if let Some(ip) = body.ip_address {
        event = event.with_ip(ip);
    }

    match state.repo.append(event.clone()).await {
        Ok(()) => {
            (StatusCode::CREATED, Json(json!({ "eventId": event.event_id }))).into_response()
        }
        Err(error) => internal_error("record_security_incident", error),
    }
}

async fn run_cleanup(State(state): State<ComplianceState>) -> Response {
    match state.sweeper.cleanup_old_logs().await {
        Ok(summary) => (StatusCode::OK, Json(json!({ "removed": summary }))).into_response(),
        Err(error) => internal_error("run_cleanup", error),
    }
}
