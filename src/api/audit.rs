//! Audit trail plumbing shared by the mutating handlers, plus the
//! administrator endpoint that reads the trail back.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use std::{net::SocketAddr, sync::Arc};

use crate::db::{list_audit_logs, log_audit, AuditLogListResponse, AuditLogQuery};
use crate::AppState;

use super::auth::AdminUser;
use super::error::ApiError;

/// Best-effort client IP. Proxy headers win over the socket address since
/// the listener usually sits behind a reverse proxy.
pub fn extract_client_ip(headers: &HeaderMap, conn_info: Option<&SocketAddr>) -> Option<String> {
    // X-Forwarded-For carries a comma-separated hop chain, first entry is the client
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    conn_info.map(|addr| addr.ip().to_string())
}

/// Record an audit entry. A failure here is logged and swallowed so the
/// request that triggered it still succeeds.
pub async fn audit_log(
    state: &AppState,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    resource_name: Option<&str>,
    user_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) {
    if let Err(e) = log_audit(
        &state.db,
        action,
        resource_type,
        resource_id,
        resource_name,
        user_id,
        ip_address,
        details,
    )
    .await
    {
        tracing::warn!(action, resource_type, error = %e, "Failed to write audit log entry");
    }
}

/// Page through the audit trail, newest first. Filters (action,
/// resource_type, resource_id, user_id, start_date, end_date) and
/// pagination come in as query parameters.
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    let result = list_audit_logs(&state.db, &query).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());

        assert_eq!(
            extract_client_ip(&headers, None),
            Some("203.0.113.9".to_string())
        );
    }

    #[test]
    fn test_extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());

        assert_eq!(
            extract_client_ip(&headers, None),
            Some("10.0.0.2".to_string())
        );
    }

    #[test]
    fn test_extract_client_ip_uses_conn_info() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.168.1.5:54321".parse().unwrap();

        assert_eq!(
            extract_client_ip(&headers, Some(&addr)),
            Some("192.168.1.5".to_string())
        );
        assert_eq!(extract_client_ip(&headers, None), None);
    }
}
