use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A directory user normalized into the platform's sync contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub email: String,
    pub name: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Request body of a sync submission.
#[derive(Debug, Serialize)]
pub struct SyncRequest<'a> {
    pub users: &'a [User],
}

/// Per-user failure reported by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSyncError {
    pub email: String,
    pub error: String,
}

/// Result of one submission. Per-user errors do not fail the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOutcome {
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub errors: Vec<UserSyncError>,
}

/// Success body of `POST /api/tenants/{id}/sync/users`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub results: SyncOutcome,
}

/// What the connectivity probe could learn about the tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub tenant_name: Option<String>,
    pub user_count: Option<u64>,
}

/// Summary of one completed sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub outcome: SyncOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_omits_empty_collections() {
        let user = User {
            email: "a@x.com".into(),
            name: "A".into(),
            active: true,
            groups: vec![],
            attributes: BTreeMap::new(),
        };
        let v = serde_json::to_value(&user).unwrap();
        assert_eq!(v, json!({ "email": "a@x.com", "name": "A", "active": true }));
    }

    #[test]
    fn sync_request_wraps_users() {
        let mut attributes = BTreeMap::new();
        attributes.insert("department".to_string(), "R&D".to_string());
        let users = vec![User {
            email: "a@x.com".into(),
            name: "A".into(),
            active: false,
            groups: vec!["Engineers".into()],
            attributes,
        }];
        let v = serde_json::to_value(SyncRequest { users: &users }).unwrap();
        assert_eq!(v["users"][0]["groups"], json!(["Engineers"]));
        assert_eq!(v["users"][0]["attributes"]["department"], "R&D");
        assert_eq!(v["users"][0]["active"], false);
    }

    #[test]
    fn sync_response_tolerates_missing_counters() {
        let resp: SyncResponse =
            serde_json::from_value(json!({ "success": true, "results": {} })).unwrap();
        assert_eq!(resp.results, SyncOutcome::default());
        assert!(resp.message.is_empty());
    }
}
