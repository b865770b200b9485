//! Plan table loaded from a JSON file.
//!
//! ```json
//! [{ "user_id": "0190...", "amount": 2999, "status": "active" }]
//! ```

use std::path::Path;

use serde::Deserialize;

use jobgate_core::UserId;
use jobgate_metering::{StaticSubscriptionSource, Subscription, SubscriptionError, SubscriptionStatus};

#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    user_id: UserId,
    #[serde(default)]
    amount: Option<i64>,
    status: SubscriptionStatus,
}

/// Parse a plan table. Later entries for the same user win.
pub fn parse_subscriptions(json: &str) -> Result<StaticSubscriptionSource, SubscriptionError> {
    let entries: Vec<SubscriptionEntry> = serde_json::from_str(json)
        .map_err(|e| SubscriptionError::Lookup(format!("invalid subscription table: {e}")))?;

    Ok(StaticSubscriptionSource::from_entries(entries.into_iter().map(|e| {
        (
            e.user_id,
            Subscription {
                amount: e.amount,
                status: e.status,
            },
        )
    })))
}

pub fn load_subscriptions(path: &Path) -> Result<StaticSubscriptionSource, SubscriptionError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| SubscriptionError::Lookup(format!("failed to read {}: {e}", path.display())))?;
    parse_subscriptions(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgate_metering::SubscriptionSource;

    #[tokio::test]
    async fn entries_become_snapshots() {
        let paid = UserId::new();
        let lapsed = UserId::new();
        let json = format!(
            r#"[
                {{ "user_id": "{paid}", "amount": 2999, "status": "active" }},
                {{ "user_id": "{lapsed}", "status": "past_due" }}
            ]"#
        );

        let table = parse_subscriptions(&json).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.subscription(paid).await.unwrap(), Some(Subscription::active(2999)));
        assert_eq!(
            table.subscription(lapsed).await.unwrap(),
            Some(Subscription {
                amount: None,
                status: SubscriptionStatus::PastDue
            })
        );
        assert_eq!(table.subscription(UserId::new()).await.unwrap(), None);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let json = format!(r#"[{{ "user_id": "{}", "status": "lapsed" }}]"#, UserId::new());
        assert!(matches!(parse_subscriptions(&json), Err(SubscriptionError::Lookup(_))));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_subscriptions(Path::new("/nonexistent/jobgate/plans.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
