//! Username to user id lookup through the public users API.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::transport::{HttpRequest, HttpTransport};

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct UsernamesResponse {
    #[serde(default)]
    data: Vec<UserRecord>,
}

/// Resolves `username` to its numeric user id.
///
/// Banned users are included in the lookup.
///
/// # Errors
///
/// - [`SweepError::UserNotFound`] if the API returns no match
/// - [`SweepError::Remote`] / [`SweepError::RateLimited`] on a failing status
/// - [`SweepError::Decode`] if the body is not a users listing
pub async fn lookup_user_id(
    transport: &Arc<dyn HttpTransport>,
    config: &SweepConfig,
    username: &str,
) -> Result<u64, SweepError> {
    let request = HttpRequest::post(config.users_url("v1/usernames/users"))
        .header("content-type", "application/json")
        .json(json!({
            "usernames": [username],
            "excludeBannedUsers": false,
        }));
    let response = transport.send(request).await?.error_for_status()?;
    let listing: UsernamesResponse = serde_json::from_str(&response.body)
        .map_err(|e| SweepError::Decode(format!("username lookup: {e}")))?;

    listing
        .data
        .first()
        .map(|user| user.id)
        .ok_or_else(|| SweepError::UserNotFound(username.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRemote;

    #[tokio::test]
    async fn resolves_known_username() {
        let remote = Arc::new(MemoryRemote::new());
        remote.add_user("CatSloth2011", 4_242);
        let transport: Arc<dyn HttpTransport> = remote;
        let id = lookup_user_id(&transport, &SweepConfig::default(), "catsloth2011")
            .await
            .unwrap();
        assert_eq!(id, 4_242);
    }

    #[tokio::test]
    async fn unknown_username_is_not_found() {
        let transport: Arc<dyn HttpTransport> = Arc::new(MemoryRemote::new());
        let err = lookup_user_id(&transport, &SweepConfig::default(), "nobody")
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::UserNotFound(ref name) if name == "nobody"));
    }
}
