//! Uploader display-name resolution.
//!
//! Names are denormalized across the event row, the participation row and
//! the profile row because row policies forbid a plain join in every case.
//! Sources are tried in priority order and any one of them may be stale or
//! unreadable.

use crate::EventContext;
use api_client::RowStore;
use auth::IdentityProvider;
use std::collections::HashMap;
use std::sync::Arc;

const FALLBACK_PREFIX_LEN: usize = 8;

/// Deterministic label for users no source can name.
pub fn fallback_name(user_id: &str) -> String {
    let prefix: String = user_id.chars().take(FALLBACK_PREFIX_LEN).collect();
    if prefix.is_empty() {
        "Unknown user".to_string()
    } else {
        format!("User {}", prefix)
    }
}

fn non_blank(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn RowStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RowStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    /// Resolve a display name; never returns an empty string.
    pub async fn resolve(&self, user_id: &str, event: &EventContext) -> String {
        if event.is_creator(user_id) {
            if let Some(name) = non_blank(event.creator_display_name.clone()) {
                return name;
            }
        }

        match self.store.participant_display_name(&event.id, user_id).await {
            Ok(name) => {
                if let Some(name) = non_blank(name) {
                    return name;
                }
            }
            Err(e) => tracing::debug!(user_id, error = %e, "Participant name unavailable"),
        }

        match self.store.profile_display_name(user_id).await {
            Ok(name) => {
                if let Some(name) = non_blank(name) {
                    return name;
                }
            }
            Err(e) => tracing::debug!(user_id, error = %e, "Profile name unavailable"),
        }

        match self.store.lookup_display_name(user_id).await {
            Ok(name) => {
                if let Some(name) = non_blank(name) {
                    return name;
                }
            }
            Err(e) => tracing::debug!(user_id, error = %e, "Name lookup failed"),
        }

        if let Some(principal) = self.identity.current_principal() {
            if principal.id == user_id {
                if let Some(local) = principal.email_local_part() {
                    return local.to_string();
                }
            }
        }

        fallback_name(user_id)
    }

    /// Resolve each distinct id once.
    pub async fn resolve_many(
        &self,
        user_ids: &[String],
        event: &EventContext,
    ) -> HashMap<String, String> {
        let mut names = HashMap::new();
        for user_id in user_ids {
            if names.contains_key(user_id) {
                continue;
            }
            let name = self.resolve(user_id, event).await;
            names.insert(user_id.clone(), name);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_name() {
        assert_eq!(fallback_name("0f3a9c1e-77aa"), "User 0f3a9c1e");
        assert_eq!(fallback_name("abc"), "User abc");
        assert_eq!(fallback_name(""), "Unknown user");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" Bo ".into())).as_deref(), Some("Bo"));
        assert_eq!(non_blank(None), None);
    }
}
