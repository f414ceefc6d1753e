/// Recipient eligibility: who the current user may message.
/// Product-level gate over the social graph; row-level permissions on the
/// backing store remain the actual security boundary.
use crate::data_service::DataService;
use crate::error::Result;
use crate::messenger_types::Profile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Follower/following totals, recomputed from the edge lists on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCounts {
    pub followers: usize,
    pub following: usize,
}

/// Candidate recipients: the intersection of "users I follow" and "users who
/// follow me", optionally filtered by a case-insensitive username substring,
/// sorted by username.
pub async fn eligible_recipients(
    svc: &dyn DataService,
    self_id: &str,
    filter: Option<&str>,
) -> Result<Vec<Profile>> {
    let following = svc.list_following(self_id).await?;
    let followers: HashSet<String> = svc.list_followers(self_id).await?.into_iter().collect();

    let mut seen = HashSet::new();
    let mutual: Vec<String> = following
        .into_iter()
        .filter(|id| followers.contains(id) && seen.insert(id.clone()))
        .collect();
    if mutual.is_empty() {
        return Ok(Vec::new());
    }

    let mut profiles = svc.fetch_profiles(&mutual).await?;
    if let Some(needle) = filter {
        let needle = needle.to_lowercase();
        profiles.retain(|p| p.username.to_lowercase().contains(&needle));
    }
    profiles.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(profiles)
}

/// Per-profile gate: can `self_id` start a conversation with `other_id`?
pub async fn is_mutual(svc: &dyn DataService, self_id: &str, other_id: &str) -> Result<bool> {
    if self_id == other_id {
        return Ok(false);
    }
    let following = svc.list_following(self_id).await?;
    if !following.iter().any(|id| id == other_id) {
        return Ok(false);
    }
    let followers = svc.list_followers(self_id).await?;
    Ok(followers.iter().any(|id| id == other_id))
}

/// Counters recomputed from the edge lists on every call. There are no
/// stored increment/decrement counters to drift under concurrent
/// follow/unfollow.
pub async fn follow_counts(svc: &dyn DataService, user_id: &str) -> Result<FollowCounts> {
    let followers = svc.list_followers(user_id).await?.len();
    let following = svc.list_following(user_id).await?.len();
    Ok(FollowCounts {
        followers,
        following,
    })
}
