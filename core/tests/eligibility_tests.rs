/// Recipient eligibility gate tests
use std::sync::Arc;
use streetlink_core::eligibility::{eligible_recipients, follow_counts, is_mutual};
use streetlink_core::{MemoryDataService, Profile};

async fn service() -> Arc<MemoryDataService> {
    let svc = Arc::new(MemoryDataService::new());
    for (id, name) in [
        ("user-a", "anna"),
        ("user-b", "bruno"),
        ("user-c", "cleo"),
        ("user-d", "dora"),
    ] {
        svc.add_profile(Profile {
            id: id.to_string(),
            username: name.to_string(),
            avatar_url: None,
        })
        .await;
    }
    svc
}

#[tokio::test]
async fn test_only_mutual_follows_are_eligible() {
    let svc = service().await;

    // a <-> b mutual; a -> c one-way; d -> a one-way
    svc.follow("user-a", "user-b").await;
    svc.follow("user-b", "user-a").await;
    svc.follow("user-a", "user-c").await;
    svc.follow("user-d", "user-a").await;

    let recipients = eligible_recipients(svc.as_ref(), "user-a", None)
        .await
        .unwrap();
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].id, "user-b");
}

#[tokio::test]
async fn test_filter_is_case_insensitive_substring() {
    let svc = service().await;
    for other in ["user-b", "user-c", "user-d"] {
        svc.follow("user-a", other).await;
        svc.follow(other, "user-a").await;
    }

    let recipients = eligible_recipients(svc.as_ref(), "user-a", Some("O"))
        .await
        .unwrap();
    let names: Vec<&str> = recipients.iter().map(|p| p.username.as_str()).collect();
    // "brunO", "cleO", "dOra" all match, sorted by username
    assert_eq!(names, vec!["bruno", "cleo", "dora"]);

    let none = eligible_recipients(svc.as_ref(), "user-a", Some("zz"))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_is_mutual_requires_both_directions() {
    let svc = service().await;
    svc.follow("user-a", "user-b").await;

    assert!(!is_mutual(svc.as_ref(), "user-a", "user-b").await.unwrap());

    svc.follow("user-b", "user-a").await;
    assert!(is_mutual(svc.as_ref(), "user-a", "user-b").await.unwrap());
    assert!(is_mutual(svc.as_ref(), "user-b", "user-a").await.unwrap());

    assert!(!is_mutual(svc.as_ref(), "user-a", "user-a").await.unwrap());
}

#[tokio::test]
async fn test_follow_counts_recomputed_from_edges() {
    let svc = service().await;
    svc.follow("user-b", "user-a").await;
    svc.follow("user-c", "user-a").await;
    svc.follow("user-a", "user-d").await;

    let counts = follow_counts(svc.as_ref(), "user-a").await.unwrap();
    assert_eq!(counts.followers, 2);
    assert_eq!(counts.following, 1);

    // Re-following the same user adds no edge and no count
    svc.follow("user-b", "user-a").await;
    let again = follow_counts(svc.as_ref(), "user-a").await.unwrap();
    assert_eq!(again.followers, 2);
}
