//! Property tests for credential resolution.
//!
//! Each property runs against a fresh in-memory cache and directory; the
//! directory is wrapped in a `CountingDirectory` so cache hits and misses
//! can be told apart.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use proptest::prelude::*;
use tavern_authn::{
    AuthError, AuthResolver, Credentials, Identity,
    testutil::{bearer_token, test_verifier},
};
use tavern_storage::{
    MemoryCache, MemoryUserDirectory, Tier, UserId, UserRecord,
    testutil::{CountingDirectory, seeded_directory},
};

struct World {
    cache: MemoryCache,
    directory: CountingDirectory<MemoryUserDirectory>,
    resolver: AuthResolver,
}

fn world(users: Vec<UserRecord>) -> World {
    let cache = MemoryCache::new();
    let directory = CountingDirectory::new(seeded_directory(users));
    let resolver = AuthResolver::builder()
        .cache(Arc::new(cache.clone()))
        .directory(Arc::new(directory.clone()))
        .verifier(Arc::new(test_verifier()))
        .build();
    World { cache, directory, resolver }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime")
}

fn tier() -> impl Strategy<Value = Tier> {
    prop_oneof![Just(Tier::Free), Just(Tier::Pro), Just(Tier::Enterprise)]
}

prop_compose! {
    fn user(id: i64)(
        tier in tier(),
        roles in proptest::collection::btree_set("[a-z]{1,8}", 0..4),
        is_admin in any::<bool>(),
        key in "[A-Za-z0-9]{16,32}",
    ) -> UserRecord {
        UserRecord::builder()
            .id(UserId(id))
            .email(format!("adventurer{id}@example.com"))
            .subscription_tier(tier)
            .api_key(format!("{key}-{id}"))
            .roles(roles)
            .is_admin(is_admin)
            .build()
    }
}

fn expected(user: &UserRecord) -> Identity {
    Identity::from(user.clone())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A valid token for an existing user resolves to that user's current
    /// record, including changes made after the first resolution.
    #[test]
    fn bearer_resolves_current_record(id in 1i64..10_000, before in user(0), after in user(0)) {
        let before = UserRecord { id: UserId(id), ..before };
        let after = UserRecord { id: UserId(id), email: before.email.clone(), api_key: before.api_key.clone(), ..after };

        runtime().block_on(async {
            let w = world(vec![before.clone()]);
            let creds = Credentials::builder().bearer(bearer_token(id)).build();

            let first = w.resolver.resolve(&creds).await.expect("resolve");
            prop_assert_eq!(first, expected(&before));

            w.directory.inner().update_user(after.clone()).await.expect("update");
            let second = w.resolver.resolve(&creds).await.expect("resolve");
            prop_assert_eq!(second, expected(&after));
            Ok(())
        })?;
    }

    /// Tokens for deleted users are invalid credentials, never
    /// infrastructure failures.
    #[test]
    fn bearer_for_deleted_user_is_invalid(u in user(7)) {
        runtime().block_on(async {
            let w = world(vec![u]);
            w.directory.inner().delete_user(UserId(7)).await.expect("delete");

            let result = w.resolver.resolve(&Credentials::builder().bearer(bearer_token(7)).build()).await;
            prop_assert!(matches!(result, Err(AuthError::InvalidCredential { .. })), "got {:?}", result);
            Ok(())
        })?;
    }

    /// A cache miss populates the mapping; the following hit returns the
    /// same identity without touching the API-key index.
    #[test]
    fn api_key_miss_then_hit_agree(u in user(3)) {
        runtime().block_on(async {
            let key = u.api_key.clone().expect("fixture has a key");
            let w = world(vec![u.clone()]);
            let creds = Credentials::builder().api_key(key).build();

            let miss = w.resolver.resolve(&creds).await.expect("miss");
            prop_assert_eq!(w.directory.by_api_key(), 1);
            prop_assert_eq!(w.cache.len(), 1);

            let hit = w.resolver.resolve(&creds).await.expect("hit");
            prop_assert_eq!(w.directory.by_api_key(), 1);
            prop_assert_eq!(&miss, &hit);
            prop_assert_eq!(hit, expected(&u));
            Ok(())
        })?;
    }

    /// A mapping to a deleted user is purged, and the next attempt goes
    /// back through the API-key index.
    #[test]
    fn stale_mapping_purged_then_miss(u in user(5)) {
        runtime().block_on(async {
            let key = u.api_key.clone().expect("fixture has a key");
            let w = world(vec![u]);
            let creds = Credentials::builder().api_key(key).build();

            w.resolver.resolve(&creds).await.expect("populate");
            w.directory.inner().delete_user(UserId(5)).await.expect("delete");

            let stale = w.resolver.resolve(&creds).await;
            prop_assert!(matches!(stale, Err(AuthError::InvalidCredential { .. })), "got {:?}", stale);
            prop_assert!(w.cache.is_empty());
            let index_lookups = w.directory.by_api_key();

            let again = w.resolver.resolve(&creds).await;
            prop_assert!(matches!(again, Err(AuthError::InvalidCredential { .. })), "got {:?}", again);
            prop_assert_eq!(w.directory.by_api_key(), index_lookups + 1);
            Ok(())
        })?;
    }

    /// Blank credentials behave exactly like absent ones.
    #[test]
    fn whitespace_credentials_are_missing(bearer in "[ \t]{0,4}", api_key in "[ \t]{0,4}") {
        runtime().block_on(async {
            let w = world(Vec::new());
            let creds = Credentials::builder().bearer(bearer).api_key(api_key).build();
            let result = w.resolver.resolve(&creds).await;
            prop_assert!(matches!(result, Err(AuthError::MissingCredential)));
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn rotated_key_stops_resolving_after_revocation() {
    let u = UserRecord::builder().id(UserId(9)).email("rogue@example.com").api_key("old-key").build();
    let w = world(vec![u]);

    let old = Credentials::builder().api_key("old-key").build();
    w.resolver.resolve(&old).await.expect("old key resolves");

    w.directory.inner().rotate_api_key(UserId(9), "new-key").await.expect("rotate");

    // The mapping is still cached until revoked
    assert!(w.resolver.resolve(&old).await.is_ok());

    w.resolver.revoke_api_key("old-key", "user:9").await.expect("revoke");
    assert!(matches!(w.resolver.resolve(&old).await, Err(AuthError::InvalidCredential { .. })));

    let new = Credentials::builder().api_key("new-key").build();
    assert_eq!(w.resolver.resolve(&new).await.expect("new key").id, UserId(9));
}
