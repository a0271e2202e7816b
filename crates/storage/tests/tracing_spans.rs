//! Integration test verifying that `#[instrument]` annotations produce
//! spans on `MemoryCache` and `MemoryUserDirectory` operations.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tavern_storage::{CacheStore, MemoryCache, MemoryUserDirectory, UserDirectory, UserId};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_cache_increment_creates_span() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let cache = MemoryCache::new();
    cache.increment(b"ratelimit:1").await.expect("increment should succeed");

    assert_span(&spans, "increment");
}

#[tokio::test]
async fn memory_cache_get_and_set_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let cache = MemoryCache::new();
    cache
        .set_with_ttl(b"apikey:abc".to_vec(), b"1".to_vec(), Duration::from_secs(60))
        .await
        .expect("set should succeed");
    let _ = cache.get(b"apikey:abc").await;

    assert_span(&spans, "set_with_ttl");
    assert_span(&spans, "get");
}

#[tokio::test]
async fn memory_cache_expiry_ops_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let cache = MemoryCache::new();
    let _ = cache.expire_if_unset(b"k", Duration::from_secs(1)).await;
    let _ = cache.ttl(b"k").await;
    cache.delete(b"k").await.expect("delete should succeed");

    assert_span(&spans, "expire_if_unset");
    assert_span(&spans, "ttl");
    assert_span(&spans, "delete");
}

#[tokio::test]
async fn memory_directory_lookups_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let directory = MemoryUserDirectory::new();
    let _ = directory.find_by_id(UserId(1)).await;
    let _ = directory.find_by_api_key("key").await;

    assert_span(&spans, "find_by_id");
    assert_span(&spans, "find_by_api_key");
}
