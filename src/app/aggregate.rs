//! Aggregate maintainer
//!
//! Keeps one `score_stats` document per scoring provider whose `count` and
//! `sum` track the non-absent `scores.<provider>` values across all
//! canonical records. Every change notification is turned into per-provider
//! deltas which are applied as atomic increments in a single batch, so the
//! totals converge regardless of the order notifications arrive in.
//!
//! | before | after | count | sum |
//! |--------|-------|-------|-----|
//! | absent | v     | +1    | +v  |
//! | v      | absent| -1    | -v  |
//! | v1     | v2    | 0     | v2-v1 |
//!
//! Each batch also creates a marker keyed by the event id, so a redelivered
//! notification fails its batch instead of counting twice.
//!
//! A missing document, a missing or non-object `scores` field, `null`,
//! non-numeric and non-finite values all count as absent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::keys;
use crate::app::models::{AggregateStatRecord, Fields};
use crate::app::store::{
    ChangeEvent, ChangeFeed, DeliveryRetry, DocumentStore, DocumentWrite, FilterOp, Increment, Query,
};
use crate::constants::storage;
use crate::errors::{StoreError, StoreResult};

/// Relative tolerance used when comparing stored and recomputed sums
const SUM_TOLERANCE: f64 = 1e-6;

/// Change to one provider's aggregate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreDelta {
    pub count: i64,
    pub sum: f64,
}

impl ScoreDelta {
    pub fn is_zero(&self) -> bool {
        self.count == 0 && self.sum == 0.0
    }
}

/// Scores of a record image, keyed by provider; absent values are dropped
fn scores_of(image: Option<&Fields>) -> BTreeMap<&str, f64> {
    let Some(Value::Object(scores)) = image.and_then(|data| data.get(storage::SCORES_FIELD)) else {
        return BTreeMap::new();
    };
    scores
        .iter()
        .filter_map(|(provider, value)| score_value(value).map(|v| (provider.as_str(), v)))
        .collect()
}

/// A usable score, or `None` when the value counts as absent
pub fn score_value(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// Per-provider deltas between two images of one canonical record
///
/// Only providers with a non-zero delta are returned.
pub fn compute_deltas(before: Option<&Fields>, after: Option<&Fields>) -> BTreeMap<String, ScoreDelta> {
    let old = scores_of(before);
    let new = scores_of(after);
    let providers: BTreeSet<&str> = old.keys().chain(new.keys()).copied().collect();

    providers
        .into_iter()
        .filter_map(|provider| {
            let delta = match (old.get(provider), new.get(provider)) {
                (None, Some(v)) => ScoreDelta { count: 1, sum: *v },
                (Some(v), None) => ScoreDelta { count: -1, sum: -v },
                (Some(v1), Some(v2)) => ScoreDelta {
                    count: 0,
                    sum: v2 - v1,
                },
                (None, None) => ScoreDelta::default(),
            };
            (!delta.is_zero()).then(|| (provider.to_string(), delta))
        })
        .collect()
}

/// Batch that applies `deltas` to the aggregate records
pub fn delta_writes(deltas: &BTreeMap<String, ScoreDelta>) -> Vec<DocumentWrite> {
    stat_writes(deltas, &BTreeSet::new())
}

/// Like [`delta_writes`], but providers whose escaped id is in
/// `overflowed` get their count moved and their sum flagged instead
fn stat_writes(
    deltas: &BTreeMap<String, ScoreDelta>,
    overflowed: &BTreeSet<String>,
) -> Vec<DocumentWrite> {
    let mut writes = Vec::with_capacity(deltas.len() * 2);
    for (provider, delta) in deltas {
        let id = keys::escape_key(provider);
        let sum_overflow = overflowed.contains(&id);

        let mut label = Fields::new();
        label.insert("provider".to_string(), Value::from(provider.as_str()));
        if sum_overflow {
            label.insert("sumOverflow".to_string(), Value::Bool(true));
        }
        writes.push(DocumentWrite::merge(storage::STATS_COLLECTION, id.clone(), label));

        let mut increments = Vec::with_capacity(2);
        if delta.count != 0 {
            increments.push(("count".to_string(), Increment::Int(delta.count)));
        }
        if delta.sum != 0.0 && !sum_overflow {
            increments.push(("sum".to_string(), Increment::Float(delta.sum)));
        }
        writes.push(
            DocumentWrite::increment(storage::STATS_COLLECTION, id, increments)
                .with_server_timestamp("updatedAt"),
        );
    }
    writes
}

/// Applies score deltas from canonical record notifications
#[derive(Debug)]
pub struct AggregateMaintainer {
    store: Arc<dyn DocumentStore>,
    retry: DeliveryRetry,
}

impl AggregateMaintainer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retry: DeliveryRetry::default(),
        }
    }

    /// Retry policy used by [`AggregateMaintainer::drain`]
    pub fn with_retry(mut self, retry: DeliveryRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Apply the deltas of one change; returns the number of providers touched
    ///
    /// A provider whose sum would leave `f64` range still has its count
    /// applied; its aggregate is flagged with `sumOverflow`.
    pub async fn on_canonical_record_written(&self, event: &ChangeEvent) -> StoreResult<usize> {
        let deltas = compute_deltas(event.before.as_ref(), event.after.as_ref());
        if deltas.is_empty() {
            return Ok(0);
        }

        for (provider, delta) in &deltas {
            debug!(
                "{}: {} count {:+} sum {:+}",
                event.id, provider, delta.count, delta.sum
            );
        }

        let mut overflowed = BTreeSet::new();
        loop {
            let mut marker = Fields::new();
            marker.insert("image".to_string(), Value::from(event.id.as_str()));
            let mut writes = vec![DocumentWrite::create(
                storage::APPLIED_EVENTS_COLLECTION,
                event.event_id.clone(),
                marker,
            )
            .with_server_timestamp("appliedAt")];
            writes.extend(stat_writes(&deltas, &overflowed));

            match self.store.commit(writes).await {
                Ok(()) => return Ok(deltas.len()),
                Err(StoreError::AlreadyExists { .. }) => {
                    debug!("Skipping redelivered event {} for {}", event.event_id, event.id);
                    return Ok(0);
                }
                // Each pass flags one more provider, so this terminates.
                Err(StoreError::NonFinite { collection, id, .. })
                    if collection == storage::STATS_COLLECTION && overflowed.insert(id.clone()) =>
                {
                    warn!(
                        "Sum of {} would overflow after {}; applying its count only",
                        keys::unescape_key(&id).unwrap_or(id),
                        event.id
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply every notification already delivered to `feed`
    ///
    /// Each event is retried per the maintainer's policy before it is
    /// acknowledged; the first event that still fails stops the drain.
    pub async fn drain(&self, feed: &mut ChangeFeed) -> StoreResult<usize> {
        let mut touched = 0;
        while let Some(event) = feed.try_recv() {
            let event = &event;
            let result = self
                .retry
                .run(move || self.on_canonical_record_written(event))
                .await;
            feed.ack();
            touched += result?;
        }
        Ok(touched)
    }
}

/// Delete applied-event markers older than `retention`
///
/// Markers only guard against redelivery of recent notifications, so the
/// collection stays bounded by the write rate over the retention window.
pub async fn prune_applied_events(
    store: &dyn DocumentStore,
    retention: Duration,
) -> StoreResult<usize> {
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| Utc::now().checked_sub_signed(retention));
    let Some(cutoff) = cutoff else {
        return Ok(0);
    };
    let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Micros, true);

    let expired = store
        .query(
            storage::APPLIED_EVENTS_COLLECTION,
            &Query::new().where_op("appliedAt", FilterOp::LessOrEqual, cutoff),
        )
        .await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let pruned = expired.len();
    store
        .commit(
            expired
                .into_iter()
                .map(|doc| DocumentWrite::delete(storage::APPLIED_EVENTS_COLLECTION, doc.id))
                .collect(),
        )
        .await?;
    debug!("Pruned {} applied-event markers", pruned);
    Ok(pruned)
}

/// Set or remove `scores.<provider>` on the canonical record stored under
/// `storage_key`
///
/// This is the write an external labeling job performs; the aggregates
/// follow through the change feed.
pub async fn set_score(
    store: &dyn DocumentStore,
    storage_key: &str,
    provider: &str,
    value: Option<f64>,
) -> StoreResult<()> {
    if provider.is_empty() || provider.contains('.') {
        return Err(StoreError::InvalidPath {
            path: format!("{}.{}", storage::SCORES_FIELD, provider),
        });
    }
    let path = format!("{}.{}", storage::SCORES_FIELD, provider);
    store
        .commit(vec![DocumentWrite::update(
            storage::ASSETS_COLLECTION,
            keys::escape_key(storage_key),
            vec![(path, value.map(Value::from))],
        )])
        .await
}

/// Every stored aggregate, keyed by provider
pub async fn read_aggregates(
    store: &dyn DocumentStore,
) -> StoreResult<BTreeMap<String, AggregateStatRecord>> {
    let docs = store.query(storage::STATS_COLLECTION, &Query::new()).await?;
    let mut aggregates = BTreeMap::new();
    for doc in docs {
        match doc.decode::<AggregateStatRecord>() {
            Ok(mut record) => {
                if record.provider.is_empty() {
                    record.provider = keys::unescape_key(&doc.id).unwrap_or_else(|| doc.id.clone());
                }
                aggregates.insert(record.provider.clone(), record);
            }
            Err(e) => warn!("Ignoring unreadable aggregate {}: {}", doc.id, e),
        }
    }
    Ok(aggregates)
}

/// Rebuild the expected aggregates with a full scan of canonical records
pub async fn recompute(
    store: &dyn DocumentStore,
) -> StoreResult<BTreeMap<String, AggregateStatRecord>> {
    let docs = store.query(storage::ASSETS_COLLECTION, &Query::new()).await?;
    let mut expected: BTreeMap<String, AggregateStatRecord> = BTreeMap::new();
    for doc in &docs {
        for (provider, value) in scores_of(Some(&doc.data)) {
            let entry = expected
                .entry(provider.to_string())
                .or_insert_with(|| AggregateStatRecord {
                    provider: provider.to_string(),
                    count: 0,
                    sum: 0.0,
                    updated_at: None,
                    sum_overflow: false,
                });
            entry.count += 1;
            entry.sum += value;
        }
    }
    Ok(expected)
}

/// Disagreement between a stored aggregate and a full recount
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMismatch {
    pub provider: String,
    pub stored: ScoreDelta,
    pub expected: ScoreDelta,
}

/// Compare stored aggregates with a full recount
///
/// Providers missing on either side count as zero. Only the count of a
/// provider flagged with `sumOverflow` is compared.
pub async fn verify(store: &dyn DocumentStore) -> StoreResult<Vec<AggregateMismatch>> {
    let stored = read_aggregates(store).await?;
    let expected = recompute(store).await?;
    let providers: BTreeSet<&String> = stored.keys().chain(expected.keys()).collect();

    let totals = |record: Option<&AggregateStatRecord>| {
        record.map_or(ScoreDelta::default(), |r| ScoreDelta {
            count: r.count,
            sum: r.sum,
        })
    };

    Ok(providers
        .into_iter()
        .filter_map(|provider| {
            let sum_overflow = stored.get(provider).map_or(false, |r| r.sum_overflow);
            let stored = totals(stored.get(provider));
            let expected = totals(expected.get(provider));
            let sums_match = sum_overflow
                || (stored.sum - expected.sum).abs()
                    <= SUM_TOLERANCE * expected.sum.abs().max(1.0);
            (stored.count != expected.count || !sums_match).then(|| AggregateMismatch {
                provider: provider.clone(),
                stored,
                expected,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::MemoryDocumentStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn image(scores: Value) -> Fields {
        json!({ "status": "pending", "scores": scores })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn single(before: Value, after: Value) -> ScoreDelta {
        let before = image(json!({ "p": before }));
        let after = image(json!({ "p": after }));
        compute_deltas(Some(&before), Some(&after))
            .remove("p")
            .unwrap_or_default()
    }

    #[test]
    fn test_delta_table() {
        assert_eq!(single(json!(null), json!(7)), ScoreDelta { count: 1, sum: 7.0 });
        assert_eq!(single(json!(7), json!(null)), ScoreDelta { count: -1, sum: -7.0 });
        assert_eq!(single(json!(3), json!(5)), ScoreDelta { count: 0, sum: 2.0 });
        assert_eq!(single(json!(null), json!(null)), ScoreDelta::default());
        assert_eq!(single(json!(5), json!(5)), ScoreDelta::default());
    }

    #[test]
    fn test_garbage_counts_as_absent() {
        assert_eq!(single(json!("high"), json!(4)), ScoreDelta { count: 1, sum: 4.0 });
        assert_eq!(single(json!(4), json!([4])), ScoreDelta { count: -1, sum: -4.0 });

        let no_scores = json!({"status": "pending"}).as_object().cloned().unwrap();
        let bad_scores = json!({"scores": 3}).as_object().cloned().unwrap();
        assert!(compute_deltas(Some(&no_scores), Some(&bad_scores)).is_empty());
        assert!(compute_deltas(None, None).is_empty());
    }

    #[test]
    fn test_create_and_delete_images() {
        let scored = image(json!({"a": 2, "b": 1.5}));
        let created = compute_deltas(None, Some(&scored));
        assert_eq!(created["a"], ScoreDelta { count: 1, sum: 2.0 });
        assert_eq!(created["b"], ScoreDelta { count: 1, sum: 1.5 });

        let deleted = compute_deltas(Some(&scored), None);
        assert_eq!(deleted["a"], ScoreDelta { count: -1, sum: -2.0 });
        assert_eq!(deleted.len(), 2);
    }

    #[test]
    fn test_delta_writes_skip_zero_fields() {
        let mut deltas = BTreeMap::new();
        deltas.insert("vlm.v2".to_string(), ScoreDelta { count: 0, sum: 2.0 });
        let writes = delta_writes(&deltas);

        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].id, "vlm%2Ev2");
        assert_eq!(
            writes[1].op,
            crate::app::store::WriteOp::Increment {
                deltas: vec![("sum".to_string(), Increment::Float(2.0))]
            }
        );
        assert_eq!(writes[1].server_timestamps, vec!["updatedAt".to_string()]);
    }

    /// Test the maintainer against a live store
    ///
    /// Verifies that labeler writes move the aggregate and that a deleted
    /// record is handled as a remove.
    #[tokio::test]
    async fn test_maintainer_applies_increments() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut feed = store.subscribe(storage::ASSETS_COLLECTION);
        let maintainer = AggregateMaintainer::new(store.clone());

        let writes = vec![
            DocumentWrite::set(storage::ASSETS_COLLECTION, "a", image(json!({}))),
            DocumentWrite::update(
                storage::ASSETS_COLLECTION,
                "a",
                vec![("scores.providerA".to_string(), Some(json!(8)))],
            ),
            DocumentWrite::set(storage::ASSETS_COLLECTION, "b", image(json!({"providerA": 2}))),
        ];
        for write in writes {
            store.commit(vec![write]).await.unwrap();
        }
        store
            .commit(vec![DocumentWrite::delete(storage::ASSETS_COLLECTION, "b")])
            .await
            .unwrap();

        assert_eq!(maintainer.drain(&mut feed).await.unwrap(), 3);
        assert_eq!(feed.backlog().pending(), 0);

        let aggregates = read_aggregates(store.as_ref()).await.unwrap();
        let stat = &aggregates["providerA"];
        assert_eq!(stat.count, 1);
        assert_eq!(stat.sum, 8.0);
        assert!(stat.updated_at.is_some());
        assert!(verify(store.as_ref()).await.unwrap().is_empty());
    }

    /// Test redelivered notifications
    ///
    /// Verifies that handling the same event twice applies its deltas once,
    /// while a later write repeating an earlier transition still counts.
    #[tokio::test]
    async fn test_redelivered_event_is_applied_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut feed = store.subscribe(storage::ASSETS_COLLECTION);
        let maintainer = AggregateMaintainer::new(store.clone());

        for score in [3, 5, 3, 5] {
            store
                .commit(vec![DocumentWrite::set(
                    storage::ASSETS_COLLECTION,
                    "a",
                    image(json!({ "p": score })),
                )])
                .await
                .unwrap();
        }

        let first = feed.recv().await.unwrap();
        assert_eq!(maintainer.on_canonical_record_written(&first).await.unwrap(), 1);
        assert_eq!(maintainer.on_canonical_record_written(&first).await.unwrap(), 0);
        feed.ack();
        maintainer.drain(&mut feed).await.unwrap();

        let stat = read_aggregates(store.as_ref()).await.unwrap()["p"].clone();
        assert_eq!((stat.count, stat.sum), (1, 5.0));
        assert_eq!(
            store
                .query(storage::APPLIED_EVENTS_COLLECTION, &Query::new())
                .await
                .unwrap()
                .len(),
            4
        );
        assert!(verify(store.as_ref()).await.unwrap().is_empty());
    }

    /// Test sums beyond f64 range
    ///
    /// Verifies that a delta overflowing the stored sum still moves the
    /// count, flags the aggregate and leaves other providers untouched.
    #[tokio::test]
    async fn test_overflowing_sum_keeps_count() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut feed = store.subscribe(storage::ASSETS_COLLECTION);
        let maintainer = AggregateMaintainer::new(store.clone());

        for (id, big) in [("a", 1e308), ("b", 1e308)] {
            store
                .commit(vec![DocumentWrite::set(
                    storage::ASSETS_COLLECTION,
                    id,
                    image(json!({ "p": big, "q": 1 })),
                )])
                .await
                .unwrap();
        }
        assert_eq!(maintainer.drain(&mut feed).await.unwrap(), 4);

        let aggregates = read_aggregates(store.as_ref()).await.unwrap();
        assert_eq!(aggregates["p"].count, 2);
        assert!(aggregates["p"].sum_overflow);
        assert_eq!(aggregates["p"].mean(), None);
        assert_eq!((aggregates["q"].count, aggregates["q"].sum), (2, 2.0));
        assert!(!aggregates["q"].sum_overflow);
        assert!(verify(store.as_ref()).await.unwrap().is_empty());
    }

    /// Test marker retention
    ///
    /// Verifies that pruning removes markers past the retention window,
    /// keeps recent ones and leaves the aggregates alone.
    #[tokio::test]
    async fn test_prune_applied_events() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut feed = store.subscribe(storage::ASSETS_COLLECTION);
        let maintainer = AggregateMaintainer::new(store.clone());

        for score in 0..50 {
            store
                .commit(vec![DocumentWrite::set(
                    storage::ASSETS_COLLECTION,
                    "a",
                    image(json!({ "p": score + 1 })),
                )])
                .await
                .unwrap();
        }
        maintainer.drain(&mut feed).await.unwrap();
        assert_eq!(store.count(storage::APPLIED_EVENTS_COLLECTION).await, 50);

        let kept = prune_applied_events(store.as_ref(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(kept, 0);
        assert_eq!(store.count(storage::APPLIED_EVENTS_COLLECTION).await, 50);

        let pruned = prune_applied_events(store.as_ref(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(pruned, 50);
        assert_eq!(store.count(storage::APPLIED_EVENTS_COLLECTION).await, 0);

        let stat = read_aggregates(store.as_ref()).await.unwrap()["p"].clone();
        assert_eq!((stat.count, stat.sum), (1, 50.0));
    }

    /// Test labeler writes by storage key
    ///
    /// Verifies that setting, changing and removing a score moves the
    /// aggregate, and that unknown keys and dotted providers are rejected.
    #[tokio::test]
    async fn test_set_score_round_trip() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .commit(vec![DocumentWrite::set(
                storage::ASSETS_COLLECTION,
                keys::escape_key("danbooru/7.jpg"),
                image(json!({})),
            )])
            .await
            .unwrap();
        let mut feed = store.subscribe(storage::ASSETS_COLLECTION);
        let maintainer = AggregateMaintainer::new(store.clone());

        set_score(store.as_ref(), "danbooru/7.jpg", "aesthetic", Some(6.0))
            .await
            .unwrap();
        set_score(store.as_ref(), "danbooru/7.jpg", "aesthetic", Some(4.5))
            .await
            .unwrap();
        maintainer.drain(&mut feed).await.unwrap();

        let stat = read_aggregates(store.as_ref()).await.unwrap()["aesthetic"].clone();
        assert_eq!((stat.count, stat.sum), (1, 4.5));

        set_score(store.as_ref(), "danbooru/7.jpg", "aesthetic", None)
            .await
            .unwrap();
        maintainer.drain(&mut feed).await.unwrap();
        let stat = read_aggregates(store.as_ref()).await.unwrap()["aesthetic"].clone();
        assert_eq!((stat.count, stat.sum), (0, 0.0));

        assert!(matches!(
            set_score(store.as_ref(), "danbooru/8.jpg", "aesthetic", Some(1.0)).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            set_score(store.as_ref(), "danbooru/7.jpg", "a.b", Some(1.0)).await,
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_reports_drift() {
        let store = MemoryDocumentStore::new();
        store
            .commit(vec![DocumentWrite::set(
                storage::ASSETS_COLLECTION,
                "a",
                image(json!({"p": 3})),
            )])
            .await
            .unwrap();

        let mismatches = verify(&store).await.unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].provider, "p");
        assert_eq!(mismatches[0].stored, ScoreDelta::default());
        assert_eq!(mismatches[0].expected, ScoreDelta { count: 1, sum: 3.0 });
    }

    fn score_strategy() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            Just(json!("n/a")),
            (-20i64..20).prop_map(Value::from),
            (-40i32..40).prop_map(|half| json!(half as f64 / 2.0)),
        ]
    }

    fn image_strategy() -> impl Strategy<Value = Option<Fields>> {
        proptest::option::of(proptest::collection::btree_map(
            prop_oneof![Just("a"), Just("b"), Just("c")],
            score_strategy(),
            0..3,
        ))
        .prop_map(|scores| {
            scores.map(|scores| {
                let scores: Fields = scores
                    .into_iter()
                    .map(|(provider, value)| (provider.to_string(), value))
                    .collect();
                image(Value::Object(scores))
            })
        })
    }

    proptest! {
        /// Deltas of every transition in a record's history, applied in any
        /// order, add up to the scores of its final image.
        #[test]
        fn prop_deltas_converge_in_any_order(
            histories in proptest::collection::vec(
                proptest::collection::vec(image_strategy(), 1..6),
                1..4,
            ),
            seed in any::<u64>(),
        ) {
            let mut transitions = Vec::new();
            let mut expected: BTreeMap<String, ScoreDelta> = BTreeMap::new();
            for history in &histories {
                let mut previous: Option<Fields> = None;
                for state in history {
                    transitions.push((previous.clone(), state.clone()));
                    previous = state.clone();
                }
                for (provider, value) in scores_of(previous.as_ref()) {
                    let entry = expected.entry(provider.to_string()).or_default();
                    entry.count += 1;
                    entry.sum += value;
                }
            }

            fastrand::seed(seed);
            fastrand::shuffle(&mut transitions);

            let mut applied: BTreeMap<String, ScoreDelta> = BTreeMap::new();
            for (before, after) in &transitions {
                for (provider, delta) in compute_deltas(before.as_ref(), after.as_ref()) {
                    let entry = applied.entry(provider).or_default();
                    entry.count += delta.count;
                    entry.sum += delta.sum;
                }
            }

            let providers: BTreeSet<&String> = applied.keys().chain(expected.keys()).collect();
            for provider in providers {
                let got = applied.get(provider).copied().unwrap_or_default();
                let want = expected.get(provider).copied().unwrap_or_default();
                prop_assert_eq!(got.count, want.count);
                prop_assert!((got.sum - want.sum).abs() < 1e-9);
            }
        }
    }
}
