//! Fragment merger / state reconstructor
//!
//! Decides each fragment's fate against the current aggregate: apply,
//! ignore (stale/duplicate) or quarantine (conflict/unsupported). All
//! applications for one entity key are serialized through `KeyLocks`;
//! different keys proceed fully in parallel.
//!
//! The watermark rule plus explicit tie-breaks make reconstruction
//! confluent: the same fragment set converges to the same aggregate state
//! whatever the arrival order, so replays and commit retries are no-ops.

use chrono::{DateTime, Utc};
use legis_common::{EntityKey, Fragment, FragmentKind, IgnoreReason, Outcome, QuarantineReason};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One dated action inside an aggregate, kept in applied order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub published_at: DateTime<Utc>,
    pub sequence_hint: Option<u32>,
    /// Arrival counter, the final deterministic tie-break
    pub arrival: u64,
    pub payload: serde_json::Value,
}

/// One amendment/version lineage entry. Supersession links are never
/// mutated once created; versions are marked inactive, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub supersedes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Reconstructed aggregate body (persisted as canonical JSON)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    /// Current payload per scalar fragment kind
    pub current: BTreeMap<FragmentKind, serde_json::Value>,
    /// Additive, ordered action history
    pub actions: Vec<ActionEntry>,
    /// Amendment lineage (bills only in practice)
    pub versions: Vec<VersionEntry>,
    /// Next arrival counter for action tie-breaks
    pub next_arrival: u64,
}

/// The reconstructed entity: identity, state, per-kind watermarks
#[derive(Debug, Clone)]
pub struct Aggregate {
    pub key: EntityKey,
    pub state: AggregateState,
    /// `last_applied[kind]`, monotonically non-decreasing
    pub watermarks: BTreeMap<FragmentKind, DateTime<Utc>>,
    /// Whether this aggregate changed since it was loaded
    pub dirty: bool,
}

impl Aggregate {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            state: AggregateState::default(),
            watermarks: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Currently active version label, if any lineage exists
    pub fn active_version(&self) -> Option<&str> {
        self.state
            .versions
            .iter()
            .find(|v| v.active)
            .map(|v| v.version.as_str())
    }
}

/// Fragment kinds each entity type's schema recognizes
pub fn supported_kinds(entity_type: &str) -> &'static [FragmentKind] {
    match entity_type {
        "bill" | "fedbill" => &[
            FragmentKind::Metadata,
            FragmentKind::Action,
            FragmentKind::Sponsor,
            FragmentKind::Text,
            FragmentKind::Vote,
        ],
        "calendar" | "agenda" => &[FragmentKind::Schedule],
        "committee" => &[FragmentKind::Membership],
        "member" => &[FragmentKind::Metadata],
        _ => &[],
    }
}

/// Apply one fragment to its aggregate and report its fate.
///
/// The caller must hold the key's serialization lock and must only persist
/// the aggregate when the outcome is `Applied`.
pub fn merge_fragment(aggregate: &mut Aggregate, fragment: &Fragment) -> Outcome {
    debug_assert_eq!(aggregate.key, fragment.entity_key);

    if !supported_kinds(aggregate.key.entity_type()).contains(&fragment.kind) {
        tracing::warn!(
            entity_key = %aggregate.key,
            kind = %fragment.kind,
            "Fragment kind not supported by aggregate schema"
        );
        return Outcome::Quarantined(QuarantineReason::UnsupportedFragment);
    }

    let outcome = if fragment.kind == FragmentKind::Action {
        merge_action(aggregate, fragment)
    } else {
        merge_scalar(aggregate, fragment)
    };

    tracing::debug!(
        entity_key = %aggregate.key,
        kind = %fragment.kind,
        published_at = %fragment.published_at,
        outcome = %outcome,
        "Fragment merged"
    );
    outcome
}

/// Scalar kinds: strict watermark rule, last writer wins, equal timestamps
/// never silently overwritten.
fn merge_scalar(aggregate: &mut Aggregate, fragment: &Fragment) -> Outcome {
    match aggregate.watermarks.get(&fragment.kind) {
        Some(watermark) if fragment.published_at < *watermark => {
            return Outcome::Ignored(IgnoreReason::Stale);
        }
        Some(watermark) if fragment.published_at == *watermark => {
            let last = aggregate.state.current.get(&fragment.kind);
            return if last == Some(&fragment.payload) {
                Outcome::Ignored(IgnoreReason::Duplicate)
            } else {
                // Ambiguous ordering: first processed wins, second is held
                // for operator review
                Outcome::Quarantined(QuarantineReason::ConflictingSameTimestamp)
            };
        }
        _ => {}
    }

    if fragment.kind == FragmentKind::Text {
        record_version(aggregate, fragment);
    }
    aggregate
        .state
        .current
        .insert(fragment.kind, fragment.payload.clone());
    aggregate
        .watermarks
        .insert(fragment.kind, fragment.published_at);
    aggregate.dirty = true;
    Outcome::Applied
}

/// Actions accumulate: an action older than the watermark is inserted at
/// its sorted position rather than dropped, so the history converges to
/// the same ordered list whatever the delivery order. The watermark only
/// ever advances.
fn merge_action(aggregate: &mut Aggregate, fragment: &Fragment) -> Outcome {
    let duplicate = aggregate
        .state
        .actions
        .iter()
        .any(|a| {
            a.published_at == fragment.published_at
                && a.sequence_hint == fragment.sequence_hint
                && a.payload == fragment.payload
        });
    if duplicate {
        return Outcome::Ignored(IgnoreReason::Duplicate);
    }

    let arrival = aggregate.state.next_arrival;
    aggregate.state.next_arrival += 1;
    aggregate.state.actions.push(ActionEntry {
        published_at: fragment.published_at,
        sequence_hint: fragment.sequence_hint,
        arrival,
        payload: fragment.payload.clone(),
    });
    // Timestamp, then explicit sequence hint, then arrival order
    aggregate.state.actions.sort_by(|a, b| {
        (a.published_at, a.sequence_hint.unwrap_or(u32::MAX), a.arrival).cmp(&(
            b.published_at,
            b.sequence_hint.unwrap_or(u32::MAX),
            b.arrival,
        ))
    });

    let watermark = aggregate
        .watermarks
        .entry(FragmentKind::Action)
        .or_insert(fragment.published_at);
    if fragment.published_at > *watermark {
        *watermark = fragment.published_at;
    }
    aggregate.dirty = true;
    Outcome::Applied
}

/// A text fragment under a new version label supersedes the prior active
/// version: the old version stays in the lineage, marked inactive.
fn record_version(aggregate: &mut Aggregate, fragment: &Fragment) {
    let version = fragment
        .payload
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if aggregate.state.versions.iter().any(|v| v.version == version) {
        return;
    }

    let supersedes = aggregate
        .state
        .versions
        .iter_mut()
        .find(|v| v.active)
        .map(|prior| {
            prior.active = false;
            prior.version.clone()
        });

    tracing::info!(
        entity_key = %aggregate.key,
        version = %version,
        supersedes = ?supersedes,
        "New amendment version"
    );
    aggregate.state.versions.push(VersionEntry {
        version,
        supersedes,
        active: true,
        created_at: fragment.published_at,
    });
}

/// Per-entity-key serialization locks.
///
/// Lock handles are `Arc`ed out of a shared map; multi-key files acquire
/// their guards in canonical key order so two files touching the same keys
/// cannot deadlock.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire guards for all given keys, in canonical order
    pub async fn lock_keys(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            let lock = {
                let mut map = self.inner.lock().await;
                // Only the map holds a released lock; drop those entries so
                // the map does not grow with every key ever processed
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
                map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            };
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn bill_key() -> EntityKey {
        EntityKey::Bill {
            session: 2023,
            print_no: "S01234".to_string(),
        }
    }

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, day, hour, 0, 0).unwrap()
    }

    fn metadata(day: u32, title: &str) -> Fragment {
        Fragment::new(
            bill_key(),
            FragmentKind::Metadata,
            ts(day, 12),
            json!({ "title": title }),
        )
    }

    fn action(day: u32, hint: u32, text: &str) -> Fragment {
        Fragment::new(
            bill_key(),
            FragmentKind::Action,
            ts(day, 0),
            json!({ "text": text }),
        )
        .with_sequence_hint(hint)
    }

    #[test]
    fn test_newer_fragment_applies() {
        let mut aggregate = Aggregate::new(bill_key());
        assert_eq!(merge_fragment(&mut aggregate, &metadata(1, "v1")), Outcome::Applied);
        assert_eq!(merge_fragment(&mut aggregate, &metadata(2, "v2")), Outcome::Applied);
        assert_eq!(
            aggregate.state.current[&FragmentKind::Metadata]["title"],
            "v2"
        );
        assert_eq!(aggregate.watermarks[&FragmentKind::Metadata], ts(2, 12));
    }

    #[test]
    fn test_stale_fragment_ignored() {
        let mut aggregate = Aggregate::new(bill_key());
        merge_fragment(&mut aggregate, &metadata(5, "current"));
        assert_eq!(
            merge_fragment(&mut aggregate, &metadata(1, "old")),
            Outcome::Ignored(IgnoreReason::Stale)
        );
        assert_eq!(
            aggregate.state.current[&FragmentKind::Metadata]["title"],
            "current"
        );
    }

    #[test]
    fn test_duplicate_redelivery_ignored() {
        let mut aggregate = Aggregate::new(bill_key());
        merge_fragment(&mut aggregate, &metadata(1, "same"));
        assert_eq!(
            merge_fragment(&mut aggregate, &metadata(1, "same")),
            Outcome::Ignored(IgnoreReason::Duplicate)
        );
    }

    #[test]
    fn test_same_timestamp_conflict_quarantines_second() {
        let mut aggregate = Aggregate::new(bill_key());
        assert_eq!(merge_fragment(&mut aggregate, &metadata(1, "first")), Outcome::Applied);
        assert_eq!(
            merge_fragment(&mut aggregate, &metadata(1, "second")),
            Outcome::Quarantined(QuarantineReason::ConflictingSameTimestamp)
        );
        // First processed wins, never silently overwritten
        assert_eq!(
            aggregate.state.current[&FragmentKind::Metadata]["title"],
            "first"
        );
    }

    #[test]
    fn test_out_of_order_actions_end_sorted() {
        let mut aggregate = Aggregate::new(bill_key());
        for fragment in [action(2, 0, "t2"), action(1, 0, "t1"), action(3, 0, "t3")] {
            assert_eq!(merge_fragment(&mut aggregate, &fragment), Outcome::Applied);
        }
        let texts: Vec<&str> = aggregate
            .state
            .actions
            .iter()
            .map(|a| a.payload["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["t1", "t2", "t3"]);
        assert_eq!(aggregate.watermarks[&FragmentKind::Action], ts(3, 0));
    }

    #[test]
    fn test_same_day_actions_ordered_by_sequence_hint() {
        let mut aggregate = Aggregate::new(bill_key());
        merge_fragment(&mut aggregate, &action(1, 2, "second"));
        merge_fragment(&mut aggregate, &action(1, 1, "first"));
        let texts: Vec<&str> = aggregate
            .state
            .actions
            .iter()
            .map(|a| a.payload["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_action_ignored() {
        let mut aggregate = Aggregate::new(bill_key());
        merge_fragment(&mut aggregate, &action(1, 0, "same"));
        assert_eq!(
            merge_fragment(&mut aggregate, &action(1, 0, "same")),
            Outcome::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(aggregate.state.actions.len(), 1);
    }

    #[test]
    fn test_same_day_identical_text_distinct_hints_both_kept() {
        // Floor procedure can repeat the same wording on one day; the
        // sequence hint is what tells the occurrences apart
        let mut aggregate = Aggregate::new(bill_key());
        assert_eq!(
            merge_fragment(&mut aggregate, &action(1, 0, "AMENDED ON THIRD READING")),
            Outcome::Applied
        );
        assert_eq!(
            merge_fragment(&mut aggregate, &action(1, 1, "AMENDED ON THIRD READING")),
            Outcome::Applied
        );
        assert_eq!(aggregate.state.actions.len(), 2);

        // An exact replay still dedups
        assert_eq!(
            merge_fragment(&mut aggregate, &action(1, 1, "AMENDED ON THIRD READING")),
            Outcome::Ignored(IgnoreReason::Duplicate)
        );
        assert_eq!(aggregate.state.actions.len(), 2);
    }

    #[test]
    fn test_unsupported_kind_quarantined() {
        let mut aggregate = Aggregate::new(bill_key());
        let fragment = Fragment::new(
            bill_key(),
            FragmentKind::Membership,
            ts(1, 0),
            json!({ "members": [] }),
        );
        assert_eq!(
            merge_fragment(&mut aggregate, &fragment),
            Outcome::Quarantined(QuarantineReason::UnsupportedFragment)
        );
        assert!(!aggregate.dirty);
    }

    #[test]
    fn test_new_version_supersedes_prior() {
        let mut aggregate = Aggregate::new(bill_key());
        let text_a = Fragment::new(
            bill_key(),
            FragmentKind::Text,
            ts(1, 0),
            json!({ "version": "", "text": "original" }),
        );
        let text_b = Fragment::new(
            bill_key(),
            FragmentKind::Text,
            ts(2, 0),
            json!({ "version": "A", "text": "amended" }),
        );
        merge_fragment(&mut aggregate, &text_a);
        merge_fragment(&mut aggregate, &text_b);

        assert_eq!(aggregate.active_version(), Some("A"));
        let base = aggregate
            .state
            .versions
            .iter()
            .find(|v| v.version.is_empty())
            .unwrap();
        assert!(!base.active);
        let amended = aggregate
            .state
            .versions
            .iter()
            .find(|v| v.version == "A")
            .unwrap();
        assert_eq!(amended.supersedes.as_deref(), Some(""));
        // Prior content survives in the lineage; no cycles possible since
        // links only ever point at the previously active entry
        assert_eq!(aggregate.state.versions.len(), 2);
    }

    #[test]
    fn test_monotonic_watermarks() {
        let mut aggregate = Aggregate::new(bill_key());
        let days = [3_u32, 1, 4, 2, 5];
        let mut last = None;
        for day in days {
            merge_fragment(&mut aggregate, &metadata(day, &format!("d{}", day)));
            let watermark = aggregate.watermarks[&FragmentKind::Metadata];
            if let Some(prev) = last {
                assert!(watermark >= prev);
            }
            last = Some(watermark);
        }
        assert_eq!(last.unwrap(), ts(5, 12));
    }

    #[test]
    fn test_confluence_scalar_and_actions() {
        let fragments = vec![
            metadata(1, "one"),
            metadata(3, "three"),
            action(2, 0, "a2"),
            action(1, 0, "a1"),
            Fragment::new(
                bill_key(),
                FragmentKind::Sponsor,
                ts(2, 9),
                json!({ "sponsor": "SMITH" }),
            ),
        ];

        // Apply in several arrival orders; all must converge
        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2, 3, 4],
            vec![4, 3, 2, 1, 0],
            vec![2, 0, 4, 1, 3],
        ];
        let mut results = Vec::new();
        for order in orders {
            let mut aggregate = Aggregate::new(bill_key());
            for idx in order {
                merge_fragment(&mut aggregate, &fragments[idx]);
            }
            // Compare state minus the arrival counters, which are
            // order-dependent bookkeeping only
            let mut state = aggregate.state.clone();
            state.next_arrival = 0;
            for entry in &mut state.actions {
                entry.arrival = 0;
            }
            results.push((serde_json::to_value(&state).unwrap(), aggregate.watermarks));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[tokio::test]
    async fn test_key_locks_serialize_same_key() {
        let locks = KeyLocks::new();
        let keys = vec!["bill/2023/S01234".to_string()];
        let guard = locks.lock_keys(&keys).await;

        let locks2 = locks.clone();
        let keys2 = keys.clone();
        let handle = tokio::spawn(async move {
            let _guard = locks2.lock_keys(&keys2).await;
        });

        // The second acquisition cannot complete while the guard is held
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_key_locks_evict_released_entries() {
        let locks = KeyLocks::new();
        let guards = locks
            .lock_keys(&["bill/2023/S00001".to_string(), "bill/2023/S00002".to_string()])
            .await;
        assert_eq!(locks.inner.lock().await.len(), 2);
        drop(guards);

        // The next acquisition prunes every lock no guard still holds
        let _guard = locks.lock_keys(&["bill/2023/S00003".to_string()]).await;
        let map = locks.inner.lock().await;
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("bill/2023/S00003"));
    }
}
