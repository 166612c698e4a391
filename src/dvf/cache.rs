use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use super::{DvfMutation, sort_by_date_desc};
use crate::cadastre::SectionKey;

/// Sections are not refetched on demand while younger than this; DVF data
/// changes on the provider side twice a year at most.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60 * 24 * 183);

/// In-memory aggregate of fetched transaction history, keyed by parcel id.
///
/// Merging is additive: records already shown are never dropped, new records
/// are appended in fetch order. Re-fetched records are deduplicated by
/// `(id_mutation, id_parcelle)`.
#[derive(Debug, Default)]
pub struct TransactionCache {
  by_parcel: HashMap<String, Vec<DvfMutation>>,
  seen: HashSet<(String, String)>,
  has_dvf: HashMap<String, bool>,
  fetched_at: HashMap<SectionKey, Instant>,
  loading: bool,
  generation: u64,
}

impl TransactionCache {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Merges a section response into the cache. Returns how many records were
  /// actually appended.
  pub fn merge(&mut self, records: Vec<DvfMutation>) -> usize {
    let mut appended = 0;
    for record in records {
      if record.id_parcelle.is_empty() || !self.seen.insert(record.key()) {
        continue;
      }
      self
        .by_parcel
        .entry(record.id_parcelle.clone())
        .or_default()
        .push(record);
      appended += 1;
    }
    appended
  }

  /// The cached mutations of a parcel in original fetch order.
  #[must_use]
  pub fn mutations_for(&self, parcel_id: &str) -> &[DvfMutation] {
    self
      .by_parcel
      .get(parcel_id)
      .map_or(&[], Vec::as_slice)
  }

  /// The cached mutations of a parcel, display-sorted by date descending
  /// with ties kept in fetch order.
  #[must_use]
  pub fn sorted_mutations_for(&self, parcel_id: &str) -> Vec<DvfMutation> {
    let mut mutations = self.mutations_for(parcel_id).to_vec();
    sort_by_date_desc(&mut mutations);
    mutations
  }

  /// Records the DVF-presence flag of a parcel.
  pub fn set_flag(&mut self, parcel_id: &str, has_dvf: bool) {
    self.has_dvf.insert(parcel_id.to_string(), has_dvf);
  }

  /// The last known DVF-presence flag of a parcel; parcels never seen by a
  /// refresh default to false.
  #[must_use]
  pub fn has_dvf(&self, parcel_id: &str) -> bool {
    self.has_dvf.get(parcel_id).copied().unwrap_or(false)
  }

  pub fn mark_fetched(&mut self, key: SectionKey, now: Instant) {
    self.fetched_at.insert(key, now);
  }

  /// Whether a section was fetched recently enough to skip the on-demand
  /// request.
  #[must_use]
  pub fn is_fresh(&self, key: &SectionKey, now: Instant) -> bool {
    self
      .fetched_at
      .get(key)
      .is_some_and(|at| now.duration_since(*at) < STALE_AFTER)
  }

  /// Asserts the loading flag and returns the generation tag of this
  /// refresh. A later `finish_refresh` with a stale tag is ignored, so the
  /// flag deasserts exactly once per live refresh.
  pub fn begin_refresh(&mut self) -> u64 {
    self.generation += 1;
    self.loading = true;
    self.generation
  }

  pub fn finish_refresh(&mut self, generation: u64) {
    if generation == self.generation {
      self.loading = false;
    }
  }

  #[must_use]
  pub fn is_loading(&self) -> bool {
    self.loading
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: &str, parcel: &str, date: &str) -> DvfMutation {
    DvfMutation {
      id_mutation: id.to_string(),
      id_parcelle: parcel.to_string(),
      date_mutation: date.to_string(),
      ..DvfMutation::default()
    }
  }

  #[test]
  fn merge_is_additive_and_deduplicates() {
    let mut cache = TransactionCache::new();
    assert_eq!(
      cache.merge(vec![
        record("2023-1", "033000AB0123", "2023-05-01"),
        record("2023-2", "033000AB0123", "2023-07-01"),
      ]),
      2
    );

    // Re-fetching the same section keeps existing entries and appends only
    // the genuinely new record.
    assert_eq!(
      cache.merge(vec![
        record("2023-1", "033000AB0123", "2023-05-01"),
        record("2024-1", "033000AB0123", "2024-02-01"),
      ]),
      1
    );

    let ids: Vec<_> = cache
      .mutations_for("033000AB0123")
      .iter()
      .map(|m| m.id_mutation.as_str())
      .collect();
    assert_eq!(ids, vec!["2023-1", "2023-2", "2024-1"]);
  }

  #[test]
  fn same_mutation_on_two_parcels_is_kept_for_both() {
    let mut cache = TransactionCache::new();
    cache.merge(vec![
      record("2023-1", "033000AB0123", "2023-05-01"),
      record("2023-1", "033000AB0124", "2023-05-01"),
    ]);
    assert_eq!(cache.mutations_for("033000AB0123").len(), 1);
    assert_eq!(cache.mutations_for("033000AB0124").len(), 1);
  }

  #[test]
  fn sorted_mutations_are_date_descending() {
    let mut cache = TransactionCache::new();
    cache.merge(vec![
      record("old", "p", "2019-01-01"),
      record("new", "p", "2024-01-01"),
    ]);
    let sorted = cache.sorted_mutations_for("p");
    assert_eq!(sorted[0].id_mutation, "new");
    assert_eq!(sorted[1].id_mutation, "old");
  }

  #[test]
  fn flags_default_to_false_and_stick() {
    let mut cache = TransactionCache::new();
    assert!(!cache.has_dvf("p"));
    cache.set_flag("p", true);
    assert!(cache.has_dvf("p"));
    cache.set_flag("q", false);
    assert!(!cache.has_dvf("q"));
  }

  #[test]
  fn staleness_window() {
    let mut cache = TransactionCache::new();
    let key = SectionKey {
      commune: "033".to_string(),
      prefixe: "000".to_string(),
      section: "AB".to_string(),
    };
    let now = Instant::now();
    assert!(!cache.is_fresh(&key, now));
    cache.mark_fetched(key.clone(), now);
    assert!(cache.is_fresh(&key, now + Duration::from_secs(60)));
    assert!(!cache.is_fresh(&key, now + STALE_AFTER));
  }

  #[test]
  fn loading_flag_ignores_stale_generations() {
    let mut cache = TransactionCache::new();
    let first = cache.begin_refresh();
    let second = cache.begin_refresh();
    assert!(cache.is_loading());
    // A completion of the superseded refresh must not deassert the flag.
    cache.finish_refresh(first);
    assert!(cache.is_loading());
    cache.finish_refresh(second);
    assert!(!cache.is_loading());
  }
}
