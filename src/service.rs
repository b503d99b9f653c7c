//! The catalog search service: query and mutation surface over the
//! IVF-PQ index, embedding cache, identifier map, and tombstone set.
//!
//! All four structures live behind one `RwLock` so every mutation is a
//! single critical section and readers always observe a consistent
//! combination.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::corpus::{Entry, EntryId};
use crate::embedding::EmbeddingEncoder;
use crate::error::{SearchError, SearchResult};
use crate::index::{
    EmbeddingCache, IdMap, IndexParams, IvfPqIndex, VectorIndexError,
};
use crate::storage::{LoadedSnapshot, Snapshot};

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchSource {
    /// The query text was a literal catalog identifier.
    ExactId,
    /// Approximate nearest-neighbor hit.
    Approximate,
}

/// One search result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchMatch {
    pub entry_id: EntryId,
    /// Squared Euclidean distance; zero for exact-id matches.
    pub distance: f32,
    pub source: MatchSource,
}

struct ServiceState {
    entries: HashMap<EntryId, Entry>,
    /// Live entries in insertion order; fixes rebuild and persist order.
    order: Vec<EntryId>,
    index: IvfPqIndex,
    cache: EmbeddingCache,
    id_map: IdMap,
    tombstones: HashSet<EntryId>,
}

pub struct CatalogSearchService {
    encoder: Arc<dyn EmbeddingEncoder>,
    nprobe: usize,
    params: IndexParams,
    state: RwLock<ServiceState>,
}

impl std::fmt::Debug for CatalogSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSearchService")
            .field("nprobe", &self.nprobe)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CatalogSearchService {
    /// Build the service from scratch: encode every entry, train the
    /// index on the full embedding set, and populate all structures.
    pub fn build(
        entries: Vec<Entry>,
        encoder: Arc<dyn EmbeddingEncoder>,
        config: &IndexConfig,
    ) -> SearchResult<Self> {
        if entries.is_empty() {
            return Err(SearchError::CorpusFormat {
                reason: "corpus contains no entries".to_string(),
            });
        }

        let texts: Vec<&str> = entries.iter().map(|e| e.combined_text.as_str()).collect();
        let vectors = encoder.encode(&texts)?;
        if vectors.len() != entries.len() {
            return Err(SearchError::Encoding(format!(
                "encoder returned {} vectors for {} entries",
                vectors.len(),
                entries.len()
            )));
        }

        let dimension = encoder.dimension();
        let params = IndexParams {
            subvectors: config.subvectors,
            code_bits: config.code_bits,
        };
        let mut index = IvfPqIndex::new(dimension, params)?;
        index.train(&vectors, false)?;

        let mut id_map = IdMap::new();
        let mut cache = EmbeddingCache::new(dimension);
        let mut map = HashMap::with_capacity(entries.len());
        let mut order = Vec::with_capacity(entries.len());
        for (entry, vector) in entries.into_iter().zip(vectors) {
            let id = entry.id;
            if map.insert(id, entry).is_some() {
                return Err(SearchError::CorpusFormat {
                    reason: format!("duplicate entry id {id}"),
                });
            }
            order.push(id);
            let numeric = id_map.allocate(id);
            index.add(numeric, &vector)?;
            cache.insert(id, vector)?;
        }

        info!(entries = map.len(), cells = index.cell_count(), "built search service");
        Ok(Self {
            encoder,
            nprobe: config.nprobe,
            params,
            state: RwLock::new(ServiceState {
                entries: map,
                order,
                index,
                cache,
                id_map,
                tombstones: HashSet::new(),
            }),
        })
    }

    /// Reconstruct the service from a loaded snapshot.
    pub fn from_snapshot(
        loaded: LoadedSnapshot,
        encoder: Arc<dyn EmbeddingEncoder>,
        config: &IndexConfig,
    ) -> SearchResult<Self> {
        let expected = encoder.dimension().get();
        let actual = loaded.index.dimension().get();
        if expected != actual {
            return Err(SearchError::DimensionMismatch { expected, actual });
        }

        let params = IndexParams {
            subvectors: config.subvectors,
            code_bits: config.code_bits,
        };
        let mut map = HashMap::with_capacity(loaded.entries.len());
        let mut order = Vec::with_capacity(loaded.entries.len());
        for entry in loaded.entries {
            order.push(entry.id);
            map.insert(entry.id, entry);
        }

        info!(entries = map.len(), "restored search service from snapshot");
        Ok(Self {
            encoder,
            nprobe: config.nprobe,
            params,
            state: RwLock::new(ServiceState {
                entries: map,
                order,
                index: loaded.index,
                cache: loaded.cache,
                id_map: loaded.id_map,
                tombstones: loaded.tombstones,
            }),
        })
    }

    /// Search the catalog.
    ///
    /// A query that is itself a positive integer matching a live catalog
    /// id yields an exact match at distance zero, placed first and not
    /// counted against `k`. ANN hits follow, nearest first, with stale
    /// and tombstoned postings filtered out; the candidate fetch is
    /// widened by the dead-posting count so mutations between rebuilds
    /// do not shrink the number of live results.
    pub fn search(&self, query: &str, k: usize) -> SearchResult<Vec<SearchMatch>> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if k == 0 {
            return Err(SearchError::InvalidK);
        }
        if !self.state.read().index.is_trained() {
            return Err(SearchError::Uninitialized);
        }

        // Encode outside the lock; the model call dominates latency.
        let vectors = self.encoder.encode(&[query])?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Encoding("encoder returned no vector".to_string()))?;

        let state = self.state.read();
        let mut results = Vec::new();

        let exact = EntryId::parse(query).filter(|id| {
            state.cache.contains(*id)
                && state.entries.contains_key(id)
                && !state.tombstones.contains(id)
        });
        if let Some(id) = exact {
            results.push(SearchMatch {
                entry_id: id,
                distance: 0.0,
                source: MatchSource::ExactId,
            });
        }

        // Dead postings (removed or superseded by updates) are filtered
        // below, so fetch enough extra candidates to keep k live hits
        // reachable; one more covers a possible exact-match duplicate.
        let dead = state.index.len().saturating_sub(state.id_map.len());
        let fetch = k.saturating_add(dead).saturating_add(1);
        let hits = state
            .index
            .search(&query_vector, fetch, self.nprobe)
            .map_err(|e| match e {
                VectorIndexError::NotTrained => SearchError::Uninitialized,
                other => SearchError::Index(other),
            })?;
        let mut ann_count = 0;
        for (numeric, distance) in hits {
            if ann_count == k {
                break;
            }
            let Some(entry_id) = state.id_map.entry(numeric) else {
                // Stale posting from an update or removal.
                continue;
            };
            if state.tombstones.contains(&entry_id) || !state.entries.contains_key(&entry_id) {
                continue;
            }
            if exact == Some(entry_id) {
                continue;
            }
            results.push(SearchMatch {
                entry_id,
                distance,
                source: MatchSource::Approximate,
            });
            ann_count += 1;
        }

        debug!(query_len = query.len(), k, results = results.len(), "search complete");
        Ok(results)
    }

    /// Search and render each hit as a context line, joined with ", ".
    pub fn search_and_format(&self, query: &str, k: usize) -> SearchResult<String> {
        let matches = self.search(query, k)?;
        let state = self.state.read();
        let lines: Vec<String> = matches
            .iter()
            .filter_map(|m| state.entries.get(&m.entry_id))
            .map(Entry::context_line)
            .collect();
        Ok(lines.join(", "))
    }

    /// Replace descriptions for the given entries, re-encoding only the
    /// ones whose text actually changed.
    ///
    /// All-or-nothing: every id is validated and every new vector is
    /// produced before any structure is touched, so a failed batch
    /// leaves the service unchanged.
    pub fn update_descriptions(&self, updates: &HashMap<EntryId, String>) -> SearchResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        if !state.index.is_trained() {
            return Err(SearchError::Uninitialized);
        }
        for id in updates.keys() {
            if !state.entries.contains_key(id) {
                return Err(SearchError::EntryNotFound { id: *id });
            }
        }

        // Stage changed entries without touching live state.
        let mut staged: Vec<Entry> = Vec::new();
        for (&id, description) in updates {
            let current = &state.entries[&id];
            if current.description == *description {
                continue;
            }
            let mut updated = current.clone();
            updated.set_description(description.clone());
            staged.push(updated);
        }
        if staged.is_empty() {
            return Ok(());
        }
        // Deterministic encode order regardless of map iteration.
        staged.sort_by_key(|entry| entry.id);

        let texts: Vec<&str> = staged.iter().map(|e| e.combined_text.as_str()).collect();
        let vectors = self.encoder.encode(&texts)?;
        if vectors.len() != staged.len() {
            return Err(SearchError::Encoding(format!(
                "encoder returned {} vectors for {} updates",
                vectors.len(),
                staged.len()
            )));
        }

        let count = staged.len();
        for (entry, vector) in staged.into_iter().zip(vectors) {
            let id = entry.id;
            // Fresh numeric id; the old posting becomes unresolvable.
            let numeric = state.id_map.allocate(id);
            state.index.add(numeric, &vector)?;
            state.cache.insert(id, vector)?;
            state.entries.insert(id, entry);
        }

        info!(updated = count, "applied description updates");
        Ok(())
    }

    /// Remove an entry: invisible to queries immediately, vector kept in
    /// the index until the next rebuild.
    pub fn remove_by_id(&self, id: EntryId) -> SearchResult<()> {
        let mut state = self.state.write();
        if state.entries.remove(&id).is_none() {
            return Err(SearchError::EntryNotFound { id });
        }
        state.order.retain(|&e| e != id);
        state.cache.remove(id);
        state.id_map.remove(id);
        state.tombstones.insert(id);
        info!(%id, "removed entry");
        Ok(())
    }

    /// Retrain and repopulate the index from cached vectors, dropping
    /// tombstones and stale postings.
    ///
    /// Deterministic for a fixed live set: entry order and training
    /// seeds are fixed, so two rebuilds with no intervening mutation
    /// produce identical results.
    pub fn rebuild(&self) -> SearchResult<()> {
        let mut state = self.state.write();

        let mut vectors = Vec::with_capacity(state.order.len());
        for &id in &state.order {
            let vector = state
                .cache
                .get(id)
                .ok_or(SearchError::EntryNotFound { id })?;
            vectors.push(vector.to_vec());
        }

        let mut index = IvfPqIndex::new(state.cache.dimension(), self.params)?;
        index.train(&vectors, false)?;
        let mut id_map = IdMap::new();
        for (&id, vector) in state.order.iter().zip(vectors.iter()) {
            let numeric = id_map.allocate(id);
            index.add(numeric, vector)?;
        }

        state.index = index;
        state.id_map = id_map;
        state.tombstones.clear();
        info!(entries = state.order.len(), "rebuilt index");
        Ok(())
    }

    /// Fraction of indexed postings that are dead weight: tombstoned or
    /// superseded by updates. A rebuild resets this to zero.
    #[must_use]
    pub fn stale_ratio(&self) -> f32 {
        let state = self.state.read();
        let total = state.index.len();
        if total == 0 {
            return 0.0;
        }
        let live = state.id_map.len();
        (total - live) as f32 / total as f32
    }

    /// Live catalog ids in insertion order.
    #[must_use]
    pub fn all_entry_ids(&self) -> Vec<EntryId> {
        self.state.read().order.clone()
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<Entry> {
        self.state.read().entries.get(&id).cloned()
    }

    /// Cached full-precision embedding for an entry.
    pub fn embedding(&self, id: EntryId) -> SearchResult<Vec<f32>> {
        self.state
            .read()
            .cache
            .get(id)
            .map(<[f32]>::to_vec)
            .ok_or(SearchError::EntryNotFound { id })
    }

    /// Persist the current state to a snapshot directory.
    pub fn persist(&self, snapshot: &Snapshot, model_name: &str) -> SearchResult<()> {
        let state = self.state.read();
        let entries: Vec<Entry> = state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).cloned())
            .collect();
        snapshot.save(
            model_name,
            &entries,
            &state.tombstones,
            &state.id_map,
            &state.index,
            &state.cache,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::embedding::mock::MockEncoder;

    use super::*;

    const DIM: usize = 8;

    fn config() -> IndexConfig {
        IndexConfig {
            nprobe: 6,
            subvectors: 2,
            code_bits: 8,
        }
    }

    fn entry(id: u32, title: &str, description: &str) -> Entry {
        Entry::new(
            EntryId::new(id).unwrap(),
            title.into(),
            description.into(),
            "facts".into(),
            "brand".into(),
            "red".into(),
            "us".into(),
        )
    }

    fn eid(id: u32) -> EntryId {
        EntryId::new(id).unwrap()
    }

    fn sample_entries() -> Vec<Entry> {
        vec![
            entry(1, "trail shoe", "lightweight running shoe"),
            entry(2, "camp kettle", "steel kettle for campfires"),
            entry(3, "wool socks", "warm hiking socks"),
            entry(4, "head lamp", "rechargeable head lamp"),
            entry(5, "rain tent", "two person rain tent"),
        ]
    }

    fn service() -> CatalogSearchService {
        CatalogSearchService::build(
            sample_entries(),
            Arc::new(MockEncoder::new(DIM)),
            &config(),
        )
        .unwrap()
    }

    /// Encoder that violates the one-vector-per-text contract.
    struct ShortEncoder;

    impl EmbeddingEncoder for ShortEncoder {
        fn encode(&self, texts: &[&str]) -> SearchResult<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0; DIM]).collect())
        }

        fn dimension(&self) -> crate::index::VectorDimension {
            crate::index::VectorDimension::new(DIM).unwrap()
        }
    }

    #[test]
    fn encoder_length_contract_is_enforced() {
        let err =
            CatalogSearchService::build(sample_entries(), Arc::new(ShortEncoder), &config())
                .unwrap_err();
        assert!(matches!(err, SearchError::Encoding(_)));
    }

    #[test]
    fn build_rejects_empty_corpus() {
        let err =
            CatalogSearchService::build(vec![], Arc::new(MockEncoder::new(DIM)), &config())
                .unwrap_err();
        assert!(matches!(err, SearchError::CorpusFormat { .. }));
    }

    #[test]
    fn validation_precedes_everything() {
        let svc = service();
        assert!(matches!(svc.search("   ", 5), Err(SearchError::EmptyQuery)));
        assert!(matches!(svc.search("shoe", 0), Err(SearchError::InvalidK)));
    }

    #[test]
    fn exact_id_match_comes_first_with_zero_distance() {
        let svc = service();
        let results = svc.search("3", 2).unwrap();
        assert_eq!(results[0].entry_id, eid(3));
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[0].source, MatchSource::ExactId);
        // Exact match is additive: up to k ANN hits may follow.
        assert!(results.len() <= 3);
        for m in &results[1..] {
            assert_eq!(m.source, MatchSource::Approximate);
            assert_ne!(m.entry_id, eid(3));
        }
    }

    #[test]
    fn non_numeric_query_has_no_exact_match() {
        let svc = service();
        let results = svc.search("warm socks for hiking", 3).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|m| m.source == MatchSource::Approximate));
        // Nearest first.
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn numeric_query_for_unknown_id_falls_back_to_ann() {
        let svc = service();
        let results = svc.search("999", 3).unwrap();
        assert!(results.iter().all(|m| m.source == MatchSource::Approximate));
    }

    #[test]
    fn identical_text_is_nearest() {
        let svc = service();
        let text = sample_entries()[1].combined_text.clone();
        let results = svc.search(&text, 1).unwrap();
        assert_eq!(results[0].entry_id, eid(2));
        assert!(results[0].distance < 1e-3);
    }

    #[test]
    fn removed_entry_disappears_from_all_queries() {
        let svc = service();
        svc.remove_by_id(eid(1)).unwrap();

        let exact = svc.search("1", 5).unwrap();
        assert!(exact.iter().all(|m| m.entry_id != eid(1)));

        let text = sample_entries()[0].combined_text.clone();
        let ann = svc.search(&text, 5).unwrap();
        assert!(ann.iter().all(|m| m.entry_id != eid(1)));

        assert!(matches!(
            svc.remove_by_id(eid(1)),
            Err(SearchError::EntryNotFound { .. })
        ));
        assert_eq!(svc.entry_count(), 4);
    }

    #[test]
    fn removals_do_not_shrink_live_result_count() {
        let svc = service();
        svc.remove_by_id(eid(1)).unwrap();
        svc.remove_by_id(eid(2)).unwrap();

        // Query with a removed entry's text: its dead posting ranks
        // nearest but must not displace live candidates.
        let query = sample_entries()[0].combined_text.clone();
        let results = svc.search(&query, 3).unwrap();
        assert_eq!(results.len(), 3);
        let live: Vec<EntryId> = vec![eid(3), eid(4), eid(5)];
        assert!(results.iter().all(|m| live.contains(&m.entry_id)));
    }

    #[test]
    fn ann_results_are_capped_at_k_after_filtering() {
        let svc = service();
        svc.remove_by_id(eid(1)).unwrap();

        let results = svc.search("camping gear", 2).unwrap();
        assert!(results.len() <= 2);
        assert!(results.iter().all(|m| m.entry_id != eid(1)));
    }

    #[test]
    fn update_rewrites_text_and_vector() {
        let svc = service();
        let before = svc.embedding(eid(2)).unwrap();

        let mut updates = HashMap::new();
        updates.insert(eid(2), "copper kettle for stoves".to_string());
        svc.update_descriptions(&updates).unwrap();

        let entry = svc.entry(eid(2)).unwrap();
        assert_eq!(entry.description, "copper kettle for stoves");
        assert!(entry.combined_text.contains("copper kettle for stoves"));
        assert_ne!(svc.embedding(eid(2)).unwrap(), before);

        // Searching the new text finds the entry.
        let results = svc.search(&entry.combined_text, 1).unwrap();
        assert_eq!(results[0].entry_id, eid(2));
    }

    #[test]
    fn unchanged_description_is_skipped() {
        let svc = service();
        let before = svc.embedding(eid(3)).unwrap();

        let mut updates = HashMap::new();
        updates.insert(eid(3), "warm hiking socks".to_string());
        svc.update_descriptions(&updates).unwrap();

        assert_eq!(svc.embedding(eid(3)).unwrap(), before);
        assert_eq!(svc.stale_ratio(), 0.0);
    }

    #[test]
    fn update_batch_fails_closed_on_unknown_id() {
        let svc = service();
        let before = svc.entry(eid(2)).unwrap();

        let mut updates = HashMap::new();
        updates.insert(eid(2), "new text".to_string());
        updates.insert(eid(99), "phantom".to_string());
        let err = svc.update_descriptions(&updates).unwrap_err();
        assert!(matches!(err, SearchError::EntryNotFound { .. }));

        // Nothing was applied.
        assert_eq!(svc.entry(eid(2)).unwrap(), before);
    }

    #[test]
    fn stale_ratio_tracks_mutations_and_rebuild_resets() {
        let svc = service();
        assert_eq!(svc.stale_ratio(), 0.0);

        svc.remove_by_id(eid(4)).unwrap();
        let mut updates = HashMap::new();
        updates.insert(eid(5), "one person tarp".to_string());
        svc.update_descriptions(&updates).unwrap();

        // 6 postings, 4 live: the removed entry and the superseded update.
        let ratio = svc.stale_ratio();
        assert!(ratio > 0.3 && ratio < 0.4, "ratio was {ratio}");

        svc.rebuild().unwrap();
        assert_eq!(svc.stale_ratio(), 0.0);
        assert_eq!(svc.entry_count(), 4);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let svc = service();
        svc.remove_by_id(eid(2)).unwrap();

        svc.rebuild().unwrap();
        let first = svc.search("warm socks", 3).unwrap();
        svc.rebuild().unwrap();
        let second = svc.search("warm socks", 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn removed_id_can_be_recycled_after_rebuild() {
        let svc = service();
        svc.remove_by_id(eid(1)).unwrap();
        svc.rebuild().unwrap();
        let results = svc.search("1", 1).unwrap();
        assert!(results.iter().all(|m| m.entry_id != eid(1)));
    }

    #[test]
    fn formatted_output_joins_context_lines() {
        let svc = service();
        let formatted = svc.search_and_format("2", 1).unwrap();
        assert!(formatted.starts_with("ID: 2, Name: camp kettle"));
        assert!(formatted.contains("Location: us"));
    }

    #[test]
    fn snapshot_round_trip_preserves_behavior() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));

        let svc = service();
        svc.remove_by_id(eid(4)).unwrap();
        svc.persist(&snapshot, "mock").unwrap();

        let loaded = snapshot.load().unwrap();
        let restored = CatalogSearchService::from_snapshot(
            loaded,
            Arc::new(MockEncoder::new(DIM)),
            &config(),
        )
        .unwrap();

        assert_eq!(restored.entry_count(), 4);
        let before = svc.search("warm socks", 3).unwrap();
        let after = restored.search("warm socks", 3).unwrap();
        assert_eq!(before, after);
        // Tombstone survives: the removed entry stays invisible.
        assert!(restored.search("4", 5).unwrap().iter().all(|m| m.entry_id != eid(4)));
    }

    #[test]
    fn snapshot_dimension_mismatch_is_rejected() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));
        let svc = service();
        svc.persist(&snapshot, "mock").unwrap();

        let loaded = snapshot.load().unwrap();
        let err = CatalogSearchService::from_snapshot(
            loaded,
            Arc::new(MockEncoder::new(DIM * 2)),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::DimensionMismatch { .. }));
    }
}
