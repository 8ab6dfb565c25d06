use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use metrics::{gauge, histogram};
use time::OffsetDateTime;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{Brand, CarModel, CatalogSource, brand_slug, model_slug},
    store::{self, KvStore, StoreBackend, StoreError, WriteBatch},
};

use super::{
    SearchConfig,
    terms::{MIN_TERM_LEN, match_entries, normalize, terms_for},
    types::{
        BuildOutcome, BuildReport, IndexMeta, SearchError, SearchIndexEntry, SearchOutcome,
        SearchResults, SearchSource,
    },
};

pub const SEARCH_PREFIX: &str = "search";
pub const INDEX_FORMAT_VERSION: &str = "v1";

const METRIC_SEARCH_BUILD_MS: &str = "motorway_search_build_ms";
const METRIC_SEARCH_ENTRIES: &str = "motorway_search_entries";

const DELETE_CHUNK: usize = 500;
const BATCH_FLUSH_OPS: usize = 1_000;

fn data_key(id: &str) -> String {
    format!("{SEARCH_PREFIX}:data:{id}")
}

fn term_key(term: &str) -> String {
    format!("{SEARCH_PREFIX}:term:{term}")
}

fn meta_key() -> String {
    format!("{SEARCH_PREFIX}:meta")
}

/// Escape glob metacharacters so user input can be used as a scan prefix.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Join models with their brands into index entries.
///
/// A model whose brand is missing keeps an empty brand; its slug is then the
/// model slug alone.
pub fn build_entries(models: &[CarModel], brands: &[Brand]) -> Vec<SearchIndexEntry> {
    let brands: HashMap<&str, &Brand> = brands
        .iter()
        .map(|brand| (brand.id.as_str(), brand))
        .collect();

    models
        .iter()
        .map(|model| {
            let brand = brands.get(model.brand_id.as_str());
            let brand_name = brand.map(|brand| brand.name.clone()).unwrap_or_default();
            let brand_slug = brand.map(|brand| brand_slug(brand)).unwrap_or_default();
            let model_slug = model_slug(model);
            let slug = if brand_slug.is_empty() {
                model_slug.clone()
            } else {
                format!("{brand_slug}-{model_slug}")
            };

            SearchIndexEntry {
                id: model.id.clone(),
                name: model.name.clone(),
                brand_name,
                brand_slug,
                model_slug,
                slug,
                hero_image: model.hero_image.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct LocalIndex {
    entries: HashMap<String, SearchIndexEntry>,
    meta: Option<IndexMeta>,
}

impl LocalIndex {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resets the single-flight flag when a build ends, including on error,
/// and wakes anyone waiting for that build to finish.
struct BuildGuard<'a> {
    building: &'a AtomicBool,
    done: &'a Notify,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.building.store(false, Ordering::Release);
        self.done.notify_waiters();
    }
}

/// Prefix search over the catalog.
///
/// The process-local map answers queries whenever it is populated; the
/// distributed copy serves processes that have not built yet. Each build
/// deletes and rewrites the whole distributed copy, which is cheap for
/// catalogs of a few thousand models and grows linearly beyond that.
pub struct SearchIndex {
    config: SearchConfig,
    store: Arc<dyn KvStore>,
    catalog: Arc<dyn CatalogSource>,
    local: ArcSwap<LocalIndex>,
    building: AtomicBool,
    build_done: Notify,
}

impl SearchIndex {
    pub fn new(
        config: SearchConfig,
        store: Arc<dyn KvStore>,
        catalog: Arc<dyn CatalogSource>,
    ) -> Self {
        Self {
            config,
            store,
            catalog,
            local: ArcSwap::from_pointee(LocalIndex::default()),
            building: AtomicBool::new(false),
            build_done: Notify::new(),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Number of entries in the process-local map.
    pub fn local_len(&self) -> usize {
        self.local.load().entries.len()
    }

    /// Rebuild the index from the catalog. A build already running in this
    /// process makes this a no-op.
    pub async fn build(&self) -> Result<BuildOutcome, SearchError> {
        if self
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(index = "search", "build already running, skipping");
            return Ok(BuildOutcome::AlreadyRunning);
        }
        let _guard = BuildGuard {
            building: &self.building,
            done: &self.build_done,
        };
        let started_at = Instant::now();

        let (models, brands) =
            tokio::try_join!(self.catalog.active_models(), self.catalog.brands())?;
        let entries = build_entries(&models, &brands);
        let meta = IndexMeta {
            last_build: OffsetDateTime::now_utc(),
            model_count: entries.len(),
            brand_count: brands.len(),
            version: INDEX_FORMAT_VERSION.to_string(),
        };

        let postings = postings(&entries);
        let local = LocalIndex {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
            meta: Some(meta.clone()),
        };
        let local = Arc::new(local);
        self.local.store(Arc::clone(&local));
        gauge!(METRIC_SEARCH_ENTRIES).set(local.entries.len() as f64);

        let stored = match self.write_store(&local, &postings, &meta).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    index = "search",
                    error = %err,
                    "failed to write distributed index, local index stays authoritative"
                );
                false
            }
        };

        let elapsed = started_at.elapsed();
        histogram!(METRIC_SEARCH_BUILD_MS).record(elapsed.as_secs_f64() * 1000.0);

        let report = BuildReport {
            models: meta.model_count,
            brands: meta.brand_count,
            terms: postings.len(),
            stored,
            elapsed_ms: elapsed.as_millis() as u64,
        };
        info!(
            index = "search",
            models = report.models,
            brands = report.brands,
            terms = report.terms,
            stored,
            elapsed_ms = report.elapsed_ms,
            "search index built"
        );
        Ok(BuildOutcome::Built(report))
    }

    /// Replace every `search:*` key with the given generation.
    async fn write_store(
        &self,
        local: &LocalIndex,
        postings: &BTreeMap<String, Vec<String>>,
        meta: &IndexMeta,
    ) -> Result<bool, SearchError> {
        if self.store.backend() == StoreBackend::Noop {
            return Ok(false);
        }

        let ttl = self.config.refresh_interval;
        let removed = self.clear_store().await?;
        debug!(index = "search", removed, "previous generation deleted");

        let mut batch = WriteBatch::new();
        for entry in local.entries.values() {
            batch.set_ex(data_key(&entry.id), serde_json::to_vec(entry)?, ttl);
            if batch.len() >= BATCH_FLUSH_OPS {
                self.store.execute_batch(std::mem::take(&mut batch)).await?;
            }
        }
        for (term, ids) in postings {
            let key = term_key(term);
            for id in ids {
                batch.zadd(key.as_str(), id.as_str(), 0.0);
            }
            batch.expire(key, ttl);
            if batch.len() >= BATCH_FLUSH_OPS {
                self.store.execute_batch(std::mem::take(&mut batch)).await?;
            }
        }
        batch.set_ex(meta_key(), serde_json::to_vec(meta)?, ttl);
        self.store.execute_batch(batch).await?;

        Ok(true)
    }

    async fn clear_store(&self) -> Result<u64, StoreError> {
        store::delete_matching(
            self.store.as_ref(),
            &format!("{SEARCH_PREFIX}:*"),
            DELETE_CHUNK,
        )
        .await
    }

    /// Search for `text`, local map first, then the distributed copy.
    pub async fn query(&self, text: &str, limit: usize) -> SearchOutcome {
        let normalized = normalize(text);
        let limit = limit.clamp(1, self.config.max_limit);
        let local = self.local.load();

        if normalized.chars().count() < MIN_TERM_LEN {
            return SearchOutcome::Hits(SearchResults {
                results: Vec::new(),
                source: SearchSource::Memory,
                index_age: local.meta.as_ref().map(IndexMeta::age),
            });
        }

        if !local.is_empty() {
            return SearchOutcome::Hits(SearchResults {
                results: match_entries(local.entries.values(), &normalized, limit),
                source: SearchSource::Memory,
                index_age: local.meta.as_ref().map(IndexMeta::age),
            });
        }

        match self.query_store(&normalized, limit).await {
            Ok(Some(results)) => SearchOutcome::Hits(results),
            Ok(None) => SearchOutcome::Unavailable,
            Err(err) => {
                warn!(index = "search", error = %err, "distributed index query failed");
                SearchOutcome::Unavailable
            }
        }
    }

    async fn query_store(
        &self,
        normalized: &str,
        limit: usize,
    ) -> Result<Option<SearchResults>, SearchError> {
        if self.store.backend() == StoreBackend::Noop {
            return Ok(None);
        }

        let mut ids = self.store.zrange_all(&term_key(normalized)).await?;
        if ids.is_empty() {
            let pattern = format!("{}*", term_key(&escape_glob(normalized)));
            let keys = self
                .store
                .scan_match(&pattern, Some(self.config.prefix_scan_limit))
                .await?;
            let mut seen = HashSet::new();
            for key in keys {
                for id in self.store.zrange_all(&key).await? {
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
        }

        let meta = self.stored_meta().await?;
        if ids.is_empty() {
            if meta.is_none() && !self.store_has_data().await? {
                return Ok(None);
            }
            return Ok(Some(SearchResults {
                results: Vec::new(),
                source: SearchSource::Redis,
                index_age: meta.as_ref().map(IndexMeta::age),
            }));
        }

        let keys: Vec<String> = ids.iter().map(|id| data_key(id)).collect();
        let entries: Vec<SearchIndexEntry> = self
            .store
            .mget(&keys)
            .await?
            .into_iter()
            .flatten()
            .filter_map(|raw| match serde_json::from_slice::<SearchIndexEntry>(&raw) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(index = "search", error = %err, "skipping undecodable index record");
                    None
                }
            })
            .collect();

        Ok(Some(SearchResults {
            results: match_entries(&entries, normalized, limit),
            source: SearchSource::Redis,
            index_age: meta.as_ref().map(IndexMeta::age),
        }))
    }

    async fn stored_meta(&self) -> Result<Option<IndexMeta>, StoreError> {
        let Some(raw) = self.store.get(&meta_key()).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) => {
                debug!(index = "search", error = %err, "ignoring unreadable index meta");
                Ok(None)
            }
        }
    }

    async fn store_has_data(&self) -> Result<bool, StoreError> {
        let pattern = format!("{SEARCH_PREFIX}:data:*");
        Ok(!self.store.scan_match(&pattern, Some(1)).await?.is_empty())
    }

    /// Answer `text` straight from the catalog, for when [`Self::query`]
    /// reports [`SearchOutcome::Unavailable`].
    pub async fn query_live(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<SearchResults, SearchError> {
        let normalized = normalize(text);
        let limit = limit.clamp(1, self.config.max_limit);
        let (models, brands) =
            tokio::try_join!(self.catalog.active_models(), self.catalog.brands())?;
        let entries = build_entries(&models, &brands);
        Ok(SearchResults {
            results: match_entries(&entries, &normalized, limit),
            source: SearchSource::Catalog,
            index_age: None,
        })
    }

    /// Metadata of the newest generation this process knows about.
    pub async fn meta(&self) -> Option<IndexMeta> {
        if let Some(meta) = self.local.load().meta.clone() {
            return Some(meta);
        }
        match self.stored_meta().await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(index = "search", error = %err, "failed to read index meta");
                None
            }
        }
    }

    /// Drop the local map and the distributed copy, then rebuild.
    ///
    /// A build already in flight read the catalog before the drop, so its
    /// snapshot cannot be trusted. This waits for it to finish and then
    /// runs a build of its own, which is the one reported.
    pub async fn invalidate(&self) -> Result<BuildReport, SearchError> {
        self.local.store(Arc::new(LocalIndex::default()));
        gauge!(METRIC_SEARCH_ENTRIES).set(0.0);
        if let Err(err) = self.clear_store().await {
            warn!(index = "search", error = %err, "failed to delete distributed index");
        }

        loop {
            let finished = self.build_done.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            match self.build().await? {
                BuildOutcome::Built(report) => return Ok(report),
                BuildOutcome::AlreadyRunning => {
                    debug!(index = "search", "waiting for in-flight build before rebuilding");
                    finished.await;
                }
            }
        }
    }

    /// Rebuild on a fixed interval. The first tick is skipped; the startup
    /// build is the caller's job.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.build().await {
                    Ok(BuildOutcome::Built(_)) => {}
                    Ok(BuildOutcome::AlreadyRunning) => {
                        debug!(index = "search", "refresh skipped, build in progress");
                    }
                    Err(err) => error!(index = "search", error = %err, "scheduled rebuild failed"),
                }
            }
        })
    }
}

/// Term to ids, ids in entry order. `terms_for` yields each term once per
/// entry, so an id lands in a posting list at most once.
fn postings(entries: &[SearchIndexEntry]) -> BTreeMap<String, Vec<String>> {
    let mut postings: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        for term in terms_for(entry) {
            postings.entry(term).or_default().push(entry.id.clone());
        }
    }
    postings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{brand, model};

    #[test]
    fn entries_join_brand_and_slugs() {
        let mut creta = model("m-1", "Creta", "b-1");
        creta.hero_image = Some("creta.jpg".to_string());
        let orphan = model("m-2", "Mystery", "b-404");

        let entries = build_entries(&[creta, orphan], &[brand("b-1", "Hyundai")]);

        assert_eq!(entries[0].brand_name, "Hyundai");
        assert_eq!(entries[0].slug, "hyundai-creta");
        assert_eq!(entries[0].hero_image.as_deref(), Some("creta.jpg"));
        assert_eq!(entries[1].brand_name, "");
        assert_eq!(entries[1].slug, "mystery");
    }

    #[test]
    fn catalog_slugs_win_over_generated() {
        let mut creta = model("m-1", "Creta", "b-1");
        creta.slug = Some("creta-2024".to_string());
        let mut hyundai = brand("b-1", "Hyundai");
        hyundai.slug = Some("hyundai-india".to_string());

        let entries = build_entries(&[creta], &[hyundai]);
        assert_eq!(entries[0].slug, "hyundai-india-creta-2024");
    }

    #[test]
    fn postings_share_terms_between_models() {
        let entries = build_entries(
            &[model("m-1", "Creta", "b-1"), model("m-2", "Venue", "b-1")],
            &[brand("b-1", "Hyundai")],
        );
        let postings = postings(&entries);
        assert_eq!(postings["hyundai"], vec!["m-1", "m-2"]);
        assert_eq!(postings["cr"], vec!["m-1"]);
    }

    #[test]
    fn repeated_words_post_an_id_once() {
        let entries = build_entries(&[model("m-1", "Cross Cross", "b-1")], &[brand("b-1", "Cross")]);
        let postings = postings(&entries);
        assert_eq!(postings["cross"], vec!["m-1"]);
        assert_eq!(postings["cr"], vec!["m-1"]);
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
