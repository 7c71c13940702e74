use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use tracing::trace;

use super::Template;
use crate::error::SqlWeaveError;

const DEFAULT_CAPACITY: usize = 256;

static TEMPLATE_CACHE: LazyLock<TemplateCache> =
    LazyLock::new(|| TemplateCache::new(DEFAULT_CAPACITY));

pub(super) fn global() -> &'static TemplateCache {
    &TEMPLATE_CACHE
}

/// Bounded LRU of compiled templates keyed by exact template text.
///
/// Recency is tracked with a generation counter: hits are O(1), eviction scans for the
/// oldest generation.
#[derive(Debug)]
pub struct TemplateCache {
    inner: Mutex<TemplateCacheInner>,
}

#[derive(Debug)]
struct TemplateCacheInner {
    capacity: usize,
    map: HashMap<String, (Arc<Template>, u64)>,
    generation: u64,
}

impl TemplateCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TemplateCacheInner {
                capacity,
                map: HashMap::new(),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TemplateCacheInner> {
        // Clear the poison and continue with the recovered data
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn get(&self, text: &str) -> Option<Arc<Template>> {
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        let entry = inner.map.get_mut(text)?;
        entry.1 = generation;
        Some(Arc::clone(&entry.0))
    }

    /// Return the cached template for `text`, compiling and inserting it on a miss.
    ///
    /// Compilation runs outside the lock; when two callers race on the same miss the
    /// first insert wins and both get the same `Arc`.
    ///
    /// # Errors
    /// Returns `SqlWeaveError::TemplateSyntax` if `text` does not compile. Failures are not cached.
    pub fn get_or_compile(&self, text: &str) -> Result<Arc<Template>, SqlWeaveError> {
        if let Some(hit) = self.get(text) {
            return Ok(hit);
        }
        trace!(len = text.len(), "template cache miss");
        let compiled = Arc::new(Template::compile_uncached(text)?);
        Ok(self.insert_if_absent(text, compiled))
    }

    fn insert_if_absent(&self, text: &str, template: Arc<Template>) -> Arc<Template> {
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(existing) = inner.map.get_mut(text) {
            existing.1 = generation;
            return Arc::clone(&existing.0);
        }

        if inner.capacity == 0 {
            return template;
        }
        inner
            .map
            .insert(text.to_string(), (Arc::clone(&template), generation));
        inner.evict_if_needed();
        template
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().map.clear();
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.lock();
        inner.capacity = capacity;
        inner.evict_if_needed();
    }
}

impl TemplateCacheInner {
    fn evict_if_needed(&mut self) {
        while self.map.len() > self.capacity {
            let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, (_, generation))| *generation)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.map.remove(&oldest);
        }
    }
}

/// Number of templates currently held by the process-wide cache.
#[must_use]
pub fn template_cache_len() -> usize {
    global().len()
}

/// Drop every cached template.
pub fn clear_template_cache() {
    global().clear();
}

/// Resize the process-wide cache, evicting least-recently-used entries if it shrinks.
pub fn set_template_cache_capacity(capacity: usize) {
    global().set_capacity(capacity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = TemplateCache::new(2);
        cache.get_or_compile("select :a").unwrap();
        cache.get_or_compile("select :b").unwrap();
        // touch :a so :b becomes the eviction candidate
        assert!(cache.get("select :a").is_some());
        cache.get_or_compile("select :c").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("select :a").is_some());
        assert!(cache.get("select :b").is_none());
        assert!(cache.get("select :c").is_some());
    }

    #[test]
    fn hit_returns_shared_template() {
        let cache = TemplateCache::new(4);
        let first = cache.get_or_compile("select ?").unwrap();
        let second = cache.get_or_compile("select ?").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn syntax_errors_are_not_cached() {
        let cache = TemplateCache::new(4);
        assert!(cache.get_or_compile("select {").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = TemplateCache::new(0);
        let first = cache.get_or_compile("select 1").unwrap();
        assert!(cache.is_empty());
        assert_eq!(first.source(), "select 1");
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let cache = TemplateCache::new(3);
        for text in ["select 1", "select 2", "select 3"] {
            cache.get_or_compile(text).unwrap();
        }
        cache.set_capacity(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("select 3").is_some());
    }
}
