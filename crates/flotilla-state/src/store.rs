//! In-memory app registry.
//!
//! Apps are stored behind `Arc` so readers get cheap, immutable handles;
//! mutation goes through [`AppStore::update`], which swaps in a modified
//! copy under the write lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flotilla_core::{FieldSelector, LabelSelector, Matcher, SelectorError};
use tracing::debug;

use crate::app::App;

/// Optional selectors applied by [`AppStore::filter`]. An absent selector
/// matches every app.
#[derive(Debug, Clone, Default)]
pub struct AppFilterOptions {
    pub labels: Option<LabelSelector>,
    pub fields: Option<FieldSelector>,
}

impl AppFilterOptions {
    /// Parse selector expressions as they arrive from a caller.
    /// Empty or missing expressions select everything.
    pub fn parse(labels: Option<&str>, fields: Option<&str>) -> Result<Self, SelectorError> {
        let labels = labels
            .filter(|s| !s.trim().is_empty())
            .map(LabelSelector::parse)
            .transpose()?;
        let fields = fields
            .filter(|s| !s.trim().is_empty())
            .map(FieldSelector::parse)
            .transpose()?;
        Ok(Self { labels, fields })
    }

    fn matches(&self, app: &App) -> bool {
        if let Some(labels) = &self.labels {
            let set = app.labels();
            if !labels.matches(set) {
                return false;
            }
        }
        if let Some(fields) = &self.fields {
            if !fields.matches(&app.fields()) {
                return false;
            }
        }
        true
    }
}

struct Entry {
    /// Insertion order, used to break `updated_at` ties.
    seq: u64,
    app: Arc<App>,
}

#[derive(Default)]
struct Inner {
    apps: HashMap<String, Entry>,
    next_seq: u64,
}

/// Thread-safe registry of apps keyed by id.
#[derive(Clone, Default)]
pub struct AppStore {
    inner: Arc<RwLock<Inner>>,
}

impl AppStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace an app. Replacing keeps the original insertion
    /// position for ordering.
    pub fn add(&self, app: App) -> Arc<App> {
        let app = Arc::new(app);
        let mut inner = self.write();
        let seq = match inner.apps.get(&app.id) {
            Some(existing) => existing.seq,
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        inner.apps.insert(
            app.id.clone(),
            Entry {
                seq,
                app: app.clone(),
            },
        );
        debug!(app = %app.id, "app stored");
        app
    }

    pub fn get(&self, id: &str) -> Option<Arc<App>> {
        self.read().apps.get(id).map(|e| e.app.clone())
    }

    /// Remove an app. Removing an unknown id is not an error.
    pub fn delete(&self, id: &str) -> Option<Arc<App>> {
        let removed = self.write().apps.remove(id).map(|e| e.app);
        if removed.is_some() {
            debug!(app = %id, "app deleted");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the registry. Later writes are not visible
    /// through the returned map.
    pub fn snapshot(&self) -> HashMap<String, Arc<App>> {
        self.read()
            .apps
            .iter()
            .map(|(id, e)| (id.clone(), e.app.clone()))
            .collect()
    }

    /// Apply `f` to a copy of the app and store the result. Readers holding
    /// the previous `Arc` keep seeing the old state.
    pub fn update<T, E>(
        &self,
        id: &str,
        f: impl FnOnce(&mut App) -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        let mut inner = self.write();
        let entry = inner.apps.get_mut(id)?;
        let mut app = App::clone(&entry.app);
        let result = f(&mut app);
        if result.is_ok() {
            entry.app = Arc::new(app);
        }
        Some(result)
    }

    /// Apps matching `options`, most recently updated first. Ties keep
    /// insertion order.
    pub fn filter(&self, options: &AppFilterOptions) -> Vec<Arc<App>> {
        let inner = self.read();
        let mut matched: Vec<(u64, Arc<App>)> = inner
            .apps
            .values()
            .filter(|e| options.matches(&e.app))
            .map(|e| (e.seq, e.app.clone()))
            .collect();
        drop(inner);

        matched.sort_by(|(a_seq, a), (b_seq, b)| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a_seq.cmp(b_seq))
        });
        matched.into_iter().map(|(_, app)| app).collect()
    }

    /// Parse selector expressions and filter in one step.
    pub fn query(
        &self,
        labels: Option<&str>,
        fields: Option<&str>,
    ) -> Result<Vec<Arc<App>>, SelectorError> {
        let options = AppFilterOptions::parse(labels, fields)?;
        Ok(self.filter(&options))
    }
}
