//! Resolution of stored unit identifiers into renderable units.
//!
//! Two strategies, tried in order:
//!
//! 1. **Structured** — the filename names a module registered ahead of time
//!    in the [`UnitRegistry`]. The export matching the name hint wins, then
//!    the default export, then the first export.
//! 2. **Raw source** — runtime-generated filenames are never in the
//!    registry, so the source text is read back from the [`UnitStore`] and
//!    handed to the renderer's raw-source chain.
//!
//! Results are memoized in a [`UnitCache`] owned by the loader, one entry
//! per filename. Stored units are immutable, so entries never go stale;
//! `evict` and `clear` exist for tests and embedders that re-register
//! modules.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;
use crate::resolve::is_safe_component;
use crate::sanitize::extract_unit_name;
use crate::store::UnitStore;

/// A directly callable unit.
///
/// `render` turns a data payload into an HTML fragment. Implementations may
/// fail or panic; the renderer converts both into an error panel.
pub trait Unit: Send + Sync {
    fn name(&self) -> &str;

    fn render(&self, data: &Value) -> anyhow::Result<String>;
}

/// A module of named exports plus an optional default export.
#[derive(Clone, Default)]
pub struct UnitModule {
    exports: BTreeMap<String, Arc<dyn Unit>>,
    order: Vec<String>,
    default: Option<Arc<dyn Unit>>,
}

impl UnitModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named export. Re-exporting a name replaces it in place.
    pub fn export(mut self, unit: Arc<dyn Unit>) -> Self {
        let name = unit.name().to_string();
        if !self.exports.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.exports.insert(name, unit);
        self
    }

    pub fn with_default(mut self, unit: Arc<dyn Unit>) -> Self {
        self.default = Some(unit);
        self
    }

    /// Hint match, else default export, else first named export.
    pub fn select(&self, hint: Option<&str>) -> Option<Arc<dyn Unit>> {
        if let Some(unit) = hint.and_then(|h| self.exports.get(h)) {
            return Some(unit.clone());
        }
        if let Some(unit) = &self.default {
            return Some(unit.clone());
        }
        self.order
            .first()
            .and_then(|name| self.exports.get(name))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty() && self.default.is_none()
    }
}

/// Modules known ahead of time, keyed by filename.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    modules: HashMap<String, UnitModule>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, filename: impl Into<String>, module: UnitModule) {
        self.modules.insert(filename.into(), module);
    }

    pub fn get(&self, filename: &str) -> Option<&UnitModule> {
        self.modules.get(filename)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// What the loader resolved a filename into.
#[derive(Clone)]
pub enum LoadedUnit {
    Structured {
        filename: String,
        unit: Arc<dyn Unit>,
    },
    RawSource {
        filename: String,
        unit_name: Option<String>,
        source: String,
    },
}

impl LoadedUnit {
    pub fn filename(&self) -> &str {
        match self {
            LoadedUnit::Structured { filename, .. } | LoadedUnit::RawSource { filename, .. } => {
                filename
            }
        }
    }

    pub fn unit_name(&self) -> Option<&str> {
        match self {
            LoadedUnit::Structured { unit, .. } => Some(unit.name()),
            LoadedUnit::RawSource { unit_name, .. } => unit_name.as_deref(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, LoadedUnit::Structured { .. })
    }
}

impl std::fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedUnit::Structured { filename, unit } => f
                .debug_struct("Structured")
                .field("filename", filename)
                .field("unit", &unit.name())
                .finish(),
            LoadedUnit::RawSource {
                filename,
                unit_name,
                source,
            } => f
                .debug_struct("RawSource")
                .field("filename", filename)
                .field("unit_name", unit_name)
                .field("source_len", &source.len())
                .finish(),
        }
    }
}

/// What a filename resolved to, before any name hint is applied.
#[derive(Clone)]
enum CacheEntry {
    Module(UnitModule),
    Source {
        source: String,
        unit_name: Option<String>,
    },
}

impl CacheEntry {
    /// Apply `hint` to produce a [`LoadedUnit`]. `None` when a module has no
    /// export to offer.
    fn resolve(&self, filename: &str, hint: Option<&str>) -> Option<LoadedUnit> {
        match self {
            CacheEntry::Module(module) => module.select(hint).map(|unit| LoadedUnit::Structured {
                filename: filename.to_string(),
                unit,
            }),
            CacheEntry::Source { source, unit_name } => Some(LoadedUnit::RawSource {
                filename: filename.to_string(),
                unit_name: hint.map(str::to_string).or_else(|| unit_name.clone()),
                source: source.clone(),
            }),
        }
    }
}

/// Memo of resolved units, one entry per filename.
///
/// Name hints are applied on the way out, so the number of entries is
/// bounded by the number of stored units however many hints callers send.
#[derive(Default)]
pub struct UnitCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl UnitCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, filename: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().ok()?;
        entries.get(filename).cloned()
    }

    fn insert(&self, filename: &str, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(filename.to_string(), entry);
        }
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(filename))
            .unwrap_or(false)
    }

    /// Drop the entry for `filename`. Returns whether one was present.
    pub fn evict(&self, filename: &str) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => entries.remove(filename).is_some(),
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves filenames through the registry, then the store.
pub struct UnitLoader {
    registry: Arc<UnitRegistry>,
    store: Arc<dyn UnitStore>,
    cache: UnitCache,
}

impl UnitLoader {
    pub fn new(registry: Arc<UnitRegistry>, store: Arc<dyn UnitStore>) -> Self {
        Self {
            registry,
            store,
            cache: UnitCache::new(),
        }
    }

    pub fn cache(&self) -> &UnitCache {
        &self.cache
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Resolve `filename` into a [`LoadedUnit`].
    ///
    /// # Errors
    ///
    /// - [`LoadError::InvalidFilename`] for names that are not a single path
    ///   component.
    /// - [`LoadError::NoExport`] when a registered module has no exports and
    ///   no raw source is stored either.
    /// - [`LoadError::SourceUnavailable`] when the raw-source read fails.
    pub async fn load(&self, filename: &str, hint: Option<&str>) -> Result<LoadedUnit, LoadError> {
        if !is_safe_component(filename) {
            return Err(LoadError::InvalidFilename(filename.to_string()));
        }

        if let Some(loaded) = self
            .cache
            .get(filename)
            .and_then(|entry| entry.resolve(filename, hint))
        {
            debug!(filename, "unit cache hit");
            return Ok(loaded);
        }

        let registered = self.registry.get(filename);
        if let Some(module) = registered.filter(|m| !m.is_empty()) {
            let entry = CacheEntry::Module(module.clone());
            if let Some(loaded) = entry.resolve(filename, hint) {
                debug!(filename, unit = ?loaded.unit_name(), "structured load");
                self.cache.insert(filename, entry);
                return Ok(loaded);
            }
        }

        let entry = match self.store.read(filename).await {
            Ok(source) => {
                let unit_name = extract_unit_name(&source);
                debug!(filename, ?unit_name, "raw-source load");
                CacheEntry::Source { source, unit_name }
            }
            Err(_) if registered.is_some() => {
                return Err(LoadError::NoExport(filename.to_string()));
            }
            Err(source) => {
                return Err(LoadError::SourceUnavailable {
                    filename: filename.to_string(),
                    source,
                });
            }
        };

        let loaded = entry
            .resolve(filename, hint)
            .ok_or_else(|| LoadError::NoExport(filename.to_string()))?;
        self.cache.insert(filename, entry);
        Ok(loaded)
    }
}
