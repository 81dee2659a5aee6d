//! Concurrency-safe key table with per-source attribution.

// std
use std::{
	collections::{HashMap, HashSet},
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use tokio::sync::RwLock;
// self
use crate::{_prelude::*, key::KeyMaterial, metrics};

/// Origin of a set of cached keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeySource {
	/// Keys from the `secrets` configuration table.
	Static,
	/// Keys fetched from the given key-set URL.
	Endpoint(String),
}
impl Display for KeySource {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Static => f.write_str("config"),
			Self::Endpoint(url) => f.write_str(url),
		}
	}
}

/// Snapshot of the cache contents for status reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyCacheSnapshot {
	/// Cached key identifiers, sorted.
	pub kids: Vec<String>,
	/// Key identifiers per source, sorted.
	pub sources: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Default)]
struct KeyTable {
	keys: HashMap<String, Arc<KeyMaterial>>,
	sources: HashMap<KeySource, HashSet<String>>,
}
impl KeyTable {
	fn replace(&mut self, source: KeySource, keys: HashMap<String, Arc<KeyMaterial>>) -> usize {
		self.sources.insert(source, keys.keys().cloned().collect());
		self.keys.extend(keys);

		self.purge()
	}

	fn purge(&mut self) -> usize {
		let owned: HashSet<&String> = self.sources.values().flatten().collect();
		let orphaned: Vec<String> =
			self.keys.keys().filter(|kid| !owned.contains(kid)).cloned().collect();

		for kid in &orphaned {
			self.keys.remove(kid);

			tracing::info!(kid = %kid, "purged key no longer published by any source");
		}

		orphaned.len()
	}
}

/// Mapping from key identifier to key material, attributed to the source that supplied it.
///
/// Every cached identifier belongs to at least one source; storing a source's new key set drops the
/// identifiers no source publishes anymore.
#[derive(Debug, Default)]
pub struct KeyCache {
	table: RwLock<KeyTable>,
}
impl KeyCache {
	/// Create a cache seeded with statically configured keys.
	pub fn with_static<I>(keys: I) -> Self
	where
		I: IntoIterator<Item = (String, Arc<KeyMaterial>)>,
	{
		let keys: HashMap<_, _> = keys.into_iter().collect();
		let mut table = KeyTable::default();

		if !keys.is_empty() {
			table.replace(KeySource::Static, keys);
		}

		Self { table: RwLock::new(table) }
	}

	/// Key cached under `kid`, if any.
	pub async fn lookup(&self, kid: &str) -> Option<Arc<KeyMaterial>> {
		self.table.read().await.keys.get(kid).cloned()
	}

	/// Replace the key set of `source` and purge orphaned keys, returning how many were dropped.
	pub async fn store(&self, source: KeySource, keys: HashMap<String, Arc<KeyMaterial>>) -> usize {
		let stored = keys.len();
		let purged = {
			let mut table = self.table.write().await;

			table.replace(source.clone(), keys)
		};

		tracing::debug!(source = %source, stored, purged, "stored key set");
		metrics::record_purged(purged);

		purged
	}

	/// Number of cached keys.
	pub async fn len(&self) -> usize {
		self.table.read().await.keys.len()
	}

	/// Whether the cache holds no keys.
	pub async fn is_empty(&self) -> bool {
		self.table.read().await.keys.is_empty()
	}

	/// Capture the cached identifiers and their attribution.
	pub async fn snapshot(&self) -> KeyCacheSnapshot {
		let table = self.table.read().await;
		let mut kids: Vec<String> = table.keys.keys().cloned().collect();
		let mut sources: Vec<(String, Vec<String>)> = table
			.sources
			.iter()
			.map(|(source, kids)| {
				let mut kids: Vec<String> = kids.iter().cloned().collect();

				kids.sort_unstable();

				(source.to_string(), kids)
			})
			.collect();

		kids.sort_unstable();
		sources.sort_unstable();

		KeyCacheSnapshot { kids, sources }
	}
}
