//! JSON file permission store.
//!
//! Layout: `{ table: { id: { app_id: [token, ...] } } }`. The file is
//! re-read on every lookup so edits made by `portal permission` while the
//! daemon runs take effect immediately. Writes go through a temporary file
//! and a rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use portal_runtime::{PermissionEntry, PermissionStore};

use crate::error::{CliError, Result};

type Tables = BTreeMap<String, BTreeMap<String, PermissionEntry>>;

/// One stored permission row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRow {
	pub table: String,
	pub id: String,
	pub app_id: String,
	pub tokens: Vec<String>,
}

pub struct JsonPermissionStore {
	path: PathBuf,
	/// Serializes read-modify-write cycles within this process.
	write: Mutex<()>,
}

impl JsonPermissionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read(&self) -> Result<Tables> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Tables::new()),
			Err(err) => return Err(err.into()),
		};
		if content.trim().is_empty() {
			return Ok(Tables::new());
		}
		serde_json::from_str(&content).map_err(|source| CliError::PermissionStore {
			path: self.path.clone(),
			source,
		})
	}

	fn write(&self, tables: &Tables) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let tmp = self.path.with_extension("json.tmp");
		fs::write(&tmp, serde_json::to_string_pretty(tables)?)?;
		fs::rename(&tmp, &self.path)?;
		Ok(())
	}

	fn update<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
		let _write = self.write.lock();
		let mut tables = self.read()?;
		let out = f(&mut tables);
		self.write(&tables)?;
		Ok(out)
	}

	/// Rows in `table`, or in every table when `None`.
	pub fn list(&self, table: Option<&str>) -> Result<Vec<PermissionRow>> {
		let tables = self.read()?;
		let mut rows = Vec::new();
		for (name, ids) in &tables {
			if table.is_some_and(|t| t != name) {
				continue;
			}
			for (id, entry) in ids {
				for (app_id, tokens) in entry {
					rows.push(PermissionRow {
						table: name.clone(),
						id: id.clone(),
						app_id: app_id.clone(),
						tokens: tokens.clone(),
					});
				}
			}
		}
		Ok(rows)
	}

	/// Stores `tokens` for `app_id`.
	pub fn put(&self, table: &str, id: &str, app_id: &str, tokens: Vec<String>) -> Result<()> {
		self.update(|tables| {
			tables
				.entry(table.to_string())
				.or_default()
				.entry(id.to_string())
				.or_default()
				.insert(app_id.to_string(), tokens);
		})
	}

	/// Removes one app's entry, or the whole object when `app_id` is `None`.
	/// Returns how many app entries were removed.
	pub fn reset(&self, table: &str, id: &str, app_id: Option<&str>) -> Result<usize> {
		self.update(|tables| {
			let Some(ids) = tables.get_mut(table) else {
				return 0;
			};
			let removed = match app_id {
				Some(app_id) => {
					let Some(entry) = ids.get_mut(id) else {
						return 0;
					};
					let removed = usize::from(entry.remove(app_id).is_some());
					if entry.is_empty() {
						ids.remove(id);
					}
					removed
				}
				None => ids.remove(id).map_or(0, |entry| entry.len()),
			};
			if ids.is_empty() {
				tables.remove(table);
			}
			removed
		})
	}
}

impl PermissionStore for JsonPermissionStore {
	fn lookup(&self, table: &str, id: &str) -> portal_runtime::Result<PermissionEntry> {
		let tables = self.read().map_err(portal_runtime::Error::backend)?;
		Ok(tables
			.get(table)
			.and_then(|ids| ids.get(id))
			.cloned()
			.unwrap_or_default())
	}

	fn set(&self, table: &str, id: &str, app_id: &str, tokens: Vec<String>) -> portal_runtime::Result<()> {
		self.put(table, id, app_id, tokens).map_err(portal_runtime::Error::backend)
	}
}

#[cfg(test)]
mod tests {
	use portal_runtime::PermissionStore;
	use tempfile::TempDir;

	use super::*;

	fn store() -> (TempDir, JsonPermissionStore) {
		let dir = TempDir::new().unwrap();
		let store = JsonPermissionStore::new(dir.path().join("perms").join("permissions.json"));
		(dir, store)
	}

	#[test]
	fn missing_file_reads_as_empty() {
		let (_dir, store) = store();
		assert!(store.lookup("actions", "x").unwrap().is_empty());
		assert!(store.list(None).unwrap().is_empty());
	}

	#[test]
	fn set_is_visible_to_a_second_store_on_the_same_file() {
		let (_dir, store) = store();
		store
			.set("actions", "org.example.B::open", "org.example.A", vec!["yes".into()])
			.unwrap();

		let other = JsonPermissionStore::new(store.path());
		let entry = other.lookup("actions", "org.example.B::open").unwrap();
		assert_eq!(entry.get("org.example.A"), Some(&vec!["yes".to_string()]));
	}

	#[test]
	fn list_filters_by_table() {
		let (_dir, store) = store();
		store.put("actions", "a::b", "app.One", vec!["no".into()]).unwrap();
		store
			.put("portals", "geolocation", "app.One", vec!["EXACT".into(), "0".into()])
			.unwrap();

		let rows = store.list(Some("portals")).unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].id, "geolocation");
		assert_eq!(store.list(None).unwrap().len(), 2);
	}

	#[test]
	fn reset_removes_single_app_or_whole_object() {
		let (_dir, store) = store();
		store.put("notifications", "notification", "app.One", vec!["no".into()]).unwrap();
		store.put("notifications", "notification", "app.Two", vec!["yes".into()]).unwrap();

		assert_eq!(store.reset("notifications", "notification", Some("app.One")).unwrap(), 1);
		assert_eq!(store.reset("notifications", "notification", Some("app.One")).unwrap(), 0);
		assert_eq!(store.reset("notifications", "notification", None).unwrap(), 1);
		assert!(store.list(None).unwrap().is_empty());
	}

	#[test]
	fn corrupt_file_is_a_backend_error() {
		let (_dir, store) = store();
		std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
		std::fs::write(store.path(), "[1, 2").unwrap();

		assert!(matches!(store.list(None), Err(CliError::PermissionStore { .. })));
		let err = store.lookup("actions", "x").unwrap_err();
		assert_eq!(err.kind(), portal_protocol::ErrorName::Failed);
	}
}
