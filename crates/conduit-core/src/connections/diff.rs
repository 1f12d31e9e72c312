//! Classifying changes between two connection sets.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{ConnectionConfig, ConnectionSet};

/// Connections grouped by plugin identity.
pub type PluginGroups = BTreeMap<String, Vec<ConnectionConfig>>;

/// Changes between the applied and the declared set, keyed by plugin.
///
/// A connection whose plugin changed is never in `changed`: it is deleted
/// under the old plugin and added under the new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionDiff {
    pub added: PluginGroups,
    pub changed: PluginGroups,
    pub deleted: PluginGroups,
}

fn push(groups: &mut PluginGroups, config: &ConnectionConfig) {
    groups
        .entry(config.plugin.clone())
        .or_default()
        .push(config.clone());
}

fn names(groups: &PluginGroups) -> BTreeSet<String> {
    groups
        .values()
        .flatten()
        .map(|config| config.name.clone())
        .collect()
}

/// Computes the diff from `old` to `new`.
pub fn diff(old: &ConnectionSet, new: &ConnectionSet) -> ConnectionDiff {
    let mut result = ConnectionDiff::default();

    for previous in old.iter() {
        match new.get(&previous.name) {
            None => push(&mut result.deleted, previous),
            Some(current) if current.plugin != previous.plugin => {
                push(&mut result.deleted, previous);
                push(&mut result.added, current);
            }
            Some(current) if current.payload_differs(previous) => {
                push(&mut result.changed, current);
            }
            Some(_) => {}
        }
    }

    for current in new.iter() {
        if !old.contains(&current.name) {
            push(&mut result.added, current);
        }
    }

    result
}

impl ConnectionDiff {
    /// Names to drop and re-import, from `added` and `changed`.
    pub fn update_names(&self) -> BTreeSet<String> {
        let mut all = names(&self.added);
        all.extend(names(&self.changed));
        all
    }

    /// Names whose schema is dropped.
    pub fn deleted_names(&self) -> BTreeSet<String> {
        names(&self.deleted)
    }

    /// Names deleted and not re-added under another plugin.
    pub fn removed_names(&self) -> BTreeSet<String> {
        let updates = self.update_names();
        self.deleted_names()
            .into_iter()
            .filter(|name| !updates.contains(name))
            .collect()
    }

    /// Moves otherwise unchanged connections of `declared` named in
    /// `promoted` into `changed`. Unknown names and names already being
    /// updated are ignored. Returns the names that were promoted.
    pub fn promote<'a, I>(&mut self, declared: &ConnectionSet, promoted: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut updates = self.update_names();
        let mut moved = Vec::new();
        for name in promoted {
            if updates.contains(name) {
                continue;
            }
            if let Some(config) = declared.get(name) {
                push(&mut self.changed, config);
                updates.insert(name.to_string());
                moved.push(name.to_string());
            }
        }
        moved
    }

    /// Updates grouped by plugin, `added` and `changed` merged.
    pub fn updates_by_plugin(&self) -> PluginGroups {
        let mut merged = self.added.clone();
        for (plugin, configs) in &self.changed {
            merged
                .entry(plugin.clone())
                .or_default()
                .extend(configs.iter().cloned());
        }
        for configs in merged.values_mut() {
            configs.sort_by(|a, b| a.name.cmp(&b.name));
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }
}
