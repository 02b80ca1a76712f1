//! Plugin metadata store - every discovered plugin, loaded or not

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::domain::entities::CommandHandler;
use crate::plugins::trait_def::{LoadState, Plugin, PluginSummary};

/// Locations with this prefix name compiled-in plugins and are never touched by
/// path normalization.
pub const BUILTIN_SCHEME: &str = "builtin:";

/// A live plugin instance together with everything it registered
#[derive(Clone)]
pub struct LoadedPlugin {
    pub plugin: Arc<dyn Plugin>,
    /// Category forced from the descriptor
    pub category: Option<String>,
    pub commands: Vec<Arc<CommandHandler>>,
    /// Monotonic load sequence, defines fallback routing order
    pub load_seq: u64,
}

/// Discovery-time record of a plugin module
pub struct PluginDescriptor {
    pub location: PathBuf,
    pub category: Option<String>,
    instance: Option<LoadedPlugin>,
}

impl PluginDescriptor {
    pub fn new(location: impl AsRef<Path>, category: Option<String>) -> Self {
        Self {
            location: normalize_location(location.as_ref()),
            category,
            instance: None,
        }
    }

    pub fn state(&self) -> LoadState {
        if self.instance.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Unloaded
        }
    }

    pub fn instance(&self) -> Option<&LoadedPlugin> {
        self.instance.as_ref()
    }

    pub fn set_instance(&mut self, instance: LoadedPlugin) {
        self.instance = Some(instance);
    }

    /// Drop the instance, returning it so the caller can unregister its commands
    pub fn take_instance(&mut self) -> Option<LoadedPlugin> {
        self.instance.take()
    }

    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            location: self.location.clone(),
            category: self.category.clone(),
            state: self.state(),
            info: self.instance.as_ref().map(|i| i.plugin.info().clone()),
            commands: self
                .instance
                .as_ref()
                .map(|i| i.commands.iter().flat_map(|c| c.tokens.iter().cloned()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Keyed by normalized location; at most one descriptor per location
#[derive(Default)]
pub struct MetadataStore {
    descriptors: BTreeMap<PathBuf, PluginDescriptor>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor unless one already exists for its location.
    /// Returns true when the descriptor was added.
    pub fn insert(&mut self, descriptor: PluginDescriptor) -> bool {
        if self.descriptors.contains_key(&descriptor.location) {
            return false;
        }
        self.descriptors.insert(descriptor.location.clone(), descriptor);
        true
    }

    pub fn get(&self, location: &Path) -> Option<&PluginDescriptor> {
        self.descriptors.get(&normalize_location(location))
    }

    pub fn get_mut(&mut self, location: &Path) -> Option<&mut PluginDescriptor> {
        self.descriptors.get_mut(&normalize_location(location))
    }

    pub fn contains(&self, location: &Path) -> bool {
        self.descriptors.contains_key(&normalize_location(location))
    }

    /// Locations of every descriptor currently `Unloaded`
    pub fn unloaded(&self) -> Vec<PathBuf> {
        self.descriptors
            .values()
            .filter(|d| d.state() == LoadState::Unloaded)
            .map(|d| d.location.clone())
            .collect()
    }

    /// Loaded instances in the order they were loaded
    pub fn loaded_in_order(&self) -> Vec<LoadedPlugin> {
        let mut loaded: Vec<LoadedPlugin> = self
            .descriptors
            .values()
            .filter_map(|d| d.instance.clone())
            .collect();
        loaded.sort_by_key(|i| i.load_seq);
        loaded
    }

    pub fn summaries(&self) -> Vec<PluginSummary> {
        self.descriptors.values().map(PluginDescriptor::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn loaded_count(&self) -> usize {
        self.descriptors
            .values()
            .filter(|d| d.state() == LoadState::Loaded)
            .count()
    }
}

/// Absolute, lexically cleaned form of a module location
pub fn normalize_location(location: &Path) -> PathBuf {
    if location.to_string_lossy().starts_with(BUILTIN_SCHEME) {
        return location.to_path_buf();
    }

    let absolute = std::path::absolute(location).unwrap_or_else(|_| location.to_path_buf());
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Category of a module: the first directory below the plugin root.
///
/// Files directly under the root, or outside it, have no category.
pub fn category_for(root: &Path, location: &Path) -> Option<String> {
    let relative = normalize_location(location);
    let relative = relative.strip_prefix(normalize_location(root)).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // A lone component is the file itself
    components.next()?;
    match first {
        Component::Normal(name) => name.to_str().map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_dots() {
        let a = normalize_location(Path::new("/srv/bot/plugins/./fun/../fun/x.yaml"));
        assert_eq!(a, PathBuf::from("/srv/bot/plugins/fun/x.yaml"));
    }

    #[test]
    fn test_normalize_keeps_builtin_locations() {
        let loc = PathBuf::from("builtin:ping");
        assert_eq!(normalize_location(&loc), loc);
    }

    #[test]
    fn test_one_descriptor_per_location() {
        let mut store = MetadataStore::new();
        assert!(store.insert(PluginDescriptor::new("/p/fun/a.yaml", Some("fun".into()))));
        assert!(!store.insert(PluginDescriptor::new("/p/fun/./a.yaml", None)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(Path::new("/p/fun/a.yaml")).unwrap().category.as_deref(), Some("fun"));
        assert_eq!(store.unloaded().len(), 1);
    }

    #[test]
    fn test_category_uses_first_segment() {
        let root = Path::new("/p");
        assert_eq!(category_for(root, Path::new("/p/fun/a.yaml")).as_deref(), Some("fun"));
        assert_eq!(category_for(root, Path::new("/p/fun/deep/er/a.yaml")).as_deref(), Some("fun"));
        assert_eq!(category_for(root, Path::new("/p/a.yaml")), None);
        assert_eq!(category_for(root, Path::new("/elsewhere/fun/a.yaml")), None);
    }
}
