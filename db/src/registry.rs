//! Loader plugin registry.
//!
//! Plugins are registered as factories. Selection peeks at the leading
//! bytes of a file and instantiates the plugin reporting the highest
//! non-zero confidence; ties go to the plugin registered first.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::loader::FileLoader;

/// Descriptive information about a loader plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
}

/// Factory for a [`FileLoader`].
pub trait LoaderPlugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// Create a fresh, uninitialized loader.
    fn create(&self) -> Box<dyn FileLoader + Send>;
}

/// Set of registered loader plugins.
#[derive(Default)]
pub struct LoaderRegistry {
    plugins: Vec<Box<dyn LoaderPlugin>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn LoaderPlugin>) {
        log::debug!("[Registry] Registered loader {}", plugin.info().name);
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> impl Iterator<Item = PluginInfo> + '_ {
        self.plugins.iter().map(|p| p.info())
    }

    /// Instantiate the best loader for a file starting with `header`.
    pub fn select(&self, header: &[u8]) -> Option<(PluginInfo, Box<dyn FileLoader + Send>)> {
        let mut best: Option<(u32, Box<dyn FileLoader + Send>, PluginInfo)> = None;

        for plugin in &self.plugins {
            let loader = plugin.create();
            let score = loader.can_load(header);
            log::trace!("[Registry] {} scored {}", plugin.info().name, score);
            if score == 0 {
                continue;
            }
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, loader, plugin.info()));
            }
        }

        best.map(|(_, loader, info)| (info, loader))
    }
}
