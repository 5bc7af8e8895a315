//! Alias → processor resolution.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::{
    CssMinProcessor, JsMinProcessor, MultilineCommentStripper, ProcessorRef, ResourceProcessor,
    SemicolonAppender,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown processor `{alias}` (available: {})", .available.join(", "))]
pub struct UnknownProcessor {
    pub alias: String,
    pub available: Vec<String>,
}

/// Maps aliases to processors.
///
/// Registration needs `&mut self`; once the registry is shared behind an
/// `Arc` its contents are fixed for the life of the process.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn ResourceProcessor>>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in processor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(CssMinProcessor::ALIAS, CssMinProcessor)
            .register(JsMinProcessor::ALIAS, JsMinProcessor)
            .register(SemicolonAppender::ALIAS, SemicolonAppender)
            .register(MultilineCommentStripper::ALIAS, MultilineCommentStripper);
        registry
    }

    /// Register `processor` under `alias`, replacing any previous entry.
    pub fn register(
        &mut self,
        alias: impl Into<String>,
        processor: impl ResourceProcessor + 'static,
    ) -> &mut Self {
        self.processors.insert(alias.into(), Arc::new(processor));
        self
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.processors.contains_key(alias)
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.processors.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn resolve(&self, alias: &str) -> Result<ProcessorRef, UnknownProcessor> {
        self.processors
            .get(alias)
            .map(|processor| ProcessorRef::new(alias, Arc::clone(processor)))
            .ok_or_else(|| UnknownProcessor {
                alias: alias.to_string(),
                available: self.aliases(),
            })
    }

    /// Resolve a comma separated alias list, preserving order.
    ///
    /// Blank entries are skipped; the first unknown alias fails the whole list.
    pub fn resolve_list(&self, list: &str) -> Result<Vec<ProcessorRef>, UnknownProcessor> {
        list.split(',')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(|alias| self.resolve(alias))
            .collect()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("aliases", &self.aliases())
            .finish()
    }
}
