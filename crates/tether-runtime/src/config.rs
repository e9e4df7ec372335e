//! Configuration for contexts and pools.
//!
//! Both structs deserialize from TOML/JSON with every field optional, so a
//! config file only needs to name what it changes.

use serde::Deserialize;

/// Engine limits applied to each context's runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Heap limit in bytes. Default: unlimited
    pub memory_limit: Option<usize>,

    /// Maximum native stack used by script code, in bytes.
    /// Default: the engine's own default
    pub max_stack_size: Option<usize>,

    /// Allocation threshold in bytes that triggers a GC cycle.
    pub gc_threshold: Option<usize>,
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    /// Apply the limits to a freshly created runtime.
    pub(crate) fn apply(&self, runtime: &rquickjs::Runtime) {
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = self.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = self.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
    }
}

/// Pool sizing plus the config every member context is created with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of contexts. Default: number of CPU cores
    pub size: usize,

    pub context: ContextConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: num_cpus::get().max(1),
            context: ContextConfig::default(),
        }
    }
}
