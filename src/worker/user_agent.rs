//! Per-task user-agent selection

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Picks the User-Agent header for a crawl from the task's agent class
#[derive(Debug, Clone)]
pub struct UserAgentPicker {
    pools: HashMap<String, Vec<String>>,
    default: String,
}

impl UserAgentPicker {
    pub fn new(pools: HashMap<String, Vec<String>>, default: impl Into<String>) -> Self {
        Self {
            pools,
            default: default.into(),
        }
    }

    /// Uniform pick from the class's pool; the default for unknown classes,
    /// empty pools, or tasks without a class
    pub fn pick(&self, class: Option<&str>) -> String {
        self.pick_with(class, &mut rand::thread_rng())
    }

    pub fn pick_with<R: Rng + ?Sized>(&self, class: Option<&str>, rng: &mut R) -> String {
        class
            .and_then(|c| self.pools.get(c))
            .and_then(|pool| pool.choose(rng))
            .unwrap_or(&self.default)
            .clone()
    }
}
