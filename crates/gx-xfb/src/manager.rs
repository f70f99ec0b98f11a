use std::collections::BTreeMap;

use crate::config::XfbConfig;
use crate::error::Result;
use crate::source::{EfbRect, XfbBackend, XfbSource};
use crate::tracker::{XfbHandle, XfbTracker};

/// Rendering context an XFB belongs to (e.g. one per eye for stereo output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContextId(pub u32);

/// Keeps one independent [`XfbTracker`] per rendering context.
#[derive(Debug)]
pub struct XfbManager<S> {
    config: XfbConfig,
    trackers: BTreeMap<ContextId, XfbTracker<S>>,
}

impl<S: XfbSource> XfbManager<S> {
    pub fn new(config: XfbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            trackers: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &XfbConfig {
        &self.config
    }

    /// The tracker for `ctx`, created on first use.
    pub fn tracker_mut(&mut self, ctx: ContextId) -> &mut XfbTracker<S> {
        let config = &self.config;
        self.trackers
            .entry(ctx)
            .or_insert_with(|| XfbTracker::with_valid_config(config.clone()))
    }

    pub fn tracker(&self, ctx: ContextId) -> Option<&XfbTracker<S>> {
        self.trackers.get(&ctx)
    }

    pub fn contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.trackers.keys().copied()
    }

    pub fn remove(&mut self, ctx: ContextId) -> Option<XfbTracker<S>> {
        self.trackers.remove(&ctx)
    }

    pub fn resolve_sources<B>(
        &mut self,
        ctx: ContextId,
        backend: &mut B,
        address: u32,
        width: u32,
        height: u32,
    ) -> Vec<XfbHandle>
    where
        B: XfbBackend<Source = S>,
    {
        self.tracker_mut(ctx)
            .resolve_sources(backend, address, width, height)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_write<B>(
        &mut self,
        ctx: ContextId,
        backend: &mut B,
        address: u32,
        width: u32,
        height: u32,
        source_rect: &EfbRect,
        gamma: f32,
    ) -> Option<XfbHandle>
    where
        B: XfbBackend<Source = S>,
    {
        self.tracker_mut(ctx)
            .record_write(backend, address, width, height, source_rect, gamma)
    }
}
