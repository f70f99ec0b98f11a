use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::config::{ResizePolicy, SourceMatch, XfbConfig, XfbMode};
use crate::error::Result;
use crate::range::{XfbRange, XFB_BYTES_PER_PIXEL};
use crate::scale::scale_to_target;
use crate::source::{
    EfbRect, XfbBackend, XfbSource, XfbSourceParams, MAX_XFB_HEIGHT, MAX_XFB_WIDTH,
};

/// Identifies a source returned by [`XfbTracker::resolve_sources`].
///
/// [`XfbHandle::REAL`] names the persistent real-XFB source; virtual records get fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XfbHandle(u32);

impl XfbHandle {
    pub const REAL: XfbHandle = XfbHandle(0);

    pub fn id(self) -> u32 {
        self.0
    }
}

/// A tracked copy of the EFB into guest XFB memory.
#[derive(Debug)]
pub struct VirtualXfb<S> {
    address: u32,
    width: u32,
    height: u32,
    params: XfbSourceParams,
    source: S,
}

impl<S> VirtualXfb<S> {
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn range(&self) -> XfbRange {
        XfbRange::from_dimensions(self.address, self.width, self.height)
    }

    /// Set once a newer copy covered this record completely or trimmed it to nothing.
    pub fn is_invalidated(&self) -> bool {
        self.range().is_empty()
    }

    pub fn params(&self) -> &XfbSourceParams {
        &self.params
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn invalidate(&mut self) {
        self.address = 0;
        self.width = 0;
        self.height = 0;
    }

    /// Drops the lines of this record that `written` overlaps, from whichever end it covers.
    fn trim(&mut self, written: &XfbRange) {
        let line = XFB_BYTES_PER_PIXEL * self.width as u64;
        let dst = self.range();
        if dst.start >= written.start {
            let lines = (written.end - dst.start)
                .div_ceil(line)
                .min(self.height as u64);
            match u32::try_from(dst.start + lines * line) {
                Ok(address) => self.address = address,
                Err(_) => {
                    self.invalidate();
                    return;
                }
            }
            self.height -= lines as u32;
        } else {
            let lines = (dst.end - written.start)
                .div_ceil(line)
                .min(self.height as u64);
            self.height -= lines as u32;
        }
        if self.height == 0 {
            self.invalidate();
        }
    }
}

#[derive(Debug)]
struct RealXfb<S> {
    params: XfbSourceParams,
    source: S,
}

/// Per-context bookkeeping of XFB copies.
///
/// In virtual mode the records form a bounded most-recently-used list; writing past capacity
/// recycles the least recently written or queried record.
#[derive(Debug)]
pub struct XfbTracker<S> {
    config: XfbConfig,
    records: LruCache<XfbHandle, VirtualXfb<S>>,
    real: Option<RealXfb<S>>,
    next_handle: u32,
    last_xfb_width: u32,
    last_xfb_height: u32,
}

impl<S: XfbSource> XfbTracker<S> {
    pub fn new(config: XfbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    pub(crate) fn with_valid_config(config: XfbConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_virtual_xfb).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            records: LruCache::new(cap),
            real: None,
            next_handle: 1,
            last_xfb_width: 1,
            last_xfb_height: 1,
        }
    }

    pub fn config(&self) -> &XfbConfig {
        &self.config
    }

    pub fn mode(&self) -> XfbMode {
        self.config.mode
    }

    /// Number of virtual records, including invalidated ones still occupying a slot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Virtual record handles, most recently used first.
    pub fn handles(&self) -> Vec<XfbHandle> {
        self.records.iter().map(|(h, _)| *h).collect()
    }

    /// Looks up a virtual record without touching its recency.
    pub fn record(&self, handle: XfbHandle) -> Option<&VirtualXfb<S>> {
        self.records.peek(&handle)
    }

    pub fn source(&self, handle: XfbHandle) -> Option<&S> {
        if handle == XfbHandle::REAL {
            return self.real.as_ref().map(|r| &r.source);
        }
        self.records.peek(&handle).map(|r| &r.source)
    }

    pub fn source_params(&self, handle: XfbHandle) -> Option<&XfbSourceParams> {
        if handle == XfbHandle::REAL {
            return self.real.as_ref().map(|r| &r.params);
        }
        self.records.peek(&handle).map(|r| &r.params)
    }

    /// Sources the compositor should draw for the XFB at `address`.
    ///
    /// Virtual mode returns matching records most recently used first and marks them used.
    /// Nothing matching is not an error; the result is just empty.
    pub fn resolve_sources<B>(
        &mut self,
        backend: &mut B,
        address: u32,
        width: u32,
        height: u32,
    ) -> Vec<XfbHandle>
    where
        B: XfbBackend<Source = S>,
    {
        match self.config.mode {
            XfbMode::Disabled => Vec::new(),
            XfbMode::Real => {
                self.resolve_real(backend, address, width, height);
                vec![XfbHandle::REAL]
            }
            XfbMode::Virtual => self.resolve_virtual(address, width, height),
        }
    }

    fn resolve_real<B>(&mut self, backend: &mut B, address: u32, width: u32, height: u32)
    where
        B: XfbBackend<Source = S>,
    {
        let real = self.real.get_or_insert_with(|| RealXfb {
            params: XfbSourceParams::default(),
            source: backend.create_source(width, height),
        });
        // Texture coordinates: the source rect is flipped (top = height, bottom = 0).
        real.params = XfbSourceParams {
            src_address: address,
            src_width: MAX_XFB_WIDTH,
            src_height: MAX_XFB_HEIGHT,
            tex_width: width,
            tex_height: height,
            source_rect: EfbRect::new(0, height as i32, width as i32, 0),
        };
        real.source.decode_to_texture(&real.params);
    }

    fn resolve_virtual(&mut self, address: u32, width: u32, height: u32) -> Vec<XfbHandle> {
        let query = XfbRange::from_dimensions(address, width, height);
        let rule = self.config.source_match;
        let matched: Vec<XfbHandle> = self
            .records
            .iter()
            .filter(|(_, r)| !r.is_invalidated())
            .filter(|(_, r)| match rule {
                SourceMatch::Contained => query.contains(&r.range()),
                SourceMatch::Overlapping => query.overlaps(&r.range()),
            })
            .map(|(h, _)| *h)
            .collect();

        // Promote back to front so the matched records keep their relative order.
        for handle in matched.iter().rev() {
            self.records.promote(handle);
        }
        trace!(address, width, height, matched = matched.len(), "resolved XFB sources");
        matched
    }

    /// Records an EFB-to-XFB copy. Returns the virtual record it landed in, if any.
    pub fn record_write<B>(
        &mut self,
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
        match self.config.mode {
            XfbMode::Disabled => {
                trace!(address, "XFB disabled; dropping copy");
                None
            }
            XfbMode::Real => {
                backend.copy_to_real_xfb(address, width, height, source_rect, gamma);
                None
            }
            XfbMode::Virtual => {
                Some(self.copy_to_virtual(backend, address, width, height, source_rect, gamma))
            }
        }
    }

    fn copy_to_virtual<B>(
        &mut self,
        backend: &mut B,
        address: u32,
        width: u32,
        height: u32,
        source_rect: &EfbRect,
        gamma: f32,
    ) -> XfbHandle
    where
        B: XfbBackend<Source = S>,
    {
        let query = XfbRange::from_dimensions(address, width, height);
        let (target_width, target_height) = backend.target_size(source_rect);

        let existing = self
            .records
            .iter()
            .find(|(_, r)| !r.is_invalidated() && query.contains(&r.range()))
            .map(|(h, _)| *h);

        let (handle, mut record) = match existing.and_then(|h| self.records.pop_entry(&h)) {
            Some(entry) => entry,
            None => {
                let handle = self.alloc_handle();
                let record = match self.take_slot() {
                    Some(record) => record,
                    None => VirtualXfb {
                        address: 0,
                        width: 0,
                        height: 0,
                        params: XfbSourceParams {
                            tex_width: target_width,
                            tex_height: target_height,
                            ..XfbSourceParams::default()
                        },
                        source: backend.create_source(target_width, target_height),
                    },
                };
                (handle, record)
            }
        };

        if (record.params.tex_width, record.params.tex_height) != (target_width, target_height) {
            match self.config.resize_policy {
                ResizePolicy::Recreate => {
                    debug!(
                        old_width = record.params.tex_width,
                        old_height = record.params.tex_height,
                        target_width,
                        target_height,
                        "recreating virtual XFB source"
                    );
                    record.source = backend.create_source(target_width, target_height);
                    record.params.tex_width = target_width;
                    record.params.tex_height = target_height;
                }
                ResizePolicy::KeepStale => warn!(
                    old_width = record.params.tex_width,
                    old_height = record.params.tex_height,
                    target_width,
                    target_height,
                    "virtual XFB source size mismatch; keeping existing source"
                ),
            }
        }

        record.address = address;
        record.width = width;
        record.height = height;
        record.params.src_address = address;
        record.params.src_width = width;
        record.params.src_height = height;
        record.params.source_rect = backend.convert_rect(source_rect);

        self.records.push(handle, record);
        self.invalidate_overlapping(handle, query);

        if let Some(record) = self.records.peek_mut(&handle) {
            record.source.copy_efb(&record.params, gamma);
        }
        handle
    }

    /// Invalidates or trims every other record that the record at `written` overlaps.
    pub fn invalidate_overlaps(&mut self, written: XfbHandle) {
        if let Some(range) = self.records.peek(&written).map(VirtualXfb::range) {
            self.invalidate_overlapping(written, range);
        }
    }

    fn invalidate_overlapping(&mut self, written: XfbHandle, range: XfbRange) {
        for (handle, record) in self.records.iter_mut() {
            if *handle == written || record.is_invalidated() {
                continue;
            }
            let dst = record.range();
            if range.contains(&dst) {
                trace!(handle = handle.id(), address = record.address, "invalidating covered XFB");
                record.invalidate();
            } else if range.overlaps(&dst) {
                record.trim(&range);
                trace!(
                    handle = handle.id(),
                    address = record.address,
                    height = record.height,
                    "trimmed partially overwritten XFB"
                );
            }
        }
    }

    fn alloc_handle(&mut self) -> XfbHandle {
        let handle = XfbHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        handle
    }

    /// Frees a slot for a new record when the list is full, preferring an invalidated record
    /// over the least recently used live one.
    fn take_slot(&mut self) -> Option<VirtualXfb<S>> {
        if self.records.len() < self.config.max_virtual_xfb {
            return None;
        }
        let invalidated = self
            .records
            .iter()
            .rev()
            .find(|(_, r)| r.is_invalidated())
            .map(|(h, _)| *h);
        if let Some(record) = invalidated.and_then(|h| self.records.pop(&h)) {
            return Some(record);
        }
        let (evicted, record) = self.records.pop_lru()?;
        debug!(
            handle = evicted.id(),
            address = record.address,
            "evicting least recently used virtual XFB"
        );
        Some(record)
    }

    pub fn last_xfb_width(&self) -> u32 {
        self.last_xfb_width
    }

    pub fn last_xfb_height(&self) -> u32 {
        self.last_xfb_height
    }

    /// Remembers the size of the XFB that was last presented.
    pub fn set_last_xfb_size(&mut self, width: u32, height: u32) {
        self.last_xfb_width = width.max(1);
        self.last_xfb_height = height.max(1);
    }

    pub fn scale_to_virtual_xfb_width(&self, x: i32, target_width: u32) -> i32 {
        if self.config.mode == XfbMode::Real {
            return x;
        }
        scale_to_target(x, target_width, self.last_xfb_width)
    }

    pub fn scale_to_virtual_xfb_height(&self, y: i32, target_height: u32) -> i32 {
        if self.config.mode == XfbMode::Real {
            return y;
        }
        scale_to_target(y, target_height, self.last_xfb_height)
    }
}
