//! External framebuffer (XFB) bookkeeping.
//!
//! Games copy the embedded framebuffer (EFB) out to XFB regions of guest memory and the video
//! interface scans one of those regions out. Instead of round-tripping pixels through guest
//! memory, virtual mode keeps each copy as a host texture tagged with the byte range it would
//! have covered; the compositor asks which textures make up the region being scanned out.
//!
//! Newer copies invalidate (fully covered) or trim (partially covered) older ones line by line,
//! so stale rows are never composited.

mod config;
mod error;
mod manager;
mod range;
mod scale;
mod source;
mod tracker;

pub use config::{ResizePolicy, SourceMatch, XfbConfig, XfbMode, MAX_VIRTUAL_XFB};
pub use error::{Result, XfbError};
pub use manager::{ContextId, XfbManager};
pub use range::{ranges_overlap, XfbRange, XFB_BYTES_PER_PIXEL};
pub use scale::scale_to_target;
pub use source::{EfbRect, XfbBackend, XfbSource, XfbSourceParams, MAX_XFB_HEIGHT, MAX_XFB_WIDTH};
pub use tracker::{VirtualXfb, XfbHandle, XfbTracker};
