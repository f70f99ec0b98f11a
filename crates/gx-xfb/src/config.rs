use serde::{Deserialize, Serialize};

use crate::error::{Result, XfbError};

/// Default number of virtual XFB records kept per context.
pub const MAX_VIRTUAL_XFB: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XfbMode {
    /// XFB emulation off; queries return nothing.
    Disabled,
    /// One persistent source per context, decoded from guest memory on every query.
    Real,
    /// Copies are tracked as address-range records and composited on query.
    #[default]
    Virtual,
}

/// What to do when a reused record's backing source has a different size than the new copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Replace the backing source with one of the new size.
    #[default]
    Recreate,
    /// Keep the existing source and let the backend deal with the size difference.
    KeepStale,
}

/// Which records a virtual-mode query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMatch {
    /// Records lying entirely inside the queried range.
    #[default]
    Contained,
    /// Any record sharing at least one byte with the queried range.
    Overlapping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XfbConfig {
    pub mode: XfbMode,
    pub max_virtual_xfb: usize,
    pub resize_policy: ResizePolicy,
    pub source_match: SourceMatch,
}

impl Default for XfbConfig {
    fn default() -> Self {
        Self {
            mode: XfbMode::default(),
            max_virtual_xfb: MAX_VIRTUAL_XFB,
            resize_policy: ResizePolicy::default(),
            source_match: SourceMatch::default(),
        }
    }
}

impl XfbConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_virtual_xfb == 0 {
            return Err(XfbError::InvalidConfig("max_virtual_xfb must be > 0"));
        }
        Ok(())
    }
}
