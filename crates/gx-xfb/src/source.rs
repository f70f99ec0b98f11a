//! Seams to the rendering backend that owns the actual textures.

/// Largest XFB the video interface can scan out.
pub const MAX_XFB_WIDTH: u32 = 640;
pub const MAX_XFB_HEIGHT: u32 = 576;

/// Rectangle in EFB (embedded framebuffer) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EfbRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl EfbRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Metadata the tracker keeps for each backing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XfbSourceParams {
    pub src_address: u32,
    pub src_width: u32,
    pub src_height: u32,
    pub tex_width: u32,
    pub tex_height: u32,
    /// Region of the texture holding the image, in backend target coordinates.
    pub source_rect: EfbRect,
}

/// A texture holding XFB contents.
pub trait XfbSource {
    /// Decodes guest-memory YUYV data described by `params` into the texture.
    fn decode_to_texture(&mut self, params: &XfbSourceParams);

    /// Copies the current EFB contents into the texture.
    fn copy_efb(&mut self, params: &XfbSourceParams, gamma: f32);
}

pub trait XfbBackend {
    type Source: XfbSource;

    fn create_source(&mut self, width: u32, height: u32) -> Self::Source;

    /// Texture size a copy of `source_rect` needs at the current internal resolution.
    fn target_size(&self, source_rect: &EfbRect) -> (u32, u32);

    /// Converts an EFB rectangle to backend target coordinates.
    fn convert_rect(&self, rect: &EfbRect) -> EfbRect {
        *rect
    }

    /// Real-XFB mode copy: encode the EFB straight into guest memory.
    fn copy_to_real_xfb(
        &mut self,
        address: u32,
        width: u32,
        height: u32,
        source_rect: &EfbRect,
        gamma: f32,
    );
}
