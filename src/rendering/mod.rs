//! Rendering: the renderer contract and the built-in block renderer.
//!
//! A [`Renderer`] turns a card into a visual, measures it and rasterizes it.
//! Renderers are not required to be `Send`; the pipeline creates one per
//! affinity worker and only ever touches it from that worker.

pub mod layout;
pub mod paint;
pub mod raster;

use crate::card::Card;
use crate::style::HostStyle;
use crate::{Error, Result};
use bytes::Bytes;
use image::RgbaImage;
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;

pub use layout::Visual;

/// Measured or requested size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// A rasterized card, RGBA8
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub image: RgbaImage,
}

impl Bitmap {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Resolves an image URL to its payload without doing any I/O.
pub trait ImageResolver {
    fn resolve(&self, url: &str) -> Option<Cursor<Bytes>>;
}

impl<F> ImageResolver for F
where
    F: Fn(&str) -> Option<Cursor<Bytes>>,
{
    fn resolve(&self, url: &str) -> Option<Cursor<Bytes>> {
        self(url)
    }
}

/// Resolver that never finds anything
pub fn no_images(_url: &str) -> Option<Cursor<Bytes>> {
    None
}

/// The build / measure / rasterize contract the pipeline drives.
pub trait Renderer {
    type Visual;

    /// Build the renderer's visual for `card`, resolving images through `images`.
    fn build(&mut self, card: &Card, images: &dyn ImageResolver) -> Result<Self::Visual>;

    /// Natural size of `visual` at a fixed `width`, capped at `max_height`.
    fn measure(&mut self, visual: &Self::Visual, width: u32, max_height: u32) -> Result<Size>;

    /// Paint `visual` into a `width` x `height` bitmap.
    fn rasterize(&mut self, visual: &Self::Visual, width: u32, height: u32) -> Result<Bitmap>;
}

/// Simple vertical block renderer.
///
/// Holds its style behind an `Rc`, so an instance stays on the thread that
/// created it.
pub struct BlockRenderer {
    style: Rc<HostStyle>,
}

impl BlockRenderer {
    pub fn new(style: HostStyle) -> Self {
        Self { style: Rc::new(style) }
    }

    /// Load the style file on the calling thread and build a renderer from it.
    pub fn from_style_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(HostStyle::from_path(path)?))
    }

    pub fn style(&self) -> &HostStyle {
        &self.style
    }
}

impl Default for BlockRenderer {
    fn default() -> Self {
        Self::new(HostStyle::default())
    }
}

impl Renderer for BlockRenderer {
    type Visual = Visual;

    fn build(&mut self, card: &Card, images: &dyn ImageResolver) -> Result<Visual> {
        self.style.validate()?;
        Ok(layout::build_visual(card, images, self.style.clone()))
    }

    fn measure(&mut self, visual: &Visual, width: u32, max_height: u32) -> Result<Size> {
        if width == 0 {
            return Err(Error::RenderError("cannot measure at zero width".into()));
        }
        let height = layout::measure(visual, width);
        Ok(Size {
            width,
            height: height.min(max_height),
        })
    }

    fn rasterize(&mut self, visual: &Visual, width: u32, height: u32) -> Result<Bitmap> {
        if width == 0 || height == 0 {
            return Err(Error::RenderError(format!(
                "cannot rasterize a {}x{} bitmap",
                width, height
            )));
        }
        let commands = layout::display_list(visual, width);
        let image = raster::rasterize(width, height, &self.style, visual.background.as_deref(), &commands);
        Ok(Bitmap { image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_resolves_images() {
        let payload = Bytes::from_static(b"abc");
        let resolver = move |url: &str| (url == "a").then(|| Cursor::new(payload.clone()));
        assert!(resolver.resolve("a").is_some());
        assert!(resolver.resolve("b").is_none());
        assert!(no_images.resolve("a").is_none());
    }

    #[test]
    fn measure_rejects_zero_width() {
        let mut r = BlockRenderer::default();
        let visual = r.build(&Card::default(), &no_images).unwrap();
        assert!(matches!(r.measure(&visual, 0, 100), Err(Error::RenderError(_))));
    }

    #[test]
    fn empty_card_is_just_padding() {
        let mut r = BlockRenderer::default();
        let visual = r.build(&Card::default(), &no_images).unwrap();
        let size = r.measure(&visual, 200, u32::MAX).unwrap();
        assert_eq!(size, Size { width: 200, height: r.style().padding * 2 });
    }

    #[test]
    fn measure_caps_at_max_height() {
        let card = Card::from_json(
            r#"{"body": [ {"type": "TextBlock", "text": "a b c d e f g h i j k l m n o p", "wrap": true} ]}"#,
        )
        .unwrap();
        let mut r = BlockRenderer::default();
        let visual = r.build(&card, &no_images).unwrap();
        let natural = r.measure(&visual, 40, u32::MAX).unwrap().height;
        assert!(natural > 30);
        assert_eq!(r.measure(&visual, 40, 30).unwrap().height, 30);
    }

    #[test]
    fn rasterize_fills_requested_size() {
        let mut r = BlockRenderer::default();
        let visual = r.build(&Card::default(), &no_images).unwrap();
        let bmp = r.rasterize(&visual, 64, 24).unwrap();
        assert_eq!((bmp.width(), bmp.height()), (64, 24));
        assert_eq!(bmp.image.get_pixel(0, 0).0, r.style().background.0);
    }
}
