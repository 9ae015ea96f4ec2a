/// Paint command set produced by layout and consumed by the rasterizer

use image::RgbaImage;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    /// One line of block-glyph text; `unit` is the glyph pixel scale
    Text {
        x: i32,
        y: i32,
        text: String,
        unit: u32,
        bold: bool,
        rgba: (u8, u8, u8, u8),
    },
    /// Image scaled to fill the box
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        image: Rc<RgbaImage>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_commands_compare_by_pixels() {
        let img = Rc::new(RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255])));
        let a = PaintCommand::Image { x: 0, y: 0, width: 4, height: 4, image: img.clone() };
        let b = PaintCommand::Image { x: 0, y: 0, width: 4, height: 4, image: Rc::new((*img).clone()) };
        assert_eq!(a, b);
        assert_ne!(a, PaintCommand::Image { x: 1, y: 0, width: 4, height: 4, image: img });
    }
}
