/// Rasterizer: executes a display list into an RGBA bitmap

use super::paint::PaintCommand;
use crate::style::HostStyle;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Paint `commands` over a `width` x `height` canvas filled with the style
/// background and, if present, the card background image stretched to fit.
pub fn rasterize(
    width: u32,
    height: u32,
    style: &HostStyle,
    background: Option<&RgbaImage>,
    commands: &[PaintCommand],
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba(style.background.0));
    if let Some(bg) = background {
        draw_image(&mut canvas, bg, 0, 0, width, height);
    }
    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                fill_rect(&mut canvas, *x, *y, *width, *height, *rgba);
            }
            PaintCommand::Text { x, y, text, unit, bold, rgba } => {
                draw_text(&mut canvas, *x, *y, text, *unit, *bold, *rgba);
            }
            PaintCommand::Image { x, y, width, height, image } => {
                draw_image(&mut canvas, image, *x, *y, *width, *height);
            }
        }
    }
    canvas
}

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, src: [u8; 4]) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let a = src[3] as u32;
    if a == 255 {
        dst.0 = src;
        return;
    }
    for c in 0..3 {
        dst.0[c] = ((src[c] as u32 * a + dst.0[c] as u32 * (255 - a)) / 255) as u8;
    }
    dst.0[3] = dst.0[3].max(src[3]);
}

pub fn fill_rect(canvas: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, rgba: (u8, u8, u8, u8)) {
    let (r, g, b, a) = rgba;
    let x0 = (x as i64).max(0);
    let y0 = (y as i64).max(0);
    let x1 = (x as i64 + width as i64).min(canvas.width() as i64);
    let y1 = (y as i64 + height as i64).min(canvas.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            blend(canvas, px, py, [r, g, b, a]);
        }
    }
}

/// Block glyphs: one filled cell per visible character, shorter for lowercase.
pub fn draw_text(canvas: &mut RgbaImage, x: i32, y: i32, text: &str, unit: u32, bold: bool, rgba: (u8, u8, u8, u8)) {
    let advance = 4 * unit;
    let glyph_w = if bold { 3 * unit } else { 2 * unit };
    for (i, ch) in text.chars().enumerate() {
        if ch.is_whitespace() {
            continue;
        }
        let gx = x + (i as u32 * advance) as i32;
        let (top, h) = if ch.is_lowercase() { (3 * unit, 3 * unit) } else { (unit, 5 * unit) };
        fill_rect(canvas, gx, y + top as i32, glyph_w, h, rgba);
    }
}

pub fn draw_image(canvas: &mut RgbaImage, image: &RgbaImage, x: i32, y: i32, width: u32, height: u32) {
    if width == 0 || height == 0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    let scaled;
    let src = if image.dimensions() == (width, height) {
        image
    } else {
        scaled = imageops::resize(image, width, height, FilterType::Triangle);
        &scaled
    };
    for (sx, sy, px) in src.enumerate_pixels() {
        blend(canvas, x as i64 + sx as i64, y as i64 + sy as i64, px.0);
    }
}
