//! PNG encoding of rendered bitmaps

use crate::rendering::Bitmap;
use crate::{Error, Result};
use std::io::Cursor;

/// Default output resolution, dots per inch
pub const DEFAULT_DPI: f64 = 96.0;

const METERS_PER_INCH: f64 = 0.0254;

/// Encode `bitmap` as a single-frame RGBA8 PNG tagged with `dpi`, returning a
/// stream positioned at the start.
pub fn encode_png(bitmap: &Bitmap, dpi: f64) -> Result<Cursor<Vec<u8>>> {
    if bitmap.width() == 0 || bitmap.height() == 0 {
        return Err(Error::EncodeError("bitmap has no pixels".into()));
    }
    if !(dpi.is_finite() && dpi > 0.0) {
        return Err(Error::EncodeError(format!("invalid dpi {}", dpi)));
    }

    let mut data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut data, bitmap.width(), bitmap.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let ppm = (dpi / METERS_PER_INCH).round() as u32;
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: ppm,
            yppu: ppm,
            unit: png::Unit::Meter,
        }));
        let mut writer = encoder.write_header()?;
        writer.write_image_data(bitmap.as_raw())?;
        writer.finish()?;
    }

    let mut stream = Cursor::new(data);
    stream.set_position(0);
    Ok(stream)
}
