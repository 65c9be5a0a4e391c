//! PNG output for window captures.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tracing::debug;

use crate::error::DriverError;
use crate::io::desktop::Screenshot;

fn output_error(path: &Path, reason: impl ToString) -> DriverError {
    DriverError::Output {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Encode `shot` as an 8-bit RGBA PNG at `path`, replacing any existing file.
pub fn write_png(path: &Path, shot: &Screenshot) -> Result<(), DriverError> {
    let expected = shot.width as usize * shot.height as usize * 4;
    if shot.rgba.len() != expected {
        return Err(output_error(
            path,
            format!(
                "capture holds {} bytes, expected {expected} for {}x{}",
                shot.rgba.len(),
                shot.width,
                shot.height
            ),
        ));
    }

    let file = File::create(path).map_err(|err| output_error(path, err))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), shot.width, shot.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(|err| output_error(path, err))?;
    writer
        .write_image_data(&shot.rgba)
        .map_err(|err| output_error(path, err))?;
    writer.finish().map_err(|err| output_error(path, err))?;
    debug!(path = %path.display(), width = shot.width, height = shot.height, "wrote screenshot");
    Ok(())
}
