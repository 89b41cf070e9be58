use std::path::Path;

use crate::shared::frame::{Frame, PixelFormat};

/// Decodes a still image into an RGB frame with index 0.
pub fn load_frame(path: &Path) -> Result<Frame, image::ImageError> {
    let rgb = image::open(path)?.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), width, height, PixelFormat::Rgb8, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_test_image(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("test.png");
        let mut img = image::RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([50, 100, 200]);
        }
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_frame_is_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), 100, 80);

        let frame = load_frame(&path).unwrap();
        assert_eq!(frame.width(), 100);
        assert_eq!(frame.height(), 80);
        assert_eq!(frame.format(), PixelFormat::Rgb8);
        assert_eq!(frame.index(), 0);
        assert_eq!(&frame.data()[..3], &[50, 100, 200]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_frame(Path::new("/nonexistent/test.png")).is_err());
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(load_frame(&path).is_err());
    }
}
