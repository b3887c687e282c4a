pub mod image_helper {
    use crate::core_modules::frame::{BYTES_PER_PIXEL, Frame};
    use crate::error::SegmentResult;
    use crate::pipeline::SegmentedImage;
    use image::{ImageEncoder, RgbImage};
    use std::path::Path;
    use std::time::SystemTime;

    /// Copies the rendered BGR frame of `image` into a packed RGB image.
    pub fn to_rgb_image(image: &SegmentedImage) -> RgbImage {
        let mut rgb = RgbImage::new(image.width as u32, image.height as u32);
        for (y, row) in rgb.rows_mut().enumerate() {
            let start = y * image.stride;
            let source = &image.frame[start..start + image.width * BYTES_PER_PIXEL];
            for (pixel, bgr) in row.zip(source.chunks_exact(BYTES_PER_PIXEL)) {
                pixel.0 = [bgr[2], bgr[1], bgr[0]];
            }
        }
        rgb
    }

    /// Writes the rendered segmentation of `image` to `path` as a PNG.
    pub fn save_segmented_png(path: impl AsRef<Path>, image: &SegmentedImage) -> SegmentResult<()> {
        let rgb = to_rgb_image(image);
        let output = std::io::BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )?;

        Ok(())
    }

    /// Loads any image file `image` can decode into a packed BGR24 frame.
    pub fn load_frame(path: impl AsRef<Path>, timestamp: SystemTime) -> SegmentResult<Frame> {
        let rgb = image::open(path)?.to_rgb8();
        frame_from_rgb(&rgb, timestamp)
    }

    pub fn frame_from_rgb(rgb: &RgbImage, timestamp: SystemTime) -> SegmentResult<Frame> {
        let data = rgb.pixels().flat_map(|pixel| {
            let [r, g, b] = pixel.0;
            [b, g, r]
        });
        Frame::packed(timestamp, rgb.width() as usize, rgb.height() as usize, data.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::image_helper::*;
    use crate::pipeline::SegmentedImage;
    use image::{Rgb, RgbImage};
    use std::time::SystemTime;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}_{name}", std::process::id()))
    }

    #[test]
    fn frame_from_rgb_swaps_to_bgr() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([1, 2, 3]));

        let frame = frame_from_rgb(&rgb, SystemTime::UNIX_EPOCH).unwrap();
        assert_eq!(frame.bgr(0, 0), [0, 0, 255]);
        assert_eq!(frame.bgr(1, 0), [3, 2, 1]);
    }

    #[test]
    fn to_rgb_image_skips_stride_padding() {
        let image = SegmentedImage {
            timestamp: SystemTime::UNIX_EPOCH,
            width: 1,
            height: 2,
            stride: 4,
            frame: vec![10, 20, 30, 0xFF, 40, 50, 60, 0xFF],
            segmented: vec![1, 1],
        };
        let rgb = to_rgb_image(&image);
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(0, 1).0, [60, 50, 40]);
    }

    #[test]
    fn save_and_reload_segmented_file() {
        let width = 64;
        let height = 48;
        let mut frame = Vec::with_capacity(width * height * 3);
        for i in 0..width * height {
            let shade = (i % 255) as u8;
            frame.extend_from_slice(&[shade, 0, 255 - shade]);
        }
        let image = SegmentedImage {
            timestamp: SystemTime::UNIX_EPOCH,
            width,
            height,
            stride: width * 3,
            frame,
            segmented: vec![0; width * height],
        };
        let path = temp_path("segmented_gradient.png");

        save_segmented_png(&path, &image).expect("Error Saving File.");
        let reloaded = load_frame(&path, SystemTime::UNIX_EPOCH).expect("Error Loading File.");
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.width(), width);
        assert_eq!(reloaded.height(), height);
        assert_eq!(reloaded.data(), &image.frame[..]);
    }
}
