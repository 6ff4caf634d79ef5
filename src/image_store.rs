use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, Rgba32FImage};
use log::debug;

use crate::settings::{BakeSettings, ColorDepth, ColorMode, FileFormat};

/// Name of an image held by an [`ImageStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub String);

impl ImageHandle {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Encoding parameters for writing an image to disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaveOptions {
    pub format: FileFormat,
    pub color_mode: ColorMode,
    pub color_depth: ColorDepth,
    pub quality: u8,
}

impl SaveOptions {
    pub fn from_settings(settings: &BakeSettings, depth: Option<ColorDepth>) -> Self {
        Self {
            format: settings.file_format,
            color_mode: settings.color_mode,
            color_depth: depth.unwrap_or(settings.color_depth),
            quality: settings.jpeg_quality,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub pixels: Rgba32FImage,
    pub has_alpha: bool,
    pub is_float: bool,
    /// File the image was last saved to or loaded from.
    pub path: Option<PathBuf>,
    pub options: Option<SaveOptions>,
}

pub trait ImageStore {
    fn new_image(&mut self, name: &str, width: u32, height: u32, has_alpha: bool, is_float: bool) -> Result<ImageHandle>;
    fn load(&mut self, path: &Path) -> Result<ImageHandle>;
    /// Write the image back to the file it was last saved to.
    fn save(&mut self, handle: &ImageHandle) -> Result<()>;
    fn save_as(&mut self, handle: &ImageHandle, path: &Path, options: &SaveOptions) -> Result<()>;
    /// Re-read the image from its file, dropping in-memory edits.
    fn reload(&mut self, handle: &ImageHandle) -> Result<()>;
    fn write_pixels(&mut self, handle: &ImageHandle, pixels: Rgba32FImage) -> Result<()>;
    fn get(&self, handle: &ImageHandle) -> Option<&StoredImage>;
}

/// Float RGBA buffers in memory, encoded with the `image` crate on save.
#[derive(Debug, Default)]
pub struct DiskImageStore {
    images: HashMap<String, StoredImage>,
}

impl DiskImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_mut(&mut self, handle: &ImageHandle) -> Result<&mut StoredImage> {
        self.images
            .get_mut(handle.name())
            .ok_or_else(|| anyhow!("image not found: {}", handle.name()))
    }
}

fn read_rgba32f(path: &Path) -> Result<Rgba32FImage> {
    let img = image::open(path).with_context(|| format!("failed to load image {}", path.display()))?;
    Ok(img.to_rgba32f())
}

impl ImageStore for DiskImageStore {
    fn new_image(&mut self, name: &str, width: u32, height: u32, has_alpha: bool, is_float: bool) -> Result<ImageHandle> {
        if width == 0 || height == 0 {
            bail!("image '{name}' must have a non-zero size (got {width}x{height})");
        }
        let fill = if has_alpha { [0.0, 0.0, 0.0, 0.0] } else { [0.0, 0.0, 0.0, 1.0] };
        self.images.insert(
            name.to_string(),
            StoredImage {
                pixels: Rgba32FImage::from_pixel(width, height, Rgba(fill)),
                has_alpha,
                is_float,
                path: None,
                options: None,
            },
        );
        Ok(ImageHandle(name.to_string()))
    }

    fn load(&mut self, path: &Path) -> Result<ImageHandle> {
        let pixels = read_rgba32f(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("image path has no file name: {}", path.display()))?
            .to_string();
        self.images.insert(
            name.clone(),
            StoredImage {
                pixels,
                has_alpha: true,
                is_float: true,
                path: Some(path.to_path_buf()),
                options: None,
            },
        );
        Ok(ImageHandle(name))
    }

    fn save(&mut self, handle: &ImageHandle) -> Result<()> {
        let img = self.entry_mut(handle)?;
        let (Some(path), Some(options)) = (img.path.clone(), img.options) else {
            bail!("image '{}' has never been saved; use save_as", handle.name());
        };
        encode(&img.pixels, &path, &options)
    }

    fn save_as(&mut self, handle: &ImageHandle, path: &Path, options: &SaveOptions) -> Result<()> {
        let img = self.entry_mut(handle)?;
        encode(&img.pixels, path, options)?;
        img.path = Some(path.to_path_buf());
        img.options = Some(*options);
        debug!("saved image '{}' to {}", handle.name(), path.display());
        Ok(())
    }

    fn reload(&mut self, handle: &ImageHandle) -> Result<()> {
        let img = self.entry_mut(handle)?;
        let Some(path) = img.path.clone() else {
            bail!("image '{}' has no file to reload from", handle.name());
        };
        img.pixels = read_rgba32f(&path)?;
        Ok(())
    }

    fn write_pixels(&mut self, handle: &ImageHandle, pixels: Rgba32FImage) -> Result<()> {
        let img = self.entry_mut(handle)?;
        if img.pixels.dimensions() != pixels.dimensions() {
            bail!(
                "image '{}' is {:?}, got pixels of {:?}",
                handle.name(),
                img.pixels.dimensions(),
                pixels.dimensions()
            );
        }
        img.pixels = pixels;
        Ok(())
    }

    fn get(&self, handle: &ImageHandle) -> Option<&StoredImage> {
        self.images.get(handle.name())
    }
}

/// Encode float pixels according to `options`. Color depth 32 only applies to
/// EXR; PNG tops out at 16 bits and JPEG at 8.
pub fn encode(pixels: &Rgba32FImage, path: &Path, options: &SaveOptions) -> Result<()> {
    let src = DynamicImage::ImageRgba32F(pixels.clone());
    let wide = options.color_depth != ColorDepth::Eight;

    let result = match options.format {
        FileFormat::OpenExr => {
            let out = match options.color_mode {
                ColorMode::Rgba => src,
                ColorMode::Rgb | ColorMode::Bw => DynamicImage::ImageRgb32F(src.to_rgb32f()),
            };
            out.save_with_format(path, ImageFormat::OpenExr)
        }
        FileFormat::Png => {
            let out = match (options.color_mode, wide) {
                (ColorMode::Bw, false) => DynamicImage::ImageLuma8(src.to_luma8()),
                (ColorMode::Bw, true) => DynamicImage::ImageLuma16(src.to_luma16()),
                (ColorMode::Rgb, false) => DynamicImage::ImageRgb8(src.to_rgb8()),
                (ColorMode::Rgb, true) => DynamicImage::ImageRgb16(src.to_rgb16()),
                (ColorMode::Rgba, false) => DynamicImage::ImageRgba8(src.to_rgba8()),
                (ColorMode::Rgba, true) => DynamicImage::ImageRgba16(src.to_rgba16()),
            };
            out.save_with_format(path, ImageFormat::Png)
        }
        FileFormat::Jpeg => {
            let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            let mut w = BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(&mut w, options.quality.clamp(1, 100));
            let out = match options.color_mode {
                ColorMode::Bw => DynamicImage::ImageLuma8(src.to_luma8()),
                ColorMode::Rgb | ColorMode::Rgba => DynamicImage::ImageRgb8(src.to_rgb8()),
            };
            out.write_with_encoder(encoder)
        }
    };
    result.with_context(|| format!("failed to write {:?} image {}", options.format, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("node-forge-bake-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn png_rgba8() -> SaveOptions {
        SaveOptions {
            format: FileFormat::Png,
            color_mode: ColorMode::Rgba,
            color_depth: ColorDepth::Eight,
            quality: 90,
        }
    }

    #[test]
    fn save_reload_keeps_pixels() {
        let dir = temp_dir("reload");
        let mut store = DiskImageStore::new();
        let h = store.new_image("img", 4, 2, true, false).unwrap();
        store
            .write_pixels(&h, Rgba32FImage::from_pixel(4, 2, Rgba([1.0, 0.0, 0.0, 1.0])))
            .unwrap();
        let path = dir.join("img.png");
        store.save_as(&h, &path, &png_rgba8()).unwrap();

        store
            .write_pixels(&h, Rgba32FImage::from_pixel(4, 2, Rgba([0.0, 0.0, 0.0, 0.0])))
            .unwrap();
        store.reload(&h).unwrap();
        let px = store.get(&h).unwrap().pixels.get_pixel(3, 1).0;
        assert_eq!(px, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn save_without_path_fails() {
        let mut store = DiskImageStore::new();
        let h = store.new_image("img", 1, 1, false, false).unwrap();
        assert!(store.save(&h).is_err());
    }

    #[test]
    fn pixel_size_must_match() {
        let mut store = DiskImageStore::new();
        let h = store.new_image("img", 2, 2, false, false).unwrap();
        let err = store.write_pixels(&h, Rgba32FImage::new(3, 3)).unwrap_err();
        assert!(err.to_string().contains("got pixels"), "{err}");
    }

    #[test]
    fn bw_jpeg_is_grayscale() {
        let dir = temp_dir("jpeg");
        let path = dir.join("bw.jpg");
        let pixels = Rgba32FImage::from_pixel(8, 8, Rgba([0.5, 0.5, 0.5, 1.0]));
        let options = SaveOptions {
            format: FileFormat::Jpeg,
            color_mode: ColorMode::Bw,
            color_depth: ColorDepth::Eight,
            quality: 80,
        };
        encode(&pixels, &path, &options).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.color(), image::ColorType::L8);
    }
}
