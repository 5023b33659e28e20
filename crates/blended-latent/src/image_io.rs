//! Loading sources and masks, saving results
//!
//! Image tensors are `[batch, 3, H, W]` in `[-1, 1]`.

use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageBuffer, RgbImage};
use tracing::info;

use crate::config::RunConfig;
use crate::debug::host_values;
use crate::error::{BlendError, ConfigError, Result};
use crate::mask::Mask;

/// Padding between grid cells, in pixels
const GRID_PADDING: usize = 2;

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|source| BlendError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// Load an RGB image resized to `width x height`, as `[1, 3, H, W]` in `[-1, 1]`
pub fn load_image<B: Backend>(
    path: impl AsRef<Path>,
    width: usize,
    height: usize,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let img = open(path.as_ref())?
        .resize_exact(width as u32, height as u32, FilterType::Lanczos3)
        .to_rgb8();

    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 127.5 - 1.0;
        }
    }

    Ok(Tensor::from_data(
        TensorData::new(data, [1, 3, height, width]),
        device,
    ))
}

/// Load a mask image, resized to `width x height` and binarised at 0.5
pub fn load_mask<B: Backend>(
    path: impl AsRef<Path>,
    width: usize,
    height: usize,
    device: &B::Device,
) -> Result<Mask<B>> {
    let img = open(path.as_ref())?
        .resize_exact(width as u32, height as u32, FilterType::Lanczos3)
        .to_luma8();

    let data: Vec<f32> = img
        .pixels()
        .map(|p| if p[0] as f32 / 255.0 >= 0.5 { 1.0 } else { 0.0 })
        .collect();

    let tensor = Tensor::from_data(TensorData::new(data, [1, 1, height, width]), device);
    Ok(Mask::new(tensor)?)
}

/// Load the source image and mask named by `config`
///
/// The mask is returned as stored; `invert_mask` is applied by
/// [`BlendedLatentDiffusion::run`](crate::BlendedLatentDiffusion::run).
pub fn load_inputs<B: Backend>(
    config: &RunConfig,
    device: &B::Device,
) -> Result<(Tensor<B, 4>, Mask<B>)> {
    let image = load_image(&config.src, config.width, config.height, device)?;
    let mask = load_mask(&config.mask, config.width, config.height, device)?;
    Ok((image, mask))
}

/// Convert a `[batch, 3, H, W]` tensor in `[-1, 1]` into RGB images
pub fn images_from_tensor<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [batch, channels, h, w] = tensor.dims();
    if channels != 3 {
        return Err(ConfigError::shape_mismatch("image", &[batch, 3, h, w], &tensor.dims()).into());
    }

    let scaled = (tensor.clamp(-1.0, 1.0) + 1.0) * 127.5;
    let floats = host_values(&scaled)
        .ok_or_else(|| ConfigError::invalid("image", "tensor data unreadable"))?;

    let plane = h * w;
    let mut images = Vec::with_capacity(batch);
    for b in 0..batch {
        let base = b * 3 * plane;
        let mut rgb = Vec::with_capacity(plane * 3);
        for idx in 0..plane {
            for c in 0..3 {
                rgb.push(floats[base + c * plane + idx].round() as u8);
            }
        }
        let img: Option<RgbImage> = ImageBuffer::from_raw(w as u32, h as u32, rgb);
        images.push(img.ok_or_else(|| {
            ConfigError::invalid("image", format!("cannot build a {w}x{h} buffer"))
        })?);
    }

    Ok(images)
}

/// Tile a batch into one image, `n_rows` images per row with 2px padding
pub fn make_grid<B: Backend>(tensor: Tensor<B, 4>, n_rows: usize) -> Result<RgbImage> {
    let images = images_from_tensor(tensor)?;
    let Some(first) = images.first() else {
        return Err(ConfigError::invalid("images", "cannot build a grid of zero images").into());
    };

    let (w, h) = (first.width() as usize, first.height() as usize);
    let cols = n_rows.max(1).min(images.len());
    let rows = images.len().div_ceil(cols);
    let cell_w = w + GRID_PADDING;
    let cell_h = h + GRID_PADDING;

    let mut grid = RgbImage::new(
        (cols * cell_w + GRID_PADDING) as u32,
        (rows * cell_h + GRID_PADDING) as u32,
    );
    for (i, img) in images.iter().enumerate() {
        let x0 = (i % cols) * cell_w + GRID_PADDING;
        let y0 = (i / cols) * cell_h + GRID_PADDING;
        for (x, y, pixel) in img.enumerate_pixels() {
            grid.put_pixel(x0 as u32 + x, y0 as u32 + y, *pixel);
        }
    }

    Ok(grid)
}

/// Save each image of the batch as `NNNNN.png` in `dir`
///
/// Numbering continues after the highest index already in `dir`.
pub fn save_batch_images<B: Backend>(tensor: Tensor<B, 4>, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    create_dir(dir)?;

    let start = next_index(dir, "", 5)?;
    let mut paths = Vec::new();
    for (i, img) in images_from_tensor(tensor)?.into_iter().enumerate() {
        let path = dir.join(format!("{:05}.png", start + i));
        save(&img, &path)?;
        paths.push(path);
    }

    info!(count = paths.len(), dir = %dir.display(), "saved samples");
    Ok(paths)
}

/// Save a grid of the batch as `grid-NNNN.png` in `dir`
pub fn save_grid<B: Backend>(tensor: Tensor<B, 4>, dir: impl AsRef<Path>, n_rows: usize) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir(dir)?;

    let grid = make_grid(tensor, n_rows)?;
    let path = dir.join(format!("grid-{:04}.png", next_index(dir, "grid-", 4)?));
    save(&grid, &path)?;

    info!(path = %path.display(), "saved grid");
    Ok(path)
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| BlendError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn save(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path).map_err(|source| BlendError::Image {
        path: path.to_path_buf(),
        source,
    })
}

/// One past the highest `{prefix}{digits}.png` index in `dir`
fn next_index(dir: &Path, prefix: &str, digits: usize) -> Result<usize> {
    let entries = fs::read_dir(dir).map_err(|source| BlendError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut next = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let index = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".png"))
            .filter(|num| num.len() == digits && num.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|num| num.parse::<usize>().ok());
        if let Some(index) = index {
            next = next.max(index + 1);
        }
    }

    Ok(next)
}
