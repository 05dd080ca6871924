use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageError, imageops::FilterType};
use ndarray::{Array3, ArrayView3};
use safetensors::{SafeTensors, tensor::Dtype as TensorDtype};
use serde::Deserialize;

use crate::{DataErr, Result};

/// The name of the tensor holding the pixels of a pre-baked `.safetensors` item.
pub const ITEM_TENSOR: &str = "im";

/// How raw items are turned into `[C, H, W]` tensors.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageTransformConfig {
    /// The target height.
    pub height: u32,
    /// The target width.
    pub width: u32,
    /// Produce a single channel instead of three.
    #[serde(default)]
    pub greyscale: bool,
    /// Scale 8-bit pixels into `[0, 1]`.
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    /// An image or `.safetensors` item of exactly the target shape, subtracted from
    /// every item.
    #[serde(default)]
    pub mean_image: Option<PathBuf>,
}

fn default_normalize() -> bool {
    true
}

impl ImageTransformConfig {
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            greyscale: false,
            normalize: true,
            mean_image: None,
        }
    }

    /// The `[C, H, W]` shape of a transformed item.
    pub fn shape(&self) -> [usize; 3] {
        let channels = if self.greyscale { 1 } else { 3 };
        [channels, self.height as usize, self.width as usize]
    }
}

/// The validated item transform pipeline.
///
/// Decodes raw bytes, resizes to the target shape, reorders channels to `[C, H, W]`,
/// normalizes and finally subtracts the mean image if one was configured.
#[derive(Debug, Clone)]
pub struct ImageTransform {
    config: ImageTransformConfig,
    mean: Option<Array3<f32>>,
}

impl ImageTransform {
    /// Validates `config` and loads its mean image.
    ///
    /// # Returns
    /// `DataErr::Config` if the target shape is empty or the mean image can't be loaded
    /// or has a different shape than the target.
    pub fn new(config: ImageTransformConfig) -> Result<Self> {
        if config.height == 0 || config.width == 0 {
            return Err(DataErr::Config(format!(
                "target shape must be non-empty, got {}x{}",
                config.height, config.width
            )));
        }

        let mut transform = Self { config, mean: None };

        if let Some(path) = transform.config.mean_image.clone() {
            let mean = transform
                .decode_mean(&path)
                .map_err(|e| DataErr::Config(format!("cannot load mean image: {e}")))?;

            transform.mean = Some(mean);
        }

        Ok(transform)
    }

    pub fn config(&self) -> &ImageTransformConfig {
        &self.config
    }

    /// The `[C, H, W]` shape of a transformed item.
    pub fn shape(&self) -> [usize; 3] {
        self.config.shape()
    }

    /// Reads and transforms the item at `path`.
    ///
    /// # Returns
    /// The item tensor, `DataErr::Read` if the file is missing or unreadable and
    /// `DataErr::Corrupt` if it can't be decoded or has the wrong shape.
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let mut item = self.decode(path)?;

        if let Some(mean) = &self.mean {
            item -= mean;
        }

        Ok(item)
    }

    fn decode(&self, path: &Path) -> Result<Array3<f32>> {
        match is_tensor_file(path) {
            true => self.decode_tensor(path),
            false => self.decode_image(path),
        }
    }

    /// Decodes the mean image, which must already have the target shape.
    fn decode_mean(&self, path: &Path) -> Result<Array3<f32>> {
        if is_tensor_file(path) {
            return self.decode_tensor(path);
        }

        let img = open_image(path)?;
        let [c, h, w] = self.shape();
        let channels = if img.color().has_color() { 3 } else { 1 };
        let native = [channels, img.height() as usize, img.width() as usize];

        if native != [c, h, w] {
            return Err(DataErr::corrupt(
                path,
                format!("mean shape {native:?} differs from the target shape {:?}", [c, h, w]),
            ));
        }

        self.to_chw(&img, path)
    }

    fn decode_image(&self, path: &Path) -> Result<Array3<f32>> {
        let img = open_image(path)?;
        self.to_chw(&img, path)
    }

    /// Resizes `img` to the target shape and reorders it to `[C, H, W]`.
    fn to_chw(&self, img: &DynamicImage, path: &Path) -> Result<Array3<f32>> {
        let [c, h, w] = self.shape();
        let (width, height) = (self.config.width, self.config.height);

        let raw = match self.config.greyscale {
            true => image::imageops::resize(&img.to_luma8(), width, height, FilterType::Nearest)
                .into_raw(),
            false => image::imageops::resize(&img.to_rgb8(), width, height, FilterType::Nearest)
                .into_raw(),
        };

        let hwc = ArrayView3::from_shape((h, w, c), &raw[..])
            .map_err(|e| DataErr::corrupt(path, e))?;

        let scale = self.scale();
        let chw = hwc.permuted_axes([2, 0, 1]).mapv(|p| p as f32 * scale);

        Ok(chw.as_standard_layout().into_owned())
    }

    fn decode_tensor(&self, path: &Path) -> Result<Array3<f32>> {
        let bytes = fs::read(path).map_err(|e| DataErr::read(path, e))?;
        let st = SafeTensors::deserialize(&bytes).map_err(|e| DataErr::corrupt(path, e))?;
        let tv = st
            .tensor(ITEM_TENSOR)
            .map_err(|e| DataErr::corrupt(path, e))?;

        let expected = self.shape();
        let shape = match *tv.shape() {
            [h, w] => [1, h, w],
            [c, h, w] => [c, h, w],
            ref other => {
                return Err(DataErr::corrupt(
                    path,
                    format!("tensor '{ITEM_TENSOR}' has rank {}, expected 2 or 3", other.len()),
                ));
            }
        };

        if shape != expected {
            return Err(DataErr::corrupt(
                path,
                format!("item shape {shape:?} differs from the target shape {expected:?}"),
            ));
        }

        let data = tv.data();
        let values: Vec<f32> = match tv.dtype() {
            TensorDtype::F32 => data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            TensorDtype::U8 => {
                let scale = self.scale();
                data.iter().map(|&p| p as f32 * scale).collect()
            }
            other => {
                return Err(DataErr::corrupt(
                    path,
                    format!("unsupported item dtype {other:?}"),
                ));
            }
        };

        let [c, h, w] = shape;
        Array3::from_shape_vec((c, h, w), values).map_err(|e| DataErr::corrupt(path, e))
    }

    fn scale(&self) -> f32 {
        match self.config.normalize {
            true => 1.0 / 255.0,
            false => 1.0,
        }
    }
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| match e {
        ImageError::IoError(e) => DataErr::read(path, e),
        e => DataErr::corrupt(path, e),
    })
}

fn is_tensor_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "safetensors")
}
