//! Conversion from sRGB to CIELAB and extraction of the per-pixel chromaticity

use crate::error::{
	BufferLengthSnafu, ChannelCountSnafu, FeatureRangeSnafu, Result, SampleRangeSnafu, ValueCountSnafu,
	ZeroImageSizeSnafu,
};
use image::RgbImage;
use palette::{white_point::D65, FromColor, Lab, Srgb};
use snafu::ensure;
use std::collections::HashMap;

/// A CIELAB color with a D65 reference white, as produced by [`LabImage`]
pub type LabColor = Lab<D65, f32>;

/// The (a*, b*) chromaticity of a single pixel
pub type Chroma = [f32; 2];

/// The largest magnitude accepted for a chromaticity component by [`Features::new`]
///
/// Converted sRGB colors stay within a few hundred; the bound keeps squared distances finite.
pub const MAX_CHROMA: f32 = 1.0e9;

/// The number of channels in an RGB image
const RGB_CHANNELS: usize = 3;

/// Check that a sample buffer holds exactly `width * height` RGB pixels
fn check_shape(len: usize, width: u32, height: u32, channels: usize) -> Result<()> {
	ensure!(channels == RGB_CHANNELS, ChannelCountSnafu { channels });
	ensure!(width > 0 && height > 0, ZeroImageSizeSnafu { width, height });
	ensure!(
		len == width as usize * height as usize * channels,
		BufferLengthSnafu { width, height, channels, len }
	);
	Ok(())
}

/// An image converted to the CIELAB color space
///
/// Channel 0 (`l`) is lightness in `0.0..=100.0`,
/// channels 1 and 2 (`a` and `b`) are the chromaticity of each pixel.
/// Pixels are stored in row-major order.
#[derive(Debug, Clone)]
pub struct LabImage {
	/// Number of columns
	width: u32,
	/// Number of rows
	height: u32,
	/// Converted pixels, row-major
	pixels: Vec<LabColor>,
}

impl LabImage {
	/// Converts interleaved 8-bit sRGB samples to CIELAB.
	///
	/// `channels` must be 3 and `samples` must contain exactly `width * height * channels` values.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if the channel count or buffer length is wrong,
	/// or if the image is empty.
	pub fn from_srgb8(samples: &[u8], width: u32, height: u32, channels: usize) -> Result<Self> {
		check_shape(samples.len(), width, height, channels)?;

		let srgb: &[Srgb<u8>] = palette::cast::from_component_slice(samples);

		// Converting to Lab is the expensive part and images tend to repeat colors,
		// so each distinct sRGB color is converted only once.
		let mut memo: HashMap<u32, LabColor> = HashMap::new();
		let pixels = srgb
			.iter()
			.map(|srgb| {
				let key = srgb.into_u32::<palette::rgb::channels::Rgba>();
				*memo
					.entry(key)
					.or_insert_with(|| LabColor::from_color(srgb.into_format::<f32>()))
			})
			.collect();

		Ok(Self { width, height, pixels })
	}

	/// Converts interleaved sRGB samples in the range `0.0..=1.0` to CIELAB.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if the channel count or buffer length is wrong,
	/// if the image is empty, or if a sample is NaN or outside `0.0..=1.0`.
	pub fn from_srgb_f32(samples: &[f32], width: u32, height: u32, channels: usize) -> Result<Self> {
		check_shape(samples.len(), width, height, channels)?;
		for (index, &value) in samples.iter().enumerate() {
			ensure!((0.0..=1.0).contains(&value), SampleRangeSnafu { index, value });
		}

		let srgb: &[Srgb<f32>] = palette::cast::from_component_slice(samples);
		let pixels = srgb.iter().map(|&srgb| LabColor::from_color(srgb)).collect();

		Ok(Self { width, height, pixels })
	}

	/// Converts an 8-bit RGB image to CIELAB.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if the image has no pixels.
	pub fn from_rgb_image(image: &RgbImage) -> Result<Self> {
		Self::from_srgb8(image.as_raw(), image.width(), image.height(), RGB_CHANNELS)
	}

	/// The number of columns
	#[must_use]
	pub const fn width(&self) -> u32 {
		self.width
	}

	/// The number of rows
	#[must_use]
	pub const fn height(&self) -> u32 {
		self.height
	}

	/// All pixels in row-major order
	#[must_use]
	pub fn pixels(&self) -> &[LabColor] {
		&self.pixels
	}

	/// The pixel at the given row and column, if in bounds
	#[must_use]
	pub fn get(&self, row: u32, col: u32) -> Option<LabColor> {
		if row < self.height && col < self.width {
			Some(self.pixels[row as usize * self.width as usize + col as usize])
		} else {
			None
		}
	}

	/// The lightness channel in row-major order
	#[must_use]
	pub fn lightness(&self) -> Vec<f32> {
		self.pixels.iter().map(|lab| lab.l).collect()
	}

	/// Drops the lightness channel and returns the (a*, b*) chromaticity of each pixel.
	///
	/// The features keep the row-major pixel order of this image,
	/// which is what allows per-pixel labels to be mapped back onto the image grid.
	#[must_use]
	pub fn chromaticity(&self) -> Features {
		Features {
			width: self.width,
			height: self.height,
			values: self.pixels.iter().map(|lab| [lab.a, lab.b]).collect(),
		}
	}
}

/// One (a*, b*) chromaticity vector per pixel, in row-major order
#[derive(Debug, Clone)]
pub struct Features {
	/// Number of columns of the source image
	pub(crate) width: u32,
	/// Number of rows of the source image
	pub(crate) height: u32,
	/// Chromaticity of each pixel
	pub(crate) values: Vec<Chroma>,
}

impl Features {
	/// Creates a feature list for an image of the given size.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if `values` does not have exactly `width * height` entries,
	/// or if a component is not finite or larger than [`MAX_CHROMA`] in magnitude.
	pub fn new(width: u32, height: u32, values: Vec<Chroma>) -> Result<Self> {
		let expected = width as usize * height as usize;
		ensure!(values.len() == expected, ValueCountSnafu { expected, len: values.len() });
		for (index, point) in values.iter().enumerate() {
			for &value in point {
				ensure!(value.abs() <= MAX_CHROMA, FeatureRangeSnafu { index, value });
			}
		}
		Ok(Self { width, height, values })
	}

	/// The number of columns of the source image
	#[must_use]
	pub const fn width(&self) -> u32 {
		self.width
	}

	/// The number of rows of the source image
	#[must_use]
	pub const fn height(&self) -> u32 {
		self.height
	}

	/// The feature vectors in row-major pixel order
	#[must_use]
	pub fn as_slice(&self) -> &[Chroma] {
		&self.values
	}

	/// The number of pixels
	#[must_use]
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether there are no pixels
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}
