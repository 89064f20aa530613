//! Per-pixel cluster labels and boolean masks derived from them

use crate::error::{DimensionMismatchSnafu, Result, ValueCountSnafu};
use image::{GrayImage, ImageBuffer, Luma, Pixel, Primitive};
use snafu::ensure;

/// The cluster label of each pixel, in row-major order
///
/// Labels are in the range `1..=k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
	/// Number of columns
	width: u32,
	/// Number of rows
	height: u32,
	/// Number of clusters
	k: u8,
	/// One label per pixel
	labels: Vec<u8>,
}

impl LabelMap {
	/// Create a label map from labels already known to be in `1..=k` and of length `width * height`
	pub(crate) fn new(width: u32, height: u32, k: u8, labels: Vec<u8>) -> Self {
		debug_assert_eq!(labels.len(), width as usize * height as usize);
		debug_assert!(labels.iter().all(|label| (1..=k).contains(label)));
		Self { width, height, k, labels }
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

	/// The number of clusters
	#[must_use]
	pub const fn k(&self) -> u8 {
		self.k
	}

	/// All labels in row-major order
	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.labels
	}

	/// The label at the given row and column, if in bounds
	#[must_use]
	pub fn get(&self, row: u32, col: u32) -> Option<u8> {
		if row < self.height && col < self.width {
			Some(self.labels[row as usize * self.width as usize + col as usize])
		} else {
			None
		}
	}

	/// A mask that is true exactly for the pixels with the given label
	#[must_use]
	pub fn mask(&self, label: u8) -> Mask {
		Mask {
			width: self.width,
			height: self.height,
			bits: self.labels.iter().map(|&l| l == label).collect(),
		}
	}

	/// Render the labels as evenly spaced gray levels, label `k` being white
	#[must_use]
	pub fn to_luma(&self) -> GrayImage {
		let k = u32::from(self.k);
		ImageBuffer::from_fn(self.width, self.height, |x, y| {
			let label = u32::from(self.labels[y as usize * self.width as usize + x as usize]);
			// label <= k, so the scaled value is <= 255
			#[allow(clippy::cast_possible_truncation)]
			Luma([(label * 255 / k) as u8])
		})
	}
}

/// A boolean membership flag for each pixel, in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
	/// Number of columns
	width: u32,
	/// Number of rows
	height: u32,
	/// Membership of each pixel
	bits: Vec<bool>,
}

impl Mask {
	/// Create a mask from one flag per pixel.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if `bits` does not have exactly `width * height` entries.
	pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Result<Self> {
		let expected = width as usize * height as usize;
		ensure!(bits.len() == expected, ValueCountSnafu { expected, len: bits.len() });
		Ok(Self { width, height, bits })
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

	/// The number of pixels covered by the mask, true or not
	#[must_use]
	pub fn len(&self) -> usize {
		self.bits.len()
	}

	/// The flags in row-major order
	#[must_use]
	pub fn as_slice(&self) -> &[bool] {
		&self.bits
	}

	/// Row-major index of the given coordinate
	fn index(&self, row: u32, col: u32) -> usize {
		row as usize * self.width as usize + col as usize
	}

	/// Whether the pixel at the given row and column is in the mask
	#[must_use]
	pub fn get(&self, row: u32, col: u32) -> bool {
		row < self.height && col < self.width && self.bits[self.index(row, col)]
	}

	/// Remove the pixel at the given row and column from the mask
	pub(crate) fn clear(&mut self, row: u32, col: u32) {
		let index = self.index(row, col);
		self.bits[index] = false;
	}

	/// The number of pixels in the mask
	#[must_use]
	pub fn count(&self) -> usize {
		self.bits.iter().filter(|&&bit| bit).count()
	}

	/// Whether no pixel is in the mask
	#[must_use]
	pub fn is_empty(&self) -> bool {
		!self.bits.contains(&true)
	}

	/// The `(row, col)` coordinates of every pixel in the mask, in row-major order
	pub fn coordinates(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
		let width = self.width as usize;
		self.bits.iter().enumerate().filter(|(_, &bit)| bit).map(move |(i, _)| {
			// i < width * height, so both parts fit in a u32
			#[allow(clippy::cast_possible_truncation)]
			((i / width) as u32, (i % width) as u32)
		})
	}

	/// Whether every pixel of this mask is also in `other`
	#[must_use]
	pub fn is_subset_of(&self, other: &Mask) -> bool {
		self.width == other.width
			&& self.height == other.height
			&& self.bits.iter().zip(&other.bits).all(|(&this, &that)| !this || that)
	}

	/// Copy `image`, setting every channel of every pixel outside the mask to zero.
	///
	/// Pixels inside the mask keep their original value.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if the image and mask dimensions differ.
	pub fn apply<P: Pixel>(
		&self,
		image: &ImageBuffer<P, Vec<P::Subpixel>>,
	) -> Result<ImageBuffer<P, Vec<P::Subpixel>>> {
		let (width, height) = image.dimensions();
		ensure!(
			width == self.width && height == self.height,
			DimensionMismatchSnafu {
				expected_width: self.width,
				expected_height: self.height,
				width,
				height,
			}
		);

		let mut masked = image.clone();
		for (pixel, _) in masked.pixels_mut().zip(&self.bits).filter(|(_, &keep)| !keep) {
			for channel in pixel.channels_mut() {
				*channel = <P::Subpixel as Primitive>::DEFAULT_MIN_VALUE;
			}
		}

		Ok(masked)
	}

	/// Render the mask as black and white
	#[must_use]
	pub fn to_luma(&self) -> GrayImage {
		ImageBuffer::from_fn(self.width, self.height, |x, y| {
			Luma([if self.bits[self.index(y, x)] { u8::MAX } else { 0 }])
		})
	}
}
