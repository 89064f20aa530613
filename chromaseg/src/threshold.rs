//! Splitting a masked region into light and dark pixels with a global (Otsu) threshold

use crate::{
	error::{EmptyMaskSnafu, Result, ValueCountSnafu},
	mask::Mask,
};
use image::{ImageBuffer, Pixel};
use snafu::ensure;

/// The number of histogram bins used to pick a threshold
pub const HISTOGRAM_BINS: usize = 256;

/// How masked lightness values are mapped onto `0.0..=1.0` before thresholding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rescale {
	/// Use the minimum and maximum over the whole image after zeroing every pixel outside the mask.
	///
	/// Unless the mask covers the whole image, the minimum is 0, so masked values keep their
	/// proportion to the brightest masked pixel. Masked pixels that end up exactly 0 are not part
	/// of the histogram but are still classified (as dark).
	#[default]
	ZeroFloor,
	/// Use the minimum and maximum over the masked pixels only.
	///
	/// Every masked pixel, including the darkest one which maps to 0, is part of the histogram.
	MaskedPopulation,
}

/// Which side of the threshold stays in the refined mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Keep {
	/// Keep pixels at or below the threshold, removing the light ones
	#[default]
	Dark,
	/// Keep pixels above the threshold, removing the dark ones
	Light,
}

/// Options for [`refine`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefineOptions {
	/// How lightness is rescaled before thresholding
	pub rescale: Rescale,
	/// Which sub-population is kept
	pub keep: Keep,
}

/// The outcome of splitting a mask by lightness
#[derive(Debug, Clone, PartialEq)]
pub struct Refinement {
	/// The input mask minus the removed sub-population
	pub mask: Mask,
	/// Threshold on the rescaled lightness; values above it are "light"
	pub threshold: f32,
	/// The number of pixels removed from the input mask
	pub removed: usize,
}

impl Refinement {
	/// A copy of `image` with every pixel outside the refined mask set to zero.
	///
	/// # Errors
	/// Returns [`crate::Error::InputShape`] if `image` is not the size of the mask.
	pub fn apply<P: Pixel>(
		&self,
		image: &ImageBuffer<P, Vec<P::Subpixel>>,
	) -> Result<ImageBuffer<P, Vec<P::Subpixel>>> {
		self.mask.apply(image)
	}
}

/// Computes a global threshold for values in `0.0..=1.0` using Otsu's method.
///
/// Values are binned into [`HISTOGRAM_BINS`] bins and the threshold maximizes the between-class
/// variance. If several bins give the same maximum, their mean is used. Returns `0.0` if there is
/// no finite maximum, e.g. for an empty slice or when all values fall in one bin.
#[must_use]
// bins are at most 255 and pixel counts stay well within f64 precision
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn otsu_threshold(values: &[f32]) -> f32 {
	if values.is_empty() {
		return 0.0;
	}

	let max_bin = (HISTOGRAM_BINS - 1) as f32;
	let mut histogram = [0_u64; HISTOGRAM_BINS];
	for &value in values {
		let bin = (value.clamp(0.0, 1.0) * max_bin).round() as usize;
		histogram[bin] += 1;
	}

	let total = values.len() as f64;
	let probabilities = histogram.map(|n| n as f64 / total);

	// accumulated in the same order as `mu` below, so the two agree exactly at the last bin
	let mean = probabilities
		.iter()
		.enumerate()
		.map(|(i, &p)| p * i as f64)
		.sum::<f64>();

	let mut omega = 0.0;
	let mut mu = 0.0;
	let mut best = f64::NEG_INFINITY;
	let mut best_bins = 0.0;
	let mut num_best = 0.0;
	for (i, &p) in probabilities.iter().enumerate() {
		let bin = i as f64;
		omega += p;
		mu += p * bin;

		let variance = (mean * omega - mu).powi(2) / (omega * (1.0 - omega));
		if variance.is_nan() {
			continue;
		}

		#[allow(clippy::float_cmp)]
		if variance > best {
			best = variance;
			best_bins = bin;
			num_best = 1.0;
		} else if variance == best {
			best_bins += bin;
			num_best += 1.0;
		}
	}

	if best.is_finite() {
		(best_bins / num_best) as f32 / max_bin
	} else {
		0.0
	}
}

/// The smallest and largest of the given values
fn min_max(values: impl IntoIterator<Item = f32>) -> (f32, f32) {
	values
		.into_iter()
		.fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| (min.min(v), max.max(v)))
}

/// Splits the pixels of `mask` into light and dark by lightness and removes one side.
///
/// `lightness` holds one value per pixel in row-major order (e.g. from
/// [`crate::LabImage::lightness`]). The threshold is computed only from the masked-in pixels.
/// Masked pixels are visited in row-major coordinate order, and each one is classified by the
/// rescaled value at its own coordinate, so the removed pixels are exactly the ones on the
/// removed side of the threshold. The input mask is left untouched.
///
/// The refined image, with every pixel outside the refined mask zeroed, is given by
/// [`Refinement::apply`].
///
/// # Errors
/// Returns [`crate::Error::EmptyMask`] if `mask` has no pixels,
/// or [`crate::Error::InputShape`] if `lightness` does not have one value per mask pixel.
pub fn refine(lightness: &[f32], mask: &Mask, options: &RefineOptions) -> Result<Refinement> {
	ensure!(
		lightness.len() == mask.len(),
		ValueCountSnafu { expected: mask.len(), len: lightness.len() }
	);
	ensure!(!mask.is_empty(), EmptyMaskSnafu);

	let width = mask.width() as usize;
	let masked = lightness
		.iter()
		.zip(mask.as_slice())
		.map(|(&l, &inside)| if inside { l } else { 0.0 })
		.collect::<Vec<_>>();
	let at = |(row, col): (u32, u32)| masked[row as usize * width + col as usize];

	let (min, max) = match options.rescale {
		Rescale::ZeroFloor => min_max(masked.iter().copied()),
		Rescale::MaskedPopulation => min_max(mask.coordinates().map(at)),
	};
	let range = max - min;
	let rescale = |value: f32| if range > 0.0 { (value - min) / range } else { 0.0 };

	let members = mask
		.coordinates()
		.map(|coordinate| (coordinate, rescale(at(coordinate))))
		.collect::<Vec<_>>();

	let population = match options.rescale {
		Rescale::ZeroFloor => members.iter().map(|&(_, v)| v).filter(|&v| v > 0.0).collect::<Vec<_>>(),
		Rescale::MaskedPopulation => members.iter().map(|&(_, v)| v).collect(),
	};
	let threshold = otsu_threshold(&population);

	let mut refined = mask.clone();
	let mut removed = 0;
	for &((row, col), value) in &members {
		let light = value > threshold;
		let remove = match options.keep {
			Keep::Dark => light,
			Keep::Light => !light,
		};
		if remove {
			refined.clear(row, col);
			removed += 1;
		}
	}

	log::debug!(
		"lightness threshold {threshold} over {} samples removed {removed} of {} pixels",
		population.len(),
		members.len()
	);

	Ok(Refinement { mask: refined, threshold, removed })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;
	use crate::error::Error;
	use image::{GrayImage, Luma};

	/// A 4x8 image: the masked 4x4 block on the right alternates between two lightness values
	fn two_populations(dark: f32, light: f32) -> (Vec<f32>, Mask) {
		let mut lightness = Vec::new();
		let mut bits = Vec::new();
		for row in 0..4 {
			for col in 0..8 {
				let inside = col >= 4;
				bits.push(inside);
				lightness.push(match (inside, (row + col) % 2 == 0) {
					(false, _) => 90.0,
					(true, true) => dark,
					(true, false) => light,
				});
			}
		}
		(lightness, Mask::new(8, 4, bits).unwrap())
	}

	#[test]
	fn otsu_splits_two_populations() {
		let values = [[0.2; 8], [0.8; 8]].concat();
		let threshold = otsu_threshold(&values);

		assert!(0.2 < threshold && threshold < 0.8);
		assert_eq!(values.iter().filter(|&&v| v > threshold).count(), 8);
	}

	#[test]
	fn otsu_of_degenerate_populations() {
		assert_eq!(otsu_threshold(&[]), 0.0);
		assert_eq!(otsu_threshold(&[0.5; 10]), 0.0);
	}

	#[test]
	fn otsu_prefers_the_wider_gap() {
		let values = [[0.1; 10], [0.15; 10], [0.9; 10]].concat();
		let threshold = otsu_threshold(&values);

		assert!(0.15 < threshold && threshold < 0.9);
	}

	#[test]
	fn refine_removes_light_pixels() {
		let (lightness, mask) = two_populations(20.0, 80.0);
		let refinement = refine(&lightness, &mask, &RefineOptions::default()).unwrap();

		assert_eq!(refinement.removed, 8);
		assert_eq!(refinement.mask.count(), 8);
		assert!(refinement.mask.is_subset_of(&mask));
		// rescaled values are 0.25 and 1.0
		assert!(0.25 < refinement.threshold && refinement.threshold < 1.0);
		for (row, col) in refinement.mask.coordinates() {
			assert_eq!(lightness[(row * 8 + col) as usize], 20.0);
		}
	}

	#[test]
	fn refine_keeps_light_pixels() {
		let (lightness, mask) = two_populations(20.0, 80.0);
		let options = RefineOptions { keep: Keep::Light, ..RefineOptions::default() };
		let refinement = refine(&lightness, &mask, &options).unwrap();

		assert_eq!(refinement.removed, 8);
		for (row, col) in refinement.mask.coordinates() {
			assert_eq!(lightness[(row * 8 + col) as usize], 80.0);
		}
	}

	#[test]
	fn refined_image_keeps_only_dark_pixels() {
		let (lightness, mask) = two_populations(20.0, 80.0);
		let refinement = refine(&lightness, &mask, &RefineOptions::default()).unwrap();

		// lightness stored as gray levels so the image lines up with the mask
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let image = GrayImage::from_fn(8, 4, |x, y| Luma([lightness[(y * 8 + x) as usize] as u8]));
		let refined = refinement.apply(&image).unwrap();

		for (x, y, pixel) in refined.enumerate_pixels() {
			if refinement.mask.get(y, x) {
				assert_eq!(pixel.0, [20]);
			} else {
				assert_eq!(pixel.0, [0]);
			}
		}
		assert_eq!(refined.pixels().filter(|pixel| pixel.0 == [20]).count(), 8);
		assert!(refinement.apply(&GrayImage::new(4, 8)).is_err());
	}

	#[test]
	fn refine_does_not_modify_input_mask() {
		let (lightness, mask) = two_populations(20.0, 80.0);
		let before = mask.clone();
		let _ = refine(&lightness, &mask, &RefineOptions::default()).unwrap();
		assert_eq!(mask, before);
	}

	#[test]
	fn removed_pixels_are_above_the_threshold() {
		let mut lightness = Vec::new();
		let mut bits = Vec::new();
		for i in 0..64_u16 {
			lightness.push(f32::from(i * 37 % 101));
			bits.push(i % 3 != 0);
		}
		let mask = Mask::new(8, 8, bits).unwrap();

		for rescale in [Rescale::ZeroFloor, Rescale::MaskedPopulation] {
			let options = RefineOptions { rescale, keep: Keep::Dark };
			let refinement = refine(&lightness, &mask, &options).unwrap();
			assert!(refinement.mask.is_subset_of(&mask));

			let masked = mask.coordinates().map(|(r, c)| lightness[(r * 8 + c) as usize]);
			let (min, max) = match rescale {
				Rescale::ZeroFloor => (0.0, masked.fold(0.0, f32::max)),
				Rescale::MaskedPopulation => min_max(masked),
			};

			let mut removed = 0;
			for (row, col) in mask.coordinates() {
				let value = (lightness[(row * 8 + col) as usize] - min) / (max - min);
				if refinement.mask.get(row, col) {
					assert!(value <= refinement.threshold);
				} else {
					assert!(value > refinement.threshold);
					removed += 1;
				}
			}
			assert_eq!(removed, refinement.removed);
			assert!(removed > 0);
		}
	}

	#[test]
	fn masked_population_rescale_splits_at_the_middle() {
		let (lightness, mask) = two_populations(20.0, 80.0);
		let options = RefineOptions { rescale: Rescale::MaskedPopulation, keep: Keep::Dark };
		let refinement = refine(&lightness, &mask, &options).unwrap();

		// rescaled values are 0.0 and 1.0
		assert!((refinement.threshold - 0.5).abs() < 0.01);
		assert_eq!(refinement.mask.count(), 8);
	}

	#[test]
	fn constant_lightness_removes_nothing() {
		let lightness = vec![50.0; 16];
		let mask = Mask::new(4, 4, vec![true; 16]).unwrap();
		let refinement = refine(&lightness, &mask, &RefineOptions::default()).unwrap();

		assert_eq!(refinement.removed, 0);
		assert_eq!(refinement.mask, mask);
	}

	#[test]
	fn empty_mask_is_an_error() {
		let mask = Mask::new(4, 4, vec![false; 16]).unwrap();
		let result = refine(&[1.0; 16], &mask, &RefineOptions::default());
		assert!(matches!(result, Err(Error::EmptyMask)));
	}

	#[test]
	fn lightness_length_is_checked() {
		let mask = Mask::new(4, 4, vec![true; 16]).unwrap();
		let result = refine(&[1.0; 15], &mask, &RefineOptions::default());
		assert!(matches!(result, Err(Error::InputShape { .. })));
	}
}
