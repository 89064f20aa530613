//! Segment an image by k-means clustering of its CIELAB chromaticity.
//!
//! The pipeline has five stages, each taking the previous stage's output:
//!
//! 1. [`LabImage`] converts sRGB pixels to CIELAB (D65 white point).
//! 2. [`LabImage::chromaticity`] keeps the (a*, b*) channels of each pixel as [`Features`].
//! 3. [`kmeans::run`] clusters the features into a [`LabelMap`].
//! 4. [`LabelMap::mask`] and [`Mask::apply`] isolate one cluster.
//! 5. [`threshold::refine`] splits a cluster into light and dark pixels with Otsu's method.
//!
//! [`segment`] runs stages 1 to 3, and [`Segmentation`] offers stages 4 and 5 on the result.
//!
//! # Examples
//!
//! ## Isolate dark nuclei in the blue stained cluster of a micrograph.
//!
//! ```no_run
//! use chromaseg::{Params, RefineOptions};
//! use palette::Srgb;
//!
//! let image = image::open("some image").unwrap().into_rgb8();
//! let segmentation = chromaseg::segment(&image, &Params::default()).unwrap();
//!
//! let blue = segmentation.cluster_nearest(Srgb::new(0, 0, 255));
//! let nuclei = segmentation.refine_cluster(blue, &RefineOptions::default()).unwrap();
//! let result = nuclei.apply(&image).unwrap();
//! ```
//!
//! ## Run the stages by hand.
//!
//! ```no_run
//! use chromaseg::{kmeans, threshold, LabImage, Params, RefineOptions};
//!
//! let image = image::open("some image").unwrap().into_rgb8();
//! let lab = LabImage::from_rgb_image(&image).unwrap();
//!
//! let params = Params { k: 4, attempts: 5, ..Params::default() };
//! let clustering = kmeans::run(&lab.chromaticity(), &params).unwrap();
//!
//! let mask = clustering.labels.mask(2);
//! let refined = threshold::refine(&lab.lightness(), &mask, &RefineOptions::default()).unwrap();
//! ```
//!
//! # Arguments
//!
//! ## K
//!
//! The number of clusters. It is chosen by the caller and never inferred.
//! It must be at least 1 and at most the number of distinct chromaticities in the image.
//!
//! ## Attempts
//!
//! The number of times to run k-means from different starting centroids,
//! keeping the run with the lowest variance.
//! k-means can get stuck in a local minimum, so a few attempts guard against a poor result.
//!
//! ## Max Iterations
//!
//! The maximum number of iterations for each attempt.
//! An attempt normally stops once no pixel changes cluster.
//!
//! ## Seed
//!
//! The value used to seed the random number generator which chooses the starting centroids.
//! The same seed and input always give the same labels.
//!
//! ## Rescale
//!
//! See [`Rescale`]. The default, [`Rescale::ZeroFloor`], rescales the masked lightness
//! together with the zeroed pixels outside the mask.

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::cargo)]
#![warn(clippy::use_debug, clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![warn(clippy::unwrap_used, clippy::unwrap_in_result)]
#![warn(clippy::unneeded_field_pattern, clippy::rest_pat_in_fully_bound_structs)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::str_to_string, clippy::string_to_string, clippy::string_slice)]
#![warn(missing_docs, clippy::missing_docs_in_private_items, rustdoc::all)]
#![warn(clippy::float_cmp_const, clippy::lossy_float_literal)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::enum_glob_use)]
#![allow(clippy::unreadable_literal)]

mod error;
pub mod kmeans;
mod lab;
mod mask;
pub mod threshold;

pub use error::{ConfigError, Error, Result, ShapeError};
pub use kmeans::{Clustering, Params};
pub use lab::{Chroma, Features, LabColor, LabImage, MAX_CHROMA};
pub use mask::{LabelMap, Mask};
pub use threshold::{Keep, RefineOptions, Refinement, Rescale};

use image::{ImageBuffer, Pixel, RgbImage};
use palette::{FromColor, Srgb};

/// A clustered image, ready for per-cluster masking and lightness splits
#[derive(Debug, Clone)]
pub struct Segmentation {
	/// The image in CIELAB
	lab: LabImage,
	/// The k-means result over the chromaticity of `lab`
	clustering: Clustering,
}

/// Converts an RGB image to CIELAB and clusters its chromaticity.
///
/// # Errors
/// Returns [`Error::InputShape`] for an empty image,
/// or [`Error::InvalidConfiguration`] for invalid `params`.
pub fn segment(image: &RgbImage, params: &Params) -> Result<Segmentation> {
	Segmentation::new(LabImage::from_rgb_image(image)?, params)
}

impl Segmentation {
	/// Clusters the chromaticity of an image already converted to CIELAB.
	///
	/// # Errors
	/// Returns [`Error::InvalidConfiguration`] for invalid `params`.
	pub fn new(lab: LabImage, params: &Params) -> Result<Self> {
		let clustering = kmeans::run(&lab.chromaticity(), params)?;
		Ok(Self { lab, clustering })
	}

	/// The image in CIELAB
	#[must_use]
	pub fn lab(&self) -> &LabImage {
		&self.lab
	}

	/// The k-means result
	#[must_use]
	pub fn clustering(&self) -> &Clustering {
		&self.clustering
	}

	/// The cluster label of each pixel
	#[must_use]
	pub fn labels(&self) -> &LabelMap {
		&self.clustering.labels
	}

	/// The labels `1..=k`
	pub fn cluster_labels(&self) -> impl Iterator<Item = u8> {
		1..=self.clustering.labels.k()
	}

	/// The pixels belonging to the given cluster
	#[must_use]
	pub fn cluster_mask(&self, label: u8) -> Mask {
		self.clustering.labels.mask(label)
	}

	/// A copy of `image` with every pixel outside the given cluster set to zero.
	///
	/// # Errors
	/// Returns [`Error::InputShape`] if `image` is not the size of the segmented image.
	pub fn cluster_image<P: Pixel>(
		&self,
		label: u8,
		image: &ImageBuffer<P, Vec<P::Subpixel>>,
	) -> Result<ImageBuffer<P, Vec<P::Subpixel>>> {
		self.cluster_mask(label).apply(image)
	}

	/// The label of the cluster whose centroid chromaticity is closest to `color`
	///
	/// Ties go to the lower label.
	#[must_use]
	// index < k <= u8::MAX
	#[allow(clippy::cast_possible_truncation)]
	pub fn cluster_nearest(&self, color: Srgb<u8>) -> u8 {
		let target = LabColor::from_color(color.into_format::<f32>());
		let distance = |[a, b]: Chroma| {
			let da = a - target.a;
			let db = b - target.b;
			da * da + db * db
		};

		let (index, _) = self
			.clustering
			.centroids
			.iter()
			.enumerate()
			.fold((0, f32::INFINITY), |(best, min), (i, &centroid)| {
				let dist = distance(centroid);
				if dist < min {
					(i, dist)
				} else {
					(best, min)
				}
			});

		index as u8 + 1
	}

	/// Labels ordered by the mean of their centroid's a* and b* components, ascending
	///
	/// Blue hues (negative b*) come first.
	#[must_use]
	pub fn clusters_by_mean_centroid(&self) -> Vec<u8> {
		let mut labels = self.cluster_labels().collect::<Vec<_>>();
		let mean = |label: u8| {
			let [a, b] = self.clustering.centroids[usize::from(label - 1)];
			(a + b) / 2.0
		};
		labels.sort_by(|&x, &y| f32::total_cmp(&mean(x), &mean(y)));
		labels
	}

	/// The average CIELAB color of the pixels in a cluster, or `None` if it has no pixels
	#[must_use]
	pub fn mean_color(&self, label: u8) -> Option<LabColor> {
		let (sum, n) = self
			.lab
			.pixels()
			.iter()
			.zip(self.clustering.labels.as_slice())
			.filter(|&(_, &l)| l == label)
			.fold(([0.0_f64; 3], 0_u32), |(sum, n), (lab, _)| {
				(
					[
						sum[0] + f64::from(lab.l),
						sum[1] + f64::from(lab.a),
						sum[2] + f64::from(lab.b),
					],
					n + 1,
				)
			});

		if n == 0 {
			None
		} else {
			let n = f64::from(n);
			#[allow(clippy::cast_possible_truncation)]
			let color = LabColor::new((sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32);
			Some(color)
		}
	}

	/// Splits a cluster into light and dark pixels by lightness and removes one side.
	///
	/// See [`threshold::refine`].
	///
	/// # Errors
	/// Returns [`Error::EmptyMask`] if the cluster has no pixels.
	pub fn refine_cluster(&self, label: u8, options: &RefineOptions) -> Result<Refinement> {
		threshold::refine(&self.lab.lightness(), &self.cluster_mask(label), options)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use image::Rgb;

	const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
	const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
	const PINK: Rgb<u8> = Rgb([255, 192, 203]);
	const DARK_BLUE: Rgb<u8> = Rgb([0, 0, 160]);

	/// Three 4x4 blocks side by side: white, blue, pink
	fn three_regions() -> RgbImage {
		ImageBuffer::from_fn(12, 4, |x, _| match x / 4 {
			0 => WHITE,
			1 => BLUE,
			_ => PINK,
		})
	}

	/// An 8x8 image: white top half, dark blue bottom left, bright blue bottom right
	fn stained() -> RgbImage {
		ImageBuffer::from_fn(8, 8, |x, y| match (y < 4, x < 4) {
			(true, _) => WHITE,
			(false, true) => DARK_BLUE,
			(false, false) => BLUE,
		})
	}

	#[test]
	fn three_uniform_regions_get_three_labels() {
		let image = three_regions();
		let params = Params { k: 3, attempts: 1, ..Params::default() };
		let segmentation = segment(&image, &params).unwrap();
		let labels = segmentation.labels();

		let region_labels = (0..3)
			.map(|region| {
				let label = labels.get(0, region * 4).unwrap();
				for row in 0..4 {
					for col in (region * 4)..(region * 4 + 4) {
						assert_eq!(labels.get(row, col), Some(label));
					}
				}
				label
			})
			.collect::<Vec<_>>();

		assert_ne!(region_labels[0], region_labels[1]);
		assert_ne!(region_labels[1], region_labels[2]);
		assert_ne!(region_labels[0], region_labels[2]);
		assert_eq!(segmentation.clustering().counts, vec![16, 16, 16]);
		assert_eq!(segmentation.cluster_nearest(Srgb::new(0, 0, 200)), region_labels[1]);
		assert_eq!(segmentation.clusters_by_mean_centroid()[0], region_labels[1]);
	}

	#[test]
	fn cluster_images_keep_only_their_region() {
		let image = three_regions();
		let segmentation = segment(&image, &Params { k: 3, attempts: 1, ..Params::default() }).unwrap();

		for label in segmentation.cluster_labels() {
			let masked = segmentation.cluster_image(label, &image).unwrap();
			for (x, y, pixel) in masked.enumerate_pixels() {
				if segmentation.labels().get(y, x) == Some(label) {
					assert_eq!(pixel, image.get_pixel(x, y));
				} else {
					assert_eq!(*pixel, Rgb([0, 0, 0]));
				}
			}
		}
	}

	#[test]
	fn mean_color_of_a_uniform_cluster_is_its_color() {
		let image = three_regions();
		let segmentation = segment(&image, &Params { k: 3, attempts: 1, ..Params::default() }).unwrap();

		let blue = segmentation.cluster_nearest(Srgb::new(0, 0, 255));
		let mean = segmentation.mean_color(blue).unwrap();
		let expected = segmentation.lab().get(0, 4).unwrap();

		assert!((mean.l - expected.l).abs() < 1e-3);
		assert!((mean.a - expected.a).abs() < 1e-3);
		assert!((mean.b - expected.b).abs() < 1e-3);
		assert!(segmentation.mean_color(0).is_none());
	}

	#[test]
	fn dark_blue_pixels_survive_refinement() {
		let image = stained();
		let segmentation = segment(&image, &Params { k: 2, attempts: 2, ..Params::default() }).unwrap();

		let blue = segmentation.cluster_nearest(Srgb::new(0, 0, 255));
		let cluster = segmentation.cluster_mask(blue);
		assert_eq!(cluster.count(), 32);

		let refinement = segmentation.refine_cluster(blue, &RefineOptions::default()).unwrap();
		assert!(refinement.mask.is_subset_of(&cluster));
		assert_eq!(refinement.removed, 16);

		let nuclei = refinement.apply(&image).unwrap();
		for (x, y, pixel) in nuclei.enumerate_pixels() {
			let expected = if y >= 4 && x < 4 { DARK_BLUE } else { Rgb([0, 0, 0]) };
			assert_eq!(*pixel, expected);
		}
	}

	#[test]
	fn refining_an_unused_label_is_an_error() {
		let segmentation = segment(&three_regions(), &Params { k: 3, attempts: 1, ..Params::default() }).unwrap();
		let result = segmentation.refine_cluster(0, &RefineOptions::default());
		assert!(matches!(result, Err(Error::EmptyMask)));
	}

	#[test]
	fn too_few_colors_for_k() {
		let result = segment(&three_regions(), &Params { k: 4, ..Params::default() });
		assert!(matches!(
			result,
			Err(Error::InvalidConfiguration { source: ConfigError::TooManyClusters { k: 4, distinct: 3 } })
		));
	}
}
