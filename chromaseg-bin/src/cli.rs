//! Specifies the CLI and handles arg parsing

use chromaseg::{Keep, Rescale};
use clap::{Parser, ValueEnum};
use palette::Srgb;
use std::{
	fmt::{Debug, Display},
	num::ParseIntError,
	ops::RangeBounds,
	path::PathBuf,
	str::FromStr,
};

/// Which side of the lightness threshold stays in the refined mask
#[derive(Copy, Clone, ValueEnum)]
pub enum KeepOutput {
	/// Keep dark pixels, removing the light ones
	Dark,
	/// Keep light pixels, removing the dark ones
	Light,
}

impl From<KeepOutput> for Keep {
	fn from(keep: KeepOutput) -> Self {
		match keep {
			KeepOutput::Dark => Keep::Dark,
			KeepOutput::Light => Keep::Light,
		}
	}
}

/// How the cluster's lightness is rescaled before thresholding
#[derive(Copy, Clone, ValueEnum)]
pub enum RescaleOutput {
	/// Rescale over the whole image with pixels outside the cluster set to zero
	ZeroFloor,
	/// Rescale over the pixels of the cluster only
	Masked,
}

impl From<RescaleOutput> for Rescale {
	fn from(rescale: RescaleOutput) -> Self {
		match rescale {
			RescaleOutput::ZeroFloor => Rescale::ZeroFloor,
			RescaleOutput::Masked => Rescale::MaskedPopulation,
		}
	}
}

/// Segment an image by k-means clustering of its CIELAB chromaticity,
/// then split one cluster into light and dark pixels with Otsu's method.
///
/// Writes the label map, one image per cluster, and the refined cluster to the output directory.
#[derive(Parser)]
#[command(version)]
pub struct Options {
	/// The path to the input image
	pub image: PathBuf,

	/// The number of clusters to find
	///
	/// This must not exceed the number of distinct chromaticities in the image.
	#[arg(short, default_value_t = 3, value_parser = parse_valid_k)]
	pub k: u8,

	/// The number of attempts of k-means to run
	///
	/// k-means can get stuck in a local minimum, so you may want to run a few or more attempts to get better results.
	/// The attempt with the lowest variance is picked.
	#[arg(short = 'n', long, default_value_t = 3, value_parser = parse_positive)]
	pub attempts: u32,

	/// The maximum number of iterations for each k-means attempt
	///
	/// You can use the --verbose option to see how many iterations the best k-means attempt took.
	#[arg(short = 'i', long, default_value_t = 100, value_parser = parse_positive)]
	pub max_iter: u32,

	/// The seed value used for the random number generator
	#[arg(long, default_value_t = 0)]
	pub seed: u64,

	/// The label of the cluster to refine
	///
	/// Labels are in the range [1, k]. Overrides --target.
	#[arg(short, long)]
	pub cluster: Option<u8>,

	/// Refine the cluster whose centroid chromaticity is nearest to this sRGB hex color
	///
	/// The default picks the blue stained cluster of a micrograph.
	#[arg(long, default_value = "#0000ff", value_parser = parse_hex_color)]
	pub target: Srgb<u8>,

	/// Which side of the lightness threshold to keep in the refined cluster
	#[arg(long, default_value = "dark")]
	pub keep: KeepOutput,

	/// How to rescale the cluster's lightness before thresholding
	#[arg(long, default_value = "zero-floor")]
	pub rescale: RescaleOutput,

	/// The directory to write the output images to
	#[arg(short, long, default_value = ".")]
	pub out: PathBuf,

	/// The number of threads to use
	///
	/// A value of 0 indicates to automatically choose the number of threads.
	#[cfg(feature = "threads")]
	#[arg(short, long, default_value_t = 0)]
	pub threads: u8,

	/// Print additional information, such as the time taken by each step
	#[arg(long)]
	pub verbose: bool,
}

/// Parse an integer value and ensure it in the provided, valid range
fn parse_int_in_range<T>(s: &str, range: impl RangeBounds<T> + Debug) -> Result<T, String>
where
	T: FromStr<Err = ParseIntError> + Display + PartialOrd,
{
	let value: T = s.parse().map_err(|e| format!("{e}"))?;
	if range.contains(&value) {
		Ok(value)
	} else {
		Err(format!("{value} is not in {range:?}"))
	}
}

/// Parse the number of clusters and ensure it is >= `1`
fn parse_valid_k(s: &str) -> Result<u8, String> {
	parse_int_in_range(s, 1..)
}

/// Parse a count and ensure it is >= `1`
fn parse_positive(s: &str) -> Result<u32, String> {
	parse_int_in_range(s, 1..)
}

/// Parse an sRGB hex color, with or without a leading `#`
fn parse_hex_color(s: &str) -> Result<Srgb<u8>, String> {
	s.parse().map_err(|e| format!("invalid hex color {s}: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn hex_colors() {
		assert_eq!(parse_hex_color("#0000ff").unwrap(), Srgb::new(0, 0, 255));
		assert_eq!(parse_hex_color("ff69b4").unwrap(), Srgb::new(255, 105, 180));
		assert!(parse_hex_color("#00ff").is_err());
		assert!(parse_hex_color("blue").is_err());
	}

	#[test]
	fn counts_must_be_positive() {
		assert_eq!(parse_valid_k("3"), Ok(3));
		assert!(parse_valid_k("0").is_err());
		assert!(parse_valid_k("256").is_err());
		assert_eq!(parse_positive("100"), Ok(100));
		assert!(parse_positive("0").is_err());
		assert!(parse_positive("-1").is_err());
	}

	#[test]
	fn defaults() {
		let options = Options::try_parse_from(["chromaseg", "image.png"]).unwrap();
		assert_eq!(options.k, 3);
		assert_eq!(options.attempts, 3);
		assert_eq!(options.max_iter, 100);
		assert_eq!(options.target, Srgb::new(0, 0, 255));
		assert_eq!(Keep::from(options.keep), Keep::Dark);
		assert_eq!(Rescale::from(options.rescale), Rescale::ZeroFloor);
		assert!(options.cluster.is_none());
	}

	#[test]
	fn enum_options() {
		let options =
			Options::try_parse_from(["chromaseg", "image.png", "--keep", "light", "--rescale", "masked", "-c", "2"])
				.unwrap();
		assert_eq!(Keep::from(options.keep), Keep::Light);
		assert_eq!(Rescale::from(options.rescale), Rescale::MaskedPopulation);
		assert_eq!(options.cluster, Some(2));
	}
}
