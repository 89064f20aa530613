//! Error types returned by each segmentation stage

use snafu::Snafu;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while segmenting an image
///
/// A failed stage aborts the pipeline for that image; no partial results are returned.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
	/// The input samples do not have the expected shape
	#[snafu(context(false), display("invalid input shape: {source}"))]
	InputShape {
		/// What was wrong with the shape
		source: ShapeError,
	},

	/// The k-means parameters cannot produce a clustering for the given input
	#[snafu(context(false), display("invalid configuration: {source}"))]
	InvalidConfiguration {
		/// Which parameter was invalid
		source: ConfigError,
	},

	/// A lightness split was requested for a mask without any pixels
	#[snafu(display("the mask contains no pixels to threshold"))]
	EmptyMask,
}

/// Shape problems with an image, feature list, or mask
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ShapeError {
	/// Only 3 channel (RGB) input is supported
	#[snafu(display("expected 3 color channels, got {channels}"))]
	ChannelCount {
		/// The provided number of channels
		channels: usize,
	},

	/// Width or height was zero
	#[snafu(display("image size must be positive, got {width}x{height}"))]
	ZeroImageSize {
		/// Provided width
		width: u32,
		/// Provided height
		height: u32,
	},

	/// The sample buffer does not hold exactly width * height * channels samples
	#[snafu(display("image size ({width}x{height}x{channels}) doesn't match the buffer length ({len})"))]
	BufferLength {
		/// Provided width
		width: u32,
		/// Provided height
		height: u32,
		/// Provided number of channels
		channels: usize,
		/// Actual buffer length
		len: usize,
	},

	/// Two per-pixel arrays that must line up have different dimensions
	#[snafu(display("expected {expected_width}x{expected_height} pixels, got {width}x{height}"))]
	DimensionMismatch {
		/// Width of the reference array
		expected_width: u32,
		/// Height of the reference array
		expected_height: u32,
		/// Width of the offending array
		width: u32,
		/// Height of the offending array
		height: u32,
	},

	/// A floating point sample is not a finite value in `0.0..=1.0`
	#[snafu(display("sample {index} is {value}, expected a value in [0, 1]"))]
	SampleRange {
		/// Position of the sample in the buffer
		index: usize,
		/// The offending sample
		value: f32,
	},

	/// A chromaticity component is not finite or exceeds [`crate::MAX_CHROMA`] in magnitude
	#[snafu(display("feature {index} has component {value}, which is not finite or is too large"))]
	FeatureRange {
		/// Row-major pixel index of the feature
		index: usize,
		/// The offending component
		value: f32,
	},

	/// A per-pixel value list does not have one value per mask pixel
	#[snafu(display("expected {expected} values, got {len}"))]
	ValueCount {
		/// Number of pixels in the mask
		expected: usize,
		/// Number of provided values
		len: usize,
	},
}

/// Invalid k-means parameters
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum ConfigError {
	/// k must be at least 1
	#[snafu(display("the number of clusters must be at least 1"))]
	ZeroClusters,

	/// There are fewer distinct points than requested clusters
	#[snafu(display("cannot form {k} clusters from {distinct} distinct points"))]
	TooManyClusters {
		/// Requested number of clusters
		k: u8,
		/// Number of distinct feature points
		distinct: usize,
	},

	/// At least one attempt must be run
	#[snafu(display("the number of attempts must be at least 1"))]
	ZeroAttempts,

	/// At least one iteration must be allowed
	#[snafu(display("the maximum number of iterations must be at least 1"))]
	ZeroIterations,
}
