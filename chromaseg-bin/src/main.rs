//! Segment an image by k-means clustering of its CIELAB chromaticity and refine one cluster by lightness.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
	clippy::pedantic,
	clippy::cargo,
	clippy::use_debug,
	clippy::dbg_macro,
	clippy::todo,
	clippy::unimplemented,
	clippy::unwrap_used,
	clippy::unwrap_in_result,
	clippy::unneeded_field_pattern,
	clippy::rest_pat_in_fully_bound_structs,
	clippy::unnecessary_self_imports,
	clippy::str_to_string,
	clippy::string_to_string,
	clippy::string_slice,
	missing_docs,
	clippy::missing_docs_in_private_items,
	rustdoc::all,
	clippy::float_cmp_const,
	clippy::lossy_float_literal
)]
#![allow(clippy::doc_markdown, clippy::module_name_repetitions, clippy::missing_panics_doc)]

mod cli;
mod logger;

use cli::Options;

use std::{
	fmt::{self, Display},
	path::{Path, PathBuf},
	process::ExitCode,
	time::Instant,
};

use chromaseg::{Params, RefineOptions, Refinement, Segmentation};
use clap::Parser;
use colored::Colorize;
use image::{DynamicImage, RgbImage};
use log::LevelFilter;
use palette::{FromColor, Srgb};

/// Record the running time of a function and log the elapsed time
macro_rules! time {
	($name: literal, $func_call: expr) => {{
		let start = Instant::now();
		let result = $func_call;
		log::debug!("{} took {}ms", $name, start.elapsed().as_millis());
		result
	}};
}

/// Error cases for loading an image, segmenting it, and writing the results
#[derive(Debug)]
enum RunError {
	/// Failed to read or decode the image file
	ImageLoad(image::ImageError),
	/// The image could not be segmented or refined
	Segment(chromaseg::Error),
	/// The requested cluster label is not in `1..=k`
	InvalidCluster {
		/// The requested label
		label: u8,
		/// The number of clusters
		k: u8,
	},
	/// Failed to create the output directory
	OutputDir(std::io::Error),
	/// Failed to encode or write an output image
	ImageSave(PathBuf, image::ImageError),
	/// Failed to build the thread pool
	#[cfg(feature = "threads")]
	ThreadPool(rayon::ThreadPoolBuildError),
}

impl Display for RunError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			RunError::ImageLoad(e) => write!(f, "Failed to load the image file: {e}"),
			RunError::Segment(e) => write!(f, "Failed to segment the image: {e}"),
			RunError::InvalidCluster { label, k } => {
				write!(f, "Cluster {label} does not exist, labels are in the range [1, {k}]")
			}
			RunError::OutputDir(e) => write!(f, "Failed to create the output directory: {e}"),
			RunError::ImageSave(path, e) => write!(f, "Failed to write {}: {e}", path.display()),
			#[cfg(feature = "threads")]
			RunError::ThreadPool(e) => write!(f, "Failed to start the thread pool: {e}"),
		}
	}
}

impl From<chromaseg::Error> for RunError {
	fn from(e: chromaseg::Error) -> Self {
		RunError::Segment(e)
	}
}

fn main() -> ExitCode {
	let options = Options::parse();

	logger::init(if options.verbose { LevelFilter::Debug } else { LevelFilter::Warn });

	let result = run_segment_and_refine(&options);

	// Returning Result<_> uses Debug printing instead of Display
	if let Err(e) = result {
		eprintln!("{e}");
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}

/// Builds a thread pool and then runs `segment_and_refine`
#[cfg(feature = "threads")]
fn run_segment_and_refine(options: &Options) -> Result<(), RunError> {
	let pool = rayon::ThreadPoolBuilder::new()
		.num_threads(usize::from(options.threads))
		.build()
		.map_err(RunError::ThreadPool)?;

	pool.install(|| segment_and_refine(options))
}

/// Runs `segment_and_refine` on a single thread
#[cfg(not(feature = "threads"))]
fn run_segment_and_refine(options: &Options) -> Result<(), RunError> {
	segment_and_refine(options)
}

/// Load an image, segment it, refine the selected cluster, then write and print the results
fn segment_and_refine(options: &Options) -> Result<(), RunError> {
	let Options { k, attempts, max_iter, seed, .. } = *options;

	// Input
	let image = time!("Image loading", load_image(&options.image))?;

	// Processing
	let params = Params { k, attempts, max_iter, seed };
	let segmentation = time!("Segmentation", chromaseg::segment(&image, &params))?;
	log::debug!(
		"Best of {attempts} attempts took {} iterations with variance {}",
		segmentation.clustering().iterations,
		segmentation.clustering().variance
	);

	let label = select_cluster(&segmentation, options)?;
	let refine_options = RefineOptions { rescale: options.rescale.into(), keep: options.keep.into() };
	let refinement = time!("Refinement", segmentation.refine_cluster(label, &refine_options))?;

	// Output
	time!("Writing images", write_images(&image, &segmentation, &refinement, &options.out))?;
	print_summary(&segmentation, label, &refinement);

	Ok(())
}

/// Load the image at the given path as 8-bit RGB
fn load_image(path: &Path) -> Result<RgbImage, RunError> {
	image::open(path).map(DynamicImage::into_rgb8).map_err(RunError::ImageLoad)
}

/// The cluster given by `--cluster`, or else the one nearest to `--target`
fn select_cluster(segmentation: &Segmentation, options: &Options) -> Result<u8, RunError> {
	let k = segmentation.labels().k();
	match options.cluster {
		Some(label) if (1..=k).contains(&label) => Ok(label),
		Some(label) => Err(RunError::InvalidCluster { label, k }),
		None => {
			let label = segmentation.cluster_nearest(options.target);
			log::debug!("Cluster {label} is nearest to {:X}", options.target);
			Ok(label)
		}
	}
}

/// Encode and save an image, picking the format from the path's extension
fn save(image: impl Into<DynamicImage>, path: PathBuf) -> Result<(), RunError> {
	image.into().save(&path).map_err(|e| RunError::ImageSave(path, e))
}

/// Write the label map, each cluster, and the refined cluster with its mask to `dir`
fn write_images(
	image: &RgbImage,
	segmentation: &Segmentation,
	refinement: &Refinement,
	dir: &Path,
) -> Result<(), RunError> {
	std::fs::create_dir_all(dir).map_err(RunError::OutputDir)?;

	save(segmentation.labels().to_luma(), dir.join("labels.png"))?;
	for label in segmentation.cluster_labels() {
		save(segmentation.cluster_image(label, image)?, dir.join(format!("cluster_{label}.png")))?;
	}
	save(refinement.apply(image)?, dir.join("refined.png"))?;
	save(refinement.mask.to_luma(), dir.join("refined_mask.png"))?;

	Ok(())
}

/// Print each cluster's mean color and pixel share, followed by the refinement result
fn print_summary(segmentation: &Segmentation, selected: u8, refinement: &Refinement) {
	let clustering = segmentation.clustering();
	let total: u32 = clustering.counts.iter().sum();

	for label in segmentation.cluster_labels() {
		let count = clustering.counts[usize::from(label - 1)];
		let share = 100.0 * f64::from(count) / f64::from(total);
		let marker = if label == selected { "*" } else { " " };
		let swatch = segmentation.mean_color(label).map_or_else(
			|| "   ".normal().to_string(),
			|lab| {
				let color = Srgb::<f32>::from_color(lab).into_format::<u8>();
				format!("{} {color:X}", "   ".on_truecolor(color.red, color.green, color.blue))
			},
		);
		println!("{marker}{label} {swatch} {share:>5.1}% ({count} pixels)");
	}

	println!(
		"Refined cluster {selected}: threshold {:.3}, removed {} of {} pixels",
		refinement.threshold,
		refinement.removed,
		refinement.removed + refinement.mask.count()
	);
}
