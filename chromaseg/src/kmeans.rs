//! Provides the implementation for k-means clustering of chromaticity features

use crate::{
	error::{Result, TooManyClustersSnafu, ZeroAttemptsSnafu, ZeroClustersSnafu, ZeroIterationsSnafu},
	lab::{Chroma, Features},
	mask::LabelMap,
};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;
use snafu::{ensure, OptionExt};
use std::collections::HashMap;

/// Parameters for running k-means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
	/// The number of clusters
	pub k: u8,
	/// The number of independent runs, each with its own starting centroids
	pub attempts: u32,
	/// The maximum number of iterations for each attempt
	pub max_iter: u32,
	/// The seed for choosing starting centroids
	pub seed: u64,
}

impl Default for Params {
	fn default() -> Self {
		Self { k: 3, attempts: 3, max_iter: 100, seed: 0 }
	}
}

/// Result from running k-means
#[derive(Debug, Clone)]
pub struct Clustering {
	/// The label of each pixel; label `i` belongs to `centroids[i - 1]`
	pub labels: LabelMap,
	/// Final centroid of each cluster
	pub centroids: Vec<Chroma>,
	/// Number of pixels in each cluster
	pub counts: Vec<u32>,
	/// Total within-cluster sum of squared distances
	///
	/// A lower variance indicates a tighter clustering.
	pub variance: f64,
	/// Number of elapsed iterations in the selected attempt
	pub iterations: u32,
	/// Index of the selected attempt
	pub attempt: u32,
}

/// Squared Euclidean distance between two chromaticity points
fn squared_distance(x: Chroma, y: Chroma) -> f32 {
	let da = x[0] - y[0];
	let db = x[1] - y[1];
	da * da + db * db
}

/// Deduplicated feature points with the number of pixels for each point
struct UniqueFeatures {
	/// Distinct points
	points: Vec<Chroma>,
	/// The number of pixels with each point
	counts: Vec<u32>,
	/// Index into `points` of each pixel, in row-major order
	indices: Vec<u32>,
}

impl UniqueFeatures {
	/// Group identical feature vectors, keeping the pixel order in `indices`
	fn new(features: &[Chroma]) -> Self {
		let mut points = Vec::new();
		let mut counts = Vec::new();
		let mut indices = Vec::with_capacity(features.len());

		// Packed bits -> points index
		let mut memo: HashMap<(u32, u32), u32> = HashMap::new();

		for &point in features {
			// adding 0.0 turns -0.0 into 0.0
			let key = ((point[0] + 0.0).to_bits(), (point[1] + 0.0).to_bits());
			let index = *memo.entry(key).or_insert_with(|| {
				// 8-bit sRGB gives at most 2^24 distinct points
				#[allow(clippy::cast_possible_truncation)]
				let index = points.len() as u32;

				points.push(point);
				counts.push(0);
				index
			});

			counts[index as usize] += 1;
			indices.push(index);
		}

		Self { points, counts, indices }
	}

	/// The number of distinct points
	fn len(&self) -> usize {
		self.points.len()
	}
}

/// Data for each center/centroid
struct CenterData {
	/// The centroid point
	centroid: Vec<Chroma>,
	/// Vector sum for all data points in this center
	sum: Vec<[f64; 2]>,
	/// Number of pixels in this center
	count: Vec<u32>,
	/// Number of distinct points in this center
	members: Vec<u32>,
}

impl CenterData {
	/// Create a [`CenterData`] around the given starting centroids
	fn new(centroid: Vec<Chroma>) -> Self {
		let k = centroid.len();
		Self {
			centroid,
			sum: vec![[0.0; 2]; k],
			count: vec![0; k],
			members: vec![0; k],
		}
	}

	/// The mean of the points in a non-empty center
	// Sums may need greater precision, but the average can fall back down to a reduced precision
	#[allow(clippy::cast_possible_truncation)]
	fn mean(&self, i: usize) -> Chroma {
		let n = f64::from(self.count[i]);
		let sum = self.sum[i];
		[(sum[0] / n) as f32, (sum[1] / n) as f32]
	}

	/// Add `n` pixels at `point` to center `i`
	fn add(&mut self, i: usize, point: Chroma, n: u32) {
		let nf = f64::from(n);
		let sum = &mut self.sum[i];
		sum[0] += nf * f64::from(point[0]);
		sum[1] += nf * f64::from(point[1]);
		self.count[i] += n;
		self.members[i] += 1;
	}

	/// Remove `n` pixels at `point` from center `i`
	fn remove(&mut self, i: usize, point: Chroma, n: u32) {
		let nf = f64::from(n);
		let sum = &mut self.sum[i];
		sum[0] -= nf * f64::from(point[0]);
		sum[1] -= nf * f64::from(point[1]);
		self.count[i] -= n;
		self.members[i] -= 1;
	}
}

/// Choose the starting centroids using the k-means++ algorithm
///
/// Each point is weighted by its pixel count, so this matches k-means++ over the full pixel list.
fn kmeans_plus_plus(k: u8, rng: &mut impl Rng, unique: &UniqueFeatures) -> Vec<Chroma> {
	use rand::{
		distributions::{WeightedError::*, WeightedIndex},
		prelude::Distribution,
	};

	let k = usize::from(k);
	let mut centroids = Vec::with_capacity(k);

	// Pick the first centroid with probability proportional to its pixel count
	let first = match WeightedIndex::new(&unique.counts) {
		Ok(sampler) => sampler.sample(rng),
		Err(AllWeightsZero | InvalidWeight | NoItem | TooMany) => {
			unreachable!("there is at least one point and each point has a count >= 1")
		},
	};
	centroids.push(unique.points[first]);

	// Pick each next centroid with a weighted probability based off the squared distance to its closest centroid
	let mut min_dist = vec![f32::INFINITY; unique.len()];
	for i in 1..k {
		let centroid = centroids[i - 1];
		for (dist, &point) in min_dist.iter_mut().zip(&unique.points) {
			*dist = f32::min(*dist, squared_distance(point, centroid));
		}

		let weights = unique
			.counts
			.iter()
			.zip(&min_dist)
			.map(|(&n, &dist)| f64::from(n) * f64::from(dist));

		let next = match WeightedIndex::new(weights) {
			Ok(sampler) => sampler.sample(rng),
			// Distinct points so close together that their squared distance underflows.
			// Fall back to the first point not yet used as a centroid.
			Err(AllWeightsZero) => unique
				.points
				.iter()
				.position(|point| !centroids.contains(point))
				.unwrap_or(0),
			Err(InvalidWeight | NoItem | TooMany) => {
				unreachable!("distances are >= 0 and there is at least one point")
			},
		};

		centroids.push(unique.points[next]);
	}

	centroids
}

/// For each pair of centers, update their distances and sort each center's row by increasing distance
///
/// Each entry holds one fourth of the squared distance between the two centers.
// i and j are < centroids.len() <= u8::MAX
#[allow(clippy::cast_possible_truncation)]
fn update_distances(centroids: &[Chroma], distances: &mut [(u8, f32)]) {
	let k = centroids.len();
	for i in 0..k {
		let ci = centroids[i];
		distances[i * k + i] = (i as u8, 0.0);
		for j in (i + 1)..k {
			let cj = centroids[j];
			let dist = squared_distance(ci, cj) / 4.0;
			distances[j * k + i] = (i as u8, dist);
			distances[i * k + j] = (j as u8, dist);
		}
	}

	for row in distances.chunks_exact_mut(k) {
		row.sort_by(|(_, x), (_, y)| f32::total_cmp(x, y));
	}
}

/// Find the closest center to `point`, starting the search from its current center
///
/// Ties go to the lower-indexed center.
fn nearest_center(point: Chroma, current: u8, centroids: &[Chroma], distances: &[(u8, f32)]) -> u8 {
	let k = centroids.len();
	let ci = usize::from(current);
	let dist = squared_distance(point, centroids[ci]);

	let mut min_dist = dist;
	let mut min_center = current;
	for &(other_center, half_dist) in &distances[(ci * k)..((ci + 1) * k)] {
		// every remaining center is strictly farther than the current one
		if dist < half_dist {
			break;
		}
		if other_center == current {
			continue;
		}

		let other_dist = squared_distance(point, centroids[usize::from(other_center)]);
		#[allow(clippy::float_cmp)]
		if other_dist < min_dist || (other_dist == min_dist && other_center < min_center) {
			min_dist = other_dist;
			min_center = other_center;
		}
	}

	min_center
}

/// For each data point, update its assigned center and return the number of points that moved
#[cfg(not(feature = "threads"))]
fn update_assignments(
	unique: &UniqueFeatures,
	centroids: &[Chroma],
	distances: &[(u8, f32)],
	assignment: &mut [u8],
) -> usize {
	unique
		.points
		.iter()
		.zip(assignment)
		.map(|(&point, center)| {
			let new_center = nearest_center(point, *center, centroids, distances);
			let moved = new_center != *center;
			*center = new_center;
			usize::from(moved)
		})
		.sum()
}

/// For each data point, update its assigned center and return the number of points that moved
#[cfg(feature = "threads")]
fn update_assignments(
	unique: &UniqueFeatures,
	centroids: &[Chroma],
	distances: &[(u8, f32)],
	assignment: &mut [u8],
) -> usize {
	use rayon::prelude::*;

	let num_points = unique.len();
	assignment
		.par_iter_mut()
		.with_min_len(usize::max(num_points / rayon::current_num_threads(), 1))
		.zip(&unique.points)
		.map(|(center, &point)| {
			let new_center = nearest_center(point, *center, centroids, distances);
			let moved = new_center != *center;
			*center = new_center;
			usize::from(moved)
		})
		.sum()
}

/// Recompute each centroid as the mean of its points
///
/// A center left without points is given the point farthest from its own centroid,
/// taken from a center that keeps at least one other point.
/// Returns the number of points moved this way.
fn update_centroids(unique: &UniqueFeatures, centers: &mut CenterData, assignment: &mut [u8]) -> usize {
	centers.sum.fill([0.0; 2]);
	centers.count.fill(0);
	centers.members.fill(0);

	for ((&point, &n), &center) in unique.points.iter().zip(&unique.counts).zip(&*assignment) {
		centers.add(usize::from(center), point, n);
	}

	for i in 0..centers.centroid.len() {
		if centers.count[i] > 0 {
			centers.centroid[i] = centers.mean(i);
		}
	}

	let mut moved = 0;
	while let Some(empty) = centers.count.iter().position(|&n| n == 0) {
		let farthest = unique
			.points
			.iter()
			.zip(&*assignment)
			.enumerate()
			.filter(|&(_, (_, &center))| centers.members[usize::from(center)] > 1)
			.map(|(i, (&point, &center))| (i, squared_distance(point, centers.centroid[usize::from(center)])))
			.fold(None, |farthest: Option<(usize, f32)>, (i, dist)| match farthest {
				Some((_, max_dist)) if max_dist >= dist => farthest,
				_ => Some((i, dist)),
			});

		// With k <= distinct points, some center must hold two or more points while another is empty
		let Some((index, _)) = farthest else { break };

		let point = unique.points[index];
		let n = unique.counts[index];
		let donor = usize::from(assignment[index]);

		centers.remove(donor, point, n);
		centers.centroid[donor] = centers.mean(donor);

		centers.add(empty, point, n);
		centers.centroid[empty] = point;

		// empty < k <= u8::MAX
		#[allow(clippy::cast_possible_truncation)]
		let label = empty as u8;
		assignment[index] = label;

		moved += 1;
	}

	moved
}

/// The outcome of a single k-means attempt
struct Attempt {
	/// Final centroids
	centroids: Vec<Chroma>,
	/// Center of each distinct point
	assignment: Vec<u8>,
	/// Total within-cluster sum of squared distances
	variance: f64,
	/// Number of elapsed iterations
	iterations: u32,
}

/// Run one attempt of Lloyd's algorithm until no point changes center or `max_iter` is reached
fn kmeans(unique: &UniqueFeatures, k: u8, max_iter: u32, seed: u64) -> Attempt {
	let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
	let mut centers = CenterData::new(kmeans_plus_plus(k, &mut rng, unique));
	let mut distances = vec![(0, 0.0); usize::from(k) * usize::from(k)];
	let mut assignment = vec![0; unique.len()];

	let mut iterations = 0;
	let mut converged = false;
	while iterations < max_iter && !converged {
		update_distances(&centers.centroid, &mut distances);
		let reassigned = update_assignments(unique, &centers.centroid, &distances, &mut assignment);
		let reseeded = update_centroids(unique, &mut centers, &mut assignment);
		iterations += 1;
		converged = reassigned == 0 && reseeded == 0;

		log::trace!("iteration {iterations}: {reassigned} points reassigned, {reseeded} empty clusters reseeded");
	}

	// Labels are the nearest assignment against the reported centroids,
	// which only changes anything if the iteration limit was hit.
	update_distances(&centers.centroid, &mut distances);
	update_assignments(unique, &centers.centroid, &distances, &mut assignment);

	let variance = unique
		.points
		.iter()
		.zip(&unique.counts)
		.zip(&assignment)
		.map(|((&point, &n), &center)| {
			f64::from(n) * f64::from(squared_distance(point, centers.centroid[usize::from(center)]))
		})
		.sum();

	Attempt { centroids: centers.centroid, assignment, variance, iterations }
}

/// Run every attempt, in order of attempt index
#[cfg(not(feature = "threads"))]
fn run_attempts(unique: &UniqueFeatures, params: &Params) -> Vec<Attempt> {
	(0..params.attempts)
		.map(|i| kmeans(unique, params.k, params.max_iter, params.seed ^ u64::from(i)))
		.collect()
}

/// Run every attempt in parallel, returned in order of attempt index
#[cfg(feature = "threads")]
fn run_attempts(unique: &UniqueFeatures, params: &Params) -> Vec<Attempt> {
	use rayon::prelude::*;

	(0..params.attempts)
		.into_par_iter()
		.map(|i| kmeans(unique, params.k, params.max_iter, params.seed ^ u64::from(i)))
		.collect()
}

/// Run multiple attempts of k-means on the given features, taking the attempt with the lowest variance
///
/// Ties in variance keep the earliest attempt.
///
/// # Errors
/// Returns [`crate::Error::InvalidConfiguration`] if `k`, `attempts`, or `max_iter` is 0,
/// or if there are fewer distinct feature points than `k`.
pub fn run(features: &Features, params: &Params) -> Result<Clustering> {
	ensure!(params.k > 0, ZeroClustersSnafu);
	ensure!(params.attempts > 0, ZeroAttemptsSnafu);
	ensure!(params.max_iter > 0, ZeroIterationsSnafu);

	let unique = UniqueFeatures::new(features.as_slice());
	ensure!(
		usize::from(params.k) <= unique.len(),
		TooManyClustersSnafu { k: params.k, distinct: unique.len() }
	);

	log::debug!(
		"running {} k-means attempts with k = {} on {} distinct points",
		params.attempts,
		params.k,
		unique.len()
	);

	let attempts = run_attempts(&unique, params);
	for (i, attempt) in attempts.iter().enumerate() {
		log::debug!("attempt {i}: variance {} after {} iterations", attempt.variance, attempt.iterations);
	}

	let (index, best) = attempts
		.into_iter()
		.enumerate()
		.min_by(|(_, x), (_, y)| f64::total_cmp(&x.variance, &y.variance))
		.context(ZeroAttemptsSnafu)?;

	let labels = unique
		.indices
		.iter()
		.map(|&i| best.assignment[i as usize] + 1)
		.collect::<Vec<_>>();

	let mut counts = vec![0; usize::from(params.k)];
	for &label in &labels {
		counts[usize::from(label - 1)] += 1;
	}

	// index < attempts: u32
	#[allow(clippy::cast_possible_truncation)]
	let attempt = index as u32;

	Ok(Clustering {
		labels: LabelMap::new(features.width(), features.height(), params.k, labels),
		centroids: best.centroids,
		counts,
		variance: best.variance,
		iterations: best.iterations,
		attempt,
	})
}
