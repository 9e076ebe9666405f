//! Brain masks.
//!
//! A mask selects the voxels that are fitted; everything outside it is written
//! as zero in output maps.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::domain::MaskStrategy;
use crate::error::AppError;
use crate::io::nifti::{flat_index, read_volume, unflatten};

/// Width of the border used to estimate the background value.
const BORDER_SIZE: usize = 2;

/// Quantile window searched for the EPI intensity gap.
const EPI_LOWER_CUTOFF: f64 = 0.2;
const EPI_UPPER_CUTOFF: f64 = 0.85;

/// Erosion/dilation iterations applied around the EPI threshold.
const EPI_OPENING: usize = 2;

/// A boolean voxel mask over a 3D grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub dims: [usize; 3],
    inside: Vec<bool>,
    /// Flat indices of in-mask voxels, ascending.
    voxels: Vec<usize>,
}

impl Mask {
    pub fn from_bools(dims: [usize; 3], inside: Vec<bool>) -> Self {
        let voxels = inside
            .iter()
            .enumerate()
            .filter_map(|(v, &b)| b.then_some(v))
            .collect();
        Self { dims, inside, voxels }
    }

    /// Number of in-mask voxels.
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn voxels(&self) -> &[usize] {
        &self.voxels
    }

    pub fn contains(&self, v: usize) -> bool {
        self.inside.get(v).copied().unwrap_or(false)
    }

    pub fn intersect(&self, other: &Mask) -> Result<Mask, AppError> {
        if self.dims != other.dims {
            return Err(AppError::input(format!(
                "Mask shapes differ: {:?} vs {:?}",
                self.dims, other.dims
            )));
        }
        let inside = self.inside.iter().zip(&other.inside).map(|(a, b)| *a && *b).collect();
        Ok(Mask::from_bools(self.dims, inside))
    }

    /// Scatter per-mask-voxel values into a full 3D array (zero outside).
    pub fn unmask(&self, values: &[f64]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.inside.len()];
        for (&v, &x) in self.voxels.iter().zip(values) {
            out[v] = x as f32;
        }
        out
    }
}

/// Load a user-provided mask: non-zero, finite voxels are inside.
pub fn load_mask(path: &Path, dims: [usize; 3]) -> Result<Mask, AppError> {
    let vol = read_volume(path)?;
    if vol.spatial_dims() != dims {
        return Err(AppError::input(format!(
            "Mask '{}' has shape {:?}, expected {:?}",
            path.display(),
            vol.spatial_dims(),
            dims
        )));
    }
    let n = vol.n_voxels();
    let inside = vol.data[..n].iter().map(|&x| x.is_finite() && x != 0.0).collect();
    let mask = Mask::from_bools(dims, inside);
    if mask.is_empty() {
        return Err(AppError::empty(format!("Mask '{}' is empty.", path.display())));
    }
    Ok(mask)
}

/// Compute a mask from a mean image.
pub fn compute_mask(mean: &[f64], dims: [usize; 3], strategy: MaskStrategy) -> Result<Mask, AppError> {
    let mask = match strategy {
        MaskStrategy::Background => background_mask(mean, dims),
        MaskStrategy::Epi => epi_mask(mean, dims),
        MaskStrategy::All => Mask::from_bools(dims, mean.iter().map(|v| v.is_finite()).collect()),
    };
    if mask.is_empty() {
        return Err(AppError::empty(format!(
            "Computed mask ({strategy:?}) is empty; supply one with --mask."
        )));
    }
    debug!(strategy = ?strategy, voxels = mask.len(), "mask computed");
    Ok(mask)
}

fn is_border(dims: [usize; 3], xyz: [usize; 3]) -> bool {
    (0..3).any(|a| xyz[a] < BORDER_SIZE || xyz[a] + BORDER_SIZE >= dims[a])
}

/// Voxels that differ from the most common border value.
fn background_mask(mean: &[f64], dims: [usize; 3]) -> Mask {
    let border: Vec<f64> = (0..mean.len())
        .filter(|&v| is_border(dims, unflatten(dims, v)))
        .map(|v| mean[v])
        .collect();

    if border.iter().any(|v| v.is_nan()) {
        return Mask::from_bools(dims, mean.iter().map(|v| v.is_finite()).collect());
    }

    // Mode of the border values; ties resolve to the smallest value.
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for v in &border {
        *counts.entry(v.to_bits()).or_insert(0) += 1;
    }
    let background = counts
        .into_iter()
        .map(|(bits, n)| (f64::from_bits(bits), n))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.total_cmp(&a.0)))
        .map(|(v, _)| v)
        .unwrap_or(0.0);

    Mask::from_bools(
        dims,
        mean.iter().map(|&v| v.is_finite() && v != background).collect(),
    )
}

/// Histogram-gap threshold followed by opening and largest component.
fn epi_mask(mean: &[f64], dims: [usize; 3]) -> Mask {
    let clean: Vec<f64> = mean.iter().map(|&v| if v.is_finite() { v } else { 0.0 }).collect();
    let mut sorted = clean.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let lower = (EPI_LOWER_CUTOFF * n as f64).floor() as usize;
    let upper = ((EPI_UPPER_CUTOFF * n as f64).floor() as usize).min(n.saturating_sub(1));

    let threshold = if upper > lower {
        let (ia, _) = (lower..upper)
            .map(|i| (i, sorted[i + 1] - sorted[i]))
            .fold((lower, f64::MIN), |acc, (i, d)| if d > acc.1 { (i, d) } else { acc });
        0.5 * (sorted[ia] + sorted[ia + 1])
    } else {
        sorted.get(lower).copied().unwrap_or(0.0)
    };

    let mut inside: Vec<bool> = clean.iter().map(|&v| v >= threshold).collect();

    for _ in 0..EPI_OPENING {
        inside = erode(&inside, dims);
    }
    if inside.iter().any(|&b| b) {
        inside = largest_connected_component(&inside, dims);
    } else {
        warn!("EPI mask is empty after erosion");
    }
    for _ in 0..2 * EPI_OPENING {
        inside = dilate(&inside, dims);
    }
    for _ in 0..EPI_OPENING {
        inside = erode(&inside, dims);
    }

    Mask::from_bools(dims, inside)
}

/// 6-connected neighbours of a voxel, `None` where outside the grid.
fn neighbours(dims: [usize; 3], v: usize) -> [Option<usize>; 6] {
    let [x, y, z] = unflatten(dims, v);
    [
        (x > 0).then(|| flat_index(dims, x - 1, y, z)),
        (x + 1 < dims[0]).then(|| flat_index(dims, x + 1, y, z)),
        (y > 0).then(|| flat_index(dims, x, y - 1, z)),
        (y + 1 < dims[1]).then(|| flat_index(dims, x, y + 1, z)),
        (z > 0).then(|| flat_index(dims, x, y, z - 1)),
        (z + 1 < dims[2]).then(|| flat_index(dims, x, y, z + 1)),
    ]
}

/// Binary erosion with the 6-connected cross; outside the grid counts as empty.
pub fn erode(inside: &[bool], dims: [usize; 3]) -> Vec<bool> {
    (0..inside.len())
        .map(|v| inside[v] && neighbours(dims, v).iter().all(|n| n.is_some_and(|u| inside[u])))
        .collect()
}

/// Binary dilation with the 6-connected cross.
pub fn dilate(inside: &[bool], dims: [usize; 3]) -> Vec<bool> {
    (0..inside.len())
        .map(|v| inside[v] || neighbours(dims, v).iter().any(|n| n.is_some_and(|u| inside[u])))
        .collect()
}

/// Keep only the largest 6-connected component.
pub fn largest_connected_component(inside: &[bool], dims: [usize; 3]) -> Vec<bool> {
    let mut label = vec![0usize; inside.len()];
    let mut sizes = vec![0usize]; // label 0 = background
    let mut stack = Vec::new();

    for start in 0..inside.len() {
        if !inside[start] || label[start] != 0 {
            continue;
        }
        let id = sizes.len();
        let mut size = 0;
        label[start] = id;
        stack.push(start);
        while let Some(v) = stack.pop() {
            size += 1;
            for u in neighbours(dims, v).into_iter().flatten() {
                if inside[u] && label[u] == 0 {
                    label[u] = id;
                    stack.push(u);
                }
            }
        }
        sizes.push(size);
    }

    let Some((best, _)) = sizes.iter().enumerate().skip(1).max_by_key(|(_, s)| **s) else {
        return vec![false; inside.len()];
    };
    label.iter().map(|&l| l == best).collect()
}
