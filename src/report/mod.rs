//! Reporting utilities: peak tables and formatted terminal output.

pub mod format;

pub use format::*;

use crate::glm::Mask;
use crate::io::nifti::{NiftiHeader, unflatten};

/// A voxel of a statistical map.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub voxel: [usize; 3],
    /// Scanner coordinates (mm).
    pub world: [f64; 3],
    pub value: f64,
}

/// Strongest positive and negative voxels (top-N each side).
#[derive(Debug, Clone, Default)]
pub struct Peaks {
    pub positive: Vec<Peak>,
    pub negative: Vec<Peak>,
}

/// Rank in-mask voxels of `map` by value, both signs.
pub fn rank_peaks(map: &[f32], mask: &Mask, header: &NiftiHeader, top_n: usize) -> Peaks {
    let dims = mask.dims;
    let to_peak = |v: usize| {
        let voxel = unflatten(dims, v);
        Peak {
            voxel,
            world: header.voxel_to_world(voxel),
            value: map[v] as f64,
        }
    };

    let mut pos: Vec<usize> = mask
        .voxels()
        .iter()
        .copied()
        .filter(|&v| map[v].is_finite() && map[v] > 0.0)
        .collect();
    pos.sort_by(|&a, &b| map[b].total_cmp(&map[a]));

    let mut neg: Vec<usize> = mask
        .voxels()
        .iter()
        .copied()
        .filter(|&v| map[v].is_finite() && map[v] < 0.0)
        .collect();
    neg.sort_by(|&a, &b| map[a].total_cmp(&map[b]));

    Peaks {
        positive: pos.into_iter().take(top_n).map(to_peak).collect(),
        negative: neg.into_iter().take(top_n).map(to_peak).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_peaks_basic() {
        let header = NiftiHeader::float32(&[4, 1, 1], [2.0, 2.0, 2.0], 1.0).unwrap();
        let mask = Mask::from_bools([4, 1, 1], vec![true, true, true, false]);
        let map = [1.0, 5.0, -3.0, 9.0];

        let peaks = rank_peaks(&map, &mask, &header, 1);
        assert_eq!(peaks.positive.len(), 1);
        assert_eq!(peaks.positive[0].voxel, [1, 0, 0]);
        assert_eq!(peaks.positive[0].value, 5.0);
        assert_eq!(peaks.negative.len(), 1);
        assert_eq!(peaks.negative[0].voxel, [2, 0, 0]);
        // Neighbouring voxels are one voxel size apart in world space.
        assert!((peaks.negative[0].world[0] - peaks.positive[0].world[0] - 2.0).abs() < 1e-6);

        let all = rank_peaks(&map, &mask, &header, 10);
        assert_eq!(all.positive.iter().map(|p| p.value).collect::<Vec<_>>(), vec![5.0, 1.0]);
    }
}
