use csv::ReaderBuilder;
use std::error::Error;
use std::fs::File;

use crate::utilities::math_functions::Vec3;

/// Coordinates of `n_samples` configurations of one `n_points`-long curve.
///
/// Stored flat and row-major as `samples × points × 3`. The writhe pipeline only ever
/// reads from it, so one instance is shared (behind an `Arc`) by every device worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub xyz: Vec<f64>,
    pub n_samples: usize,
    pub n_points: usize,
}

impl Trajectory {
    pub fn new(xyz: Vec<f64>, n_samples: usize, n_points: usize) -> Result<Self, Box<dyn Error>> {
        let expected = n_samples
            .checked_mul(n_points)
            .and_then(|v| v.checked_mul(3))
            .ok_or("trajectory: samples*points*3 overflow")?;
        if xyz.len() != expected {
            return Err(format!(
                "trajectory: expected {} values for {} samples x {} points, got {}",
                expected,
                n_samples,
                n_points,
                xyz.len()
            )
            .into());
        }
        Ok(Self {
            xyz,
            n_samples,
            n_points,
        })
    }

    /// Builds a single-sample trajectory from a list of points.
    pub fn from_points(points: &[Vec3]) -> Self {
        Self {
            xyz: points.iter().flat_map(|p| p.iter().copied()).collect(),
            n_samples: 1,
            n_points: points.len(),
        }
    }

    /// Stacks several equally long point lists as samples.
    pub fn from_samples(samples: &[Vec<Vec3>]) -> Result<Self, Box<dyn Error>> {
        let n_points = samples.first().map(|s| s.len()).unwrap_or(0);
        if let Some(bad) = samples.iter().position(|s| s.len() != n_points) {
            return Err(format!(
                "trajectory: sample {} has {} points, expected {}",
                bad,
                samples[bad].len(),
                n_points
            )
            .into());
        }
        let xyz = samples
            .iter()
            .flat_map(|s| s.iter().flat_map(|p| p.iter().copied()))
            .collect();
        Self::new(xyz, samples.len(), n_points)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_samples == 0 || self.n_points == 0
    }

    #[inline(always)]
    pub fn sample(&self, s: usize) -> &[f64] {
        let stride = self.n_points * 3;
        &self.xyz[s * stride..(s + 1) * stride]
    }

    #[inline(always)]
    pub fn point(&self, s: usize, p: usize) -> Vec3 {
        let base = (s * self.n_points + p) * 3;
        [self.xyz[base], self.xyz[base + 1], self.xyz[base + 2]]
    }

    /// Returns the trajectory with every x coordinate negated (a mirror image).
    pub fn mirrored(&self) -> Self {
        let mut xyz = self.xyz.clone();
        for c in xyz.chunks_exact_mut(3) {
            c[0] = -c[0];
        }
        Self {
            xyz,
            n_samples: self.n_samples,
            n_points: self.n_points,
        }
    }

    /// Payload size of the coordinate buffer in bytes.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.xyz.len() * std::mem::size_of::<f64>()
    }
}

/// Reads a trajectory from a CSV file with a header and columns `sample,point,x,y,z`.
///
/// Rows must be grouped by sample and ordered by point inside each sample; every sample
/// must have the same number of points.
pub fn read_trajectory_from_csv(file_path: &str) -> Result<Trajectory, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut xyz = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut current: Option<usize> = None;

    for result in rdr.records() {
        let record = result?;
        let sample = record[0].trim().parse::<usize>()?;
        let point = record[1].trim().parse::<usize>()?;
        if current != Some(sample) {
            if sample != counts.len() {
                return Err(format!(
                    "trajectory csv: sample {} out of order (expected {})",
                    sample,
                    counts.len()
                )
                .into());
            }
            counts.push(0);
            current = Some(sample);
        }
        let seen = counts.last_mut().ok_or("trajectory csv: no sample open")?;
        if point != *seen {
            return Err(format!(
                "trajectory csv: sample {} point {} out of order (expected {})",
                sample, point, *seen
            )
            .into());
        }
        *seen += 1;
        for col in 2..5 {
            xyz.push(record[col].trim().parse::<f64>()?);
        }
    }

    let n_points = counts.first().copied().unwrap_or(0);
    if let Some(bad) = counts.iter().position(|&c| c != n_points) {
        return Err(format!(
            "trajectory csv: sample {} has {} points, expected {}",
            bad, counts[bad], n_points
        )
        .into());
    }
    Trajectory::new(xyz, counts.len(), n_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELIX_FILE: &str = "src/data/helix_trajectory.csv";

    #[test]
    fn test_read_helix_trajectory() {
        let traj = read_trajectory_from_csv(HELIX_FILE).expect("Failed to load trajectory csv");
        assert_eq!(traj.n_samples, 3);
        assert_eq!(traj.n_points, 12);
        assert_eq!(traj.xyz.len(), 3 * 12 * 3);
        let p0 = traj.point(0, 0);
        assert!((p0[0] - 1.0).abs() < 1e-12 && p0[1].abs() < 1e-12 && p0[2].abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(Trajectory::new(vec![0.0; 10], 1, 3).is_err());
        let ragged = vec![vec![[0.0; 3]; 4], vec![[0.0; 3]; 3]];
        assert!(Trajectory::from_samples(&ragged).is_err());
    }

    #[test]
    fn test_mirrored_negates_x_only() {
        let t = Trajectory::from_points(&[[1.0, 2.0, 3.0], [-4.0, 5.0, 6.0]]);
        let m = t.mirrored();
        assert_eq!(m.xyz, vec![-1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
