// ---------------------------------------------------------------------------
// Voxel → world transforms
// ---------------------------------------------------------------------------

/// A 4×4 homogeneous voxel-to-world (millimetre) transform, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Affine {
    pub fn identity() -> Self {
        Affine::scaling([1.0, 1.0, 1.0], [0.0, 0.0, 0.0])
    }

    /// Axis-aligned voxel sizes plus a translation, the common MNI layout.
    pub fn scaling(voxel_size: [f64; 3], origin: [f64; 3]) -> Self {
        let mut m = [[0.0; 4]; 4];
        for i in 0..3 {
            m[i][i] = voxel_size[i];
            m[i][3] = origin[i];
        }
        m[3][3] = 1.0;
        Affine(m)
    }

    /// Build from the three stored rows of a NIfTI `sform`.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Self {
        Affine([rows[0], rows[1], rows[2], [0.0, 0.0, 0.0, 1.0]])
    }

    pub fn rows(&self) -> [[f64; 4]; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Map a (possibly fractional) voxel coordinate to world space.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (i, o) in out.iter_mut().enumerate() {
            *o = m[i][0] * p[0] + m[i][1] * p[1] + m[i][2] * p[2] + m[i][3];
        }
        out
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Affine) -> Affine {
        let (a, b) = (&self.0, &other.0);
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        Affine(m)
    }

    fn det3(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Volume of one voxel in mm³.
    pub fn voxel_volume(&self) -> f64 {
        self.det3().abs()
    }

    /// Inverse transform, `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.det3();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let m = &self.0;
        let mut inv = [[0.0; 4]; 4];
        inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det;
        inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det;
        inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det;
        inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det;
        inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det;
        inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det;
        inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det;
        inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det;
        inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det;
        for i in 0..3 {
            inv[i][3] = -(0..3).map(|k| inv[i][k] * m[k][3]).sum::<f64>();
        }
        inv[3][3] = 1.0;
        Some(Affine(inv))
    }

    /// Column norms of the linear part: the voxel edge lengths.
    pub fn voxel_sizes(&self) -> [f64; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (j, o) in out.iter_mut().enumerate() {
            *o = (0..3).map(|i| m[i][j] * m[i][j]).sum::<f64>().sqrt();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn inverse_undoes_apply() {
        let a = Affine([
            [-2.0, 0.1, 0.0, 90.0],
            [0.0, 2.0, 0.3, -126.0],
            [0.2, 0.0, 2.0, -72.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        let inv = a.inverse().unwrap();
        let p = [10.0, 20.5, 3.25];
        assert!(close(inv.apply(a.apply(p)), p));
        assert!(close(a.compose(&inv).apply(p), p));
    }

    #[test]
    fn voxel_volume_of_isotropic_grid() {
        let a = Affine::scaling([3.0, 3.0, 3.0], [-96.0, -132.0, -78.0]);
        assert!((a.voxel_volume() - 27.0).abs() < 1e-12);
        assert_eq!(a.voxel_sizes(), [3.0, 3.0, 3.0]);
    }

    #[test]
    fn singular_has_no_inverse() {
        let a = Affine::scaling([1.0, 0.0, 1.0], [0.0; 3]);
        assert!(a.inverse().is_none());
    }
}
