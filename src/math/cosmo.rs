//! Flat ΛCDM distances for the volume normalisation curve.

use serde::{Deserialize, Serialize};

/// Speed of light in km/s.
const C_KMS: f64 = 299_792.458;

/// Number of Simpson intervals per unit redshift (rounded up, kept even).
const SIMPSON_PER_UNIT_Z: f64 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cosmology {
    pub h0: f64,
    pub omega_m: f64,
}

impl Default for Cosmology {
    fn default() -> Self {
        Self {
            h0: 70.0,
            omega_m: 0.3,
        }
    }
}

impl Cosmology {
    fn inv_e(&self, z: f64) -> f64 {
        let a = 1.0 + z;
        1.0 / (self.omega_m * a * a * a + (1.0 - self.omega_m)).sqrt()
    }

    /// Line-of-sight comoving distance to redshift `z` (Mpc).
    pub fn comoving_distance(&self, z: f64) -> f64 {
        if z <= 0.0 {
            return 0.0;
        }
        let mut n = (z * SIMPSON_PER_UNIT_Z).ceil() as usize;
        n = n.max(2);
        if n % 2 == 1 {
            n += 1;
        }
        let h = z / n as f64;
        let mut sum = self.inv_e(0.0) + self.inv_e(z);
        for i in 1..n {
            let coeff = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += coeff * self.inv_e(i as f64 * h);
        }
        C_KMS / self.h0 * sum * h / 3.0
    }

    /// Luminosity distance (Mpc); in a flat universe `D_L = (1 + z) D_C`.
    pub fn luminosity_distance(&self, z: f64) -> f64 {
        (1.0 + z) * self.comoving_distance(z)
    }
}

/// Relative comoving volume per redshift slice, normalised to `zref`.
///
/// `vf(z) = ΔD_C(zref) / ΔD_C(z)` with `ΔD_C(z) = D_C(z + dz) - D_C(z)`.
pub fn volume_factor(cosmo: &Cosmology, zref: f64, nodes: &[f64], dz: f64) -> Vec<f64> {
    let slice = |z: f64| cosmo.comoving_distance(z + dz) - cosmo.comoving_distance(z);
    let reference = slice(zref);
    nodes.iter().map(|&z| reference / slice(z)).collect()
}
