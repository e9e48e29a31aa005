//! Stain vectors and optical-density math for color deconvolution.
//!
//! Brightfield stains absorb light according to the Beer-Lambert law, so in
//! optical-density (OD) space a pixel is a linear combination of the stain
//! vectors:
//!
//! ```text
//! OD = S · c        S = [stain1 | stain2 | stain3]   (columns, RGB rows)
//! c  = S⁻¹ · OD
//! ```
//!
//! with `OD_k = -log10(value_k / max_k)` for each RGB component `k` and
//! `max_k` the background (white) intensity.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// Smallest intensity used when converting to OD, so black pixels stay finite.
const MIN_INTENSITY: f64 = 1.0;

/// Below this absolute determinant the stain vectors are treated as dependent.
const MIN_DETERMINANT: f64 = 1e-12;

// =============================================================================
// StainVector
// =============================================================================

/// A unit direction in OD space describing one stain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainVector {
    pub name: String,
    pub r: f64,
    pub g: f64,
    pub b: f64,

    /// Placeholder stain capturing signal the real stains do not explain
    #[serde(default)]
    pub residual: bool,
}

impl StainVector {
    /// Create a stain vector, normalizing it to unit length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for zero-length or non-finite vectors.
    pub fn new(name: impl Into<String>, r: f64, g: f64, b: f64) -> Result<Self, TransformError> {
        Self::build(name.into(), [r, g, b], false)
    }

    fn build(name: String, v: [f64; 3], residual: bool) -> Result<Self, TransformError> {
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if !norm.is_finite() || norm == 0.0 {
            return Err(TransformError::invalid_parameter(format!(
                "stain vector '{}' must be finite and non-zero",
                name
            )));
        }
        Ok(Self {
            name,
            r: v[0] / norm,
            g: v[1] / norm,
            b: v[2] / norm,
            residual,
        })
    }

    /// Residual stain completing an orthogonal-ish basis for two real stains.
    ///
    /// Each component is `sqrt(1 - a_k² - b_k²)`, or zero where the two stains
    /// already account for the full component.
    pub fn residual_for(a: &StainVector, b: &StainVector) -> Result<Self, TransformError> {
        Self::build(
            "Residual".to_string(),
            residual_components(a.as_array(), b.as_array()),
            true,
        )
    }

    /// Normalize a vector already known to be non-zero.
    fn unit(name: &str, v: [f64; 3], residual: bool) -> Self {
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        Self {
            name: name.to_string(),
            r: v[0] / norm,
            g: v[1] / norm,
            b: v[2] / norm,
            residual,
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.r, self.g, self.b]
    }
}

fn residual_components(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    let component = |x: f64, y: f64| (1.0 - x * x - y * y).max(0.0).sqrt();
    [
        component(a[0], b[0]),
        component(a[1], b[1]),
        component(a[2], b[2]),
    ]
}

// =============================================================================
// ColorDeconvolutionStains
// =============================================================================

/// Three stain vectors plus the background intensity of each RGB component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorDeconvolutionStains {
    pub name: String,
    pub stain1: StainVector,
    pub stain2: StainVector,
    pub stain3: StainVector,
    #[serde(default = "default_max")]
    pub max_red: f64,
    #[serde(default = "default_max")]
    pub max_green: f64,
    #[serde(default = "default_max")]
    pub max_blue: f64,
}

fn default_max() -> f64 {
    255.0
}

impl ColorDeconvolutionStains {
    /// Combine three stains with a white background.
    pub fn new(
        name: impl Into<String>,
        stain1: StainVector,
        stain2: StainVector,
        stain3: StainVector,
    ) -> Self {
        Self {
            name: name.into(),
            stain1,
            stain2,
            stain3,
            max_red: 255.0,
            max_green: 255.0,
            max_blue: 255.0,
        }
    }

    /// Two real stains completed with a residual third stain.
    pub fn with_residual(
        name: impl Into<String>,
        stain1: StainVector,
        stain2: StainVector,
    ) -> Result<Self, TransformError> {
        let stain3 = StainVector::residual_for(&stain1, &stain2)?;
        Ok(Self::new(name, stain1, stain2, stain3))
    }

    /// Set the background intensity of each RGB component.
    pub fn with_background(mut self, red: f64, green: f64, blue: f64) -> Self {
        self.max_red = red;
        self.max_green = green;
        self.max_blue = blue;
        self
    }

    /// Hematoxylin and eosin.
    pub fn hematoxylin_eosin() -> Self {
        Self::preset(
            "H&E default",
            ("Hematoxylin", [0.651, 0.701, 0.290]),
            ("Eosin", [0.216, 0.801, 0.548]),
        )
    }

    /// Hematoxylin and DAB.
    pub fn hematoxylin_dab() -> Self {
        Self::preset(
            "H-DAB default",
            ("Hematoxylin", [0.650, 0.704, 0.286]),
            ("DAB", [0.268, 0.570, 0.776]),
        )
    }

    fn preset(name: &str, s1: (&str, [f64; 3]), s2: (&str, [f64; 3])) -> Self {
        let stain1 = StainVector::unit(s1.0, s1.1, false);
        let stain2 = StainVector::unit(s2.0, s2.1, false);
        let stain3 = StainVector::unit(
            "Residual",
            residual_components(stain1.as_array(), stain2.as_array()),
            true,
        );
        Self::new(name, stain1, stain2, stain3)
    }

    /// Stain by 1-based number.
    pub fn stain(&self, number: usize) -> Option<&StainVector> {
        match number {
            1 => Some(&self.stain1),
            2 => Some(&self.stain2),
            3 => Some(&self.stain3),
            _ => None,
        }
    }

    /// 1-based numbers of every non-residual stain.
    pub fn default_stain_numbers(&self) -> Vec<usize> {
        (1..=3)
            .filter(|&n| self.stain(n).is_some_and(|s| !s.residual))
            .collect()
    }

    pub fn background(&self) -> [f64; 3] {
        [self.max_red, self.max_green, self.max_blue]
    }

    /// Precompute the forward and inverse stain matrices.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the stain vectors are linearly dependent
    /// or a background intensity is not positive.
    pub fn matrix(&self) -> Result<StainMatrix, TransformError> {
        let background = self.background();
        if background.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err(TransformError::invalid_parameter(format!(
                "stains '{}' have a non-positive background intensity",
                self.name
            )));
        }

        // Rows are RGB components, columns are stains
        let forward = Matrix3::from_columns(&[
            Vector3::from(self.stain1.as_array()),
            Vector3::from(self.stain2.as_array()),
            Vector3::from(self.stain3.as_array()),
        ]);
        let det = forward.determinant();
        let inverse = forward
            .try_inverse()
            .filter(|_| det.is_finite() && det.abs() >= MIN_DETERMINANT)
            .ok_or_else(|| {
                TransformError::invalid_parameter(format!(
                    "stain vectors of '{}' are linearly dependent",
                    self.name
                ))
            })?;

        Ok(StainMatrix {
            forward,
            inverse,
            background,
        })
    }
}

// =============================================================================
// StainMatrix
// =============================================================================

/// Precomputed deconvolution/reconvolution matrices for one set of stains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StainMatrix {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
    background: [f64; 3],
}

impl StainMatrix {
    /// Stain concentrations of an RGB pixel.
    pub fn deconvolve(&self, rgb: [f32; 3]) -> [f64; 3] {
        let od = Vector3::new(
            od(rgb[0] as f64, self.background[0]),
            od(rgb[1] as f64, self.background[1]),
            od(rgb[2] as f64, self.background[2]),
        );
        (self.inverse * od).into()
    }

    /// Unclamped RGB intensities of the given stain concentrations.
    pub fn reconvolve(&self, concentrations: [f64; 3]) -> [f64; 3] {
        let od = self.forward * Vector3::from(concentrations);
        [
            from_od(od[0], self.background[0]),
            from_od(od[1], self.background[1]),
            from_od(od[2], self.background[2]),
        ]
    }
}

/// Optical density of an intensity relative to its background.
pub fn od(value: f64, max: f64) -> f64 {
    -(value.max(MIN_INTENSITY) / max).log10()
}

/// Intensity of an optical density relative to its background.
pub fn from_od(od: f64, max: f64) -> f64 {
    max * 10f64.powf(-od)
}
