//! Similarity metrics between predicted and actual contrast maps.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_stats::CorrelationExt;

use crate::error::{MsmError, Result};

/// Pearson correlation coefficient of two maps, in [-1, 1]. Higher is better.
///
/// Returns NaN if either map is constant or the maps are empty.
pub fn pearson(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    if a.len() != b.len() {
        return f64::NAN;
    }
    // one variable per row, one observation per column
    let pair = Array2::from_shape_fn((2, a.len()), |(row, col)| {
        if row == 0 {
            f64::from(a[col])
        } else {
            f64::from(b[col])
        }
    });
    pair.pearson_correlation().map(|c| c[[0, 1]]).unwrap_or(f64::NAN)
}

/// Coefficient of determination of `y_pred` for `y_true`, in (-inf, 1]. 1 is a perfect match.
pub fn r2_score(y_true: ArrayView1<f32>, y_pred: ArrayView1<f32>) -> f64 {
    let n = y_true.len() as f64;
    let mean = y_true.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| (f64::from(t) - f64::from(p)).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|&t| (f64::from(t) - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Cosine distance `1 - cos(a, b)`, in [0, 2]. Lower is better, 0 means identical direction.
pub fn cosine_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    let a: Array1<f64> = a.mapv(f64::from);
    let b: Array1<f64> = b.mapv(f64::from);
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    1.0 - a.dot(&b) / denom
}

/// A named similarity metric with a known orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMetric {
    Pearson,
    R2,
    CosineDistance,
}

impl ScoreMetric {
    pub fn name(&self) -> &'static str {
        match self {
            ScoreMetric::Pearson => "pearson",
            ScoreMetric::R2 => "r2",
            ScoreMetric::CosineDistance => "cosine_distance",
        }
    }

    pub fn higher_is_better(&self) -> bool {
        !matches!(self, ScoreMetric::CosineDistance)
    }

    /// Compare a predicted map against the actual one.
    pub fn compute(&self, predicted: ArrayView1<f32>, actual: ArrayView1<f32>) -> f64 {
        match self {
            ScoreMetric::Pearson => pearson(predicted, actual),
            ScoreMetric::R2 => r2_score(actual, predicted),
            ScoreMetric::CosineDistance => cosine_distance(predicted, actual),
        }
    }

    /// Mean of the row-wise metric. Both inputs must have the same shape.
    pub fn mean_rowwise(&self, predicted: ArrayView2<f32>, actual: ArrayView2<f32>) -> Result<f64> {
        if predicted.dim() != actual.dim() {
            return Err(MsmError::ShapeMismatch(format!(
                "predicted maps have shape {:?} but actual maps have shape {:?}",
                predicted.dim(),
                actual.dim()
            )));
        }
        if predicted.nrows() == 0 {
            return Err(MsmError::ShapeMismatch(String::from("no maps to score")));
        }
        let total: f64 = predicted
            .outer_iter()
            .zip(actual.outer_iter())
            .map(|(p, a)| self.compute(p, a))
            .sum();
        Ok(total / predicted.nrows() as f64)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pearson_is_one_for_affinely_related_maps() {
        let a = array![1.0f32, 2.0, 3.0, 4.0];
        let b = a.mapv(|v| 2.0 * v + 1.0);
        assert_abs_diff_eq!(1.0, pearson(a.view(), b.view()), epsilon = 1e-9);
        assert_abs_diff_eq!(-1.0, pearson(a.view(), (-&b).view()), epsilon = 1e-9);
        assert!(pearson(a.view(), array![1.0f32, 1.0, 1.0, 1.0].view()).is_nan());
    }

    #[test]
    fn r2_and_cosine_have_their_documented_extremes() {
        let t = array![1.0f32, 2.0, 3.0];
        assert_abs_diff_eq!(1.0, r2_score(t.view(), t.view()), epsilon = 1e-12);
        // predicting the mean gives 0
        assert_abs_diff_eq!(0.0, r2_score(t.view(), array![2.0f32, 2.0, 2.0].view()), epsilon = 1e-12);

        assert_abs_diff_eq!(0.0, cosine_distance(t.view(), (&t * 3.0).view()), epsilon = 1e-12);
        assert_abs_diff_eq!(2.0, cosine_distance(t.view(), (-&t).view()), epsilon = 1e-12);
        assert!(!ScoreMetric::CosineDistance.higher_is_better());
        assert!(ScoreMetric::Pearson.higher_is_better());
        assert_eq!("cosine_distance", ScoreMetric::CosineDistance.name());
        assert_eq!("pearson", ScoreMetric::Pearson.name());
    }

    #[test]
    fn rowwise_scores_are_averaged_and_shapes_checked() {
        let pred = array![[1.0f32, 2.0, 3.0], [3.0, 2.0, 1.0]];
        let actual = array![[1.0f32, 2.0, 3.0], [1.0, 2.0, 3.0]];
        assert_abs_diff_eq!(0.0, ScoreMetric::Pearson.mean_rowwise(pred.view(), actual.view()).unwrap(), epsilon = 1e-9);

        let short: Array2<f32> = Array2::zeros((1, 3));
        assert!(ScoreMetric::Pearson.mean_rowwise(pred.view(), short.view()).is_err());
    }
}
