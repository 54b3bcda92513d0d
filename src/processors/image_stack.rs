//! Assembly of a time-lapse stack from a directory of slice files.
//!
//! Frames are loaded in file name order and stacked along a new leading time
//! axis. The stack can then be normalized into `[0, 1]` and median filtered.
//! The filter is the only parallel step: one task per frame on a Rayon pool,
//! with results collected back in frame order.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, IxDyn};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{ImageConfig, NormalizeConfig, NormalizeMethod};
use crate::core::loaders::{list_image_files, read_tiff_frame, LoaderError};
use crate::viewer::StatusReporter;

/// Errors that can occur while assembling an image stack.
#[derive(Debug, Error)]
pub enum ImageStackError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("frame {index} has shape {found:?}, expected {expected:?}")]
    FrameShape {
        index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("median filter kernel size {0} is zero or too large for the frame rank")]
    InvalidKernel(usize),

    #[error("no finite intensity samples to normalize")]
    NoFiniteSamples,

    #[error("invalid percentile range {low}..{high}")]
    InvalidPercentile { low: f32, high: f32 },
}

/// Result type for image stack operations.
pub type Result<T> = std::result::Result<T, ImageStackError>;

/// Stack equally shaped frames along a new leading axis.
///
/// # Errors
///
/// Returns `FrameShape` naming the first frame whose shape differs from frame 0.
pub fn stack_frames(frames: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let Some(first) = frames.first() else {
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    };

    for (index, frame) in frames.iter().enumerate() {
        if frame.shape() != first.shape() {
            return Err(ImageStackError::FrameShape {
                index,
                expected: first.shape().to_vec(),
                found: frame.shape().to_vec(),
            });
        }
    }

    let views: Vec<ArrayViewD<'_, f32>> = frames.iter().map(|f| f.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Load every matching file of a directory into a `(T, ...spatial)` stack.
///
/// An empty or non-matching directory yields a stack with zero frames.
pub fn load_stack(dir: &Path, extension: &str, status: &dyn StatusReporter) -> Result<ArrayD<f32>> {
    let files = list_image_files(dir, extension)?;

    if files.is_empty() {
        warn!("No .{} files found in {}", extension, dir.display());
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    }

    let total = files.len();
    let mut frames = Vec::with_capacity(total);
    for (i, path) in files.iter().enumerate() {
        frames.push(read_tiff_frame(path)?);
        status.progress("Loading images", i + 1, total);
    }

    let stack = stack_frames(&frames)?;
    info!("Loaded {} frames of shape {:?} from {}", total, &stack.shape()[1..], dir.display());

    Ok(stack)
}

/// Load a stack and apply the configured normalization and median filter.
pub fn assemble_stack(dir: &Path, config: &ImageConfig, status: &dyn StatusReporter) -> Result<ArrayD<f32>> {
    let mut stack = load_stack(dir, &config.extension, status)?;

    if stack.len_of(Axis(0)) == 0 {
        return Ok(stack);
    }

    if config.normalize.method != NormalizeMethod::Off {
        normalize(&mut stack, &config.normalize)?;
    }

    if config.median_filter.enabled {
        stack = median_filter_stack(&stack, config.median_filter.kernel_size, config.workers, status)?;
    }

    Ok(stack)
}

/// Linear-interpolated percentile of sorted values, `q` in `[0, 100]`.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let last = sorted.len() - 1;
    let rank = (q as f64 / 100.0) * last as f64;
    let lo = (rank.floor() as usize).min(last);
    let hi = (rank.ceil() as usize).min(last);
    let weight = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * weight
}

/// Intensity bounds of the finite values of a block for the given method.
///
/// NaN and infinite samples take no part in the bounds and stay as they are
/// after rescaling.
fn intensity_bounds(values: ArrayViewD<'_, f32>, config: &NormalizeConfig) -> Result<(f32, f32)> {
    let finite = values.iter().copied().filter(|v| v.is_finite());

    let bounds = match config.method {
        NormalizeMethod::Percentile => {
            let mut sorted: Vec<f32> = finite.collect();
            sorted.sort_unstable_by(f32::total_cmp);
            if sorted.is_empty() {
                return Err(ImageStackError::NoFiniteSamples);
            }
            (
                percentile_sorted(&sorted, config.low_percentile),
                percentile_sorted(&sorted, config.high_percentile),
            )
        }
        _ => finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v))),
    };

    if bounds.0 > bounds.1 {
        return Err(ImageStackError::NoFiniteSamples);
    }
    Ok(bounds)
}

fn rescale_into_unit(mut values: ArrayViewMutD<'_, f32>, lo: f32, hi: f32) {
    let range = hi - lo;
    if range <= 0.0 {
        // constant input: nothing to spread
        values.mapv_inplace(|v| if v.is_finite() { 0.0 } else { v });
        return;
    }
    values.mapv_inplace(|v| if v.is_finite() { ((v - lo) / range).clamp(0.0, 1.0) } else { v });
}

/// Rescale intensities into `[0, 1]` with min/max or percentile bounds,
/// computed over the whole stack or per frame, then clip.
///
/// # Errors
///
/// Returns `InvalidPercentile` unless `0 <= low < high <= 100`, and
/// `NoFiniteSamples` if the stack (or a frame, per frame) holds no finite value.
pub fn normalize(stack: &mut ArrayD<f32>, config: &NormalizeConfig) -> Result<()> {
    if config.method == NormalizeMethod::Off {
        return Ok(());
    }

    if config.method == NormalizeMethod::Percentile {
        let (low, high) = (config.low_percentile, config.high_percentile);
        if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low >= high {
            return Err(ImageStackError::InvalidPercentile { low, high });
        }
    }

    if config.per_frame {
        for frame in stack.axis_iter_mut(Axis(0)) {
            let (lo, hi) = intensity_bounds(frame.view(), config)?;
            rescale_into_unit(frame, lo, hi);
        }
    } else {
        let (lo, hi) = intensity_bounds(stack.view(), config)?;
        debug!("Normalizing stack with bounds [{}, {}]", lo, hi);
        rescale_into_unit(stack.view_mut(), lo, hi);
    }

    Ok(())
}

/// Mirror an out-of-range index back into `0..len` (edge sample repeated).
#[inline]
fn reflect_index(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as usize
}

/// Number of samples in a cubic window of edge `kernel` over `ndim` axes.
///
/// # Errors
///
/// Returns `InvalidKernel` for a zero kernel or a window size that overflows.
fn window_len(kernel: usize, ndim: usize) -> Result<usize> {
    u32::try_from(ndim)
        .ok()
        .and_then(|exp| kernel.checked_pow(exp))
        .filter(|_| kernel > 0)
        .ok_or(ImageStackError::InvalidKernel(kernel))
}

/// Median filter one frame with a cubic window of edge `kernel`.
///
/// The window spans `i - kernel / 2 ..= i - kernel / 2 + kernel - 1` on every
/// axis, borders are mirrored, and the median of an even-sized window is its
/// upper middle element.
///
/// # Errors
///
/// Returns `InvalidKernel` for a zero kernel or one whose window overflows.
pub fn median_filter_frame(frame: ArrayViewD<'_, f32>, kernel: usize) -> Result<ArrayD<f32>> {
    let ndim = frame.ndim();
    let shape = frame.shape().to_vec();
    let half = (kernel / 2) as isize;

    // every offset of the window, one entry per axis
    let window_len = window_len(kernel, ndim)?;
    let offsets: Vec<Vec<isize>> = (0..window_len)
        .map(|mut flat| {
            let mut offset = vec![0isize; ndim];
            for axis in (0..ndim).rev() {
                offset[axis] = (flat % kernel) as isize - half;
                flat /= kernel;
            }
            offset
        })
        .collect();

    let mut out = ArrayD::<f32>::zeros(IxDyn(&shape));
    let mut window = Vec::with_capacity(window_len);
    let mut source = vec![0usize; ndim];

    out.indexed_iter_mut().for_each(|(index, value)| {
        window.clear();
        for offset in &offsets {
            for axis in 0..ndim {
                source[axis] = reflect_index(index[axis] as isize + offset[axis], shape[axis]);
            }
            window.push(frame[IxDyn(&source)]);
        }
        let mid = window.len() / 2;
        let (_, median, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
        *value = *median;
    });

    Ok(out)
}

/// Median filter every frame of a stack in parallel.
///
/// One task per frame runs on a pool of `workers` threads (one per CPU core
/// when `None`). Results are reassembled in the original frame order.
///
/// # Errors
///
/// Returns `InvalidKernel` for a zero kernel size or one whose window
/// overflows, or a pool build error.
pub fn median_filter_stack(
    stack: &ArrayD<f32>,
    kernel: usize,
    workers: Option<usize>,
    status: &dyn StatusReporter,
) -> Result<ArrayD<f32>> {
    window_len(kernel, stack.ndim().saturating_sub(1))?;

    let frames: Vec<ArrayViewD<'_, f32>> = stack.outer_iter().collect();
    let total = frames.len();
    if kernel == 1 || total == 0 {
        return Ok(stack.clone());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .build()?;

    info!(
        "Median filtering {} frames (kernel {}) on {} workers",
        total,
        kernel,
        pool.current_num_threads()
    );

    let done = AtomicUsize::new(0);
    let filtered: Vec<ArrayD<f32>> = pool.install(|| {
        frames
            .par_iter()
            .map(|frame| {
                let out = median_filter_frame(frame.view(), kernel)?;
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                status.progress("Filtering frames", finished, total);
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    stack_frames(&filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MedianFilterConfig;
    use crate::core::loaders::tests::write_tiff;
    use crate::viewer::NoStatus;
    use ndarray::{array, Array, Array3};
    use tempfile::TempDir;

    fn ramp_stack() -> ArrayD<f32> {
        Array3::from_shape_fn((3, 4, 5), |(t, y, x)| (t * 20 + y * 5 + x) as f32).into_dyn()
    }

    #[test]
    fn test_load_stack_shape_and_order() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for (name, value) in [("b_002.tif", 2.0), ("a_001.tif", 1.0), ("c_003.tif", 3.0)] {
            write_tiff(&temp_dir.path().join(name), 4, 3, &[vec![value; 12]]);
        }

        let stack = load_stack(temp_dir.path(), "tif", &NoStatus)?;
        assert_eq!(stack.shape(), &[3, 3, 4]);
        assert_eq!(stack[[0, 0, 0]], 1.0);
        assert_eq!(stack[[1, 2, 3]], 2.0);
        assert_eq!(stack[[2, 1, 1]], 3.0);
        Ok(())
    }

    #[test]
    fn test_load_stack_of_volumes() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for name in ["t0.tif", "t1.tif"] {
            write_tiff(&temp_dir.path().join(name), 2, 2, &[vec![0.0; 4], vec![1.0; 4]]);
        }

        let stack = load_stack(temp_dir.path(), "tif", &NoStatus)?;
        assert_eq!(stack.shape(), &[2, 2, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_load_stack_empty_dir() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let stack = load_stack(temp_dir.path(), "tif", &NoStatus)?;
        assert_eq!(stack.len_of(Axis(0)), 0);
        Ok(())
    }

    #[test]
    fn test_mismatched_frames_fail_loudly() {
        let temp_dir = TempDir::new().unwrap();
        write_tiff(&temp_dir.path().join("a.tif"), 2, 2, &[vec![0.0; 4]]);
        write_tiff(&temp_dir.path().join("b.tif"), 3, 2, &[vec![0.0; 6]]);

        let result = load_stack(temp_dir.path(), "tif", &NoStatus);
        assert!(matches!(result, Err(ImageStackError::FrameShape { index: 1, .. })));
    }

    #[test]
    fn test_min_max_normalization_spans_unit_range() -> Result<()> {
        let mut stack = ramp_stack();
        let config = NormalizeConfig {
            method: NormalizeMethod::MinMax,
            ..Default::default()
        };

        normalize(&mut stack, &config)?;
        let min = stack.iter().copied().fold(f32::INFINITY, f32::min);
        let max = stack.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(min.abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_per_frame_min_max() -> Result<()> {
        let mut stack = ramp_stack();
        let config = NormalizeConfig {
            method: NormalizeMethod::MinMax,
            per_frame: true,
            ..Default::default()
        };

        normalize(&mut stack, &config)?;
        for frame in stack.outer_iter() {
            let max = frame.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            assert!((frame[[0, 0]]).abs() < 1e-6);
            assert!((max - 1.0).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_percentile_normalization_clips_outliers() -> Result<()> {
        let mut values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        values[999] = 1.0e6;
        let mut stack = Array::from_shape_vec(IxDyn(&[1, 10, 100]), values)?;
        let config = NormalizeConfig {
            method: NormalizeMethod::Percentile,
            ..Default::default()
        };

        normalize(&mut stack, &config)?;
        assert!(stack.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(stack[[0, 9, 99]], 1.0);
        assert_eq!(stack[[0, 0, 0]], 0.0);
        assert!(stack[[0, 5, 0]] > 0.2 && stack[[0, 5, 0]] < 0.3);
        Ok(())
    }

    #[test]
    fn test_invalid_percentiles_rejected() {
        let mut stack = ramp_stack();
        let config = NormalizeConfig {
            method: NormalizeMethod::Percentile,
            low_percentile: 90.0,
            high_percentile: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            normalize(&mut stack, &config),
            Err(ImageStackError::InvalidPercentile { .. })
        ));
    }

    #[test]
    fn test_constant_stack_normalizes_to_zero() -> Result<()> {
        let mut stack = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 5.0f32);
        let config = NormalizeConfig {
            method: NormalizeMethod::MinMax,
            ..Default::default()
        };
        normalize(&mut stack, &config)?;
        assert!(stack.iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn test_percentile_sorted_interpolates() {
        let sorted = [0.0f32, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile_sorted(&sorted, 0.0), 0.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 40.0);
        assert!((percentile_sorted(&sorted, 37.5) - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_percentile_sorted_full_range_on_long_slice() {
        // more samples than f32 can index exactly
        let len = (1usize << 24) + 3;
        let mut sorted = vec![0.0f32; len];
        sorted[len - 1] = 1.0;

        assert_eq!(percentile_sorted(&sorted, 100.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 0.0), 0.0);
    }

    #[test]
    fn test_nan_pixels_do_not_zero_the_frame() -> Result<()> {
        let mut values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        values[10] = f32::NAN;
        values[500] = f32::NAN;
        let mut stack = Array::from_shape_vec(IxDyn(&[1, 10, 100]), values)?;
        let config = NormalizeConfig {
            method: NormalizeMethod::Percentile,
            ..Default::default()
        };

        normalize(&mut stack, &config)?;
        assert!(stack[[0, 0, 10]].is_nan());
        assert!(stack[[0, 5, 0]].is_nan());
        assert_eq!(stack[[0, 9, 99]], 1.0);
        let nonzero = stack.iter().filter(|&&v| v.is_finite() && v > 0.0).count();
        assert!(nonzero > 990);
        Ok(())
    }

    #[test]
    fn test_min_max_skips_nan() -> Result<()> {
        let mut stack = array![[[f32::NAN, 2.0], [4.0, 6.0]]].into_dyn();
        let config = NormalizeConfig {
            method: NormalizeMethod::MinMax,
            ..Default::default()
        };

        normalize(&mut stack, &config)?;
        assert!(stack[[0, 0, 0]].is_nan());
        assert_eq!(stack[[0, 0, 1]], 0.0);
        assert_eq!(stack[[0, 1, 0]], 0.5);
        assert_eq!(stack[[0, 1, 1]], 1.0);
        Ok(())
    }

    #[test]
    fn test_all_nan_frame_is_an_error() {
        let mut stack = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 1.0f32);
        stack.index_axis_mut(Axis(0), 1).fill(f32::NAN);
        let config = NormalizeConfig {
            method: NormalizeMethod::Percentile,
            per_frame: true,
            ..Default::default()
        };

        assert!(matches!(
            normalize(&mut stack, &config),
            Err(ImageStackError::NoFiniteSamples)
        ));
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(2, 4), 2);
    }

    #[test]
    fn test_median_removes_salt_noise() {
        let mut frame = ArrayD::from_elem(IxDyn(&[5, 5]), 1.0f32);
        frame[[2, 2]] = 100.0;

        let filtered = median_filter_frame(frame.view(), 3).unwrap();
        assert!(filtered.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_median_of_known_window() {
        let frame = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]].into_dyn();
        let filtered = median_filter_frame(frame.view(), 3).unwrap();
        assert_eq!(filtered[[1, 1]], 5.0);
        // corner window mirrors to [1,1,2,1,1,2,4,4,5]
        assert_eq!(filtered[[0, 0]], 2.0);
    }

    #[test]
    fn test_median_on_volume_frame() {
        let mut frame = ArrayD::from_elem(IxDyn(&[3, 3, 3]), 2.0f32);
        frame[[1, 1, 1]] = -50.0;
        let filtered = median_filter_frame(frame.view(), 3).unwrap();
        assert!(filtered.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_kernel_one_is_identity() -> Result<()> {
        let stack = ramp_stack();
        let filtered = median_filter_stack(&stack, 1, None, &NoStatus)?;
        assert_eq!(filtered, stack);
        assert_eq!(median_filter_frame(stack.index_axis(Axis(0), 1), 1)?, stack.index_axis(Axis(0), 1));
        Ok(())
    }

    #[test]
    fn test_zero_kernel_is_rejected() {
        let stack = ramp_stack();
        assert!(matches!(
            median_filter_stack(&stack, 0, None, &NoStatus),
            Err(ImageStackError::InvalidKernel(0))
        ));
    }

    #[test]
    fn test_oversized_kernel_is_rejected() {
        let stack = ramp_stack();
        assert!(matches!(
            median_filter_stack(&stack, usize::MAX, None, &NoStatus),
            Err(ImageStackError::InvalidKernel(usize::MAX))
        ));
        assert!(matches!(
            median_filter_frame(stack.index_axis(Axis(0), 0), 1 << 40),
            Err(ImageStackError::InvalidKernel(_))
        ));
    }

    #[test]
    fn test_parallel_filter_preserves_frame_order() -> Result<()> {
        let stack = ramp_stack();
        let filtered = median_filter_stack(&stack, 3, Some(2), &NoStatus)?;

        assert_eq!(filtered.shape(), stack.shape());
        for (t, frame) in stack.outer_iter().enumerate() {
            let expected = median_filter_frame(frame, 3)?;
            assert_eq!(filtered.index_axis(Axis(0), t), expected);
        }
        Ok(())
    }

    #[test]
    fn test_assemble_stack_applies_config() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        write_tiff(&temp_dir.path().join("0.tif"), 3, 3, &[vec![0.0, 0.0, 0.0, 0.0, 90.0, 0.0, 0.0, 0.0, 0.0]]);
        write_tiff(&temp_dir.path().join("1.tif"), 3, 3, &[vec![10.0; 9]]);

        let config = ImageConfig {
            normalize: NormalizeConfig {
                method: NormalizeMethod::MinMax,
                ..Default::default()
            },
            median_filter: MedianFilterConfig {
                enabled: true,
                kernel_size: 3,
            },
            ..Default::default()
        };

        let stack = assemble_stack(temp_dir.path(), &config, &NoStatus)?;
        assert_eq!(stack.shape(), &[2, 3, 3]);
        assert_eq!(stack[[0, 1, 1]], 0.0);
        assert!((stack[[1, 0, 0]] - 10.0 / 90.0).abs() < 1e-6);
        Ok(())
    }
}
