//! Small numeric helpers shared by the SOC estimator, thermistor curves and
//! the configuration code.

/// Piecewise-linear interpolation of `ys` over the monotonic axis `xs`.
///
/// `xs` may be strictly increasing or strictly decreasing; the direction is
/// detected from the first and last element. `ys` does not need to be
/// monotonic. Values of `x` beyond either end of `xs` are clamped to the
/// corresponding endpoint of `ys` (no extrapolation).
///
/// Both slices must have the same length of at least 2.
pub fn interpolate(xs: &[f32], ys: &[f32], x: f32) -> f32 {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(xs.len() >= 2);

    let size = xs.len();

    if xs[0] < xs[size - 1] {
        for i in 0..size {
            if x <= xs[i] {
                if i == 0 {
                    return ys[0]; // x smaller than first element
                }
                return ys[i - 1] + (ys[i] - ys[i - 1]) * (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
            }
        }
        ys[size - 1] // x larger than last element
    } else {
        for i in 0..size {
            if x >= xs[i] {
                if i == 0 {
                    return ys[0];
                }
                return ys[i - 1] + (ys[i] - ys[i - 1]) * (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
            }
        }
        ys[size - 1]
    }
}

/// Format a byte as a string of its 8 bits, MSB first. Used for register
/// dumps.
pub fn bit_string(byte: u8) -> String {
    let mut str = String::with_capacity(8);
    let mut z = 128u8;
    while z > 0 {
        str.push(if byte & z == z { '1' } else { '0' });
        z >>= 1;
    }
    str
}
