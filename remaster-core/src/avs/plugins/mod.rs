pub mod color_matrix;
pub mod degrain;
pub mod dering;
pub mod deshaker;
pub mod dither;
pub mod interframe;
pub mod knlmeans;
pub mod lsmash;
pub mod resize;
pub mod standard;
pub mod upscale;

/// Exact-ish rational form of a frame rate, to three decimals.
#[inline]
pub fn frame_rate_fraction(frame_rate: f64) -> (u64, u64) {
    let numerator = (frame_rate * 1000.0).round().max(0.0) as u64;
    let divisor = gcd(numerator, 1000);
    (numerator / divisor, 1000 / divisor)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}
