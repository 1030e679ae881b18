//! Small numeric helpers shared by the analyzers.

/// `part / whole * 100`, or 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Median of an unsorted sample; the lower-middle average for even lengths.
pub fn median(values: &mut [i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2)
    } else {
        Some(values[mid])
    }
}

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254_829_592;
    const A2: f64 = -0.284_496_736;
    const A3: f64 = 1.421_413_741;
    const A4: f64 = -1.453_152_027;
    const A5: f64 = 1.061_405_429;
    const P: f64 = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Pooled two-proportion z-test. Returns `(z, two_sided_p)`, or `None` when
/// either sample is empty or the pooled rate is degenerate (0 or 1).
pub fn two_proportion_z_test(
    control_conversions: u64,
    control_users: u64,
    variant_conversions: u64,
    variant_users: u64,
) -> Option<(f64, f64)> {
    if control_users == 0 || variant_users == 0 {
        return None;
    }
    let n1 = control_users as f64;
    let n2 = variant_users as f64;
    let p1 = control_conversions as f64 / n1;
    let p2 = variant_conversions as f64 / n2;
    let pooled = (control_conversions + variant_conversions) as f64 / (n1 + n2);
    if pooled <= 0.0 || pooled >= 1.0 {
        return None;
    }
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    let z = (p2 - p1) / se;
    let p = 2.0 * (1.0 - normal_cdf(z.abs()));
    Some((z, p.clamp(0.0, 1.0)))
}
