// src/service/forecast/stats.rs
//! Estadística básica compartida por los modelos.

/// Varianza por debajo de la cual una serie se trata como constante.
pub const DEGENERATE_EPS: f64 = 1e-9;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Varianza muestral (n - 1).
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64
}

pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

/// Desviación absoluta mediana escalada para ser consistente con sigma.
pub fn robust_sigma(xs: &[f64]) -> f64 {
    let m = median(xs);
    let deviations: Vec<f64> = xs.iter().map(|x| (x - m).abs()).collect();
    1.4826 * median(&deviations)
}

pub fn is_constant(xs: &[f64]) -> bool {
    variance(xs) < DEGENERATE_EPS
}

/// Recta de mínimos cuadrados sobre t = 0..n. Devuelve (intercepto, pendiente).
pub fn linear_fit(ys: &[f64]) -> (f64, f64) {
    let n = ys.len();
    if n < 2 {
        return (ys.first().copied().unwrap_or(0.0), 0.0);
    }
    let t_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(ys);
    let mut num = 0.0;
    let mut den = 0.0;
    for (t, y) in ys.iter().enumerate() {
        let dt = t as f64 - t_mean;
        num += dt * (y - y_mean);
        den += dt * dt;
    }
    let slope = if den > 0.0 { num / den } else { 0.0 };
    (y_mean - slope * t_mean, slope)
}

/// sMAPE acotado a [0, 1]: media de |a - f| / (|a| + |f|).
pub fn smape(actual: &[f64], predicted: &[f64]) -> f64 {
    let terms: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .map(|(a, f)| {
            let den = a.abs() + f.abs();
            if den == 0.0 {
                0.0
            } else {
                (a - f).abs() / den
            }
        })
        .collect();
    mean(&terms).clamp(0.0, 1.0)
}

/// Puntuación en [0, 1) creciente con la desviación `z`; `z == scale` da 0.5.
pub fn deviation_score(z: f64, scale: f64) -> f64 {
    if !z.is_finite() || z <= 0.0 || scale <= 0.0 {
        return if z.is_infinite() && z > 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - 0.5f64.powf(z / scale)
}

/// Nivel de confianza bilateral de un cuantil normal `z`.
pub fn confidence_for_z(z: f64) -> f64 {
    (2.0 * normal_cdf(z) - 1.0).clamp(0.0, 1.0)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

// Abramowitz & Stegun 7.1.26
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let y = 1.0
        - (((((1.061_405_429 * t - 1.453_152_027) * t) + 1.421_413_741) * t - 0.284_496_736) * t + 0.254_829_592)
            * t
            * (-x * x).exp();
    sign * y
}

/// Perfil estacional aditivo (media por posición) de una serie ya sin tendencia,
/// centrado en cero. Vacío si no hay al menos dos ciclos completos.
pub fn seasonal_profile(detrended: &[f64], season: usize) -> Vec<f64> {
    if season < 2 || detrended.len() < 2 * season {
        return vec![0.0; season.max(1)];
    }
    let mut sums = vec![0.0; season];
    let mut counts = vec![0usize; season];
    for (i, v) in detrended.iter().enumerate() {
        sums[i % season] += v;
        counts[i % season] += 1;
    }
    let mut profile: Vec<f64> = sums.iter().zip(&counts).map(|(s, c)| s / *c as f64).collect();
    let center = mean(&profile);
    for p in profile.iter_mut() {
        *p -= center;
    }
    profile
}
