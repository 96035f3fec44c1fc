//! Small numeric helpers shared by the crossover and dynamics code.

/// Level (dB) reported for samples below [`SILENCE_FLOOR`].
pub const SILENCE_DB: f32 = -120.0;

/// Linear magnitude under which the level detector reports [`SILENCE_DB`].
pub const SILENCE_FLOOR: f32 = 1e-6;

#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    if lin.abs() < SILENCE_FLOOR {
        SILENCE_DB
    } else {
        20.0 * lin.abs().log10()
    }
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
///
/// `exp(-1 / (0.001 * sample_rate * time_ms))`. Callers must pass a
/// positive `time_ms`; the compressor clamps before calling.
#[inline]
pub fn time_constant_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (0.001 * sample_rate * time_ms)).exp()
}

/// Clamp a value into `[min, max]`, replacing NaN/inf with `fallback`.
#[inline]
pub fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Peak absolute value of a block.
pub fn block_peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
}
