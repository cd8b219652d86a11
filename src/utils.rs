//! Shared DSP helpers: value conversions, flat buffer operations and work buffer pools.

pub mod buffer;
pub mod envelope;
pub mod filter;

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

// 20 / ln(10) and its inverse, for linear <-> dB conversions.
const LIN_TO_DB_FACTOR: f32 = 8.685_89;
const DB_TO_LIN_FACTOR: f32 = 0.115_129_255;

/// Pitch of A4 in cents on the engine's absolute pitch scale (100 cents per semitone,
/// 0 cents = C-1 in MIDI terms).
pub const A4_PITCH_CENTS: f64 = 6900.0;
const A4_FREQUENCY_HZ: f64 = 440.0;

// -------------------------------------------------------------------------------------------------

pub fn linear_to_db(value: f32) -> f32 {
    if value == 1.0 {
        0.0 // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12f32 {
        value.ln() * LIN_TO_DB_FACTOR
    } else {
        MINUS_INF_IN_DB
    }
}

pub fn db_to_linear(value: f32) -> f32 {
    if value == 0.0f32 {
        1.0f32 // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        (value * DB_TO_LIN_FACTOR).exp()
    } else {
        0.0f32
    }
}

// -------------------------------------------------------------------------------------------------

/// Convert an absolute pitch in cents into a frequency in Hz.
pub fn pitch_to_frequency(cents: f64) -> f64 {
    A4_FREQUENCY_HZ * ((cents - A4_PITCH_CENTS) / 1200.0).exp2()
}

// -------------------------------------------------------------------------------------------------

/// Compute equal power left/right gain factors from a panning position in range \[-1, 1\].
pub fn panning_factors(panning: f32) -> (f32, f32) {
    let angle = (panning.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

// -------------------------------------------------------------------------------------------------
