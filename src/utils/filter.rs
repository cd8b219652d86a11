//! Per voice state variable lowpass filter.

// -------------------------------------------------------------------------------------------------

/// A Chamberlin state variable filter running in lowpass mode.
///
/// Cutoff is passed per sample so control rate modulation (cutoff slides, autowah) does not
/// require coefficient caching. Filter memory persists across blocks and lives in the owning
/// voice or device state.
#[derive(Debug, Default, Clone)]
pub struct StateVariableLowpass {
    low: f32,
    band: f32,
}

impl StateVariableLowpass {
    const Q: f32 = 0.8;

    pub fn new() -> Self {
        Self {
            low: 0.0,
            band: 0.0,
        }
    }

    /// Clear the filter memory.
    pub fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }

    /// Process one input sample with the given cutoff frequency in Hz.
    #[inline]
    pub fn tick(&mut self, input: f32, cutoff_hz: f32, sample_rate: u32) -> f32 {
        // Chamberlin SVF frequency coefficient, stable up to about sample_rate / 6
        let max_cutoff = sample_rate as f32 / 6.0;
        let f = 2.0
            * (std::f32::consts::PI * cutoff_hz.clamp(1.0, max_cutoff) / sample_rate as f32).sin();
        self.low += f * self.band;
        let high = input - self.low - Self::Q * self.band;
        self.band += f * high;
        self.low
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_dc() {
        let mut filter = StateVariableLowpass::new();
        let mut output = 0.0;
        for _ in 0..2000 {
            output = filter.tick(1.0, 1000.0, 44100);
        }
        // a lowpass should pass a constant signal through
        assert!((output - 1.0).abs() < 0.05);
    }

    #[test]
    fn attenuates_high_frequencies() {
        let mut filter = StateVariableLowpass::new();
        let sample_rate = 44100;
        // a signal alternating at the nyquist rate is far above a 100 Hz cutoff
        let mut peak: f32 = 0.0;
        for frame in 0..2000 {
            let input = if frame % 2 == 0 { 1.0 } else { -1.0 };
            let output = filter.tick(input, 100.0, sample_rate);
            if frame > 1000 {
                peak = peak.max(output.abs());
            }
        }
        assert!(peak < 0.05, "peak was {peak}");
    }

    #[test]
    fn reset_clears_memory() {
        let mut filter = StateVariableLowpass::new();
        for _ in 0..100 {
            filter.tick(1.0, 1000.0, 44100);
        }
        filter.reset();
        assert_eq!(filter.tick(0.0, 1000.0, 44100), 0.0);
    }
}
