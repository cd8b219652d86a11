//! Classic ADSR envelope for per voice amplitude shaping.

use std::time::Duration;

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Current processing stage in an [`AdsrEnvelope`].
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum AdsrStage {
    #[default]
    /// Before attack and after release (zero volume).
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

// -------------------------------------------------------------------------------------------------

/// ADSR envelope parameters that define the envelope shape for an [`AdsrEnvelope`].
///
/// Parameters are shared by all voices of a processor, so the per voice envelope state stays
/// small. Make sure to apply a valid sample rate before processing.
#[derive(Debug, Clone)]
pub struct AdsrParameters {
    sample_rate: u32,
    attack_time: Duration,
    attack_rate: f32,
    decay_time: Duration,
    decay_rate: f32,
    sustain_level: f32,
    release_time: Duration,
    release_rate: f32,
}

impl AdsrParameters {
    /// Create new ADSR parameters from stage time durations and a sustain level in
    /// range \[0.0, 1.0\]. Zero durations skip the respective stage.
    pub fn new(
        attack_time: Duration,
        decay_time: Duration,
        sustain_level: f32,
        release_time: Duration,
        sample_rate: u32,
    ) -> Result<Self, Error> {
        if !(0.0..=1.0).contains(&sustain_level) {
            return Err(Error::ParameterError(format!(
                "Invalid sustain level: {sustain_level}. Must be in range [0.0, 1.0]"
            )));
        }
        let mut parameters = Self {
            sample_rate,
            attack_time,
            attack_rate: 0.0,
            decay_time,
            decay_rate: 0.0,
            sustain_level,
            release_time,
            release_rate: 0.0,
        };
        parameters.update_rates();
        Ok(parameters)
    }

    /// Get currently applied sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Set a new sample rate and recalculate per sample rates.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.update_rates();
        }
    }

    /// Get the sustain level.
    pub fn sustain_level(&self) -> f32 {
        self.sustain_level
    }

    /// Get the release time duration.
    pub fn release_time(&self) -> Duration {
        self.release_time
    }

    fn update_rates(&mut self) {
        self.attack_rate = Self::rate_from_time(self.attack_time, 1.0, self.sample_rate);
        self.decay_rate =
            Self::rate_from_time(self.decay_time, 1.0 - self.sustain_level, self.sample_rate);
        self.release_rate = Self::rate_from_time(self.release_time, 1.0, self.sample_rate);
    }

    fn rate_from_time(time: Duration, range: f32, sample_rate: u32) -> f32 {
        let time_secs = time.as_secs_f32();
        if time_secs == 0.0 {
            f32::MAX
        } else {
            range / (time_secs * sample_rate as f32)
        }
    }
}

impl Default for AdsrParameters {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(5),
            Duration::from_millis(250),
            0.8,
            Duration::from_millis(200),
            44100,
        )
        .expect("Default ADSR parameters should be valid")
    }
}

// -------------------------------------------------------------------------------------------------

/// Classic ADSR envelope with externally defined parameter state.
#[derive(Debug, Default, Clone)]
pub struct AdsrEnvelope {
    stage: AdsrStage,
    release_level: f32,
    output: f32,
}

impl AdsrEnvelope {
    const SILENCE: f32 = 0.001; // -60dB

    /// Create a new envelope in idle stage.
    pub fn new() -> Self {
        Self {
            stage: AdsrStage::Idle,
            release_level: 0.0,
            output: 0.0,
        }
    }

    /// Return the envelope's current stage.
    #[inline(always)]
    pub fn stage(&self) -> AdsrStage {
        self.stage
    }

    /// Return the envelope's current (last processed) output value.
    #[inline(always)]
    pub fn output(&self) -> f32 {
        self.output
    }

    /// Restart the envelope from zero and enter the attack stage.
    pub fn note_on(&mut self, parameters: &AdsrParameters) {
        if parameters.attack_rate == f32::MAX {
            self.output = 1.0;
            self.stage = AdsrStage::Decay;
        } else {
            self.output = 0.0;
            self.stage = AdsrStage::Attack;
        }
    }

    /// Enter the release stage from the current output level.
    pub fn note_off(&mut self, parameters: &AdsrParameters) {
        if parameters.release_time.is_zero() || self.output <= f32::EPSILON {
            self.output = 0.0;
            self.stage = AdsrStage::Idle;
        } else {
            self.release_level = self.output;
            self.stage = AdsrStage::Release;
        }
    }

    /// Immediately stop the envelope and return to idle.
    pub fn reset(&mut self) {
        self.output = 0.0;
        self.stage = AdsrStage::Idle;
    }

    /// Compute and return one output sample. Returns 0.0 and does nothing in idle stage.
    #[inline]
    pub fn run(&mut self, parameters: &AdsrParameters) -> f32 {
        match self.stage {
            AdsrStage::Attack => {
                self.output += parameters.attack_rate;
                if self.output >= 1.0 {
                    self.output = 1.0;
                    self.stage = if parameters.decay_time.is_zero() {
                        AdsrStage::Sustain
                    } else {
                        AdsrStage::Decay
                    };
                }
            }
            AdsrStage::Decay => {
                self.output -= parameters.decay_rate;
                if self.output <= parameters.sustain_level {
                    self.output = parameters.sustain_level;
                    self.stage = AdsrStage::Sustain;
                }
            }
            AdsrStage::Sustain => {
                // waiting for the release trigger
            }
            AdsrStage::Release => {
                self.output -= self.release_level * parameters.release_rate;
                if self.output <= Self::SILENCE {
                    self.output = 0.0;
                    self.stage = AdsrStage::Idle;
                }
            }
            AdsrStage::Idle => {
                // nothing to do
            }
        }
        self.output
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_parameters() -> AdsrParameters {
        AdsrParameters::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            0.5,
            Duration::from_millis(10),
            1000,
        )
        .unwrap()
    }

    #[test]
    fn note_on_triggers_attack() {
        let parameters = test_parameters();
        let mut env = AdsrEnvelope::new();
        env.note_on(&parameters);
        assert_eq!(env.stage(), AdsrStage::Attack);
        let first = env.run(&parameters);
        assert!(first > 0.0);
    }

    #[test]
    fn zero_attack_skips_to_decay() {
        let parameters = AdsrParameters::new(
            Duration::ZERO,
            Duration::from_millis(10),
            0.5,
            Duration::from_millis(10),
            1000,
        )
        .unwrap();
        let mut env = AdsrEnvelope::new();
        env.note_on(&parameters);
        assert_eq!(env.stage(), AdsrStage::Decay);
        assert_eq!(env.output(), 1.0);
    }

    #[test]
    fn full_cycle_reaches_idle() {
        let parameters = test_parameters();
        let mut env = AdsrEnvelope::new();
        env.note_on(&parameters);
        // run through attack and decay into sustain
        for _ in 0..100 {
            env.run(&parameters);
        }
        assert_eq!(env.stage(), AdsrStage::Sustain);
        assert_eq!(env.output(), parameters.sustain_level());

        env.note_off(&parameters);
        assert_eq!(env.stage(), AdsrStage::Release);
        for _ in 0..100 {
            env.run(&parameters);
        }
        assert_eq!(env.stage(), AdsrStage::Idle);
        assert_eq!(env.output(), 0.0);
    }

    #[test]
    fn note_off_before_attack_completes() {
        let parameters = test_parameters();
        let mut env = AdsrEnvelope::new();
        env.note_on(&parameters);
        env.run(&parameters);
        env.note_off(&parameters);
        assert_eq!(env.stage(), AdsrStage::Release);
    }

    #[test]
    fn invalid_sustain_level() {
        assert!(AdsrParameters::new(
            Duration::ZERO,
            Duration::ZERO,
            1.5,
            Duration::ZERO,
            44100
        )
        .is_err());
    }
}
