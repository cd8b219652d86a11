//! Set of built in processor implementations.
//!
//! Voice processors ([`oscillator`], [`noise`]) render per note signals; continuous
//! processors ([`gain`], [`delay`]) render always-on effect signals. All of them talk to the
//! engine exclusively through the device contract in [`crate::device`], so embedders can add
//! their own processor types the same way.

pub mod delay;
pub mod gain;
pub mod noise;
pub mod oscillator;

pub use delay::DelayProc;
pub use gain::GainProc;
pub use noise::NoiseProc;
pub use oscillator::{OscillatorProc, Waveform};
