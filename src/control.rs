//! Slider and LFO primitives, and the controller bundles carried by channels and voices.
//!
//! All controllers are plain value types: carrying a controller from a channel into a newly
//! spawned voice is a copy, never a shared reference, so an in-flight ramp on one voice can
//! not corrupt the channel's template.

use crate::{
    composition::Timestamp,
    utils::{db_to_linear, pitch_to_frequency},
};

// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliderState {
    /// No slide in progress; the value is settled at the target.
    Idle,
    /// Ramping linearly towards the target.
    Sliding,
}

// -------------------------------------------------------------------------------------------------

/// A linear ramp value generator for continuous parameter transitions.
///
/// The slide length is musical (beats), converted to a frame count through the current tempo
/// and audio rate. Starting a slide while one is running recomputes the ramp from the current
/// interpolated value, so retargeting is seamless. Reaching the target clamps exactly to it.
#[derive(Debug, Clone)]
pub struct Slider {
    audio_rate: u32,
    tempo: f64,
    length: Timestamp,
    state: SliderState,
    current: f64,
    target: f64,
    step: f64,
    frames_left: u64,
}

impl Slider {
    /// Create a settled slider with instant (zero length) slides.
    pub fn new(value: f64, audio_rate: u32, tempo: f64) -> Self {
        Self {
            audio_rate,
            tempo,
            length: Timestamp::ZERO,
            state: SliderState::Idle,
            current: value,
            target: value,
            step: 0.0,
            frames_left: 0,
        }
    }

    /// The current, possibly mid-ramp value.
    #[inline(always)]
    pub fn value(&self) -> f64 {
        self.current
    }

    /// The value the slider settles at.
    #[inline(always)]
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_sliding(&self) -> bool {
        self.state == SliderState::Sliding
    }

    /// Set the musical length used by subsequent [`Self::start`] calls.
    pub fn set_length(&mut self, length: Timestamp) {
        self.length = length;
    }

    /// Set the value immediately, cancelling any running slide.
    pub fn set_value(&mut self, value: f64) {
        self.current = value;
        self.target = value;
        self.state = SliderState::Idle;
    }

    /// Start or retarget a slide towards `target` from the current value over the configured
    /// length. A zero length applies the target immediately.
    pub fn start(&mut self, target: f64) {
        self.target = target;
        let frames = self.length.to_frames(self.tempo, self.audio_rate).round() as u64;
        if frames == 0 || (target - self.current) == 0.0 {
            self.current = target;
            self.state = SliderState::Idle;
        } else {
            self.step = (target - self.current) / frames as f64;
            self.frames_left = frames;
            self.state = SliderState::Sliding;
        }
    }

    /// Advance by one frame and return the new value.
    #[inline]
    pub fn advance(&mut self) -> f64 {
        if self.state == SliderState::Sliding {
            self.current += self.step;
            self.frames_left -= 1;
            if self.frames_left == 0 {
                // settle exactly on the target, no floating point overshoot
                self.current = self.target;
                self.state = SliderState::Idle;
            }
        }
        self.current
    }

    /// Apply a new audio rate. A running slide restarts from the current value.
    pub fn set_audio_rate(&mut self, audio_rate: u32) {
        self.audio_rate = audio_rate;
        self.retime();
    }

    /// Apply a new tempo. A running slide restarts from the current value.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
        self.retime();
    }

    fn retime(&mut self) {
        if self.state == SliderState::Sliding {
            let target = self.target;
            self.start(target);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A periodic value generator for vibrato, tremolo and autowah style modulation.
///
/// Speed and depth each ramp through their own [`Slider`], so modulation can fade in
/// smoothly. When the depth settles back at zero the LFO turns off and its phase snaps to
/// neutral, so the next turn-on does not resume from a stale phase.
#[derive(Debug, Clone)]
pub struct Lfo {
    audio_rate: u32,
    on: bool,
    speed: Slider,
    depth: Slider,
    phase: f64,
}

impl Lfo {
    pub fn new(audio_rate: u32, tempo: f64) -> Self {
        Self {
            audio_rate,
            on: false,
            speed: Slider::new(0.0, audio_rate, tempo),
            depth: Slider::new(0.0, audio_rate, tempo),
            phase: 0.0,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Current modulation depth target.
    pub fn depth(&self) -> f64 {
        self.depth.target()
    }

    /// Set the oscillation speed in Hz, ramping through the speed slider.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed.start(speed);
    }

    /// Set the modulation depth. A non zero depth turns the LFO on; sliding back to zero
    /// turns it off again once the fade completes.
    pub fn set_depth(&mut self, depth: f64) {
        if depth != 0.0 {
            self.on = true;
        }
        self.depth.start(depth);
    }

    /// Musical length of depth changes (the fade-in/fade-out ramp).
    pub fn set_depth_slide_length(&mut self, length: Timestamp) {
        self.depth.set_length(length);
    }

    /// Musical length of speed changes.
    pub fn set_speed_slide_length(&mut self, length: Timestamp) {
        self.speed.set_length(length);
    }

    /// Turn the LFO off immediately and reset the phase to neutral.
    pub fn reset(&mut self) {
        self.on = false;
        self.phase = 0.0;
        self.depth.set_value(0.0);
    }

    /// Advance by one frame and return the modulation offset.
    #[inline]
    pub fn advance(&mut self) -> f64 {
        if !self.on {
            return 0.0;
        }
        let speed = self.speed.advance();
        let depth = self.depth.advance();
        let value = (self.phase * std::f64::consts::TAU).sin() * depth;
        self.phase += speed / self.audio_rate as f64;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        if depth == 0.0 && !self.depth.is_sliding() {
            // faded out: snap to neutral so the next turn-on starts fresh
            self.on = false;
            self.phase = 0.0;
        }
        value
    }

    pub fn set_audio_rate(&mut self, audio_rate: u32) {
        self.audio_rate = audio_rate;
        self.speed.set_audio_rate(audio_rate);
        self.depth.set_audio_rate(audio_rate);
    }

    pub fn set_tempo(&mut self, tempo: f64) {
        self.speed.set_tempo(tempo);
        self.depth.set_tempo(tempo);
    }
}

// -------------------------------------------------------------------------------------------------

/// Pitch controller: absolute cents with slide and vibrato.
#[derive(Debug, Clone)]
pub struct PitchControl {
    pub slider: Slider,
    pub vibrato: Lfo,
}

impl PitchControl {
    fn new(cents: f64, audio_rate: u32, tempo: f64) -> Self {
        Self {
            slider: Slider::new(cents, audio_rate, tempo),
            vibrato: Lfo::new(audio_rate, tempo),
        }
    }

    /// Render the per frame pitch trajectory as frequencies in Hz.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            let cents = self.slider.advance() + self.vibrato.advance();
            *sample = pitch_to_frequency(cents) as f32;
        }
    }
}

/// Force controller: dB with slide and tremolo.
#[derive(Debug, Clone)]
pub struct ForceControl {
    pub slider: Slider,
    pub tremolo: Lfo,
}

impl ForceControl {
    fn new(db: f64, audio_rate: u32, tempo: f64) -> Self {
        Self {
            slider: Slider::new(db, audio_rate, tempo),
            tremolo: Lfo::new(audio_rate, tempo),
        }
    }

    /// Render the per frame force trajectory as linear gain factors.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            let db = self.slider.advance() + self.tremolo.advance();
            *sample = db_to_linear(db as f32);
        }
    }
}

/// Panning controller: position in \[-1, 1\] with slide.
#[derive(Debug, Clone)]
pub struct PanningControl {
    pub slider: Slider,
}

impl PanningControl {
    fn new(panning: f64, audio_rate: u32, tempo: f64) -> Self {
        Self {
            slider: Slider::new(panning, audio_rate, tempo),
        }
    }

    /// Render the per frame panning trajectory.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.slider.advance().clamp(-1.0, 1.0) as f32;
        }
    }
}

/// Filter controller: cutoff in cents with slide and autowah.
#[derive(Debug, Clone)]
pub struct FilterControl {
    pub slider: Slider,
    pub autowah: Lfo,
}

impl FilterControl {
    fn new(cents: f64, audio_rate: u32, tempo: f64) -> Self {
        Self {
            slider: Slider::new(cents, audio_rate, tempo),
            autowah: Lfo::new(audio_rate, tempo),
        }
    }

    /// Render the per frame cutoff trajectory as frequencies in Hz.
    pub fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            let cents = self.slider.advance() + self.autowah.advance();
            *sample = pitch_to_frequency(cents) as f32;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// The full controller bundle of a channel, copied into every voice it spawns.
#[derive(Debug, Clone)]
pub struct Controls {
    pub pitch: PitchControl,
    pub force: ForceControl,
    pub panning: PanningControl,
    pub filter: FilterControl,
}

impl Controls {
    pub fn new(
        pitch: f64,
        force: f64,
        panning: f64,
        cutoff: f64,
        audio_rate: u32,
        tempo: f64,
    ) -> Self {
        Self {
            pitch: PitchControl::new(pitch, audio_rate, tempo),
            force: ForceControl::new(force, audio_rate, tempo),
            panning: PanningControl::new(panning, audio_rate, tempo),
            filter: FilterControl::new(cutoff, audio_rate, tempo),
        }
    }

    /// Propagate a tempo change into all sliders and LFOs.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.pitch.slider.set_tempo(tempo);
        self.pitch.vibrato.set_tempo(tempo);
        self.force.slider.set_tempo(tempo);
        self.force.tremolo.set_tempo(tempo);
        self.panning.slider.set_tempo(tempo);
        self.filter.slider.set_tempo(tempo);
        self.filter.autowah.set_tempo(tempo);
    }
}

// -------------------------------------------------------------------------------------------------
