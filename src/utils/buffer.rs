//! Flat sample buffer operations and the per block work buffer pool.

use crate::error::Error;

// -------------------------------------------------------------------------------------------------

/// Add `source` into `dest` element wise.
pub fn add_buffers(dest: &mut [f32], source: &[f32]) {
    debug_assert_eq!(dest.len(), source.len(), "buffer length mismatch");
    let arch = pulp::Arch::new();
    arch.dispatch(|| {
        for (d, s) in dest.iter_mut().zip(source.iter()) {
            *d += *s;
        }
    });
}

/// Multiply all samples in `buffer` by a constant factor.
pub fn scale_buffer(buffer: &mut [f32], factor: f32) {
    let arch = pulp::Arch::new();
    arch.dispatch(|| {
        for s in buffer.iter_mut() {
            *s *= factor;
        }
    });
}

/// Set all samples in `buffer` to zero.
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

/// Check that every sample in `buffer` is a finite value.
pub fn buffer_is_finite(buffer: &[f32]) -> bool {
    let arch = pulp::Arch::new();
    arch.dispatch(|| buffer.iter().all(|s| s.is_finite()))
}

// -------------------------------------------------------------------------------------------------

/// Index of a single buffer within a [`WorkBuffers`] pool.
///
/// Buffer indices are assigned once at signal plan build time and stay fixed for the lifetime
/// of the plan, so the renderer never decides buffer ownership per block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkBufferId(pub(crate) usize);

// -------------------------------------------------------------------------------------------------

/// A pool of reusable flat float arrays shared across all rendering for one audio block.
///
/// Buffers are borrowed for the duration of one render call and never persist values across
/// block boundaries: anything that must survive a block (delay lines, filter memory) lives in
/// a device state instead. Audio buffers hold interleaved samples, control buffers hold one
/// value per frame; all buffers are allocated to the largest of both layouts.
pub struct WorkBuffers {
    buffers: Vec<Vec<f32>>,
    samples_per_buffer: usize,
}

impl WorkBuffers {
    /// Create a pool of `count` buffers, each large enough for `block_frames` frames of
    /// `channel_count` interleaved channels. Fails with [`Error::OutOfMemory`] when the
    /// backing allocation is refused.
    pub fn new(count: usize, block_frames: usize, channel_count: usize) -> Result<Self, Error> {
        let samples_per_buffer = block_frames * channel_count;
        let mut buffers = Vec::new();
        buffers.try_reserve_exact(count)?;
        for _ in 0..count {
            let mut buffer = Vec::new();
            buffer.try_reserve_exact(samples_per_buffer)?;
            buffer.resize(samples_per_buffer, 0.0);
            buffers.push(buffer);
        }
        Ok(Self {
            buffers,
            samples_per_buffer,
        })
    }

    /// Number of buffers in the pool.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Sample capacity of each buffer.
    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer
    }

    /// Access the first `len` samples of a buffer.
    #[inline]
    pub fn slice(&self, id: WorkBufferId, len: usize) -> &[f32] {
        &self.buffers[id.0][..len]
    }

    /// Mutable access to the first `len` samples of a buffer.
    #[inline]
    pub fn slice_mut(&mut self, id: WorkBufferId, len: usize) -> &mut [f32] {
        &mut self.buffers[id.0][..len]
    }

    /// Zero the first `len` samples of a buffer.
    #[inline]
    pub fn clear(&mut self, id: WorkBufferId, len: usize) {
        clear_buffer(&mut self.buffers[id.0][..len]);
    }

    /// Add the first `len` samples of `source` into `dest`.
    pub fn sum_into(&mut self, dest: WorkBufferId, source: WorkBufferId, len: usize) {
        let [dest, source] = self
            .buffers
            .get_disjoint_mut([dest.0, source.0])
            .expect("plan assigns every port a distinct work buffer");
        add_buffers(&mut dest[..len], &source[..len]);
    }

    /// Borrow one buffer read only and another mutably, e.g. a device's summed input
    /// alongside its output.
    pub fn in_out(
        &mut self,
        input: WorkBufferId,
        output: WorkBufferId,
        len: usize,
    ) -> (&[f32], &mut [f32]) {
        let [input, output] = self
            .buffers
            .get_disjoint_mut([input.0, output.0])
            .expect("plan assigns every port a distinct work buffer");
        (&input[..len], &mut output[..len])
    }

    /// Borrow a voice processor's output buffer together with the per frame pitch, force and
    /// cutoff control buffers.
    pub fn voice_io(
        &mut self,
        output: WorkBufferId,
        pitch: WorkBufferId,
        force: WorkBufferId,
        cutoff: WorkBufferId,
        audio_len: usize,
        control_len: usize,
    ) -> (&mut [f32], &[f32], &[f32], &[f32]) {
        let [output, pitch, force, cutoff] = self
            .buffers
            .get_disjoint_mut([output.0, pitch.0, force.0, cutoff.0])
            .expect("plan assigns every port a distinct work buffer");
        (
            &mut output[..audio_len],
            &pitch[..control_len],
            &force[..control_len],
            &cutoff[..control_len],
        )
    }
}

// -------------------------------------------------------------------------------------------------
