//! Offline rendering helpers. Delivering audio to an actual device is the embedder's job;
//! this module only covers rendering a player into a file.

use std::path::Path;

use crate::{error::Error, player::Player};

// -------------------------------------------------------------------------------------------------

/// Render a player offline into a 32 bit float WAV file.
///
/// Rendering stops when the player reports the composition as finished or after `max_frames`
/// frames, whichever comes first (sustained notes without a note off would otherwise render
/// forever). Returns the number of frames written.
pub fn render_to_wav<P: AsRef<Path>>(
    player: &mut Player,
    path: P,
    max_frames: u64,
) -> Result<u64, Error> {
    let spec = hound::WavSpec {
        channels: player.channel_count() as u16,
        sample_rate: player.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;

    let channel_count = player.channel_count();
    let mut buffer = vec![0.0f32; player.block_frames() * channel_count];
    let mut total_frames = 0u64;
    while total_frames < max_frames {
        let chunk_frames = (max_frames - total_frames).min(player.block_frames() as u64) as usize;
        let chunk = &mut buffer[..chunk_frames * channel_count];
        let frames = player.render(chunk);
        if frames == 0 {
            break;
        }
        for sample in &chunk[..frames * channel_count] {
            writer.write_sample(*sample).map_err(wav_error)?;
        }
        total_frames += frames as u64;
    }

    writer.finalize().map_err(wav_error)?;
    Ok(total_frames)
}

fn wav_error(err: hound::Error) -> Error {
    match err {
        hound::Error::IoError(err) => Error::IoError(err),
        other => Error::ParameterError(other.to_string()),
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        composition::{ChannelDefaults, Composition, Pattern, Timestamp},
        device::{AudioUnit, MASTER_DEVICE_ID},
        event::TriggerEvent,
        player::PlayerOptions,
        processor::{OscillatorProc, Waveform},
    };

    #[test]
    fn renders_a_wav_file() {
        let mut composition = Composition::new();
        let mut unit = AudioUnit::new("osc");
        let proc = unit
            .add_processor(Box::new(OscillatorProc::new(Waveform::Sine)))
            .unwrap();
        unit.connect((proc, 0), (MASTER_DEVICE_ID, 0));
        let instrument = composition.add_instrument(unit).unwrap();
        composition.connect((instrument, 0), (MASTER_DEVICE_ID, 0));
        composition.set_channel_defaults(ChannelDefaults {
            instrument: Some(instrument),
            ..ChannelDefaults::default()
        });
        let mut pattern = Pattern::new(Timestamp::from_beats(1));
        pattern
            .add_row(Timestamp::ZERO, 0, TriggerEvent::NoteOn { pitch: 6900.0 })
            .unwrap();
        let index = composition.add_pattern(pattern);
        composition.set_order(vec![index]).unwrap();

        let mut player = Player::new(
            composition,
            PlayerOptions {
                sample_rate: 44100,
                thread_count: 1,
                ..PlayerOptions::default()
            },
        )
        .unwrap();

        let path = std::env::temp_dir().join("sonant_render_test.wav");
        let written = render_to_wav(&mut player, &path, 4096).unwrap();
        assert_eq!(written, 4096);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 44100);
        assert_eq!(reader.duration(), 4096);
        std::fs::remove_file(&path).ok();
    }
}
