//! Silent narration tracks for illustration segments.

use std::io::Cursor;
use std::path::Path;

/// Sample rate of generated silence
pub const SILENCE_SAMPLE_RATE: u32 = 16_000;

/// Encode `duration` seconds of mono 16-bit silence as a WAV file
pub fn silent_wav_bytes(duration: f64, sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let samples = (duration.max(0.0) * sample_rate as f64).round() as u64;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for _ in 0..samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Duration in seconds of an encoded WAV file
pub fn wav_duration(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Duration in seconds of a WAV file on disk
pub fn wav_file_duration(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}
