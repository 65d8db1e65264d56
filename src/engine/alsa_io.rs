//! Thin ALSA PCM wrappers.
//!
//! Devices are opened with requested parameters and the actually negotiated
//! rate, channel count and period size are read back; callers resample or
//! remix when the hardware would not take the wire rates directly.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use tracing::info;

/// An open PCM device plus what the hardware actually agreed to.
pub struct PcmHandle {
    pub pcm: PCM,
    pub rate: u32,
    pub channels: u32,
    pub period_frames: usize,
}

pub fn open_capture(device: &str, rate: u32, channels: u32) -> Result<PcmHandle> {
    open(device, Direction::Capture, rate, channels, None)
}

pub fn open_playback(
    device: &str,
    rate: u32,
    channels: u32,
    period_frames: Option<usize>,
) -> Result<PcmHandle> {
    open(device, Direction::Playback, rate, channels, period_frames)
}

fn open(
    device: &str,
    direction: Direction,
    rate: u32,
    channels: u32,
    period_frames: Option<usize>,
) -> Result<PcmHandle> {
    let dir_name = match direction {
        Direction::Capture => "capture",
        Direction::Playback => "playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("opening '{device}' for {dir_name}"))?;

    {
        let hwp = HwParams::any(&pcm).context("initializing hw params")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels_near(channels)?;
        hwp.set_rate_near(rate, ValueOr::Nearest)?;
        if let Some(frames) = period_frames {
            hwp.set_period_size_near(frames as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let (rate, channels, period_frames) = {
        let hwp = pcm.hw_params_current()?;
        (
            hwp.get_rate()?,
            hwp.get_channels()?,
            hwp.get_period_size()? as usize,
        )
    };

    info!("alsa {dir_name}: device={device} rate={rate} channels={channels} period={period_frames}");

    Ok(PcmHandle {
        pcm,
        rate,
        channels,
        period_frames,
    })
}

/// Linear resampler, good enough for the small rate gaps between negotiated
/// hardware rates and the fixed wire rates.
pub fn resample_linear(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = ((input.len() as f64) / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Average interleaved frames down to mono.
pub fn downmix_to_mono(interleaved: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.iter().map(|&s| s as f32 / 32768.0).collect();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| s as f32 / 32768.0).sum();
            sum / channels as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_halves_and_doubles_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let down = resample_linear(&input, 32_000, 16_000);
        assert_eq!(down.len(), 50);
        let up = resample_linear(&input, 16_000, 32_000);
        assert_eq!(up.len(), 200);
        // Interpolated values stay within the input range.
        assert!(up.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = [16384i16, -16384, 8192, 8192];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!(mono[0].abs() < 1e-6);
        assert!((mono[1] - 0.25).abs() < 1e-6);
    }
}
