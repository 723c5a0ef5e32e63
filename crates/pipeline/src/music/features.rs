//! Signal analysis on mono PCM: tempo, beat grid, energy sections and a
//! 128-d audio embedding.
//!
//! Everything runs on a copy decimated to roughly 11 kHz.
//!
//! - Onset envelope: positive frame-to-frame RMS flux (512-sample frames,
//!   128-sample hop).
//! - Tempo: autocorrelation of the envelope over 60..=200 BPM, weighted
//!   towards 120 BPM to resolve octave ambiguity, refined by parabolic
//!   interpolation. A silent or featureless track falls back to 120 BPM.
//! - Beats: the phase whose comb of onsets carries the most energy.
//! - Sections: 5 s blocks classified by RMS relative to the track mean,
//!   adjacent blocks of the same level merged, short sections folded into
//!   their predecessor.
//! - Embedding: 32 log-spaced Goertzel bands x 4 statistics (mean and
//!   deviation of log band energy, mean positive flux, peak), normalised.

use std::f64::consts::PI;

use choreo_core::categories::EnergyLevel;
use choreo_core::embedding::{l2_normalize, AUDIO_DIM};
use choreo_core::music::{MusicFeatures, MusicSection};

use super::decode::MonoPcm;
use super::MusicError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;
pub const MIN_TEMPO_BPM: f64 = 60.0;
pub const MAX_TEMPO_BPM: f64 = 200.0;

const ANALYSIS_RATE: u32 = 11_025;
const ONSET_FRAME: usize = 512;
const ONSET_HOP: usize = 128;
const EMBED_FRAME: usize = 1024;

const SECTION_BLOCK_SECS: f64 = 5.0;
const MIN_SECTION_SECS: f64 = 5.0;
const LOW_ENERGY_RATIO: f64 = 0.75;
const HIGH_ENERGY_RATIO: f64 = 1.25;

const EMBED_BANDS: usize = 32;
const EMBED_STATS: usize = AUDIO_DIM / EMBED_BANDS;
const BAND_MIN_HZ: f64 = 60.0;
const BAND_MAX_HZ: f64 = 5_000.0;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Full feature extraction for one decoded track.
pub fn extract(pcm: &MonoPcm) -> Result<MusicFeatures, MusicError> {
    if pcm.samples.is_empty() || pcm.sample_rate == 0 {
        return Err(MusicError::Empty);
    }
    let duration_seconds = pcm.duration_seconds();
    let (signal, rate) = decimate(&pcm.samples, pcm.sample_rate);

    let envelope = onset_envelope(&signal);
    let hop_secs = ONSET_HOP as f64 / rate as f64;
    let tempo_bpm = estimate_tempo(&envelope, hop_secs);
    let beat_positions = beat_grid(&envelope, hop_secs, tempo_bpm, duration_seconds);

    let bands = BandBank::new(rate);
    let sections = detect_sections(&signal, rate, duration_seconds)
        .into_iter()
        .map(|(start, end, energy)| {
            let from = ((start * rate as f64) as usize).min(signal.len());
            let to = ((end * rate as f64) as usize).min(signal.len());
            MusicSection {
                start,
                end,
                energy,
                recommended_styles: energy.recommended_styles(),
                audio_vector: bands.embed(&signal[from..to]),
            }
        })
        .collect();

    Ok(MusicFeatures {
        tempo_bpm,
        beat_positions,
        duration_seconds,
        sections,
        audio_vector: bands.embed(&signal),
    })
}

/// Box-filter decimation by the largest integer factor keeping the rate
/// at or above [`ANALYSIS_RATE`].
fn decimate(samples: &[f32], rate: u32) -> (Vec<f32>, u32) {
    let factor = (rate / ANALYSIS_RATE).max(1) as usize;
    if factor == 1 {
        return (samples.to_vec(), rate);
    }
    let out = samples
        .chunks(factor)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect();
    (out, rate / factor as u32)
}

fn rms(frame: &[f32]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>() / frame.len() as f64).sqrt()
}

// ---------------------------------------------------------------------------
// Tempo and beats
// ---------------------------------------------------------------------------

fn onset_envelope(signal: &[f32]) -> Vec<f64> {
    if signal.len() < ONSET_FRAME {
        return Vec::new();
    }
    let energies: Vec<f64> = (0..=(signal.len() - ONSET_FRAME) / ONSET_HOP)
        .map(|i| rms(&signal[i * ONSET_HOP..i * ONSET_HOP + ONSET_FRAME]))
        .collect();

    let mut env = Vec::with_capacity(energies.len());
    env.push(0.0);
    for w in energies.windows(2) {
        env.push((w[1] - w[0]).max(0.0));
    }
    env
}

/// Tempo in BPM from the onset envelope sampled every `hop_secs`.
pub(crate) fn estimate_tempo(envelope: &[f64], hop_secs: f64) -> f64 {
    let min_lag = (60.0 / MAX_TEMPO_BPM / hop_secs).floor().max(1.0) as usize;
    let max_lag = (60.0 / MIN_TEMPO_BPM / hop_secs).ceil() as usize;
    if envelope.len() <= max_lag + 1 {
        return DEFAULT_TEMPO_BPM;
    }

    let mean = envelope.iter().sum::<f64>() / envelope.len() as f64;
    let centred: Vec<f64> = envelope.iter().map(|x| x - mean).collect();
    let energy: f64 = centred.iter().map(|x| x * x).sum();
    if energy <= f64::EPSILON {
        return DEFAULT_TEMPO_BPM;
    }

    let autocorr = |lag: usize| -> f64 {
        centred[lag..]
            .iter()
            .zip(&centred)
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / energy
    };
    let prior = |lag: f64| -> f64 {
        let bpm = 60.0 / (lag * hop_secs);
        let octaves = (bpm / DEFAULT_TEMPO_BPM).log2();
        (-0.5 * octaves * octaves).exp()
    };

    let scores: Vec<f64> = (min_lag - 1..=max_lag + 1).map(autocorr).collect();
    let mut best_lag = 0usize;
    let mut best_score = 0.0;
    for lag in min_lag..=max_lag {
        let score = scores[lag - (min_lag - 1)] * prior(lag as f64);
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }
    if best_lag == 0 {
        return DEFAULT_TEMPO_BPM;
    }

    let i = best_lag - (min_lag - 1);
    let (a, b, c) = (scores[i - 1], scores[i], scores[i + 1]);
    let denom = a - 2.0 * b + c;
    let offset = if denom.abs() > f64::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let bpm = 60.0 / ((best_lag as f64 + offset) * hop_secs);
    bpm.clamp(MIN_TEMPO_BPM, MAX_TEMPO_BPM)
}

/// Beat onsets in seconds for `tempo_bpm`, aligned to the strongest phase.
pub(crate) fn beat_grid(envelope: &[f64], hop_secs: f64, tempo_bpm: f64, duration: f64) -> Vec<f64> {
    let period_secs = 60.0 / tempo_bpm;
    let period_frames = period_secs / hop_secs;
    let phases = period_frames.ceil().max(1.0) as usize;

    let mut best_phase = 0usize;
    let mut best_sum = f64::NEG_INFINITY;
    for phase in 0..phases {
        let mut sum = 0.0;
        let mut pos = phase as f64;
        while (pos.round() as usize) < envelope.len() {
            sum += envelope[pos.round() as usize];
            pos += period_frames;
        }
        if sum > best_sum {
            best_sum = sum;
            best_phase = phase;
        }
    }

    let mut beats = Vec::new();
    let mut t = best_phase as f64 * hop_secs;
    while t < duration {
        beats.push(t);
        t += period_secs;
    }
    beats
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Contiguous `(start, end, energy)` sections covering `[0, duration]`.
pub(crate) fn detect_sections(signal: &[f32], rate: u32, duration: f64) -> Vec<(f64, f64, EnergyLevel)> {
    let block_len = (SECTION_BLOCK_SECS * rate as f64) as usize;
    let blocks: Vec<f64> = if block_len == 0 {
        vec![rms(signal)]
    } else {
        signal.chunks(block_len).map(rms).collect()
    };
    let mean = blocks.iter().sum::<f64>() / blocks.len().max(1) as f64;

    let mut sections: Vec<(f64, f64, EnergyLevel)> = Vec::new();
    for (i, &block) in blocks.iter().enumerate() {
        let start = i as f64 * SECTION_BLOCK_SECS;
        let end = ((i + 1) as f64 * SECTION_BLOCK_SECS).min(duration);
        if end <= start {
            continue;
        }
        let level = classify_energy(block, mean);
        match sections.last_mut() {
            Some(last) if last.2 == level => last.1 = end,
            _ => sections.push((start, end, level)),
        }
    }

    // Fold sections that are too short into their predecessor.
    let mut merged: Vec<(f64, f64, EnergyLevel)> = Vec::with_capacity(sections.len());
    for section in sections {
        match merged.last_mut() {
            Some(last) if section.1 - section.0 < MIN_SECTION_SECS => last.1 = section.1,
            Some(last) if last.2 == section.2 => last.1 = section.1,
            _ => merged.push(section),
        }
    }

    match merged.last_mut() {
        Some(last) => last.1 = duration,
        None => merged.push((0.0, duration, EnergyLevel::Medium)),
    }
    merged
}

fn classify_energy(block_rms: f64, mean_rms: f64) -> EnergyLevel {
    if mean_rms <= f64::EPSILON {
        return EnergyLevel::Low;
    }
    let ratio = block_rms / mean_rms;
    if ratio < LOW_ENERGY_RATIO {
        EnergyLevel::Low
    } else if ratio > HIGH_ENERGY_RATIO {
        EnergyLevel::High
    } else {
        EnergyLevel::Medium
    }
}

// ---------------------------------------------------------------------------
// Embedding
// ---------------------------------------------------------------------------

/// Goertzel filter bank with log-spaced centre frequencies.
struct BandBank {
    coefficients: Vec<f64>,
}

impl BandBank {
    fn new(rate: u32) -> Self {
        let max_hz = BAND_MAX_HZ.min(rate as f64 * 0.45);
        let ratio = (max_hz / BAND_MIN_HZ).ln();
        let coefficients = (0..EMBED_BANDS)
            .map(|b| {
                let hz = BAND_MIN_HZ * (ratio * b as f64 / (EMBED_BANDS - 1) as f64).exp();
                2.0 * (2.0 * PI * hz / rate as f64).cos()
            })
            .collect();
        Self { coefficients }
    }

    fn band_powers(&self, frame: &[f32]) -> Vec<f64> {
        self.coefficients
            .iter()
            .map(|&coeff| {
                let (mut s1, mut s2) = (0.0f64, 0.0f64);
                for &x in frame {
                    let s0 = x as f64 + coeff * s1 - s2;
                    s2 = s1;
                    s1 = s0;
                }
                (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0) / frame.len() as f64
            })
            .collect()
    }

    /// Unit-length 128-d embedding of `signal` (zero for silence).
    fn embed(&self, signal: &[f32]) -> Vec<f32> {
        let frames: Vec<Vec<f64>> = signal
            .chunks_exact(EMBED_FRAME)
            .map(|f| {
                self.band_powers(f)
                    .into_iter()
                    .map(|p| (p + 1e-10).ln())
                    .collect()
            })
            .collect();
        if frames.is_empty() {
            return vec![0.0; AUDIO_DIM];
        }

        let n = frames.len() as f64;
        let mut out = Vec::with_capacity(AUDIO_DIM);
        for b in 0..EMBED_BANDS {
            let values: Vec<f64> = frames.iter().map(|f| f[b]).collect();
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let flux = values.windows(2).map(|w| (w[1] - w[0]).max(0.0)).sum::<f64>() / n;
            let peak = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            // Shift log energies so silence (ln 1e-10) maps near zero.
            let floor = (1e-10f64).ln();
            for stat in [mean - floor, var.sqrt(), flux, peak - floor] {
                out.push(stat as f32);
            }
        }
        debug_assert_eq!(out.len(), EMBED_BANDS * EMBED_STATS);
        if out.iter().all(|x| x.abs() < 1e-3) {
            return vec![0.0; AUDIO_DIM];
        }
        l2_normalize(&out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, seconds: f64, rate: u32) -> Vec<f32> {
        let n = (seconds * rate as f64) as usize;
        let period = (60.0 / bpm * rate as f64) as usize;
        let click = rate as usize / 100;
        (0..n)
            .map(|i| {
                if i % period < click {
                    (((i % period) as f64 * 0.3).sin() * 0.9) as f32
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn tempo_of_click_track() {
        let rate = 22_050;
        let pcm = MonoPcm {
            samples: click_track(120.0, 20.0, rate),
            sample_rate: rate,
        };
        let f = extract(&pcm).unwrap();
        assert!((f.tempo_bpm - 120.0).abs() < 4.0, "tempo {}", f.tempo_bpm);
        assert!(!f.beat_positions.is_empty());
        assert!(f.beat_positions.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn silence_falls_back_to_default_tempo() {
        let pcm = MonoPcm {
            samples: vec![0.0; 22_050 * 12],
            sample_rate: 22_050,
        };
        let f = extract(&pcm).unwrap();
        assert_eq!(f.tempo_bpm, DEFAULT_TEMPO_BPM);
        assert!(f.validate().is_ok());
        assert!(f.audio_vector.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn sections_partition_and_follow_loudness() {
        let rate = 11_025u32;
        let mut samples = Vec::new();
        for i in 0..(10 * rate) {
            samples.push(((i as f64) * 0.05).sin() as f32 * 0.05);
        }
        for i in 0..(10 * rate) {
            samples.push(((i as f64) * 0.05).sin() as f32 * 0.8);
        }
        let pcm = MonoPcm { samples, sample_rate: rate };
        let f = extract(&pcm).unwrap();

        assert!(f.validate().is_ok());
        assert_eq!(f.sections.len(), 2);
        assert_eq!(f.sections[0].energy, EnergyLevel::Low);
        assert_eq!(f.sections[1].energy, EnergyLevel::High);
        assert!((f.sections[1].start - 10.0).abs() < 1e-9);
    }

    #[test]
    fn short_track_is_one_section() {
        let rate = 11_025u32;
        let samples = (0..(3 * rate)).map(|i| ((i as f64) * 0.1).sin() as f32 * 0.3).collect();
        let f = extract(&MonoPcm { samples, sample_rate: rate }).unwrap();
        assert_eq!(f.sections.len(), 1);
        assert!((f.sections[0].end - 3.0).abs() < 1e-9);
    }

    #[test]
    fn embedding_is_unit_length_and_sized() {
        let rate = 11_025u32;
        let samples = (0..(4 * rate)).map(|i| ((i as f64) * 0.2).sin() as f32 * 0.5).collect();
        let f = extract(&MonoPcm { samples, sample_rate: rate }).unwrap();
        assert_eq!(f.audio_vector.len(), AUDIO_DIM);
        assert!(choreo_core::embedding::is_unit_length(&f.audio_vector));
    }

    #[test]
    fn empty_input_is_rejected() {
        let pcm = MonoPcm { samples: vec![], sample_rate: 44_100 };
        assert!(matches!(extract(&pcm), Err(MusicError::Empty)));
    }
}
