//! Microphone capture for the dictation loop
//!
//! Each capture cycle listens to the room for a fixed calibration window to
//! derive a silence threshold, then records one utterance: buffering starts at
//! speech onset and stops once the input stays below the threshold for the
//! silence hold, bounded by a maximum utterance duration.

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Target sample rate for recognition (mono, 16-bit)
pub const SAMPLE_RATE: u32 = 16_000;

/// Lower bound for the silence threshold so a dead-quiet room still gates
const MIN_SILENCE_THRESHOLD: f32 = 0.01;

/// Headroom applied to the measured ambient level
const AMBIENT_HEADROOM: f32 = 1.75;

/// One silence-bounded span of captured speech
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Raw little-endian PCM bytes, the `audio/l16` wire body
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    pub fn write_wav<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Source of utterances, so the loop can run against a fake in tests
pub trait UtteranceSource {
    fn next_utterance(&mut self) -> Result<Utterance>;
}

/// Accumulates RMS over a whole listening window
#[derive(Default)]
pub struct EnergyMeter {
    sum_sq: f64,
    count: u64,
}

impl EnergyMeter {
    pub fn push(&mut self, sample: f32) {
        self.sum_sq += (sample as f64) * (sample as f64);
        self.count += 1;
    }

    pub fn rms(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_sq / self.count as f64).sqrt() as f32
    }
}

/// Derive the capture gate from a measured ambient level
pub fn silence_threshold(ambient_rms: f32) -> f32 {
    (ambient_rms * AMBIENT_HEADROOM).max(MIN_SILENCE_THRESHOLD)
}

#[derive(Clone)]
pub struct SilenceDetector {
    threshold: f32,
    hold: Duration,
    last_sound_time: Arc<Mutex<Instant>>,
}

impl SilenceDetector {
    pub fn new(threshold: f32, hold: Duration) -> Self {
        Self {
            threshold,
            hold,
            last_sound_time: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn is_silent(&self, sample: f32) -> bool {
        sample.abs() < self.threshold
    }

    pub fn should_stop(&self) -> bool {
        let last_sound = match self.last_sound_time.lock() {
            Ok(guard) => *guard,
            Err(_) => {
                // Mutex poisoned, use current time as fallback
                Instant::now()
            }
        };
        last_sound.elapsed() > self.hold
    }

    pub fn update_sound_time(&self) {
        if let Ok(mut last_sound) = self.last_sound_time.lock() {
            *last_sound = Instant::now();
        }
    }
}

#[derive(Debug)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<SampleFormat>,
}

#[derive(Clone)]
pub struct CaptureSettings {
    pub calibration: Duration,
    pub silence_hold: Duration,
    pub max_utterance: Duration,
}

pub struct Microphone {
    device: Device,
    config: StreamConfig,
    sample_rate: u32,
    settings: CaptureSettings,
}

impl Microphone {
    pub fn new(settings: CaptureSettings) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device found"))?;

        let config = Self::get_optimal_config(&device, SAMPLE_RATE)?;

        Ok(Self {
            device,
            config,
            sample_rate: SAMPLE_RATE,
            settings,
        })
    }

    fn get_optimal_config(device: &Device, target_sample_rate: u32) -> Result<StreamConfig> {
        let supported_configs = device.supported_input_configs()?;

        // Find config closest to target sample rate
        let mut best_config = None;
        let mut best_diff = u32::MAX;

        for config in supported_configs {
            let diff = (config.max_sample_rate().0 as u32).abs_diff(target_sample_rate);
            if diff < best_diff {
                best_diff = diff;
                best_config = Some(config);
            }
        }

        let config = best_config.ok_or_else(|| anyhow!("No suitable audio configuration found"))?;

        let config = config.with_sample_rate(cpal::SampleRate(target_sample_rate));
        Ok(config.into())
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        let default_device = host.default_input_device();

        let mut device_infos = Vec::new();

        for device in devices {
            let name = device.name().unwrap_or("Unknown Device".to_string());
            let is_default = default_device
                .as_ref()
                .map(|d| d.name().unwrap_or_default() == name)
                .unwrap_or(false);

            let supported_sample_rates = device
                .supported_input_configs()?
                .map(|c| c.max_sample_rate().0 as u32)
                .collect();

            let supported_formats = device
                .supported_input_configs()?
                .map(|c| c.sample_format())
                .collect();

            device_infos.push(AudioDeviceInfo {
                name,
                is_default,
                supported_sample_rates,
                supported_formats,
            });
        }

        Ok(device_infos)
    }

    /// Listen to the room for the calibration window and return its RMS level
    fn measure_ambient(&self) -> Result<f32> {
        let meter = Arc::new(Mutex::new(EnergyMeter::default()));
        let meter_clone = meter.clone();
        let failed = Arc::new(AtomicBool::new(false));
        let failed_clone = failed.clone();

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut meter) = meter_clone.lock() {
                    for &sample in data {
                        meter.push(sample);
                    }
                }
            },
            move |err| {
                eprintln!("Audio stream error during calibration: {}", err);
                failed_clone.store(true, Ordering::Release);
            },
            None,
        )?;

        stream.play()?;
        std::thread::sleep(self.settings.calibration);
        drop(stream);

        if failed.load(Ordering::Acquire) {
            return Err(anyhow!("Audio device failed during calibration"));
        }

        let rms = meter
            .lock()
            .map_err(|_| anyhow!("Calibration meter lock poisoned"))?
            .rms();
        Ok(rms)
    }

    /// Record one utterance: wait for speech onset, then buffer until the
    /// silence hold elapses or the maximum duration is reached
    fn capture(&self, threshold: f32) -> Result<Utterance> {
        let buffer = Arc::new(Mutex::new(Vec::<i16>::new()));
        let buffer_clone = buffer.clone();

        let detector = SilenceDetector::new(threshold, self.settings.silence_hold);
        let detector_clone = detector.clone();

        let speech_started = Arc::new(AtomicBool::new(false));
        let started_clone = speech_started.clone();

        let device_failed = Arc::new(AtomicBool::new(false));
        let failed_clone = device_failed.clone();

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let has_sound = data.iter().any(|&sample| !detector_clone.is_silent(sample));

                if has_sound {
                    detector_clone.update_sound_time();
                    started_clone.store(true, Ordering::Release);
                }

                // Leading silence is not part of the utterance
                if !started_clone.load(Ordering::Acquire) {
                    return;
                }

                if let Ok(mut buffer) = buffer_clone.lock() {
                    for &sample in data {
                        buffer.push((sample * i16::MAX as f32) as i16);
                    }
                }
            },
            move |err| {
                eprintln!("Audio device disconnected or stream error: {}", err);
                failed_clone.store(true, Ordering::Release);
            },
            None,
        )?;

        stream.play()?;

        let start_time = Instant::now();
        loop {
            if device_failed.load(Ordering::Acquire) {
                return Err(anyhow!("Audio device failed while recording"));
            }

            if speech_started.load(Ordering::Acquire) {
                if detector.should_stop() {
                    break;
                }
                if start_time.elapsed() >= self.settings.max_utterance {
                    break;
                }
            }

            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);

        let samples = Arc::try_unwrap(buffer)
            .map_err(|_| anyhow!("Audio buffer still shared after stream shutdown"))?
            .into_inner()
            .map_err(|_| anyhow!("Audio buffer lock poisoned"))?;

        Ok(Utterance {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

impl UtteranceSource for Microphone {
    fn next_utterance(&mut self) -> Result<Utterance> {
        let ambient = self.measure_ambient()?;
        let threshold = silence_threshold(ambient);

        println!("Say something!");
        self.capture(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_meter_silence() {
        let mut meter = EnergyMeter::default();
        for _ in 0..1000 {
            meter.push(0.0);
        }
        assert_eq!(meter.rms(), 0.0);
    }

    #[test]
    fn test_energy_meter_constant_signal() {
        let mut meter = EnergyMeter::default();
        for _ in 0..1000 {
            meter.push(0.5);
        }
        assert!((meter.rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_energy_meter_empty() {
        let meter = EnergyMeter::default();
        assert_eq!(meter.rms(), 0.0);
    }

    #[test]
    fn test_silence_threshold_floor() {
        // A dead-quiet room must not produce a near-zero gate
        assert_eq!(silence_threshold(0.0), MIN_SILENCE_THRESHOLD);
        assert_eq!(silence_threshold(0.001), MIN_SILENCE_THRESHOLD);
    }

    #[test]
    fn test_silence_threshold_scales_with_ambient() {
        let threshold = silence_threshold(0.1);
        assert!((threshold - 0.175).abs() < 1e-6);
    }

    #[test]
    fn test_silence_detector_gates_on_magnitude() {
        let detector = SilenceDetector::new(0.05, Duration::from_secs(2));
        assert!(detector.is_silent(0.01));
        assert!(detector.is_silent(-0.01));
        assert!(!detector.is_silent(0.1));
        assert!(!detector.is_silent(-0.1));
    }

    #[test]
    fn test_silence_detector_should_stop_after_hold() {
        let detector = SilenceDetector::new(0.05, Duration::from_millis(10));
        detector.update_sound_time();
        assert!(!detector.should_stop());
        std::thread::sleep(Duration::from_millis(20));
        assert!(detector.should_stop());
    }

    #[test]
    fn test_pcm_bytes_little_endian() {
        let utterance = Utterance {
            samples: vec![0x0102, -2],
            sample_rate: SAMPLE_RATE,
        };
        assert_eq!(utterance.to_pcm_bytes(), vec![0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_utterance_duration() {
        let utterance = Utterance {
            samples: vec![0; 16_000],
            sample_rate: SAMPLE_RATE,
        };
        assert_eq!(utterance.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_utterance_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utterance.wav");

        let utterance = Utterance {
            samples: vec![0, 100, -100, i16::MAX],
            sample_rate: SAMPLE_RATE,
        };
        utterance.write_wav(&path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, utterance.samples);
    }
}
