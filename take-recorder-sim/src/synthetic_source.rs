//! Synthetic multichannel input devices.
//!
//! Every channel plays its own sine tone (channel n at `base_frequency * n`)
//! so the tracks of a take are easy to tell apart when listening back.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use take_recorder_core::models::audio_models::{DeviceCapability, DeviceIdentity, InputFormat, SampleEncoding};
use take_recorder_core::models::channel::{Channel, ChannelMask};
use take_recorder_core::models::error::CaptureError;
use take_recorder_core::traits::audio_source::AudioSource;

use crate::paced_input::{FrameSource, PacedInput};

pub const DEFAULT_BASE_FREQUENCY: f32 = 110.0;
pub const DEFAULT_AMPLITUDE: f32 = 0.5;

/// Masks a simple interface with `channel_count` inputs offers: every
/// adjacent stereo pair plus all inputs at once.
pub fn interface_masks(channel_count: u8) -> Result<Vec<ChannelMask>, CaptureError> {
    let channels = (1..=channel_count).map(Channel::new).collect::<Result<Vec<_>, _>>()?;
    let mut masks: Vec<ChannelMask> = channels
        .chunks_exact(2)
        .map(|pair| ChannelMask::for_channels(pair.iter().copied()))
        .collect();
    let all = ChannelMask::for_channels(channels);
    if !masks.contains(&all) {
        masks.push(all);
    }
    Ok(masks)
}

/// An audio source with synthetic tone-generating devices.
pub struct SyntheticSource {
    devices: Vec<DeviceCapability>,
    base_frequency: f32,
    amplitude: f32,
    permission: AtomicBool,
    routed_to: Mutex<Option<String>>,
}

impl SyntheticSource {
    pub fn new(devices: Vec<DeviceCapability>) -> Self {
        Self {
            devices,
            base_frequency: DEFAULT_BASE_FREQUENCY,
            amplitude: DEFAULT_AMPLITUDE,
            permission: AtomicBool::new(true),
            routed_to: Mutex::new(None),
        }
    }

    /// One device called `id` with `channel_count` inputs, the common sample
    /// rates and every encoding.
    pub fn interface(id: &str, channel_count: u8) -> Result<Self, CaptureError> {
        let device = DeviceCapability {
            identity: DeviceIdentity::new(id, format!("sim:{}", id)),
            name: format!("Synthetic {}-channel interface", channel_count),
            channel_masks: interface_masks(channel_count)?,
            sample_rates: vec![44100, 48000, 96000],
            encodings: SampleEncoding::ALL.to_vec(),
        };
        Ok(Self::new(vec![device]))
    }

    pub fn with_tone(mut self, base_frequency: f32, amplitude: f32) -> Self {
        self.base_frequency = base_frequency;
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Make inputs opened from now on report `device_id` as their route,
    /// like a system that moved capture to another device.
    pub fn route_to(&self, device_id: Option<String>) {
        *self.routed_to.lock() = device_id;
    }
}

impl AudioSource for SyntheticSource {
    type Input = PacedInput;

    fn devices(&self) -> Vec<DeviceCapability> {
        self.devices.clone()
    }

    fn has_capture_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn open(&self, device: &DeviceIdentity, format: &InputFormat) -> Result<PacedInput, CaptureError> {
        if !self.has_capture_permission() {
            return Err(CaptureError::PermissionDenied);
        }
        let capability = self
            .capabilities(device)
            .ok_or(CaptureError::DeviceNotAvailable)?;
        if !capability.channel_masks.contains(&format.channel_mask)
            || !capability.sample_rates.contains(&format.sample_rate)
            || !capability.encodings.contains(&format.encoding)
        {
            return Err(CaptureError::ConfigurationFailed(format!(
                "{} cannot deliver {} at {}Hz, {}",
                device, format.channel_mask, format.sample_rate, format.encoding
            )));
        }

        let tone = ToneGenerator::new(
            format.channel_mask,
            format.sample_rate,
            self.base_frequency,
            self.amplitude,
        );
        let routed = self.routed_to.lock().clone().unwrap_or_else(|| device.id.clone());
        log::info!("opened synthetic input {} with {}", device, format.channel_mask);
        PacedInput::start(tone, *format, Some(routed))
    }
}

/// Sine tones, one per channel of a mask.
pub struct ToneGenerator {
    steps: Vec<f32>,
    phases: Vec<f32>,
    amplitude: f32,
}

impl ToneGenerator {
    pub fn new(mask: ChannelMask, sample_rate: u32, base_frequency: f32, amplitude: f32) -> Self {
        let steps: Vec<f32> = mask
            .channels()
            .map(|ch| TAU * base_frequency * f32::from(ch.number()) / sample_rate as f32)
            .collect();
        Self {
            phases: vec![0.0; steps.len()],
            steps,
            amplitude,
        }
    }
}

impl FrameSource for ToneGenerator {
    fn next_frame(&mut self, out: &mut [f32]) -> Result<bool, CaptureError> {
        for ((slot, phase), step) in out.iter_mut().zip(&mut self.phases).zip(&self.steps) {
            *slot = self.amplitude * phase.sin();
            *phase = (*phase + step) % TAU;
        }
        Ok(true)
    }
}
