//! CPAL audio output wrapper, grounded on the teacher's device-stream setup:
//! pre-allocated callback buffers, panic-safe silence fallback, and a
//! `Send`-wrapped `cpal::Stream`.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use flux_core::{Error, Result};

use crate::callback::{self, CallbackState};

/// `cpal::Stream` is `!Send` on some platforms; this is safe because
/// `DeviceOutput` only ever touches it from the UI thread that owns the
/// engine, never concurrently with device teardown.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

unsafe impl Send for StreamHandle {}

pub(crate) struct DeviceOutput {
    sample_rate: f64,
    channels: usize,
    device_index: Option<usize>,
    stream: Option<StreamHandle>,
}

impl DeviceOutput {
    pub(crate) fn new(device_index: Option<usize>) -> Result<Self> {
        let device = get_device(device_index)?;
        let config = device.default_output_config().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            sample_rate: config.sample_rate().0 as f64,
            channels: config.channels() as usize,
            device_index,
            stream: None,
        })
    }

    pub(crate) fn start(&mut self, state: Arc<CallbackState>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = get_device(self.device_index)?;
        let config = device.default_output_config().map_err(|e| Error::Device(e.to_string()))?;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), state)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), state)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), state)?,
            format => return Err(Error::InvalidConfig(format!("unsupported sample format: {format:?}"))),
        };

        stream.play().map_err(|e| Error::Device(e.to_string()))?;
        self.stream = Some(StreamHandle(stream));
        Ok(())
    }

    /// Tear the stream down (spec §4.F "Engine stops the device").
    pub(crate) fn stop(&mut self) {
        self.stream = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn device_name(&self) -> Result<String> {
        get_device(self.device_index)?.name().map_err(|e| Error::Device(e.to_string()))
    }
}

fn get_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match index {
        Some(i) => {
            let devices: Vec<_> = host.output_devices().map_err(|e| Error::Device(e.to_string()))?.collect();
            let count = devices.len();
            devices
                .into_iter()
                .nth(i)
                .ok_or_else(|| Error::Device(format!("device index {i} out of range ({count} available)")))
        }
        None => host.default_output_device().ok_or_else(|| Error::Device("no output device available".into())),
    }
}

/// Pre-allocated, panic-isolated device callback. `output_f32` is sized once
/// up front so the callback never allocates; a panic inside the callback is
/// caught and the block falls back to silence rather than poisoning the
/// stream.
fn build_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, state: Arc<CallbackState>) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    const MAX_DEVICE_FRAMES: usize = 8192;
    let mut output_f32 = Vec::<f32>::with_capacity(MAX_DEVICE_FRAMES * channels.max(1));

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let result = flux_plugin::thread_ident::with_audio_thread_flag(|| {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let needed = data.len();
                        // RT-safe: capacity was reserved above; resize within it
                        // is a length adjustment, not an allocation.
                        output_f32.resize(needed, 0.0);
                        callback::process_audio(&state, &mut output_f32[..needed], channels);
                        write_output(data, &output_f32[..needed]);
                    }))
                });
                if result.is_err() {
                    output_silence(data);
                }
            },
            |err| tracing::warn!(%err, "cpal stream error"),
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    Ok(stream)
}

#[inline]
fn write_output<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T], src: &[f32]) {
    for (dst, &s) in data.iter_mut().zip(src) {
        *dst = T::from_sample(s);
    }
}

#[inline]
fn output_silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0);
    }
}
