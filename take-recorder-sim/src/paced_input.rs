//! An [`AudioInput`] fed by a generator thread in real time.
//!
//! The generator wakes every few milliseconds, renders the frames that have
//! become due since the input was opened and appends them to a queue that
//! `read` drains without blocking, the way a device driver's buffer fills
//! between reads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use take_recorder_core::models::audio_models::InputFormat;
use take_recorder_core::models::error::CaptureError;
use take_recorder_core::processing::sample;
use take_recorder_core::traits::audio_source::AudioInput;

const TICK: Duration = Duration::from_millis(10);

/// Seconds of audio the queue holds before frames are dropped.
const QUEUE_SECONDS: usize = 2;

/// Produces one frame at a time as normalised samples, one per channel of
/// the opened mask, in mask order.
pub trait FrameSource: Send + 'static {
    /// Fill `out` with the next frame. `Ok(false)` when there is no more audio.
    fn next_frame(&mut self, out: &mut [f32]) -> Result<bool, CaptureError>;
}

#[derive(Default)]
struct Queue {
    bytes: VecDeque<u8>,
    failure: Option<CaptureError>,
    dropped_frames: u64,
}

pub struct PacedInput {
    format: InputFormat,
    routed_device_id: Option<String>,
    queue: Arc<Mutex<Queue>>,
    running: Arc<AtomicBool>,
    generator: Option<thread::JoinHandle<()>>,
}

impl PacedInput {
    /// Start generating `format` frames from `source`.
    pub fn start<F: FrameSource>(
        source: F,
        format: InputFormat,
        routed_device_id: Option<String>,
    ) -> Result<Self, CaptureError> {
        let queue = Arc::new(Mutex::new(Queue::default()));
        let running = Arc::new(AtomicBool::new(true));

        let generator = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("sim-capture".into())
                .spawn(move || generate(source, format, queue, running))
                .map_err(|e| CaptureError::Unknown(format!("failed to spawn generator thread: {}", e)))?
        };

        Ok(Self {
            format,
            routed_device_id,
            queue,
            running,
            generator: Some(generator),
        })
    }

    /// Frames lost because nobody read them in time.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.lock().dropped_frames
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
    }
}

impl AudioInput for PacedInput {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError> {
        let frame_size = self.format.frame_size();
        let mut queue = self.queue.lock();
        let available = queue.bytes.len().min(buffer.len());
        let n = available - available % frame_size;

        if n == 0 {
            if let Some(failure) = queue.failure.take() {
                return Err(failure);
            }
            return Ok(0);
        }
        for (slot, byte) in buffer[..n].iter_mut().zip(queue.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn routed_device_id(&self) -> Option<String> {
        self.routed_device_id.clone()
    }

    fn release(&mut self) {
        self.stop();
        let dropped = self.dropped_frames();
        if dropped > 0 {
            log::warn!("{} frames were dropped because they were not read in time", dropped);
        }
    }
}

impl Drop for PacedInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn generate<F: FrameSource>(mut source: F, format: InputFormat, queue: Arc<Mutex<Queue>>, running: Arc<AtomicBool>) {
    let encoding = format.encoding;
    let width = encoding.bytes_per_sample();
    let frame_size = format.frame_size();
    let capacity = format.bytes_per_second() * QUEUE_SECONDS;
    let mut samples = vec![0.0f32; format.channel_count()];
    let mut frame = vec![0u8; frame_size];
    let mut rendered = Vec::new();

    let started = Instant::now();
    let mut produced: u64 = 0;

    while running.load(Ordering::SeqCst) {
        thread::sleep(TICK);

        let due = started.elapsed().as_micros() as u64 * u64::from(format.sample_rate) / 1_000_000;
        rendered.clear();
        let mut exhausted = false;
        let mut failure = None;
        while produced < due {
            match source.next_frame(&mut samples) {
                Ok(true) => {}
                Ok(false) => {
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            for (value, slot) in samples.iter().zip(frame.chunks_exact_mut(width)) {
                sample::f32_to_sample(*value, encoding, slot);
            }
            rendered.extend_from_slice(&frame);
            produced += 1;
        }

        let mut queue = queue.lock();
        let overflow = (queue.bytes.len() + rendered.len()).saturating_sub(capacity);
        let overflow = overflow + (frame_size - overflow % frame_size) % frame_size;
        if overflow > 0 {
            let overflow = overflow.min(queue.bytes.len());
            queue.bytes.drain(..overflow);
            queue.dropped_frames += (overflow / frame_size) as u64;
        }
        queue.bytes.extend(rendered.iter().copied());

        if let Some(e) = failure {
            log::error!("generator failed: {}", e);
            queue.failure = Some(e);
            break;
        }
        if exhausted {
            log::info!("generator ran out of audio after {} frames", produced);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use take_recorder_core::models::audio_models::SampleEncoding;
    use take_recorder_core::models::channel::{Channel, ChannelMask};

    struct Countdown(u32);

    impl FrameSource for Countdown {
        fn next_frame(&mut self, out: &mut [f32]) -> Result<bool, CaptureError> {
            if self.0 == 0 {
                return Ok(false);
            }
            self.0 -= 1;
            out.fill(0.5);
            Ok(true)
        }
    }

    struct Broken;

    impl FrameSource for Broken {
        fn next_frame(&mut self, _out: &mut [f32]) -> Result<bool, CaptureError> {
            Err(CaptureError::ReadFailed(-1))
        }
    }

    fn stereo_16() -> InputFormat {
        InputFormat {
            sample_rate: 8000,
            encoding: SampleEncoding::Pcm16,
            channel_mask: ChannelMask::for_channels([Channel::new(1).unwrap(), Channel::new(2).unwrap()]),
        }
    }

    fn drain(input: &mut PacedInput, until: Duration) -> Result<Vec<u8>, CaptureError> {
        let mut collected = Vec::new();
        let mut buffer = vec![0u8; 4096];
        let deadline = Instant::now() + until;
        while Instant::now() < deadline {
            let n = input.read(&mut buffer)?;
            collected.extend_from_slice(&buffer[..n]);
            thread::sleep(Duration::from_millis(5));
        }
        Ok(collected)
    }

    #[test]
    fn delivers_whole_frames_until_the_source_ends() {
        let mut input = PacedInput::start(Countdown(400), stereo_16(), Some("sim".into())).unwrap();
        let bytes = drain(&mut input, Duration::from_millis(300)).unwrap();
        input.release();

        assert_eq!(bytes.len(), 400 * 4);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(first, 16384);
        assert_eq!(input.routed_device_id().as_deref(), Some("sim"));
    }

    #[test]
    fn generator_failures_surface_on_read() {
        let mut input = PacedInput::start(Broken, stereo_16(), None).unwrap();
        assert_eq!(
            drain(&mut input, Duration::from_millis(200)),
            Err(CaptureError::ReadFailed(-1))
        );
    }
}
