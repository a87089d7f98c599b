use crate::models::audio_models::{DeviceCapability, DeviceIdentity, InputFormat};
use crate::models::error::CaptureError;

/// Platform-specific source of multi-channel input devices.
///
/// Implemented by the reference devices of `take-recorder-sim`; a real
/// backend would wrap the OS audio API.
pub trait AudioSource: Send + Sync {
    type Input: AudioInput + 'static;

    /// Every input device currently present.
    fn devices(&self) -> Vec<DeviceCapability>;

    /// Capabilities of one device, if it is present.
    fn capabilities(&self, device: &DeviceIdentity) -> Option<DeviceCapability> {
        self.devices().into_iter().find(|d| &d.identity == device)
    }

    /// Whether the user has granted audio capture permission.
    fn has_capture_permission(&self) -> bool;

    /// Open `device` for capture in `format`.
    fn open(&self, device: &DeviceIdentity, format: &InputFormat) -> Result<Self::Input, CaptureError>;
}

/// An opened input. Owned by the capture thread once listening starts.
pub trait AudioInput: Send {
    /// Copy available frames into `buffer` and return the number of bytes
    /// written. Must not block; returns `Ok(0)` when nothing is available.
    ///
    /// Only whole frames are delivered.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, CaptureError>;

    /// Id of the device the OS actually routed this input to.
    fn routed_device_id(&self) -> Option<String>;

    /// Stop capturing and free the device.
    fn release(&mut self) {}
}
