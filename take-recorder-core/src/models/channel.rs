use std::fmt;

use serde::{Deserialize, Serialize};

use super::audio_models::DeviceCapability;
use super::error::CaptureError;

/// A hardware input channel, numbered from 1 to [`Channel::MAX`].
///
/// Channel `n` occupies bit `n - 1` of a [`ChannelMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    pub const MAX: u8 = 32;
    pub const FIRST: Channel = Channel(1);
    pub const SECOND: Channel = Channel(2);

    pub fn new(number: u8) -> Result<Self, CaptureError> {
        if (1..=Self::MAX).contains(&number) {
            Ok(Self(number))
        } else {
            Err(CaptureError::InvalidChannel(number))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn bit_position(self) -> u32 {
        u32::from(self.0 - 1)
    }

    /// The channel after this one, or `None` for the last channel.
    pub fn next(self) -> Option<Channel> {
        Channel::new(self.0 + 1).ok()
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=Self::MAX).map(Channel)
    }
}

impl TryFrom<u8> for Channel {
    type Error = CaptureError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Channel::new(number)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bitset over hardware channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u32);

impl ChannelMask {
    pub const EMPTY: ChannelMask = ChannelMask(0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn for_channels<I>(channels: I) -> Self
    where
        I: IntoIterator<Item = Channel>,
    {
        Self(channels.into_iter().fold(0, |bits, ch| bits | (1 << ch.bit_position())))
    }

    pub fn contains(self, channel: Channel) -> bool {
        let bit = 1 << channel.bit_position();
        self.0 & bit == bit
    }

    /// Superset test.
    pub fn contains_mask(self, other: ChannelMask) -> bool {
        other.is_subset_of(self)
    }

    pub fn is_subset_of(self, other: ChannelMask) -> bool {
        other.0 & self.0 == self.0
    }

    pub fn is_strict_subset_of(self, other: ChannelMask) -> bool {
        self != other && self.is_subset_of(other)
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Channels in the mask in ascending order.
    pub fn channels(self) -> impl Iterator<Item = Channel> {
        Channel::all().filter(move |ch| self.contains(*ch))
    }

    /// Position of `channel` within [`Self::channels`], i.e. the index of its
    /// sample inside a frame captured with this mask.
    pub fn index_of(self, channel: Channel) -> Option<usize> {
        self.channels().position(|ch| ch == channel)
    }

    /// The masks offered by `device`, minus those that are strict subsets of
    /// another offered mask.
    ///
    /// Masks are visited from highest to lowest population count; a mask is
    /// kept unless an already kept mask is a proper superset of it.
    pub fn unique_masks_for(device: &DeviceCapability) -> Vec<ChannelMask> {
        let mut candidates = device.channel_masks.clone();
        candidates.sort_by(|a, b| b.count().cmp(&a.count()).then(b.0.cmp(&a.0)));
        candidates.dedup();

        let mut kept: Vec<ChannelMask> = Vec::with_capacity(candidates.len());
        for mask in candidates {
            if !kept.iter().any(|k| mask.is_strict_subset_of(*k)) {
                kept.push(mask);
            }
        }
        kept
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.channels().map(|ch| ch.to_string()).collect();
        match numbers.len() {
            0 => write!(f, "no hardware channels"),
            1 => write!(f, "hardware channel {}", numbers[0]),
            2 => write!(f, "hardware channels {} + {}", numbers[0], numbers[1]),
            _ => write!(f, "hardware channels {}", numbers.join(", ")),
        }
    }
}
