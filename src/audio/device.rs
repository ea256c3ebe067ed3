//! Logical audio devices, device sets and the runtime modes that drive routing.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Direction of a device or a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Output,
    Input,
}

/// A single logical endpoint as the audio framework names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AudioDevice {
    Earpiece,
    Speaker,
    WiredHeadset,
    WiredHeadphone,
    BtSco,
    BtScoHeadset,
    BtScoCarkit,
    /// HDMI and other digital sinks.
    AuxDigital,
    Line,
    /// Automotive bus output, addressed by name.
    Bus,

    BuiltinMic,
    BackMic,
    HeadsetMic,
    BtScoHeadsetMic,
    AuxDigitalIn,
}

impl AudioDevice {
    pub const ALL: [AudioDevice; 15] = [
        AudioDevice::Earpiece,
        AudioDevice::Speaker,
        AudioDevice::WiredHeadset,
        AudioDevice::WiredHeadphone,
        AudioDevice::BtSco,
        AudioDevice::BtScoHeadset,
        AudioDevice::BtScoCarkit,
        AudioDevice::AuxDigital,
        AudioDevice::Line,
        AudioDevice::Bus,
        AudioDevice::BuiltinMic,
        AudioDevice::BackMic,
        AudioDevice::HeadsetMic,
        AudioDevice::BtScoHeadsetMic,
        AudioDevice::AuxDigitalIn,
    ];

    pub fn direction(self) -> Direction {
        match self {
            AudioDevice::BuiltinMic
            | AudioDevice::BackMic
            | AudioDevice::HeadsetMic
            | AudioDevice::BtScoHeadsetMic
            | AudioDevice::AuxDigitalIn => Direction::Input,
            _ => Direction::Output,
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Resolve a descriptor device name for the given direction.
    ///
    /// Output and input share some names ("wired_headset", "aux_digital"),
    /// so the direction picks the variant.
    pub fn from_name(name: &str, direction: Direction) -> Option<Self> {
        let device = match (direction, name) {
            (Direction::Output, "earpiece") => AudioDevice::Earpiece,
            (Direction::Output, "speaker") => AudioDevice::Speaker,
            (Direction::Output, "wired_headset") => AudioDevice::WiredHeadset,
            (Direction::Output, "wired_headphone") => AudioDevice::WiredHeadphone,
            (Direction::Output, "aux_digital") | (Direction::Output, "hdmi") => {
                AudioDevice::AuxDigital
            }
            (Direction::Output, "line") => AudioDevice::Line,
            (Direction::Output, "bus") => AudioDevice::Bus,
            (Direction::Output, "bluetooth_sco") => AudioDevice::BtSco,
            (Direction::Output, "bluetooth_sco_headset") => AudioDevice::BtScoHeadset,
            (Direction::Output, "bluetooth_sco_carkit") => AudioDevice::BtScoCarkit,
            (Direction::Input, "builtin_mic") => AudioDevice::BuiltinMic,
            (Direction::Input, "back_mic") => AudioDevice::BackMic,
            (Direction::Input, "wired_headset") => AudioDevice::HeadsetMic,
            (Direction::Input, "aux_digital") | (Direction::Input, "hdmi") => {
                AudioDevice::AuxDigitalIn
            }
            (Direction::Input, "bluetooth_sco_headset") => AudioDevice::BtScoHeadsetMic,
            _ => return None,
        };
        Some(device)
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioDevice::Earpiece => "earpiece",
            AudioDevice::Speaker => "speaker",
            AudioDevice::WiredHeadset => "wired_headset",
            AudioDevice::WiredHeadphone => "wired_headphone",
            AudioDevice::BtSco => "bluetooth_sco",
            AudioDevice::BtScoHeadset => "bluetooth_sco_headset",
            AudioDevice::BtScoCarkit => "bluetooth_sco_carkit",
            AudioDevice::AuxDigital => "aux_digital",
            AudioDevice::Line => "line",
            AudioDevice::Bus => "bus",
            AudioDevice::BuiltinMic => "builtin_mic",
            AudioDevice::BackMic => "back_mic",
            AudioDevice::HeadsetMic => "wired_headset",
            AudioDevice::BtScoHeadsetMic => "bluetooth_sco_headset",
            AudioDevice::AuxDigitalIn => "aux_digital",
        }
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of logical devices.
///
/// The framework hands the HAL a set even when it means a single device;
/// [`DeviceSet::highest_priority`] collapses a set to the device that wins
/// when exactly one has to be chosen.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceSet(u32);

impl DeviceSet {
    pub const EMPTY: DeviceSet = DeviceSet(0);

    pub const ALL_SCO_OUT: DeviceSet = DeviceSet(
        (1 << AudioDevice::BtSco as u32)
            | (1 << AudioDevice::BtScoHeadset as u32)
            | (1 << AudioDevice::BtScoCarkit as u32),
    );

    pub const ALL_SCO_IN: DeviceSet = DeviceSet(1 << AudioDevice::BtScoHeadsetMic as u32);

    /// Output priority, first wins.
    const OUTPUT_PRIORITY: [AudioDevice; 10] = [
        AudioDevice::BtScoHeadset,
        AudioDevice::BtScoCarkit,
        AudioDevice::BtSco,
        AudioDevice::WiredHeadset,
        AudioDevice::WiredHeadphone,
        AudioDevice::Line,
        AudioDevice::AuxDigital,
        AudioDevice::Bus,
        AudioDevice::Speaker,
        AudioDevice::Earpiece,
    ];

    /// Input priority, first wins.
    const INPUT_PRIORITY: [AudioDevice; 5] = [
        AudioDevice::BtScoHeadsetMic,
        AudioDevice::HeadsetMic,
        AudioDevice::BuiltinMic,
        AudioDevice::BackMic,
        AudioDevice::AuxDigitalIn,
    ];

    pub fn from_bits(bits: u32) -> Self {
        let mask = AudioDevice::ALL.iter().fold(0, |acc, d| acc | d.bit());
        DeviceSet(bits & mask)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn single(device: AudioDevice) -> Self {
        DeviceSet(device.bit())
    }

    pub fn of(devices: &[AudioDevice]) -> Self {
        devices.iter().fold(Self::EMPTY, |acc, d| acc.with(*d))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, device: AudioDevice) -> bool {
        self.0 & device.bit() != 0
    }

    pub fn intersects(self, other: DeviceSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: DeviceSet) -> Self {
        DeviceSet(self.0 | other.0)
    }

    pub fn intersection(self, other: DeviceSet) -> Self {
        DeviceSet(self.0 & other.0)
    }

    pub fn with(self, device: AudioDevice) -> Self {
        DeviceSet(self.0 | device.bit())
    }

    pub fn without(self, device: AudioDevice) -> Self {
        DeviceSet(self.0 & !device.bit())
    }

    /// True when the set holds exactly `device` and nothing else.
    pub fn is_only(self, device: AudioDevice) -> bool {
        self.0 == device.bit()
    }

    /// Restrict the set to devices of one direction.
    pub fn filter(self, direction: Direction) -> Self {
        self.iter()
            .filter(|d| d.direction() == direction)
            .fold(Self::EMPTY, |acc, d| acc.with(d))
    }

    pub fn iter(self) -> impl Iterator<Item = AudioDevice> {
        AudioDevice::ALL.into_iter().filter(move |d| self.contains(*d))
    }

    pub fn highest_priority(self, direction: Direction) -> Option<AudioDevice> {
        let order: &[AudioDevice] = match direction {
            Direction::Output => &Self::OUTPUT_PRIORITY,
            Direction::Input => &Self::INPUT_PRIORITY,
        };
        order.iter().copied().find(|d| self.contains(*d))
    }
}

impl BitOr for DeviceSet {
    type Output = DeviceSet;

    fn bitor(self, rhs: DeviceSet) -> DeviceSet {
        self.union(rhs)
    }
}

impl BitAnd for DeviceSet {
    type Output = DeviceSet;

    fn bitand(self, rhs: DeviceSet) -> DeviceSet {
        self.intersection(rhs)
    }
}

impl From<AudioDevice> for DeviceSet {
    fn from(device: AudioDevice) -> Self {
        DeviceSet::single(device)
    }
}

impl fmt::Debug for DeviceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for DeviceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(AudioDevice::name).collect();
        f.write_str(&names.join("|"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    #[default]
    Normal,
    Ringtone,
    InCall,
    InCommunication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtyMode {
    #[default]
    Off,
    /// Voice carry over: the user speaks, text comes back.
    Vco,
    /// Hearing carry over: the user types, voice comes back.
    Hco,
    Full,
}

impl TtyMode {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "tty_off" => Some(TtyMode::Off),
            "tty_vco" => Some(TtyMode::Vco),
            "tty_hco" => Some(TtyMode::Hco),
            "tty_full" => Some(TtyMode::Full),
            _ => None,
        }
    }

    pub fn as_param(self) -> &'static str {
        match self {
            TtyMode::Off => "tty_off",
            TtyMode::Vco => "tty_vco",
            TtyMode::Hco => "tty_hco",
            TtyMode::Full => "tty_full",
        }
    }
}

/// Capture use case requested for an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSource {
    #[default]
    Default,
    Mic,
    VoiceUplink,
    VoiceDownlink,
    VoiceCall,
    Camcorder,
    VoiceRecognition,
    VoiceCommunication,
    Unprocessed,
}

impl AudioSource {
    /// Map the framework's numeric source id.
    pub fn from_id(id: i32) -> Option<Self> {
        let source = match id {
            0 => AudioSource::Default,
            1 => AudioSource::Mic,
            2 => AudioSource::VoiceUplink,
            3 => AudioSource::VoiceDownlink,
            4 => AudioSource::VoiceCall,
            5 => AudioSource::Camcorder,
            6 => AudioSource::VoiceRecognition,
            7 => AudioSource::VoiceCommunication,
            9 => AudioSource::Unprocessed,
            _ => return None,
        };
        Some(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_operations() {
        let a = DeviceSet::of(&[AudioDevice::Speaker, AudioDevice::WiredHeadset]);
        let b = DeviceSet::of(&[AudioDevice::WiredHeadset, AudioDevice::Earpiece]);

        assert_eq!(a & b, DeviceSet::single(AudioDevice::WiredHeadset));
        assert_eq!((a | b).iter().count(), 3);
        assert!(a.intersects(b));
        assert!(!a.without(AudioDevice::WiredHeadset).intersects(b));
        assert!(DeviceSet::single(AudioDevice::Speaker).is_only(AudioDevice::Speaker));
        assert!(!a.is_only(AudioDevice::Speaker));
    }

    #[test]
    fn priority_prefers_bt_then_wired() {
        let set = DeviceSet::of(&[
            AudioDevice::Speaker,
            AudioDevice::WiredHeadphone,
            AudioDevice::BtScoCarkit,
        ]);
        assert_eq!(
            set.highest_priority(Direction::Output),
            Some(AudioDevice::BtScoCarkit)
        );
        assert_eq!(
            set.without(AudioDevice::BtScoCarkit)
                .highest_priority(Direction::Output),
            Some(AudioDevice::WiredHeadphone)
        );
        assert_eq!(set.highest_priority(Direction::Input), None);
    }

    #[test]
    fn names_depend_on_direction() {
        assert_eq!(
            AudioDevice::from_name("wired_headset", Direction::Output),
            Some(AudioDevice::WiredHeadset)
        );
        assert_eq!(
            AudioDevice::from_name("wired_headset", Direction::Input),
            Some(AudioDevice::HeadsetMic)
        );
        assert_eq!(
            AudioDevice::from_name("hdmi", Direction::Output),
            Some(AudioDevice::AuxDigital)
        );
        assert_eq!(AudioDevice::from_name("speaker", Direction::Input), None);
    }

    #[test]
    fn from_bits_drops_unknown_bits() {
        let set = DeviceSet::from_bits(u32::MAX);
        assert_eq!(set.iter().count(), AudioDevice::ALL.len());
        assert_eq!(DeviceSet::from_bits(set.bits()), set);
    }

    #[test]
    fn filter_splits_directions() {
        let set = DeviceSet::of(&[AudioDevice::Speaker, AudioDevice::BuiltinMic]);
        assert_eq!(
            set.filter(Direction::Input),
            DeviceSet::single(AudioDevice::BuiltinMic)
        );
        assert_eq!(
            set.filter(Direction::Output),
            DeviceSet::single(AudioDevice::Speaker)
        );
    }
}
