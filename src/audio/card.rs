//! Card descriptors: what a sound card can do and which mixer controls
//! enable each of its signal paths.
//!
//! Descriptors are plain data. [`load_descriptors`] reads them from a
//! directory of `*.json` files; tests build them directly.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::device::{AudioDevice, DeviceSet, Direction};
use super::error::DescriptorError;

pub const OUT_VOL_MIN_DFT: i32 = 0;
pub const OUT_VOL_MAX_DFT: i32 = 255;

/// Upper bound on descriptor files read from one directory.
pub const MAX_DESCRIPTORS: usize = 16;

/// Value written to one mixer control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteValue {
    /// Written to every sub-element of the control.
    Int(i32),
    /// Enumerated control, set by item name.
    Str(String),
}

/// One mixer-control assignment within a route list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSetting {
    pub control: String,
    pub value: RouteValue,
}

impl RouteSetting {
    pub fn int(control: &str, value: i32) -> Self {
        Self {
            control: control.to_string(),
            value: RouteValue::Int(value),
        }
    }

    pub fn str(control: &str, value: &str) -> Self {
        Self {
            control: control.to_string(),
            value: RouteValue::Str(value.to_string()),
        }
    }
}

/// Logical signal path a route list controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoutePath {
    /// Applied once at open; never disabled.
    Init,
    Speaker,
    /// Wired headset and headphone share one output stage.
    Headphone,
    Earpiece,
    BtOutput,
    BuiltinMic,
    HeadsetMic,
    BtMic,
}

impl RoutePath {
    pub fn key(self) -> &'static str {
        match self {
            RoutePath::Init => "init_ctl",
            RoutePath::Speaker => "speaker_ctl",
            RoutePath::Headphone => "headphone_ctl",
            RoutePath::Earpiece => "earpiece_ctl",
            RoutePath::BtOutput => "bt_output_ctl",
            RoutePath::BuiltinMic => "builtin_mic_ctl",
            RoutePath::HeadsetMic => "headset_mic_ctl",
            RoutePath::BtMic => "bt_mic_ctl",
        }
    }
}

/// Static description of one hardware variant.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDescriptor {
    /// Matched by substring against the driver/card name the kernel reports.
    pub driver_name: String,
    pub bus_name: Option<String>,
    /// A bus served by PCM device 1 of the same card.
    pub secondary_bus_name: Option<String>,
    pub supported_out_devices: DeviceSet,
    pub supported_in_devices: DeviceSet,
    pub routes: HashMap<RoutePath, Vec<RouteSetting>>,
    pub out_volume_ctl: Vec<String>,
    pub out_volume_min: i32,
    pub out_volume_max: i32,
    pub support_dsd: bool,
    pub support_hfp: bool,
    pub is_hdmi_card: bool,
    pub support_multi_chn: bool,
    pub support_lpa: bool,
    /// 0 keeps the built-in default.
    pub out_period_size: u32,
    pub out_period_count: u32,
}

impl CardDescriptor {
    pub fn new(driver_name: &str) -> Self {
        Self {
            driver_name: driver_name.to_string(),
            bus_name: None,
            secondary_bus_name: None,
            supported_out_devices: DeviceSet::EMPTY,
            supported_in_devices: DeviceSet::EMPTY,
            routes: HashMap::new(),
            out_volume_ctl: Vec::new(),
            out_volume_min: OUT_VOL_MIN_DFT,
            out_volume_max: OUT_VOL_MAX_DFT,
            support_dsd: false,
            support_hfp: false,
            is_hdmi_card: false,
            support_multi_chn: false,
            support_lpa: false,
            out_period_size: 0,
            out_period_count: 0,
        }
    }

    pub fn with_out_devices(mut self, devices: &[AudioDevice]) -> Self {
        self.supported_out_devices = DeviceSet::of(devices);
        self
    }

    pub fn with_in_devices(mut self, devices: &[AudioDevice]) -> Self {
        self.supported_in_devices = DeviceSet::of(devices);
        self
    }

    pub fn with_route(mut self, path: RoutePath, settings: Vec<RouteSetting>) -> Self {
        self.routes.insert(path, settings);
        self
    }

    /// `None` when the card has no list for this path.
    pub fn route(&self, path: RoutePath) -> Option<&[RouteSetting]> {
        self.routes.get(&path).map(Vec::as_slice)
    }

    pub fn supported_devices(&self, direction: Direction) -> DeviceSet {
        match direction {
            Direction::Output => self.supported_out_devices,
            Direction::Input => self.supported_in_devices,
        }
    }

    /// Volume scaling only applies when the range was tuned for this card.
    pub fn has_custom_volume_range(&self) -> bool {
        self.out_volume_min != OUT_VOL_MIN_DFT || self.out_volume_max != OUT_VOL_MAX_DFT
    }
}

// ======================== Descriptor files ========================

#[derive(Deserialize)]
struct RawControl {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    val: serde_json::Value,
}

#[derive(Deserialize)]
struct RawDescriptor {
    driver_name: String,
    #[serde(default)]
    bus_name: Option<String>,
    #[serde(default)]
    secondary_bus_name: Option<String>,
    #[serde(default)]
    supported_out_devices: Vec<String>,
    #[serde(default)]
    supported_in_devices: Vec<String>,
    #[serde(default)]
    init_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    speaker_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    headphone_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    earpiece_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    bt_output_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    builtin_mic_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    headset_mic_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    bt_mic_ctl: Option<Vec<RawControl>>,
    #[serde(default)]
    out_volume_ctl: Vec<String>,
    #[serde(default)]
    out_volume_min: Option<i32>,
    #[serde(default)]
    out_volume_max: Option<i32>,
    #[serde(default)]
    support_dsd: bool,
    #[serde(default)]
    support_hfp: bool,
    #[serde(default)]
    is_hdmi_card: bool,
    #[serde(default)]
    support_multi_chn: bool,
    #[serde(default)]
    support_lpa: bool,
    #[serde(default)]
    out_period_size: u32,
    #[serde(default)]
    out_period_count: u32,
}

fn invalid(driver: &str, reason: impl Into<String>) -> DescriptorError {
    DescriptorError::Invalid {
        driver: driver.to_string(),
        reason: reason.into(),
    }
}

fn parse_devices(
    driver: &str,
    names: &[String],
    direction: Direction,
) -> Result<DeviceSet, DescriptorError> {
    names.iter().try_fold(DeviceSet::EMPTY, |set, name| {
        AudioDevice::from_name(name, direction)
            .map(|d| set.with(d))
            .ok_or_else(|| invalid(driver, format!("unknown {:?} device '{}'", direction, name)))
    })
}

fn parse_controls(driver: &str, raw: Vec<RawControl>) -> Result<Vec<RouteSetting>, DescriptorError> {
    raw.into_iter()
        .map(|ctl| {
            let value = match (ctl.kind.as_str(), &ctl.val) {
                ("int", serde_json::Value::Number(n)) => n
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .map(RouteValue::Int),
                ("str", serde_json::Value::String(s)) => Some(RouteValue::Str(s.clone())),
                _ => None,
            };
            value
                .map(|value| RouteSetting {
                    control: ctl.name.clone(),
                    value,
                })
                .ok_or_else(|| {
                    invalid(
                        driver,
                        format!("control '{}' has bad type '{}' or value {}", ctl.name, ctl.kind, ctl.val),
                    )
                })
        })
        .collect()
}

impl TryFrom<RawDescriptor> for CardDescriptor {
    type Error = DescriptorError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        let driver = raw.driver_name.clone();
        if driver.is_empty() {
            return Err(invalid(&driver, "empty driver_name"));
        }

        let mut desc = CardDescriptor::new(&driver);
        desc.bus_name = raw.bus_name;
        desc.secondary_bus_name = raw.secondary_bus_name;
        desc.supported_out_devices =
            parse_devices(&driver, &raw.supported_out_devices, Direction::Output)?;
        desc.supported_in_devices =
            parse_devices(&driver, &raw.supported_in_devices, Direction::Input)?;
        if desc.supported_out_devices.is_empty() && desc.supported_in_devices.is_empty() {
            return Err(invalid(&driver, "neither output nor input devices"));
        }

        let lists = [
            (RoutePath::Init, raw.init_ctl),
            (RoutePath::Speaker, raw.speaker_ctl),
            (RoutePath::Headphone, raw.headphone_ctl),
            (RoutePath::Earpiece, raw.earpiece_ctl),
            (RoutePath::BtOutput, raw.bt_output_ctl),
            (RoutePath::BuiltinMic, raw.builtin_mic_ctl),
            (RoutePath::HeadsetMic, raw.headset_mic_ctl),
            (RoutePath::BtMic, raw.bt_mic_ctl),
        ];
        for (path, list) in lists {
            if let Some(list) = list {
                desc.routes.insert(path, parse_controls(&driver, list)?);
            }
        }

        desc.out_volume_ctl = raw.out_volume_ctl;
        desc.out_volume_min = raw.out_volume_min.unwrap_or(OUT_VOL_MIN_DFT);
        desc.out_volume_max = raw.out_volume_max.unwrap_or(OUT_VOL_MAX_DFT);
        desc.support_dsd = raw.support_dsd;
        desc.support_hfp = raw.support_hfp;
        desc.is_hdmi_card = raw.is_hdmi_card;
        desc.support_multi_chn = raw.support_multi_chn;
        desc.support_lpa = raw.support_lpa;
        desc.out_period_size = raw.out_period_size;
        desc.out_period_count = raw.out_period_count;
        Ok(desc)
    }
}

/// Parse one descriptor from JSON text.
pub fn parse_descriptor(path: &str, text: &str) -> Result<CardDescriptor, DescriptorError> {
    let raw: RawDescriptor = serde_json::from_str(text).map_err(|source| DescriptorError::Json {
        path: path.to_string(),
        source,
    })?;
    CardDescriptor::try_from(raw)
}

/// Read every `*.json` descriptor in `dir`, in file-name order.
///
/// A file that fails to parse is skipped with a warning; an unreadable
/// directory is an error.
pub fn load_descriptors(dir: &Path) -> Result<Vec<CardDescriptor>, DescriptorError> {
    let entries = fs::read_dir(dir).map_err(|source| DescriptorError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut descriptors = Vec::new();
    for path in files {
        if descriptors.len() >= MAX_DESCRIPTORS {
            log::warn!("Descriptor limit ({}) reached, ignoring {}", MAX_DESCRIPTORS, path.display());
            break;
        }
        let name = path.display().to_string();
        let parsed = fs::read_to_string(&path)
            .map_err(|source| DescriptorError::Io {
                path: name.clone(),
                source,
            })
            .and_then(|text| parse_descriptor(&name, &text));
        match parsed {
            Ok(desc) => {
                log::info!("Loaded card descriptor '{}' from {}", desc.driver_name, name);
                descriptors.push(desc);
            }
            Err(e) => log::warn!("Skipping card descriptor: {}", e),
        }
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WM8962: &str = r#"{
        "driver_name": "wm8962-audio",
        "supported_out_devices": ["speaker", "wired_headphone"],
        "supported_in_devices": ["builtin_mic", "wired_headset"],
        "init_ctl": [{"name": "Digital Playback Volume", "type": "int", "val": 96}],
        "speaker_ctl": [
            {"name": "Speaker Switch", "type": "int", "val": 1},
            {"name": "Speaker Volume", "type": "int", "val": 121}
        ],
        "builtin_mic_ctl": [{"name": "Mic Mux", "type": "str", "val": "IN3R"}],
        "out_volume_ctl": ["Headphone Volume"],
        "out_volume_max": 127
    }"#;

    #[test]
    fn parses_routes_and_defaults() {
        let desc = parse_descriptor("wm8962.json", WM8962).unwrap();
        assert_eq!(desc.driver_name, "wm8962-audio");
        assert!(desc.supported_out_devices.contains(AudioDevice::Speaker));
        assert!(desc.supported_in_devices.contains(AudioDevice::HeadsetMic));
        assert_eq!(
            desc.route(RoutePath::Speaker).unwrap()[1],
            RouteSetting::int("Speaker Volume", 121)
        );
        assert_eq!(
            desc.route(RoutePath::BuiltinMic).unwrap()[0].value,
            RouteValue::Str("IN3R".into())
        );
        assert!(desc.route(RoutePath::Headphone).is_none());
        assert_eq!(desc.out_volume_min, OUT_VOL_MIN_DFT);
        assert!(desc.has_custom_volume_range());
    }

    #[test]
    fn rejects_card_without_devices() {
        let err = parse_descriptor("x.json", r#"{"driver_name": "dummy"}"#).unwrap_err();
        assert!(matches!(err, DescriptorError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_device_and_control_type() {
        let bad_dev = r#"{"driver_name": "a", "supported_out_devices": ["toaster"]}"#;
        assert!(parse_descriptor("a.json", bad_dev).is_err());

        let bad_ctl = r#"{"driver_name": "a", "supported_out_devices": ["speaker"],
            "speaker_ctl": [{"name": "X", "type": "float", "val": 1.5}]}"#;
        assert!(parse_descriptor("a.json", bad_ctl).is_err());
    }

    #[test]
    fn loads_directory_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_wm8962.json"), WM8962).unwrap();
        fs::write(
            dir.path().join("a_hdmi.json"),
            r#"{"driver_name": "imx-hdmi", "supported_out_devices": ["hdmi"], "is_hdmi_card": true}"#,
        )
        .unwrap();
        fs::write(dir.path().join("c_broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let descs = load_descriptors(dir.path()).unwrap();
        let names: Vec<_> = descs.iter().map(|d| d.driver_name.as_str()).collect();
        assert_eq!(names, ["imx-hdmi", "wm8962-audio"]);
        assert!(descs[0].is_hdmi_card);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_descriptors(&dir.path().join("absent")).is_err());
    }
}
