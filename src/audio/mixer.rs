//! Mixer control access and route application.

use super::card::{CardDescriptor, RouteSetting, RouteValue};
use super::error::{HalError, HalResult};

/// Named-control access to one card's mixer.
pub trait Mixer: Send {
    /// Card name as the kernel reports it.
    fn card_name(&self) -> &str;

    /// Driver string, when the backend exposes it separately.
    fn driver_name(&self) -> &str;

    /// Number of values behind a control, `None` when the control does not exist.
    fn value_count(&self, control: &str) -> Option<u32>;

    fn get_int(&self, control: &str, index: u32) -> HalResult<i32>;

    fn set_int(&mut self, control: &str, index: u32, value: i32) -> HalResult<()>;

    fn set_enum(&mut self, control: &str, item: &str) -> HalResult<()>;
}

/// Apply a route list.
///
/// Enabling writes the configured values; disabling writes `0` to every
/// sub-element of integer controls and `"Off"` to enumerated ones. A missing
/// mixer or list is a no-op. The first unknown control aborts the list.
pub fn apply_route<M: Mixer + ?Sized>(
    mixer: Option<&mut M>,
    route: Option<&[RouteSetting]>,
    enable: bool,
) -> HalResult<()> {
    let (Some(mixer), Some(route)) = (mixer, route) else {
        return Ok(());
    };

    for setting in route {
        let count = mixer
            .value_count(&setting.control)
            .ok_or_else(|| HalError::MissingControl(setting.control.clone()))?;

        match &setting.value {
            RouteValue::Str(item) => {
                let item = if enable { item.as_str() } else { "Off" };
                mixer.set_enum(&setting.control, item)?;
            }
            RouteValue::Int(value) => {
                let value = if enable { *value } else { 0 };
                for idx in 0..count {
                    mixer.set_int(&setting.control, idx, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Scale a framework gain in `[0, 1]` into the card's volume range.
pub fn scale_volume(desc: &CardDescriptor, gain: f32) -> i32 {
    let (min, max) = (desc.out_volume_min, desc.out_volume_max);
    (min as f32 + gain * (max - min) as f32) as i32
}

/// Write left/right output volume through the card's volume controls.
///
/// Only cards whose volume range was tuned away from the defaults accept
/// this; the rest report [`HalError::Unsupported`].
pub fn set_output_volume(
    mixer: &mut dyn Mixer,
    desc: &CardDescriptor,
    left: f32,
    right: f32,
) -> HalResult<(i32, i32)> {
    if !desc.has_custom_volume_range() {
        return Err(HalError::Unsupported);
    }

    let volume = if left == 0.0 && right == 0.0 {
        (0, 0)
    } else {
        (scale_volume(desc, left), scale_volume(desc, right))
    };

    for control in &desc.out_volume_ctl {
        let Some(count) = mixer.value_count(control) else {
            log::warn!("Volume control '{}' not found on {}", control, desc.driver_name);
            continue;
        };
        mixer.set_int(control, 0, volume.0)?;
        if count > 1 {
            mixer.set_int(control, 1, volume.1)?;
        }
    }
    log::debug!("Output volume {:.4}/{:.4} -> {}/{}", left, right, volume.0, volume.1);
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockMixer;

    fn mixer() -> MockMixer {
        MockMixer::new("wm8962-audio")
            .with_int("Speaker Switch", 2)
            .with_int("Speaker Volume", 2)
            .with_enum("Mic Mux", &["Off", "IN3R", "IN4L"])
    }

    fn route() -> Vec<RouteSetting> {
        vec![
            RouteSetting::int("Speaker Switch", 1),
            RouteSetting::int("Speaker Volume", 121),
            RouteSetting::str("Mic Mux", "IN3R"),
        ]
    }

    #[test]
    fn enable_writes_configured_values() {
        let mut m = mixer();
        apply_route(Some(&mut m), Some(route().as_slice()), true).unwrap();
        assert_eq!(m.int_values("Speaker Volume"), vec![121, 121]);
        assert_eq!(m.enum_value("Mic Mux"), Some("IN3R".to_string()));
    }

    #[test]
    fn disable_writes_zero_and_off() {
        let mut m = mixer();
        apply_route(Some(&mut m), Some(route().as_slice()), true).unwrap();
        apply_route(Some(&mut m), Some(route().as_slice()), false).unwrap();
        assert_eq!(m.int_values("Speaker Switch"), vec![0, 0]);
        assert_eq!(m.int_values("Speaker Volume"), vec![0, 0]);
        assert_eq!(m.enum_value("Mic Mux"), Some("Off".to_string()));
    }

    #[test]
    fn missing_mixer_or_route_is_noop() {
        assert!(apply_route(None::<&mut MockMixer>, Some(route().as_slice()), true).is_ok());
        let mut m = mixer();
        assert!(apply_route(Some(&mut m), None, true).is_ok());
        assert!(m.writes().is_empty());
    }

    #[test]
    fn unknown_control_fails() {
        let mut m = mixer();
        let bad = vec![
            RouteSetting::int("Speaker Switch", 1),
            RouteSetting::int("Nonexistent", 1),
            RouteSetting::int("Speaker Volume", 5),
        ];
        let err = apply_route(Some(&mut m), Some(bad.as_slice()), true).unwrap_err();
        assert!(matches!(err, HalError::MissingControl(name) if name == "Nonexistent"));
        assert_eq!(m.int_values("Speaker Volume"), vec![0, 0]);
    }

    #[test]
    fn volume_requires_custom_range() {
        let mut m = MockMixer::new("ak4458").with_int("DAC Volume", 2);
        let mut desc = CardDescriptor::new("ak4458");
        desc.out_volume_ctl = vec!["DAC Volume".into()];
        assert!(matches!(
            set_output_volume(&mut m, &desc, 0.5, 0.5),
            Err(HalError::Unsupported)
        ));

        desc.out_volume_min = 100;
        desc.out_volume_max = 200;
        assert_eq!(set_output_volume(&mut m, &desc, 0.5, 1.0).unwrap(), (150, 200));
        assert_eq!(m.int_values("DAC Volume"), vec![150, 200]);
        assert_eq!(set_output_volume(&mut m, &desc, 0.0, 0.0).unwrap(), (0, 0));
    }
}
