//! Device router: which route lists to enable or disable for a device
//! selection.
//!
//! Planning is a pure function of [`RouteState`] and the card count, so the
//! same selection always produces the same action list. [`apply_plan`]
//! writes a plan through the card mixers.

use super::card::RoutePath;
use super::device::{AudioDevice, AudioMode, AudioSource, DeviceSet, TtyMode};
use super::error::HalResult;
use super::registry::CardRegistry;

/// Inputs to route planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteState {
    pub out_device: DeviceSet,
    pub in_device: DeviceSet,
    pub mode: AudioMode,
    pub tty_mode: TtyMode,
    /// Source of the active input stream, if any.
    pub source: Option<AudioSource>,
}

impl RouteState {
    fn in_call(&self) -> bool {
        self.mode == AudioMode::InCall
    }
}

/// Enable or disable one route list on one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteAction {
    /// Index into the registry's card list.
    pub card: usize,
    pub path: RoutePath,
    pub enable: bool,
}

const MIC_PATHS: [RoutePath; 3] = [RoutePath::BtMic, RoutePath::HeadsetMic, RoutePath::BuiltinMic];

#[derive(Debug, Default)]
struct OutputFlags {
    headset: bool,
    headphone: bool,
    speaker: bool,
    earpiece: bool,
    bt: bool,
}

fn push_all(plan: &mut Vec<RouteAction>, cards: usize, path: RoutePath, enable: bool) {
    plan.extend((0..cards).map(|card| RouteAction { card, path, enable }));
}

/// Enable exactly `selected` among the microphone paths, or none.
///
/// Disables come first so a control shared between two paths ends up with
/// the selected path's value.
fn push_mic(plan: &mut Vec<RouteAction>, cards: usize, selected: Option<RoutePath>) {
    for path in MIC_PATHS {
        if Some(path) != selected {
            push_all(plan, cards, path, false);
        }
    }
    if let Some(path) = selected {
        push_all(plan, cards, path, true);
    }
}

/// Output stage plan; in call it also selects the voice microphone.
pub fn plan_output(state: &RouteState, cards: usize) -> Vec<RouteAction> {
    let dev = state.out_device;
    let mut on = OutputFlags {
        headset: dev.contains(AudioDevice::WiredHeadset),
        headphone: dev.contains(AudioDevice::WiredHeadphone),
        speaker: dev.contains(AudioDevice::Speaker),
        earpiece: dev.contains(AudioDevice::Earpiece),
        bt: dev.intersects(DeviceSet::ALL_SCO_OUT),
    };

    // rx path follows the TTY mode in call
    if state.in_call() && !on.bt {
        match state.tty_mode {
            TtyMode::Full | TtyMode::Vco => {
                on = OutputFlags {
                    headphone: true,
                    ..OutputFlags::default()
                };
            }
            TtyMode::Hco => {
                on = OutputFlags {
                    speaker: true,
                    ..OutputFlags::default()
                };
            }
            TtyMode::Off => {
                // voice downlink cannot go to HDMI
                if dev.contains(AudioDevice::AuxDigital) {
                    on.speaker = true;
                }
            }
        }
    }

    log::info!(
        "Output route: headphone {}, headset {}, speaker {}, earpiece {}, bt {}",
        on.headphone,
        on.headset,
        on.speaker,
        on.earpiece,
        on.bt
    );

    let mut plan = Vec::with_capacity(cards * 7);
    push_all(&mut plan, cards, RoutePath::BtOutput, on.bt);
    push_all(&mut plan, cards, RoutePath::Headphone, on.headset || on.headphone);
    push_all(&mut plan, cards, RoutePath::Speaker, on.speaker);
    push_all(&mut plan, cards, RoutePath::Earpiece, on.earpiece);

    if state.in_call() {
        let mic = if on.bt {
            Some(RoutePath::BtMic)
        } else {
            // tx path follows the TTY mode too
            match state.tty_mode {
                TtyMode::Full | TtyMode::Hco => {
                    on = OutputFlags {
                        headset: true,
                        ..OutputFlags::default()
                    };
                }
                TtyMode::Vco => {
                    on = OutputFlags {
                        speaker: true,
                        ..OutputFlags::default()
                    };
                }
                TtyMode::Off => {}
            }
            if on.headset {
                Some(RoutePath::HeadsetMic)
            } else if on.headphone || on.earpiece || on.speaker {
                Some(RoutePath::BuiltinMic)
            } else {
                None
            }
        };
        push_mic(&mut plan, cards, mic);
    }
    plan
}

/// Capture front-end plan outside a call.
pub fn plan_input(state: &RouteState, cards: usize) -> Vec<RouteAction> {
    let dev = state.in_device;

    // sub mic serves camcorder and VoIP on speaker phone
    let sub_mic = !state.in_call()
        && match state.source {
            Some(AudioSource::Camcorder) => true,
            Some(AudioSource::VoiceCommunication) => {
                state.out_device.contains(AudioDevice::Speaker)
            }
            _ => false,
        };

    let mic = if dev.intersects(DeviceSet::ALL_SCO_IN) {
        Some(RoutePath::BtMic)
    } else if dev.contains(AudioDevice::HeadsetMic) {
        Some(RoutePath::HeadsetMic)
    } else if dev.contains(AudioDevice::BuiltinMic) || dev.contains(AudioDevice::BackMic) || sub_mic {
        Some(RoutePath::BuiltinMic)
    } else {
        None
    };
    log::info!("Input route: {:?} for {}", mic, dev);

    let mut plan = Vec::with_capacity(cards * MIC_PATHS.len());
    push_mic(&mut plan, cards, mic);
    plan
}

/// Apply a plan in order.
///
/// A failing action is logged and the rest still run; the first error is
/// returned.
pub fn apply_plan(registry: &mut CardRegistry, plan: &[RouteAction]) -> HalResult<()> {
    let mut first_err = None;
    for action in plan {
        let Some(card) = registry.get_mut(action.card) else {
            continue;
        };
        if let Err(e) = card.apply_route(action.path, action.enable) {
            log::warn!(
                "{}: {} {} failed: {}",
                card.driver_name(),
                if action.enable { "enable" } else { "disable" },
                action.path.key(),
                e
            );
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enabled(plan: &[RouteAction]) -> Vec<RoutePath> {
        let mut paths: Vec<_> = plan.iter().filter(|a| a.enable).map(|a| a.path).collect();
        paths.dedup();
        paths
    }

    fn state(out: &[AudioDevice], mode: AudioMode, tty: TtyMode) -> RouteState {
        RouteState {
            out_device: DeviceSet::of(out),
            mode,
            tty_mode: tty,
            ..RouteState::default()
        }
    }

    #[test]
    fn speaker_only_in_normal_mode() {
        let plan = plan_output(&state(&[AudioDevice::Speaker], AudioMode::Normal, TtyMode::Off), 2);
        assert_eq!(plan.len(), 8);
        assert_eq!(enabled(&plan), [RoutePath::Speaker]);
        // bt_output first, one action per card
        assert_eq!(plan[0], RouteAction { card: 0, path: RoutePath::BtOutput, enable: false });
        assert_eq!(plan[1], RouteAction { card: 1, path: RoutePath::BtOutput, enable: false });
        assert_eq!(plan[4].path, RoutePath::Speaker);
    }

    #[test]
    fn headset_drives_headphone_stage() {
        let plan = plan_output(&state(&[AudioDevice::WiredHeadset], AudioMode::Normal, TtyMode::Off), 1);
        assert_eq!(enabled(&plan), [RoutePath::Headphone]);
    }

    #[test]
    fn in_call_selects_one_mic() {
        let plan = plan_output(&state(&[AudioDevice::Earpiece], AudioMode::InCall, TtyMode::Off), 1);
        assert_eq!(enabled(&plan), [RoutePath::Earpiece, RoutePath::BuiltinMic]);
        let mic_actions: Vec<_> = plan.iter().filter(|a| MIC_PATHS.contains(&a.path)).collect();
        assert_eq!(mic_actions.len(), 3);
        assert_eq!(mic_actions.last().unwrap().path, RoutePath::BuiltinMic);

        let plan = plan_output(&state(&[AudioDevice::WiredHeadset], AudioMode::InCall, TtyMode::Off), 1);
        assert_eq!(enabled(&plan), [RoutePath::Headphone, RoutePath::HeadsetMic]);

        let plan = plan_output(&state(&[AudioDevice::BtScoHeadset], AudioMode::InCall, TtyMode::Full), 1);
        assert_eq!(enabled(&plan), [RoutePath::BtOutput, RoutePath::BtMic]);
    }

    #[test]
    fn tty_overrides_are_asymmetric() {
        let dev = [AudioDevice::Earpiece];
        let full = plan_output(&state(&dev, AudioMode::InCall, TtyMode::Full), 1);
        assert_eq!(enabled(&full), [RoutePath::Headphone, RoutePath::HeadsetMic]);

        let vco = plan_output(&state(&dev, AudioMode::InCall, TtyMode::Vco), 1);
        assert_eq!(enabled(&vco), [RoutePath::Headphone, RoutePath::BuiltinMic]);

        let hco = plan_output(&state(&dev, AudioMode::InCall, TtyMode::Hco), 1);
        assert_eq!(enabled(&hco), [RoutePath::Speaker, RoutePath::HeadsetMic]);
    }

    #[test]
    fn hdmi_in_call_forces_speaker() {
        let plan = plan_output(&state(&[AudioDevice::AuxDigital], AudioMode::InCall, TtyMode::Off), 1);
        assert_eq!(enabled(&plan), [RoutePath::Speaker, RoutePath::BuiltinMic]);

        let plan = plan_output(&state(&[AudioDevice::AuxDigital], AudioMode::Normal, TtyMode::Off), 1);
        assert!(enabled(&plan).is_empty());
    }

    #[test]
    fn in_call_with_nothing_disables_all_mics() {
        let plan = plan_output(&state(&[], AudioMode::InCall, TtyMode::Off), 1);
        assert!(enabled(&plan).is_empty());
        assert_eq!(plan.iter().filter(|a| MIC_PATHS.contains(&a.path)).count(), 3);
    }

    #[test]
    fn input_plan() {
        let mut st = RouteState {
            in_device: AudioDevice::BtScoHeadsetMic.into(),
            ..RouteState::default()
        };
        assert_eq!(enabled(&plan_input(&st, 1)), [RoutePath::BtMic]);

        st.in_device = AudioDevice::HeadsetMic.into();
        assert_eq!(enabled(&plan_input(&st, 1)), [RoutePath::HeadsetMic]);

        st.in_device = AudioDevice::BackMic.into();
        assert_eq!(enabled(&plan_input(&st, 1)), [RoutePath::BuiltinMic]);

        st.in_device = DeviceSet::EMPTY;
        assert!(enabled(&plan_input(&st, 1)).is_empty());

        st.source = Some(AudioSource::Camcorder);
        assert_eq!(enabled(&plan_input(&st, 1)), [RoutePath::BuiltinMic]);

        st.source = Some(AudioSource::VoiceCommunication);
        assert!(enabled(&plan_input(&st, 1)).is_empty());
        st.out_device = AudioDevice::Speaker.into();
        assert_eq!(enabled(&plan_input(&st, 1)), [RoutePath::BuiltinMic]);
    }

    fn any_mode() -> impl Strategy<Value = AudioMode> {
        prop_oneof![
            Just(AudioMode::Normal),
            Just(AudioMode::Ringtone),
            Just(AudioMode::InCall),
            Just(AudioMode::InCommunication),
        ]
    }

    fn any_tty() -> impl Strategy<Value = TtyMode> {
        prop_oneof![
            Just(TtyMode::Off),
            Just(TtyMode::Vco),
            Just(TtyMode::Hco),
            Just(TtyMode::Full),
        ]
    }

    proptest! {
        #[test]
        fn planning_is_deterministic(
            out in any::<u32>(),
            inp in any::<u32>(),
            mode in any_mode(),
            tty in any_tty(),
            cards in 0usize..4,
        ) {
            let st = RouteState {
                out_device: DeviceSet::from_bits(out),
                in_device: DeviceSet::from_bits(inp),
                mode,
                tty_mode: tty,
                source: None,
            };
            prop_assert_eq!(plan_output(&st, cards), plan_output(&st, cards));
            prop_assert_eq!(plan_input(&st, cards), plan_input(&st, cards));
        }

        #[test]
        fn at_most_one_mic_enabled(
            out in any::<u32>(),
            inp in any::<u32>(),
            mode in any_mode(),
            tty in any_tty(),
        ) {
            let st = RouteState {
                out_device: DeviceSet::from_bits(out),
                in_device: DeviceSet::from_bits(inp),
                mode,
                tty_mode: tty,
                source: None,
            };
            for plan in [plan_output(&st, 1), plan_input(&st, 1)] {
                let mics = plan.iter().filter(|a| a.enable && MIC_PATHS.contains(&a.path)).count();
                prop_assert!(mics <= 1);
            }
        }
    }
}
