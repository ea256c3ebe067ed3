#![allow(dead_code)]

use std::sync::Arc;

use imx_audio_hal::audio::mock::{MockBackend, MockMixer};
use imx_audio_hal::audio::{
    AudioDevice, AudioHw, CardDescriptor, HalSettings, RoutePath, RouteSetting,
};

pub fn wm8962_mixer() -> MockMixer {
    MockMixer::new("wm8962-audio")
        .with_int("Speaker Switch", 2)
        .with_int("Earpiece Switch", 1)
        .with_int("Headphone Switch", 2)
        .with_int("Headphone Volume", 2)
        .with_int("Capture Switch", 1)
        .with_enum("Mic Mux", &["Off", "IN3R", "IN1R"])
}

pub fn wm8962() -> CardDescriptor {
    let mut desc = CardDescriptor::new("wm8962")
        .with_out_devices(&[
            AudioDevice::Speaker,
            AudioDevice::Earpiece,
            AudioDevice::WiredHeadphone,
            AudioDevice::WiredHeadset,
        ])
        .with_in_devices(&[AudioDevice::BuiltinMic, AudioDevice::HeadsetMic])
        .with_route(RoutePath::Speaker, vec![RouteSetting::int("Speaker Switch", 1)])
        .with_route(RoutePath::Earpiece, vec![RouteSetting::int("Earpiece Switch", 1)])
        .with_route(RoutePath::Headphone, vec![RouteSetting::int("Headphone Switch", 1)])
        .with_route(
            RoutePath::BuiltinMic,
            vec![RouteSetting::int("Capture Switch", 1), RouteSetting::str("Mic Mux", "IN3R")],
        )
        .with_route(
            RoutePath::HeadsetMic,
            vec![RouteSetting::int("Capture Switch", 1), RouteSetting::str("Mic Mux", "IN1R")],
        );
    desc.out_volume_ctl = vec!["Headphone Volume".into()];
    desc.out_volume_max = 127;
    desc
}

pub fn bt_sco() -> CardDescriptor {
    let mut desc = CardDescriptor::new("bt-sco-audio")
        .with_out_devices(&[AudioDevice::BtSco, AudioDevice::BtScoHeadset, AudioDevice::BtScoCarkit])
        .with_in_devices(&[AudioDevice::BtScoHeadsetMic]);
    desc.support_hfp = true;
    desc
}

pub fn cs42888() -> CardDescriptor {
    let mut desc = CardDescriptor::new("cs42888").with_out_devices(&[AudioDevice::Speaker, AudioDevice::Line]);
    desc.support_multi_chn = true;
    desc
}

/// wm8962 codec alone.
pub fn codec_board() -> (Arc<MockBackend>, AudioHw) {
    open(MockBackend::new().with_card(wm8962_mixer()), vec![wm8962()])
}

/// wm8962 codec plus a Bluetooth SCO card.
pub fn phone_board(backend: MockBackend) -> (Arc<MockBackend>, AudioHw) {
    open(
        backend
            .with_card(wm8962_mixer())
            .with_card(MockMixer::new("bt-sco-audio")),
        vec![wm8962(), bt_sco()],
    )
}

pub fn open(backend: MockBackend, descriptors: Vec<CardDescriptor>) -> (Arc<MockBackend>, AudioHw) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(backend);
    let hw = AudioHw::open(backend.clone(), descriptors, HalSettings::default()).unwrap();
    (backend, hw)
}

/// Interleaved S16 samples as bytes.
pub fn s16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
