mod common;

use std::thread;
use std::time::Duration;

use common::{phone_board, s16};
use imx_audio_hal::audio::mock::{MockBackend, OpenedPcm};
use imx_audio_hal::audio::{
    AudioDevice, AudioSource, DeviceSet, Direction, HalError, InputConfig, OutputConfig, OutputFlags,
};

fn find(pcms: &[OpenedPcm], card: u32, direction: Direction) -> Option<OpenedPcm> {
    pcms.iter()
        .find(|p| p.card == card && p.direction == direction)
        .cloned()
}

#[test]
fn hfp_bridges_sco_and_the_codec() {
    let (backend, hw) = phone_board(MockBackend::new().paced());
    let primary = hw
        .open_output_stream(
            DeviceSet::single(AudioDevice::Speaker),
            OutputFlags::PRIMARY,
            OutputConfig::default(),
            "",
        )
        .unwrap();

    hw.set_parameters("hfp_set_sampling_rate=16000;hfp_enable=true").unwrap();
    assert_eq!(
        hw.get_parameters("hfp_enable;hfp_set_sampling_rate"),
        "hfp_enable=true;hfp_set_sampling_rate=16000"
    );
    assert!(!primary.is_standby());

    let live = backend.live();
    assert_eq!(live.len(), 4);
    let sco_in = find(&live, 1, Direction::Input).unwrap();
    assert_eq!((sco_in.config.channels, sco_in.config.rate, sco_in.config.period_size), (1, 16000, 64));
    let sco_out = find(&live, 1, Direction::Output).unwrap();
    assert_eq!((sco_out.config.channels, sco_out.config.rate), (1, 16000));
    let mic = find(&live, 0, Direction::Input).unwrap();
    assert_eq!((mic.config.channels, mic.config.rate, mic.config.period_size), (1, 48000, 576));
    let speaker = find(&live, 0, Direction::Output).unwrap();

    thread::sleep(Duration::from_millis(100));
    assert!(speaker.stats.bytes_written() > 0);
    assert!(sco_out.stats.bytes_written() > 0);

    // the downlink keeps the primary output open
    primary.standby().unwrap();
    assert!(!primary.is_standby());

    // enabling twice is harmless
    hw.set_parameters("hfp_enable=true").unwrap();
    assert_eq!(backend.live().len(), 4);

    hw.set_parameters("hfp_enable=false").unwrap();
    assert_eq!(hw.get_parameters("hfp_enable"), "hfp_enable=false");
    assert!(sco_in.stats.is_closed());
    assert!(sco_out.stats.is_closed());
    assert!(mic.stats.is_closed());
    assert!(!speaker.stats.is_closed());

    primary.standby().unwrap();
    assert!(primary.is_standby());
    assert!(backend.live().is_empty());
}

#[test]
fn sco_link_rate_follows_the_parameter() {
    let (backend, hw) = phone_board(MockBackend::new().paced());
    hw.open_output_stream(
        DeviceSet::single(AudioDevice::Speaker),
        OutputFlags::PRIMARY,
        OutputConfig::default(),
        "",
    )
    .unwrap();

    hw.set_parameters("hfp_set_sampling_rate=8000;hfp_enable=true").unwrap();
    let sco_in = find(&backend.live(), 1, Direction::Input).unwrap();
    assert_eq!((sco_in.config.rate, sco_in.config.period_size), (8000, 32));
    hw.set_parameters("hfp_enable=false").unwrap();
}

#[test]
fn hfp_needs_a_primary_output() {
    let (backend, hw) = phone_board(MockBackend::new());
    let err = hw.set_parameters("hfp_enable=true").unwrap_err();
    assert!(matches!(err, HalError::InvalidState(_)));
    assert_eq!(hw.get_parameters("hfp_enable"), "hfp_enable=false");
    assert!(backend.live().is_empty());
}

#[test]
fn uplink_owns_the_microphone() {
    let (backend, hw) = phone_board(MockBackend::new().paced());
    hw.open_output_stream(
        DeviceSet::single(AudioDevice::Speaker),
        OutputFlags::PRIMARY,
        OutputConfig::default(),
        "",
    )
    .unwrap();
    let input = hw
        .open_input_stream(
            DeviceSet::single(AudioDevice::BuiltinMic),
            InputConfig::default(),
            AudioSource::Mic,
            "",
        )
        .unwrap();
    let mut buf = vec![0u8; 1024];
    input.read(&mut buf).unwrap();
    assert!(!input.is_standby());

    hw.set_parameters("hfp_enable=true").unwrap();
    assert!(input.is_standby());

    // capture is refused while the call runs, reads return silence
    buf.copy_from_slice(&s16(&[9i16; 512]));
    assert_eq!(input.read(&mut buf).unwrap(), buf.len());
    assert!(buf.iter().all(|b| *b == 0));
    assert!(input.is_standby());

    hw.set_parameters("hfp_enable=false").unwrap();
    input.read(&mut buf).unwrap();
    assert!(!input.is_standby());
    drop(hw);
    assert!(backend.live().is_empty());
}

#[test]
fn closing_the_device_stops_the_bridge() {
    let (backend, hw) = phone_board(MockBackend::new().paced());
    hw.open_output_stream(
        DeviceSet::single(AudioDevice::Speaker),
        OutputFlags::PRIMARY,
        OutputConfig::default(),
        "",
    )
    .unwrap();
    hw.set_parameters("hfp_enable=true").unwrap();
    assert_eq!(backend.live().len(), 4);

    drop(hw);
    assert!(backend.live().is_empty());
}
