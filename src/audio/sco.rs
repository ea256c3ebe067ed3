//! Bluetooth SCO bridge for hands-free calls.
//!
//! Two real-time threads move audio between the SCO card and the local
//! codec while a call runs:
//!
//! - `sco-rx`: SCO capture → resample to 48 kHz → stereo → primary output.
//! - `sco-tx`: built-in mic at 48 kHz → resample to the SCO rate → SCO
//!   playback.
//!
//! Each thread owns its PCMs and resampler; stopping a side joins its
//! thread, which closes them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::convert;
use super::device::{AudioDevice, DeviceSet, Direction};
use super::error::{HalError, HalResult};
use super::format::{DEFAULT_OUTPUT_SAMPLE_RATE, PcmConfig, PcmFormat};
use super::hw::{DeviceShared, DeviceState};
use super::pcm::{self, Pcm};
use super::resampler::{self, Resampler};
use super::stream_out::StreamOut;

const SCO_THREAD_PRIORITY: i32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(2);

/// The running RX and TX sides of a call.
pub(crate) struct ScoBridge {
    rx_running: Arc<AtomicBool>,
    tx_running: Arc<AtomicBool>,
    rx_handle: Option<JoinHandle<()>>,
    tx_handle: Option<JoinHandle<()>>,
}

impl ScoBridge {
    /// Open both sides and start their threads. A failure part way stops
    /// whatever already started.
    pub(crate) fn start(dev: &DeviceShared, state: &mut DeviceState) -> HalResult<Self> {
        let hfp = state.registry.card_for_hfp().ok_or_else(|| HalError::NoCard {
            what: "HFP (SCO)".into(),
        })?;
        let sco_card = state.registry.get(hfp).map(|c| c.index).ok_or_else(|| HalError::NoCard {
            what: format!("card idx {}", hfp),
        })?;
        let primary = state
            .primary
            .clone()
            .ok_or(HalError::InvalidState("no primary output for the SCO downlink"))?;
        let sco_rate = state.sco_rate;
        if sco_rate == 0 {
            return Err(HalError::BadParameter("SCO rate 0".into()));
        }

        let mut bridge = Self {
            rx_running: dev.sco_rx_running.clone(),
            tx_running: dev.sco_tx_running.clone(),
            rx_handle: None,
            tx_handle: None,
        };

        // ---- RX: SCO capture -> primary output ----
        let out_config = primary.pcm_config();
        let rx_config = PcmConfig::new(
            1,
            sco_rate,
            out_config.period_size * sco_rate / out_config.rate.max(1),
            out_config.period_count,
            PcmFormat::S16Le,
        );
        log::info!("SCO RX: card{} pcm {}", sco_card, rx_config);
        let rx_pcm = dev.backend.open_pcm(sco_card, 0, Direction::Input, &rx_config)?;
        let rx_resampler = resampler::create_resampler(sco_rate, out_config.rate, 1)?;
        primary.start_for_sco(dev, state)?;

        bridge.rx_running.store(true, Ordering::SeqCst);
        let running = bridge.rx_running.clone();
        bridge.rx_handle = Some(
            thread::Builder::new()
                .name("sco-rx".into())
                .spawn(move || rx_loop(rx_pcm, rx_resampler, primary, &running))?,
        );

        // ---- TX: built-in mic -> SCO playback ----
        let tx_config = PcmConfig::sco_out(sco_rate);
        log::info!("SCO TX: card{} pcm {}", sco_card, tx_config);
        let tx_pcm = dev.backend.open_pcm(sco_card, 0, Direction::Output, &tx_config)?;

        if let Some(input) = state.active_input.clone() {
            log::info!("SCO uplink takes the microphone from the active input");
            input.standby_locked(state);
            thread::sleep(RETRY_BACKOFF);
        }

        let mic = DeviceSet::single(AudioDevice::BuiltinMic);
        let mic_card = state
            .registry
            .card_for_device(mic, Direction::Input)
            .and_then(|i| state.registry.get(i))
            .map(|c| c.index)
            .ok_or_else(|| HalError::NoCard { what: mic.to_string() })?;
        let mic_config = PcmConfig::new(
            1,
            DEFAULT_OUTPUT_SAMPLE_RATE,
            tx_config.period_size * DEFAULT_OUTPUT_SAMPLE_RATE / sco_rate,
            tx_config.period_count,
            PcmFormat::S16Le,
        );
        log::info!("SCO TX mic: card{} pcm {}", mic_card, mic_config);
        let mic_pcm = dev.backend.open_pcm(mic_card, 0, Direction::Input, &mic_config)?;
        let tx_resampler = resampler::create_resampler(DEFAULT_OUTPUT_SAMPLE_RATE, sco_rate, 1)?;

        bridge.tx_running.store(true, Ordering::SeqCst);
        let running = bridge.tx_running.clone();
        bridge.tx_handle = Some(
            thread::Builder::new()
                .name("sco-tx".into())
                .spawn(move || tx_loop(mic_pcm, tx_pcm, tx_resampler, &running))?,
        );

        log::info!("SCO bridge running at {} Hz", sco_rate);
        Ok(bridge)
    }

    /// Stop RX, then TX, joining each thread.
    pub(crate) fn stop(&mut self) {
        self.rx_running.store(false, Ordering::SeqCst);
        if let Some(h) = self.rx_handle.take() {
            if h.join().is_err() {
                log::error!("SCO RX thread panicked");
            }
            log::info!("SCO RX stopped");
        }
        self.tx_running.store(false, Ordering::SeqCst);
        if let Some(h) = self.tx_handle.take() {
            if h.join().is_err() {
                log::error!("SCO TX thread panicked");
            }
            log::info!("SCO TX stopped");
        }
    }
}

impl Drop for ScoBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

// ======================== Threads ========================

fn raise_priority(name: &str) {
    // SAFETY: sched_param is plain data; zeroed is a valid value
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = SCO_THREAD_PRIORITY;
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        log::warn!("{}: SCHED_FIFO {} refused (errno {})", name, SCO_THREAD_PRIORITY, ret);
    }
}

fn rx_loop(
    mut sco: Box<dyn Pcm>,
    mut resampler: Box<dyn Resampler>,
    primary: Arc<StreamOut>,
    running: &AtomicBool,
) {
    raise_priority("sco-rx");
    let mut buffer = vec![0u8; sco.config().period_bytes()];

    while running.load(Ordering::SeqCst) {
        if let Err(e) = sco.read(&mut buffer) {
            log::error!("SCO RX read failed: {}", e);
            thread::sleep(RETRY_BACKOFF);
            continue;
        }
        let mono = resampler.process(&convert::bytes_to_i16(&buffer));
        let stereo = convert::mono_to_stereo(&convert::i16_to_bytes(&mono));
        match primary.write_sco_downlink(&stereo) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Primary output closed, dropping SCO downlink");
                thread::sleep(RETRY_BACKOFF);
            }
            Err(e) => {
                log::error!("SCO RX write failed: {}", e);
                thread::sleep(RETRY_BACKOFF);
            }
        }
    }
}

fn tx_loop(
    mut mic: Box<dyn Pcm>,
    mut sco: Box<dyn Pcm>,
    mut resampler: Box<dyn Resampler>,
    running: &AtomicBool,
) {
    raise_priority("sco-tx");
    let mut buffer = vec![0u8; mic.config().period_bytes()];

    while running.load(Ordering::SeqCst) {
        if let Err(e) = mic.read(&mut buffer) {
            log::error!("SCO TX mic read failed: {}", e);
            thread::sleep(RETRY_BACKOFF);
            continue;
        }
        let uplink = convert::i16_to_bytes(&resampler.process(&convert::bytes_to_i16(&buffer)));
        if let Err(e) = pcm::write_with_retry(sco.as_mut(), &uplink) {
            log::error!("SCO TX write failed: {}", e);
            thread::sleep(RETRY_BACKOFF);
        }
    }
}
