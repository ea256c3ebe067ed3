//! Card registry: descriptors resolved against the cards present on the
//! system, with their mixers and the per-card quirks found at scan time.

use super::HalSettings;
use super::card::{CardDescriptor, RoutePath};
use super::device::{AudioDevice, DeviceSet, Direction};
use super::error::{HalError, HalResult};
use super::format::{PcmConfig, PcmFormat};
use super::mixer::{self, Mixer};
use super::pcm::AudioBackend;

/// Probe order for the capture format.
const INPUT_FORMAT_PROBE: [PcmFormat; 3] = [PcmFormat::S16Le, PcmFormat::S24Le, PcmFormat::S32Le];

/// Live sample rate of an S/PDIF receiver.
pub const SPDIF_RX_RATE_CTL: &str = "RX Sample Rate";

/// A descriptor matched to a physical card.
pub struct SoundCard {
    /// Physical card index.
    pub index: u32,
    pub desc: CardDescriptor,
    pub mixer: Option<Box<dyn Mixer>>,
    /// Capture format the hardware accepts, S16 preferred.
    pub in_format: PcmFormat,
    /// wm8962-class codecs keep their output path up across a call.
    pub keeps_route_in_call: bool,
    /// S/PDIF receiver whose rate follows the incoming signal.
    pub spdif_rx: bool,
}

impl SoundCard {
    pub fn driver_name(&self) -> &str {
        &self.desc.driver_name
    }

    /// Apply one of this card's route lists.
    pub fn apply_route(&mut self, path: RoutePath, enable: bool) -> HalResult<()> {
        mixer::apply_route(self.mixer.as_deref_mut(), self.desc.route(path), enable)
    }
}

/// The resolved card list, in routing order.
pub struct CardRegistry {
    cards: Vec<SoundCard>,
    hsp_channels: u32,
    out_config: PcmConfig,
    multichannel: bool,
    lpa: bool,
}

impl CardRegistry {
    /// Resolve `descriptors` against cards `0..max_cards`.
    ///
    /// Each card's mixer reports a name and driver; the first descriptor whose
    /// driver name is a substring of either claims the card. A descriptor
    /// claims at most one card. Fails when nothing matched.
    pub fn scan(
        backend: &dyn AudioBackend,
        descriptors: Vec<CardDescriptor>,
        settings: &HalSettings,
    ) -> HalResult<Self> {
        let mut unclaimed: Vec<Option<CardDescriptor>> = descriptors.into_iter().map(Some).collect();
        let mut registry = Self {
            cards: Vec::new(),
            hsp_channels: 2,
            out_config: PcmConfig::new(
                2,
                super::format::DEFAULT_OUTPUT_SAMPLE_RATE,
                settings.playback_period_size,
                settings.playback_period_count,
                PcmFormat::S16Le,
            ),
            multichannel: false,
            lpa: false,
        };

        for index in 0..settings.max_cards {
            let mixer = match backend.open_mixer(index) {
                Ok(m) => m,
                Err(e) => {
                    log::debug!("card{}: no mixer ({})", index, e);
                    continue;
                }
            };
            log::info!("card{}: {} ({})", index, mixer.card_name(), mixer.driver_name());

            let slot = unclaimed.iter_mut().find(|slot| match slot {
                Some(d) => {
                    mixer.card_name().contains(d.driver_name.as_str())
                        || mixer.driver_name().contains(d.driver_name.as_str())
                }
                None => false,
            });
            let Some(desc) = slot.and_then(Option::take) else {
                log::debug!("card{}: {} is not supported", index, mixer.card_name());
                continue;
            };

            let card = registry.refine(backend, index, desc, mixer);
            registry.cards.push(card);
        }

        registry.adjust_sequence(&settings.board_name);

        if registry.cards.is_empty() {
            log::error!("No supported sound card found");
            return Err(HalError::NoCard {
                what: "any descriptor".into(),
            });
        }

        log::info!("Total {} cards match", registry.cards.len());
        for (i, card) in registry.cards.iter().enumerate() {
            log::info!("card idx {}: {} (card{})", i, card.driver_name(), card.index);
        }
        Ok(registry)
    }

    /// One-time per-card quirks and the input format probe.
    fn refine(
        &mut self,
        backend: &dyn AudioBackend,
        index: u32,
        desc: CardDescriptor,
        mixer: Box<dyn Mixer>,
    ) -> SoundCard {
        let driver = desc.driver_name.as_str();
        if driver.contains("sco-audio") {
            self.hsp_channels = 1;
        }
        if desc.support_multi_chn {
            log::info!("{} supports multichannel", driver);
            self.multichannel = true;
        }
        if desc.support_lpa {
            log::info!("{} supports LPA", driver);
            self.lpa = true;
        }
        if desc.out_period_size > 0 {
            log::info!("{}: out period_size {}", driver, desc.out_period_size);
            self.out_config.period_size = desc.out_period_size;
        }
        if desc.out_period_count > 0 {
            log::info!("{}: out period_count {}", driver, desc.out_period_count);
            self.out_config.period_count = desc.out_period_count;
        }

        let in_format = INPUT_FORMAT_PROBE
            .into_iter()
            .find(|f| backend.supports_format(index, 0, Direction::Input, *f))
            .unwrap_or_else(|| {
                log::warn!("{}: no S16/S24/S32 capture format, using S16", driver);
                PcmFormat::S16Le
            });
        log::info!("{}: input format {:?}", driver, in_format);

        SoundCard {
            index,
            keeps_route_in_call: driver.contains("wm8962"),
            spdif_rx: driver.contains("imx-spdif"),
            desc,
            mixer: Some(mixer),
            in_format,
        }
    }

    /// On mek_8q boards the cs42888 audio board serves speaker and mic ahead
    /// of the on-board wm8960.
    fn adjust_sequence(&mut self, board_name: &str) {
        if !board_name.contains("mek_8q") {
            return;
        }
        let find = |name: &str| self.cards.iter().position(|c| c.driver_name().contains(name));
        if let (Some(wm8960), Some(cs42888)) = (find("wm8960"), find("cs42888")) {
            if cs42888 > wm8960 {
                self.cards.swap(wm8960, cs42888);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn cards(&self) -> &[SoundCard] {
        &self.cards
    }

    pub fn get(&self, idx: usize) -> Option<&SoundCard> {
        self.cards.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut SoundCard> {
        self.cards.get_mut(idx)
    }

    /// Channel count of the Bluetooth HSP link.
    pub fn hsp_channels(&self) -> u32 {
        self.hsp_channels
    }

    /// Primary output configuration with the card period overrides applied.
    pub fn primary_config(&self) -> PcmConfig {
        self.out_config
    }

    pub fn supports_multichannel(&self) -> bool {
        self.multichannel
    }

    pub fn supports_lpa(&self) -> bool {
        self.lpa
    }

    /// First card serving any of `devices`. An empty output set means speaker.
    pub fn card_for_device(&self, devices: DeviceSet, direction: Direction) -> Option<usize> {
        let devices = if devices.is_empty() && direction == Direction::Output {
            DeviceSet::single(AudioDevice::Speaker)
        } else {
            devices
        };
        self.cards
            .iter()
            .position(|c| c.desc.supported_devices(direction).intersects(devices))
    }

    pub fn card_for_dsd(&self) -> Option<usize> {
        self.cards.iter().position(|c| c.desc.support_dsd)
    }

    pub fn card_for_hfp(&self) -> Option<usize> {
        self.cards.iter().position(|c| c.desc.support_hfp)
    }

    /// Card and PCM device serving a bus address. The secondary bus of a
    /// card is its PCM device 1.
    pub fn card_for_bus(&self, address: &str) -> Option<(usize, u32)> {
        let found = self.cards.iter().enumerate().find_map(|(i, c)| {
            if c.desc.bus_name.as_deref() == Some(address) {
                Some((i, 0))
            } else if c.desc.secondary_bus_name.as_deref() == Some(address) {
                Some((i, 1))
            } else {
                None
            }
        });
        if found.is_none() {
            log::error!("No card for bus '{}'", address);
        }
        found
    }

    /// Probed capture format of the first card serving `devices`.
    pub fn input_format_for(&self, devices: DeviceSet) -> PcmFormat {
        self.card_for_device(devices, Direction::Input)
            .map(|i| self.cards[i].in_format)
            .unwrap_or_default()
    }

    /// Apply every card's `init` list. Failures are logged.
    pub fn apply_init_routes(&mut self) {
        for card in &mut self.cards {
            if let Err(e) = card.apply_route(RoutePath::Init, true) {
                log::warn!("{}: init route failed: {}", card.desc.driver_name, e);
            }
        }
    }

    /// Current rate of an S/PDIF receiver card, if readable.
    pub fn spdif_rx_rate(&self, idx: usize) -> Option<u32> {
        let card = self.cards.get(idx)?;
        if !card.spdif_rx {
            return None;
        }
        let mixer = card.mixer.as_deref()?;
        let rate = mixer.get_int(SPDIF_RX_RATE_CTL, 0).ok()?;
        u32::try_from(rate).ok()
    }

    /// Output volume through a card's volume controls.
    pub fn set_output_volume(&mut self, idx: usize, left: f32, right: f32) -> HalResult<(i32, i32)> {
        let card = self
            .cards
            .get_mut(idx)
            .ok_or_else(|| HalError::NoCard { what: format!("card idx {}", idx) })?;
        let mixer = card.mixer.as_deref_mut().ok_or(HalError::Unsupported)?;
        mixer::set_output_volume(mixer, &card.desc, left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::card::RouteSetting;
    use crate::audio::mock::{MockBackend, MockMixer};

    fn settings(board: &str) -> HalSettings {
        HalSettings {
            board_name: board.into(),
            max_cards: 4,
            ..HalSettings::default()
        }
    }

    fn desc(driver: &str, out: &[AudioDevice], inp: &[AudioDevice]) -> CardDescriptor {
        CardDescriptor::new(driver).with_out_devices(out).with_in_devices(inp)
    }

    #[test]
    fn matches_cards_by_substring_and_skips_unknown() {
        let backend = MockBackend::new()
            .with_card(MockMixer::new("imx-hdmi-soc"))
            .with_card(MockMixer::new("unknown-codec"))
            .with_card_formats(MockMixer::new("wm8962-audio"), &[PcmFormat::S24Le, PcmFormat::S32Le]);
        let descs = vec![
            desc("wm8962", &[AudioDevice::Speaker], &[AudioDevice::BuiltinMic]),
            desc("imx-hdmi", &[AudioDevice::AuxDigital], &[]),
        ];

        let reg = CardRegistry::scan(&backend, descs, &settings("evk_8mm")).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.cards()[0].driver_name(), "imx-hdmi");
        assert_eq!(reg.cards()[1].index, 2);
        assert!(reg.cards()[1].keeps_route_in_call);
        assert_eq!(reg.cards()[1].in_format, PcmFormat::S24Le);
        assert_eq!(reg.cards()[0].in_format, PcmFormat::S16Le);
    }

    #[test]
    fn no_match_fails() {
        let backend = MockBackend::new().with_card(MockMixer::new("unknown"));
        let descs = vec![desc("wm8962", &[AudioDevice::Speaker], &[])];
        assert!(matches!(
            CardRegistry::scan(&backend, descs, &settings("")),
            Err(HalError::NoCard { .. })
        ));
    }

    #[test]
    fn descriptor_claims_one_card() {
        let backend = MockBackend::new()
            .with_card(MockMixer::new("wm8960-audio"))
            .with_card(MockMixer::new("wm8960-audio"));
        let descs = vec![desc("wm8960", &[AudioDevice::Speaker], &[])];
        let reg = CardRegistry::scan(&backend, descs, &settings("")).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.cards()[0].index, 0);
    }

    #[test]
    fn quirks_and_period_overrides() {
        let backend = MockBackend::new()
            .with_card(MockMixer::new("bt-sco-audio"))
            .with_card(MockMixer::new("imx-audio-rpmsg"));
        let mut rpmsg = desc("rpmsg", &[AudioDevice::Speaker], &[]);
        rpmsg.out_period_size = 1024;
        rpmsg.support_lpa = true;
        let mut sco = desc("sco-audio", &[AudioDevice::BtSco], &[AudioDevice::BtScoHeadsetMic]);
        sco.support_hfp = true;

        let reg = CardRegistry::scan(&backend, vec![rpmsg, sco], &settings("")).unwrap();
        assert_eq!(reg.hsp_channels(), 1);
        assert_eq!(reg.primary_config().period_size, 1024);
        assert_eq!(reg.primary_config().period_count, 8);
        assert!(reg.supports_lpa());
        assert!(!reg.supports_multichannel());
        assert_eq!(reg.card_for_hfp(), Some(0));
    }

    #[test]
    fn mek_8q_puts_cs42888_first() {
        let make = || {
            MockBackend::new()
                .with_card(MockMixer::new("wm8960-audio"))
                .with_card(MockMixer::new("cs42888-audio"))
        };
        let descs = || {
            vec![
                desc("wm8960", &[AudioDevice::Speaker], &[AudioDevice::BuiltinMic]),
                desc("cs42888", &[AudioDevice::Speaker], &[AudioDevice::BuiltinMic]),
            ]
        };

        let reg = CardRegistry::scan(&make(), descs(), &settings("mek_8q")).unwrap();
        assert_eq!(reg.cards()[0].driver_name(), "cs42888");
        assert_eq!(reg.cards()[0].index, 1);

        let reg = CardRegistry::scan(&make(), descs(), &settings("evk_8mp")).unwrap();
        assert_eq!(reg.cards()[0].driver_name(), "wm8960");
    }

    #[test]
    fn lookups() {
        let backend = MockBackend::new()
            .with_card(MockMixer::new("imx-audio-hdmi"))
            .with_card(MockMixer::new("ak4497-audio"))
            .with_card(MockMixer::new("imx-cs42888"));
        let hdmi = desc("imx-audio-hdmi", &[AudioDevice::AuxDigital], &[]);
        let mut ak4497 = desc("ak4497", &[AudioDevice::Speaker], &[]);
        ak4497.support_dsd = true;
        let mut cs = desc("cs42888", &[AudioDevice::Bus], &[AudioDevice::BuiltinMic]);
        cs.bus_name = Some("bus0_media_out".into());
        cs.secondary_bus_name = Some("bus1_navigation_out".into());

        let reg = CardRegistry::scan(&backend, vec![hdmi, ak4497, cs], &settings("")).unwrap();
        assert_eq!(reg.card_for_device(DeviceSet::EMPTY, Direction::Output), Some(1));
        assert_eq!(
            reg.card_for_device(AudioDevice::AuxDigital.into(), Direction::Output),
            Some(0)
        );
        assert_eq!(reg.card_for_device(AudioDevice::HeadsetMic.into(), Direction::Input), None);
        assert_eq!(reg.card_for_dsd(), Some(1));
        assert_eq!(reg.card_for_hfp(), None);
        assert_eq!(reg.card_for_bus("bus0_media_out"), Some((2, 0)));
        assert_eq!(reg.card_for_bus("bus1_navigation_out"), Some((2, 1)));
        assert_eq!(reg.card_for_bus("bus7"), None);
        assert_eq!(reg.input_format_for(AudioDevice::BuiltinMic.into()), PcmFormat::S16Le);
    }

    #[test]
    fn init_routes_and_spdif_rate() {
        let wm = MockMixer::new("wm8962-audio").with_int("Digital Playback Volume", 2);
        let spdif = MockMixer::new("imx-spdif").with_int(SPDIF_RX_RATE_CTL, 1);
        let backend = MockBackend::new().with_card(wm.clone()).with_card(spdif.clone());
        let descs = vec![
            desc("wm8962", &[AudioDevice::Speaker], &[])
                .with_route(RoutePath::Init, vec![RouteSetting::int("Digital Playback Volume", 96)]),
            desc("imx-spdif", &[], &[AudioDevice::AuxDigitalIn]),
        ];

        let mut reg = CardRegistry::scan(&backend, descs, &settings("")).unwrap();
        reg.apply_init_routes();
        assert_eq!(wm.int_values("Digital Playback Volume"), vec![96, 96]);

        let mut handle = spdif.clone();
        handle.set_int(SPDIF_RX_RATE_CTL, 0, 44_000).unwrap();
        assert_eq!(reg.spdif_rx_rate(1), Some(44_000));
        assert_eq!(reg.spdif_rx_rate(0), None);
    }
}
