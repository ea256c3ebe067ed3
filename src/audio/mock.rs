//! In-memory backend for tests and `--dry-run`.
//!
//! Every handle shares its state with the backend that created it, so a
//! test can hand a mixer or PCM to the HAL and still inspect what was
//! written through it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::card::{CardDescriptor, RouteValue};
use super::device::Direction;
use super::error::{HalError, HalResult, PcmError};
use super::format::{PcmConfig, PcmFormat};
use super::mixer::Mixer;
use super::pcm::{self, AudioBackend, Pcm, PcmState};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ======================== Mixer ========================

#[derive(Debug, Clone)]
enum Control {
    Int(Vec<i32>),
    Enum { items: Vec<String>, current: String },
}

#[derive(Debug, Default)]
struct MixerState {
    controls: HashMap<String, Control>,
    writes: Vec<(String, RouteValue)>,
}

/// Mixer with a fixed set of integer and enumerated controls.
#[derive(Debug, Clone)]
pub struct MockMixer {
    name: String,
    driver: String,
    state: Arc<Mutex<MixerState>>,
}

impl MockMixer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: name.to_string(),
            state: Arc::default(),
        }
    }

    /// Report a driver string different from the card name.
    pub fn with_driver(mut self, driver: &str) -> Self {
        self.driver = driver.to_string();
        self
    }

    /// Integer control with `count` values, all zero.
    pub fn with_int(self, control: &str, count: u32) -> Self {
        lock(&self.state)
            .controls
            .insert(control.to_string(), Control::Int(vec![0; count as usize]));
        self
    }

    /// Enumerated control starting on its first item.
    pub fn with_enum(self, control: &str, items: &[&str]) -> Self {
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        let current = items.first().cloned().unwrap_or_default();
        lock(&self.state)
            .controls
            .insert(control.to_string(), Control::Enum { items, current });
        self
    }

    pub fn int_values(&self, control: &str) -> Vec<i32> {
        match lock(&self.state).controls.get(control) {
            Some(Control::Int(values)) => values.clone(),
            _ => Vec::new(),
        }
    }

    pub fn enum_value(&self, control: &str) -> Option<String> {
        match lock(&self.state).controls.get(control) {
            Some(Control::Enum { current, .. }) => Some(current.clone()),
            _ => None,
        }
    }

    /// Every write in order, one entry per integer index.
    pub fn writes(&self) -> Vec<(String, RouteValue)> {
        lock(&self.state).writes.clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }
}

impl Mixer for MockMixer {
    fn card_name(&self) -> &str {
        &self.name
    }

    fn driver_name(&self) -> &str {
        &self.driver
    }

    fn value_count(&self, control: &str) -> Option<u32> {
        lock(&self.state).controls.get(control).map(|c| match c {
            Control::Int(values) => values.len() as u32,
            Control::Enum { .. } => 1,
        })
    }

    fn get_int(&self, control: &str, index: u32) -> HalResult<i32> {
        match lock(&self.state).controls.get(control) {
            Some(Control::Int(values)) => values
                .get(index as usize)
                .copied()
                .ok_or_else(|| HalError::Mixer(format!("{} has no index {}", control, index))),
            Some(Control::Enum { .. }) => Err(HalError::Mixer(format!("{} is enumerated", control))),
            None => Err(HalError::MissingControl(control.to_string())),
        }
    }

    fn set_int(&mut self, control: &str, index: u32, value: i32) -> HalResult<()> {
        let mut state = lock(&self.state);
        match state.controls.get_mut(control) {
            Some(Control::Int(values)) => {
                let slot = values
                    .get_mut(index as usize)
                    .ok_or_else(|| HalError::Mixer(format!("{} has no index {}", control, index)))?;
                *slot = value;
            }
            Some(Control::Enum { .. }) => {
                return Err(HalError::Mixer(format!("{} is enumerated", control)));
            }
            None => return Err(HalError::MissingControl(control.to_string())),
        }
        state.writes.push((control.to_string(), RouteValue::Int(value)));
        Ok(())
    }

    fn set_enum(&mut self, control: &str, item: &str) -> HalResult<()> {
        let mut state = lock(&self.state);
        match state.controls.get_mut(control) {
            Some(Control::Enum { items, current }) => {
                if !items.iter().any(|i| i == item) {
                    return Err(HalError::Mixer(format!("{} has no item '{}'", control, item)));
                }
                *current = item.to_string();
            }
            Some(Control::Int(_)) => {
                return Err(HalError::Mixer(format!("{} is not enumerated", control)));
            }
            None => return Err(HalError::MissingControl(control.to_string())),
        }
        state.writes.push((control.to_string(), RouteValue::Str(item.to_string())));
        Ok(())
    }
}

// ======================== PCM ========================

/// Counters shared between a [`MockPcm`] and whoever opened it.
#[derive(Debug, Default)]
pub struct PcmStats {
    prepares: AtomicUsize,
    writes: AtomicUsize,
    reads: AtomicUsize,
    bytes_written: AtomicUsize,
    pauses: AtomicUsize,
    closed: AtomicBool,
    last_write: Mutex<Vec<u8>>,
}

impl PcmStats {
    pub fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Payload of the most recent successful write.
    pub fn last_write(&self) -> Vec<u8> {
        lock(&self.last_write).clone()
    }
}

/// PCM that accepts every write and reads a repeating pattern.
pub struct MockPcm {
    config: PcmConfig,
    state: PcmState,
    errors: VecDeque<PcmError>,
    pattern: Vec<u8>,
    paced: bool,
    stats: Arc<PcmStats>,
}

impl MockPcm {
    pub fn new(config: PcmConfig) -> Self {
        Self {
            config,
            state: PcmState::Prepared,
            errors: VecDeque::new(),
            pattern: Vec::new(),
            paced: false,
            stats: Arc::default(),
        }
    }

    /// Fail the next transfers with these errors, in order.
    pub fn inject_errors(&mut self, errors: &[PcmError]) {
        self.errors.extend(errors.iter().cloned());
    }

    pub fn stats(&self) -> Arc<PcmStats> {
        self.stats.clone()
    }

    pub fn prepare_count(&self) -> usize {
        self.stats.prepare_count()
    }

    pub fn write_calls(&self) -> usize {
        self.stats.write_calls()
    }

    pub fn read_calls(&self) -> usize {
        self.stats.read_calls()
    }

    pub fn bytes_written(&self) -> usize {
        self.stats.bytes_written()
    }

    fn next_error(&mut self) -> Option<PcmError> {
        let err = self.errors.pop_front()?;
        if err.is_transient() {
            self.state = PcmState::Xrun;
        }
        Some(err)
    }
}

impl Pcm for MockPcm {
    fn config(&self) -> &PcmConfig {
        &self.config
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PcmError> {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.next_error() {
            return Err(err);
        }
        if self.state == PcmState::Paused {
            return Err(PcmError::NotPrepared);
        }
        self.state = PcmState::Running;
        self.stats.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        *lock(&self.stats.last_write) = data.to_vec();
        Ok(())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<(), PcmError> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if self.paced {
            std::thread::sleep(pcm::buffer_duration(data.len(), &self.config));
        }
        if let Some(err) = self.next_error() {
            data.fill(0);
            return Err(err);
        }
        if self.pattern.is_empty() {
            data.fill(0);
        } else {
            for (dst, src) in data.iter_mut().zip(self.pattern.iter().cycle()) {
                *dst = *src;
            }
        }
        self.state = PcmState::Running;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), PcmError> {
        self.stats.prepares.fetch_add(1, Ordering::SeqCst);
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn pause(&mut self, enable: bool) -> Result<(), PcmError> {
        self.stats.pauses.fetch_add(1, Ordering::SeqCst);
        self.state = if enable { PcmState::Paused } else { PcmState::Running };
        Ok(())
    }

    fn state(&self) -> PcmState {
        self.state
    }
}

impl Drop for MockPcm {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::SeqCst);
    }
}

// ======================== Backend ========================

/// A PCM the backend handed out.
#[derive(Debug, Clone)]
pub struct OpenedPcm {
    pub card: u32,
    pub device: u32,
    pub direction: Direction,
    pub config: PcmConfig,
    pub stats: Arc<PcmStats>,
}

struct MockCard {
    mixer: MockMixer,
    formats: Vec<PcmFormat>,
}

#[derive(Default)]
struct BackendState {
    opened: Vec<OpenedPcm>,
    failing_cards: HashSet<u32>,
    pending_errors: HashMap<u32, Vec<PcmError>>,
}

/// Cards at consecutive indices, each with a mixer and a set of accepted
/// capture formats.
#[derive(Default)]
pub struct MockBackend {
    cards: Vec<MockCard>,
    capture_pattern: Vec<u8>,
    paced: bool,
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// One card per descriptor, carrying every control its routes and
    /// volume list name. Enumerated controls also offer `"Off"`.
    pub fn for_descriptors(descriptors: &[CardDescriptor]) -> Self {
        descriptors.iter().fold(Self::new(), |backend, desc| {
            let mut mixer = MockMixer::new(&desc.driver_name);
            let mut enums: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for setting in desc.routes.values().flatten() {
                match &setting.value {
                    RouteValue::Int(_) => mixer = mixer.with_int(&setting.control, 2),
                    RouteValue::Str(item) => {
                        let items = enums.entry(setting.control.as_str()).or_insert_with(|| vec!["Off"]);
                        if !items.contains(&item.as_str()) {
                            items.push(item);
                        }
                    }
                }
            }
            for (control, items) in &enums {
                mixer = mixer.with_enum(control, items);
            }
            for control in &desc.out_volume_ctl {
                mixer = mixer.with_int(control, 2);
            }
            backend.with_card(mixer)
        })
    }

    /// Add a card at the next index that accepts only S16.
    pub fn with_card(self, mixer: MockMixer) -> Self {
        self.with_card_formats(mixer, &[PcmFormat::S16Le])
    }

    pub fn with_card_formats(mut self, mixer: MockMixer, formats: &[PcmFormat]) -> Self {
        self.cards.push(MockCard {
            mixer,
            formats: formats.to_vec(),
        });
        self
    }

    /// Bytes every capture PCM returns, repeated.
    pub fn with_capture_pattern(mut self, pattern: &[u8]) -> Self {
        self.capture_pattern = pattern.to_vec();
        self
    }

    /// Make reads block for the buffer duration, like real hardware.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Shared handle to a card's mixer.
    pub fn mixer(&self, card: u32) -> Option<MockMixer> {
        self.cards.get(card as usize).map(|c| c.mixer.clone())
    }

    /// Make every later PCM open on `card` fail, or succeed again.
    pub fn fail_open(&self, card: u32, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.failing_cards.insert(card);
        } else {
            state.failing_cards.remove(&card);
        }
    }

    /// Queue transfer errors for the next PCM opened on `card`.
    pub fn inject_errors(&self, card: u32, errors: &[PcmError]) {
        lock(&self.state)
            .pending_errors
            .entry(card)
            .or_default()
            .extend(errors.iter().cloned());
    }

    pub fn opened(&self) -> Vec<OpenedPcm> {
        lock(&self.state).opened.clone()
    }

    /// PCMs that are still open.
    pub fn live(&self) -> Vec<OpenedPcm> {
        self.opened()
            .into_iter()
            .filter(|p| !p.stats.is_closed())
            .collect()
    }
}

impl AudioBackend for MockBackend {
    fn open_pcm(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn Pcm>, PcmError> {
        let mut state = lock(&self.state);
        if card as usize >= self.cards.len() || state.failing_cards.contains(&card) {
            return Err(PcmError::Open {
                card,
                device,
                reason: "no such device".into(),
            });
        }

        let mut pcm = MockPcm::new(*config);
        pcm.paced = self.paced;
        if direction == Direction::Input {
            pcm.pattern = self.capture_pattern.clone();
        }
        if let Some(errors) = state.pending_errors.remove(&card) {
            pcm.inject_errors(&errors);
        }
        state.opened.push(OpenedPcm {
            card,
            device,
            direction,
            config: *config,
            stats: pcm.stats(),
        });
        Ok(Box::new(pcm))
    }

    fn open_mixer(&self, card: u32) -> HalResult<Box<dyn Mixer>> {
        self.cards
            .get(card as usize)
            .map(|c| Box::new(c.mixer.clone()) as Box<dyn Mixer>)
            .ok_or_else(|| HalError::Mixer(format!("no card {}", card)))
    }

    fn supports_format(&self, card: u32, _device: u32, _direction: Direction, format: PcmFormat) -> bool {
        self.cards
            .get(card as usize)
            .is_some_and(|c| c.formats.contains(&format))
    }
}
