//! `key=value;key=value` parameter strings exchanged with the framework.

use std::fmt;

pub const KEY_TTY_MODE: &str = "tty_mode";
pub const KEY_HFP_ENABLE: &str = "hfp_enable";
pub const KEY_HFP_SAMPLING_RATE: &str = "hfp_set_sampling_rate";
pub const KEY_PCM_BIT: &str = "pcm_bit";
pub const KEY_PASSTHROUGH: &str = "passthrough";
pub const KEY_SCREEN_STATE: &str = "screen_state";

pub const KEY_ROUTING: &str = "routing";
pub const KEY_INPUT_SOURCE: &str = "input_source";
pub const KEY_SUP_CHANNELS: &str = "sup_channels";
pub const KEY_SUP_SAMPLING_RATES: &str = "sup_sampling_rates";
pub const KEY_SUP_FORMATS: &str = "sup_formats";

/// An ordered list of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a parameter string. Empty segments are skipped; a segment
    /// without `=` is a key with an empty value.
    pub fn parse(s: &str) -> Self {
        let pairs = s
            .split(';')
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .map(|seg| match seg.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (seg.to_string(), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// Value of the first occurrence of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn add(&mut self, key: &str, value: impl fmt::Display) {
        self.pairs.push((key.to_string(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_lookup() {
        let p = Params::parse("hfp_enable=true; hfp_set_sampling_rate=8000;;routing");
        assert_eq!(p.get("hfp_enable"), Some("true"));
        assert_eq!(p.get_u32("hfp_set_sampling_rate"), Some(8000));
        assert!(p.contains("routing"));
        assert_eq!(p.get("routing"), Some(""));
        assert_eq!(p.get("tty_mode"), None);
        assert_eq!(p.keys().collect::<Vec<_>>(), ["hfp_enable", "hfp_set_sampling_rate", "routing"]);
    }

    #[test]
    fn formats_reply() {
        let mut p = Params::new();
        p.add("tty_mode", "tty_off");
        p.add("pcm_bit", 24);
        assert_eq!(p.to_string(), "tty_mode=tty_off;pcm_bit=24");
        assert_eq!(Params::parse(&p.to_string()), p);
    }
}
