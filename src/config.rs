use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 板级名称，用于声卡顺序和直通格式的特殊处理
    pub board_name: &'static str,

    // 声卡描述文件目录与扫描上限
    pub card_descriptor_dir: &'static str,
    pub card_max_scan: u32,

    // 主输出 PCM 周期
    pub playback_period_size: u32,
    pub playback_period_count: u32,

    // 录音 PCM 周期
    pub capture_period_size: u32,
    pub capture_period_count: u32,

    // 蓝牙 SCO 采样率
    pub sco_rate: u32,

    // UDP 控制端口
    pub control_port: u16,

    pub effects_denoise: bool,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),
            board_name: env!("BOARD_NAME"),

            card_descriptor_dir: env!("CARD_DESCRIPTOR_DIR"),
            card_max_scan: env!("CARD_MAX_SCAN").parse()
                .map_err(|_| "Failed to parse CARD_MAX_SCAN")?,

            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            playback_period_count: env!("PLAYBACK_PERIOD_COUNT").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_COUNT")?,
            capture_period_size: env!("CAPTURE_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse CAPTURE_PERIOD_SIZE")?,
            capture_period_count: env!("CAPTURE_PERIOD_COUNT").parse()
                .map_err(|_| "Failed to parse CAPTURE_PERIOD_COUNT")?,

            sco_rate: env!("SCO_RATE").parse()
                .map_err(|_| "Failed to parse SCO_RATE")?,

            control_port: env!("CONTROL_PORT").parse()
                .map_err(|_| "Failed to parse CONTROL_PORT")?,

            effects_denoise: env!("EFFECTS_DENOISE").parse()
                .map_err(|_| "Failed to parse EFFECTS_DENOISE")?,
        })
    }

    /// 转换为 HAL 运行参数
    pub fn hal_settings(&self) -> crate::audio::HalSettings {
        crate::audio::HalSettings {
            board_name: self.board_name.to_string(),
            max_cards: self.card_max_scan,
            playback_period_size: self.playback_period_size,
            playback_period_count: self.playback_period_count,
            capture_period_size: self.capture_period_size,
            capture_period_count: self.capture_period_count,
            sco_rate: self.sco_rate,
            denoise: self.effects_denoise,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
