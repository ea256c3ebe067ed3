use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    board: Board,
    cards: Cards,
    playback: Periods,
    capture: Periods,
    sco: Sco,
    control: Control,
    effects: Effects,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Board {
    name: String,
}

#[derive(Deserialize)]
struct Cards {
    descriptor_dir: String,
    max_cards: u32,
}

#[derive(Deserialize)]
struct Periods {
    period_size: u32,
    period_count: u32,
}

#[derive(Deserialize)]
struct Sco {
    rate: u32,
}

#[derive(Deserialize)]
struct Control {
    port: u16,
}

#[derive(Deserialize)]
struct Effects {
    denoise: bool,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用和板子信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);
    println!("cargo:rustc-env=BOARD_NAME={}", config.board.name);

    // 声卡描述文件
    println!("cargo:rustc-env=CARD_DESCRIPTOR_DIR={}", config.cards.descriptor_dir);
    println!("cargo:rustc-env=CARD_MAX_SCAN={}", config.cards.max_cards);

    // 播放/录音周期
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_COUNT={}", config.playback.period_count);
    println!("cargo:rustc-env=CAPTURE_PERIOD_SIZE={}", config.capture.period_size);
    println!("cargo:rustc-env=CAPTURE_PERIOD_COUNT={}", config.capture.period_count);

    // 蓝牙 SCO
    println!("cargo:rustc-env=SCO_RATE={}", config.sco.rate);

    // 控制端口
    println!("cargo:rustc-env=CONTROL_PORT={}", config.control.port);
    println!("cargo:rustc-env=EFFECTS_DENOISE={}", config.effects.denoise);

    if std::env::var("CARGO_FEATURE_SPEEXDSP").is_ok() {
        link_speexdsp();
    }
}

fn link_speexdsp() {
    let target = std::env::var("TARGET").unwrap_or_default();

    if target.contains("musl") {
        // musl 目标：使用手动编译的静态库，不依赖 pkg-config
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=speexdsp");
        return;
    }

    // 其他目标：通过 pkg-config 查找 libspeexdsp
    pkg_config::Config::new()
        .probe("speexdsp")
        .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
}
