use anyhow::Context;
use imx_audio_hal::audio::mock::MockBackend;
use imx_audio_hal::audio::{AudioBackend, AudioHw, load_descriptors};
use imx_audio_hal::config::Config;
use imx_audio_hal::control_bridge::ControlBridge;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

struct Args {
    dry_run: bool,
    card_dir: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        dry_run: false,
        card_dir: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--dry-run" => args.dry_run = true,
            "--cards" => {
                let dir = it.next().context("--cards needs a directory")?;
                args.card_dir = Some(PathBuf::from(dir));
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }
    Ok(args)
}

#[cfg(feature = "alsa")]
fn alsa_backend() -> anyhow::Result<Arc<dyn AudioBackend>> {
    Ok(Arc::new(imx_audio_hal::audio::alsa_device::AlsaBackend::new()))
}

#[cfg(not(feature = "alsa"))]
fn alsa_backend() -> anyhow::Result<Arc<dyn AudioBackend>> {
    anyhow::bail!("Built without the `alsa` feature; run with --dry-run")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info 级别
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} {} on board {}", config.app_name, config.app_version, config.board_name);

    // 加载声卡描述文件
    let card_dir = args
        .card_dir
        .unwrap_or_else(|| PathBuf::from(config.card_descriptor_dir));
    let descriptors = load_descriptors(&card_dir)
        .with_context(|| format!("Failed to load card descriptors from {}", card_dir.display()))?;
    log::info!("{} descriptor(s) from {}", descriptors.len(), card_dir.display());

    let backend: Arc<dyn AudioBackend> = if args.dry_run {
        log::info!("Dry run: using the in-memory backend");
        Arc::new(MockBackend::for_descriptors(&descriptors))
    } else {
        alsa_backend()?
    };

    let hw = AudioHw::open(backend, descriptors, config.hal_settings())
        .context("Failed to open the audio HAL")?;
    let hw = Arc::new(hw);
    log::info!("\n{}", hw.dump());

    // 启动 UDP 控制桥
    let bridge = ControlBridge::new(config.control_port, hw.clone())
        .await
        .with_context(|| format!("Failed to bind control port {}", config.control_port))?;
    tokio::select! {
        res = bridge.run() => {
            if let Err(e) = res {
                log::error!("Control bridge stopped: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}
