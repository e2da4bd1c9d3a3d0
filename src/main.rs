//! playlist-dl：借助 yt-dlp 下载整个播放列表（或单个条目）。
//!
//! 本 crate 负责：命令行解析、配置加载、引擎配置与跳过已存在文件；
//! 解析、格式协商、传输与转码全部交给外部引擎。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志等基础设施
//! - `download`：参数解析、引擎配置、跳过钩子与流程编排
//! - `engine`：引擎抽象、输出模板与 yt-dlp 实现

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::debug;

mod base_system;
mod download;
mod engine;

use base_system::logging::{LogOptions, LogSystem};
use base_system::settings::Settings;
use download::orchestrator::download_playlist;
use download::request::{DownloadRequest, USAGE, parse_args};
use engine::ytdlp::YtDlpEngine;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let request = match parse_args(&args) {
        Ok(request) => request,
        Err(err) => {
            if let Some(reason) = err.reason() {
                println!("{reason}");
            }
            println!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match run(request) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(request: DownloadRequest) -> Result<()> {
    let settings = Settings::load().context("Config error")?;
    let _log = init_logging(&settings)?;
    debug!(target: "startup", "playlist-dl v{VERSION}");

    let request = request.with_retry_count(settings.retries);
    let engine = YtDlpEngine::new(settings.yt_dlp_path.clone())
        .with_ffmpeg_location(settings.ffmpeg_location.clone())
        .with_extra_args(settings.extra_args.clone());
    match engine.version() {
        Some(v) => debug!(target: "startup", "yt-dlp 版本: {v}"),
        None => debug!(target: "startup", "无法获取 yt-dlp 版本"),
    }

    download_playlist(&engine, &request, &settings)?;
    Ok(())
}

fn init_logging(settings: &Settings) -> Result<LogSystem> {
    let opts = LogOptions {
        debug: settings.debug,
        use_color: std::io::stderr().is_terminal(),
        log_dir: settings.log_dir(),
        archive_on_exit: true,
    };
    LogSystem::init(opts).context("Logging error")
}
