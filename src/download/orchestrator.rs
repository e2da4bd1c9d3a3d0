//! 下载流程编排：准备输出目录 → 构建引擎配置 → 调用引擎一次。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::base_system::settings::Settings;
use crate::engine::template::TemplateError;
use crate::engine::{Engine, EngineError, ItemOutcome, RunSummary};

use super::options::build_engine_config;
use super::request::DownloadRequest;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("could not create output directory '{}'", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid output template")]
    Template(#[from] TemplateError),
    #[error("Download error")]
    Engine(#[from] EngineError),
}

pub fn ensure_output_dir(path: &Path) -> Result<(), DownloadError> {
    fs::create_dir_all(path).map_err(|source| DownloadError::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}

pub fn download_playlist<E: Engine + ?Sized>(
    engine: &E,
    request: &DownloadRequest,
    settings: &Settings,
) -> Result<RunSummary, DownloadError> {
    ensure_output_dir(&request.output_dir)?;

    let mut config = build_engine_config(request, settings)?;
    info!(
        url = %request.source_url,
        template = %config.output_template.engine_template(),
        format = %config.format,
        "开始下载"
    );

    let summary = engine.download(&mut config, std::slice::from_ref(&request.source_url))?;

    for report in &summary.items {
        if let ItemOutcome::Failed(reason) = &report.outcome {
            warn!(item = report.info.display_name(), %reason, "条目下载失败");
        }
    }
    info!(
        downloaded = summary.downloaded(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        "下载完成"
    );
    Ok(summary)
}
