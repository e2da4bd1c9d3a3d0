//! 下载引擎抽象。
//!
//! 引擎负责 URL 解析、格式协商、网络传输与音视频合并；本 crate 只负责配置它，
//! 并通过 [`Logger`] 与 [`LifecycleObserver`] 接收诊断输出和逐条目状态。
//!
//! 子模块：
//! - `template`：输出路径模板
//! - `ytdlp`：基于 yt-dlp 可执行文件的引擎实现

pub mod template;
pub mod ytdlp;

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use template::OutputTemplate;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine executable `{binary}` was not found")]
    BinaryNotFound { binary: String },
    #[error("failed to run `{binary}`")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Extraction(String),
    #[error("lifecycle hook failed")]
    Hook(#[source] BoxError),
    #[error("engine i/o failed")]
    Io(#[from] io::Error),
}

/// 引擎选取哪些流。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSelector {
    /// 最佳纯音频流。
    AudioOnly,
    /// 最佳视频流 + 最佳音频流。
    VideoAudio,
}

impl FormatSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioOnly => "bestaudio/best",
            Self::VideoAudio => "bestvideo+bestaudio/best",
        }
    }
}

impl std::fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下载后处理步骤，按顺序执行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcessor {
    /// 提取音轨并按 `quality` 转码为 `codec`。
    ExtractAudio { codec: String, quality: String },
    /// 将分离的音视频流合并到 `container`。
    MergeInto { container: String },
}

impl PostProcessor {
    /// 该步骤决定的最终扩展名。
    pub fn final_extension(&self) -> Option<&str> {
        match self {
            Self::ExtractAudio { codec, .. } => match codec.as_str() {
                "best" => None,
                "aac" | "alac" => Some("m4a"),
                "vorbis" => Some("ogg"),
                other => Some(other),
            },
            Self::MergeInto { .. } => None,
        }
    }
}

/// 引擎报告的单个播放列表条目元数据。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub playlist_index: Option<u64>,
}

impl ItemInfo {
    pub fn display_name(&self) -> &str {
        self.title
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("<untitled>")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Downloading,
    Finished,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct ItemEvent<'a> {
    pub status: ItemStatus,
    pub info: &'a ItemInfo,
    /// 最终文件，条目完成后才可知。
    pub filename: Option<&'a Path>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    /// 不下载，直接视为已完成。
    AlreadyComplete,
}

/// 引擎诊断输出的接收端。
pub trait Logger {
    fn debug(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// 每个条目的状态变化时由引擎调用。
pub trait LifecycleObserver {
    fn on_event(&mut self, event: &ItemEvent<'_>) -> Result<HookDecision, BoxError>;
}

pub struct EngineConfig {
    pub output_template: OutputTemplate,
    pub format: FormatSelector,
    pub postprocessors: Vec<PostProcessor>,
    pub logger: Box<dyn Logger>,
    pub lifecycle_hooks: Vec<Box<dyn LifecycleObserver>>,
    pub retries: u32,
    /// 允许引擎覆盖磁盘上已有的文件。
    pub overwrite: bool,
}

impl EngineConfig {
    /// 对 `event` 依次调用所有钩子；任一返回 `AlreadyComplete` 即为该结果。
    pub fn dispatch(&mut self, event: &ItemEvent<'_>) -> Result<HookDecision, EngineError> {
        let mut decision = HookDecision::Proceed;
        for hook in &mut self.lifecycle_hooks {
            if hook.on_event(event).map_err(EngineError::Hook)? == HookDecision::AlreadyComplete {
                decision = HookDecision::AlreadyComplete;
            }
        }
        Ok(decision)
    }

    /// 后处理完成后磁盘上文件的扩展名。
    pub fn final_extension<'a>(&'a self, info: &'a ItemInfo) -> Option<&'a str> {
        self.postprocessors
            .iter()
            .rev()
            .find_map(PostProcessor::final_extension)
            .or(info.ext.as_deref())
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("output_template", &self.output_template.engine_template())
            .field("format", &self.format)
            .field("postprocessors", &self.postprocessors)
            .field("lifecycle_hooks", &self.lifecycle_hooks.len())
            .field("retries", &self.retries)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Downloaded(PathBuf),
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub info: ItemInfo,
    pub outcome: ItemOutcome,
}

/// 一次引擎运行中每个条目的结果。
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    pub fn record(&mut self, info: ItemInfo, outcome: ItemOutcome) {
        self.items.push(ItemReport { info, outcome });
    }

    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Downloaded(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// 外部解析/下载引擎。
pub trait Engine {
    /// 处理每个 URL（及其背后的所有播放列表条目），阻塞直到完成。
    fn download(&self, config: &mut EngineConfig, urls: &[String]) -> Result<RunSummary, EngineError>;
}
