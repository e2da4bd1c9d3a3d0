//! 全局配置结构（Settings）与默认值。
//!
//! 配置文件可选：默认读取当前目录下的 `playlist-dl.yml`，
//! 也可通过环境变量 `PLAYLIST_DL_CONFIG` 指定路径。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, load_or_default};

pub const CONFIG_PATH_ENV: &str = "PLAYLIST_DL_CONFIG";
pub const YT_DLP_PATH_ENV: &str = "YT_DLP_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    // 引擎配置
    /// yt-dlp 可执行文件路径
    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: String,
    /// ffmpeg 所在路径（留空则由 yt-dlp 自行查找）
    #[serde(default)]
    pub ffmpeg_location: Option<String>,
    /// 附加给 yt-dlp 的额外参数
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// 网络失败时的重试次数
    #[serde(default = "default_retries")]
    pub retries: u32,

    // 格式配置
    /// 仅音频模式的目标编码
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// 仅音频模式的目标码率（kbps）或 0-10 的 VBR 等级
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,
    /// 音视频合并的容器格式
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,

    // 日志配置
    #[serde(default = "default_false")]
    pub debug: bool,
    /// 日志目录（留空则不写日志文件）
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            yt_dlp_path: default_yt_dlp_path(),
            ffmpeg_location: None,
            extra_args: Vec::new(),
            retries: default_retries(),
            audio_codec: default_audio_codec(),
            audio_quality: default_audio_quality(),
            merge_output_format: default_merge_output_format(),
            debug: default_false(),
            log_dir: None,
        }
    }
}

impl ConfigSpec for Settings {
    const FILE_NAME: &'static str = "playlist-dl.yml";

    fn field_names() -> &'static [&'static str] {
        &[
            "yt_dlp_path",
            "ffmpeg_location",
            "extra_args",
            "retries",
            "audio_codec",
            "audio_quality",
            "merge_output_format",
            "debug",
            "log_dir",
        ]
    }
}

impl Settings {
    /// 从配置位置加载，并应用环境变量覆盖。
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut settings = load_or_default::<Self>(path.as_deref())?;
        settings.apply_env(std::env::var(YT_DLP_PATH_ENV).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// `best` 由引擎按源文件决定扩展名，无法预先算出目标路径来判断是否已存在。
    fn validate(&self) -> Result<(), ConfigError> {
        if self.audio_codec.trim().eq_ignore_ascii_case("best") {
            return Err(ConfigError::Validation(
                "audio_codec `best` is not supported, pick a concrete codec such as mp3".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self, yt_dlp_path: Option<String>) {
        if let Some(path) = yt_dlp_path.filter(|p| !p.trim().is_empty()) {
            self.yt_dlp_path = path;
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_deref()
            .map(str::trim)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
    }
}

fn default_false() -> bool {
    false
}

fn default_yt_dlp_path() -> String {
    "yt-dlp".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_audio_codec() -> String {
    "mp3".to_string()
}

fn default_audio_quality() -> String {
    "192".to_string()
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}
