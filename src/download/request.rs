//! 命令行参数解析：原始参数列表 → [`DownloadRequest`]。

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

pub const USAGE: &str = "Usage: playlist-dl [--audio-only] [--prefix-index] [--output-dir OUTPUT_DIR] [--force-replace] <playlist_url>";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_RETRIES: u32 = 3;

const OUTPUT_DIR_FLAG: &str = "--output-dir";

/// 一次调用的解析结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub audio_only: bool,
    pub prefix_index: bool,
    pub output_dir: PathBuf,
    pub force_replace: bool,
    pub retry_count: u32,
}

impl DownloadRequest {
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("no arguments supplied")]
    NoArguments,
    #[error("--output-dir option requires a value")]
    MissingOutputDir,
    #[error("expected exactly one playlist URL, got {0}")]
    PositionalCount(usize),
    #[error("Invalid URL provided.")]
    InvalidUrl(String),
    #[error("{0}")]
    Rejected(String),
}

impl UsageError {
    /// 打印在用法行之上的原因行（如有）。
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::NoArguments | Self::PositionalCount(_) => None,
            Self::MissingOutputDir => Some(format!("Error: {self}")),
            Self::InvalidUrl(_) => Some(self.to_string()),
            Self::Rejected(msg) => Some(format!("Error: {msg}")),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "playlist-dl",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// 仅下载音频并转码
    #[arg(long)]
    audio_only: bool,

    /// 文件名前加三位播放列表序号
    #[arg(long)]
    prefix_index: bool,

    /// 输出目录（原样接收下一个参数）
    #[arg(long, value_name = "OUTPUT_DIR", allow_hyphen_values = true)]
    output_dir: Option<String>,

    /// 目标文件已存在时仍重新下载
    #[arg(long)]
    force_replace: bool,

    #[arg(value_name = "playlist_url")]
    urls: Vec<String>,
}

/// 解析程序名之后的参数，不修改输入。
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<DownloadRequest, UsageError> {
    if args.is_empty() {
        return Err(UsageError::NoArguments);
    }
    check_output_dir_value(args)?;

    let cli = Cli::try_parse_from(args.iter().map(AsRef::as_ref))
        .map_err(|err| UsageError::Rejected(err.kind().to_string()))?;

    let output_dir = match cli.output_dir {
        Some(dir) if dir.is_empty() => return Err(UsageError::MissingOutputDir),
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(DEFAULT_OUTPUT_DIR),
    };

    let [source_url] = <[String; 1]>::try_from(cli.urls)
        .map_err(|urls| UsageError::PositionalCount(urls.len()))?;
    if !is_http_url(&source_url) {
        return Err(UsageError::InvalidUrl(source_url));
    }

    Ok(DownloadRequest {
        source_url,
        audio_only: cli.audio_only,
        prefix_index: cli.prefix_index,
        output_dir,
        force_replace: cli.force_replace,
        retry_count: DEFAULT_RETRIES,
    })
}

/// `--output-dir` 作为最后一个参数时没有可取的值。
fn check_output_dir_value<S: AsRef<str>>(args: &[S]) -> Result<(), UsageError> {
    let mut tokens = args.iter().map(AsRef::as_ref);
    while let Some(token) = tokens.next() {
        if token == OUTPUT_DIR_FLAG && tokens.next().is_none() {
            return Err(UsageError::MissingOutputDir);
        }
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> DownloadRequest {
        DownloadRequest {
            source_url: "https://example.com/playlist".to_string(),
            audio_only: false,
            prefix_index: true,
            output_dir: PathBuf::from("out"),
            force_replace: false,
            retry_count: DEFAULT_RETRIES,
        }
    }

    #[test]
    fn parses_documented_scenario() {
        let args = ["--prefix-index", "--output-dir", "out", "https://example.com/playlist"];
        assert_eq!(parse_args(&args).unwrap(), expected());
    }

    #[test]
    fn flag_order_does_not_matter() {
        let orders: [&[&str]; 4] = [
            &["--prefix-index", "--output-dir", "out", "https://example.com/playlist"],
            &["https://example.com/playlist", "--output-dir", "out", "--prefix-index"],
            &["--output-dir", "out", "https://example.com/playlist", "--prefix-index"],
            &["--prefix-index", "https://example.com/playlist", "--output-dir", "out"],
        ];
        for args in orders {
            assert_eq!(parse_args(args).unwrap(), expected(), "order {args:?}");
        }
    }

    #[test]
    fn all_flags_are_recognised() {
        let args = [
            "--force-replace",
            "--audio-only",
            "http://example.com/list",
            "--prefix-index",
        ];
        let req = parse_args(&args).unwrap();
        assert!(req.audio_only && req.prefix_index && req.force_replace);
        assert_eq!(req.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(req.source_url, "http://example.com/list");
    }

    #[test]
    fn trailing_output_dir_without_value() {
        let args = ["https://example.com/playlist", "--output-dir"];
        assert_eq!(parse_args(&args), Err(UsageError::MissingOutputDir));
    }

    #[test]
    fn empty_output_dir_value() {
        let args = ["--output-dir", "", "https://example.com/playlist"];
        assert_eq!(parse_args(&args), Err(UsageError::MissingOutputDir));
    }

    #[test]
    fn output_dir_value_is_taken_verbatim() {
        let args = ["--output-dir", "--audio-only", "https://example.com/playlist"];
        let req = parse_args(&args).unwrap();
        assert_eq!(req.output_dir, PathBuf::from("--audio-only"));
        assert!(!req.audio_only);
    }

    #[test]
    fn no_arguments() {
        let args: [&str; 0] = [];
        assert_eq!(parse_args(&args), Err(UsageError::NoArguments));
    }

    #[test]
    fn exactly_one_url_is_required() {
        assert_eq!(
            parse_args(&["--audio-only"]),
            Err(UsageError::PositionalCount(0))
        );
        assert_eq!(
            parse_args(&["https://a.example", "https://b.example"]),
            Err(UsageError::PositionalCount(2))
        );
    }

    #[test]
    fn non_http_url_is_rejected() {
        let err = parse_args(&["ftp://example.com/list"]).unwrap_err();
        assert_eq!(err, UsageError::InvalidUrl("ftp://example.com/list".to_string()));
        assert_eq!(err.reason().as_deref(), Some("Invalid URL provided."));
        assert!(parse_args(&["HTTPS://EXAMPLE.COM/list"]).is_ok());
    }

    #[test]
    fn unknown_and_help_flags_are_usage_errors() {
        assert!(matches!(
            parse_args(&["--verbose", "https://example.com/playlist"]),
            Err(UsageError::Rejected(_))
        ));
        assert!(matches!(
            parse_args(&["--help", "https://example.com/playlist"]),
            Err(UsageError::Rejected(_))
        ));
    }

    #[test]
    fn input_list_is_left_untouched() {
        let args = vec![
            "--audio-only".to_string(),
            "https://example.com/playlist".to_string(),
        ];
        let before = args.clone();
        parse_args(&args).unwrap();
        assert_eq!(args, before);
    }

    #[test]
    fn retry_count_can_be_overridden() {
        let req = parse_args(&["https://example.com/playlist"])
            .unwrap()
            .with_retry_count(5);
        assert_eq!(req.retry_count, 5);
    }
}
