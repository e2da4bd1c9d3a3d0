//! yt-dlp 引擎：以同步子进程方式驱动 `yt-dlp` 可执行文件。
//!
//! 流程：`--dump-json` 枚举进程的 stdout 逐行读取，每解析出一个条目就立即
//! 经过生命周期钩子并通过 `--load-info-json` 下载；stderr 由后台线程转发，
//! 枚举阶段即失败的条目（私有、已删除、地区限制）记为失败。

use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Output, Stdio};
use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{
    Engine, EngineConfig, EngineError, HookDecision, ItemEvent, ItemInfo, ItemOutcome,
    ItemStatus, Logger, PostProcessor, RunSummary,
};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

static RE_ITEM_ERROR: OnceLock<Regex> = OnceLock::new();

/// `[extractor] <id>: <reason>`
fn re_item_error() -> &'static Regex {
    RE_ITEM_ERROR.get_or_init(|| {
        Regex::new(r"^\[[^\]]+\] (?P<id>[^\s:]+): (?P<reason>.+)$").expect("compile RE_ITEM_ERROR")
    })
}

/// 创建在 Windows 上不弹出控制台窗口的 `Command`。
fn std_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// 枚举出的单个条目：类型化视图 + 交还给 yt-dlp 的原始 info JSON。
struct Entry {
    info: ItemInfo,
    raw: Value,
}

enum Fetch {
    Saved(PathBuf),
    Failed(String),
}

/// 运行中的枚举进程。stdout 由调用方逐行读取，stderr 由后台线程送入通道。
struct Listing {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Receiver<String>,
    drain: Option<JoinHandle<()>>,
    status: Option<ExitStatus>,
}

impl Listing {
    fn next_line(&mut self) -> Result<Option<String>, EngineError> {
        read_line_lossy(&mut self.stdout).map_err(EngineError::from)
    }

    /// 已到达的 stderr 行，不阻塞。
    fn pending_diagnostics(&self) -> Vec<String> {
        self.stderr.try_iter().collect()
    }

    /// 等待进程退出并收尾 stderr 线程；之后 `pending_diagnostics` 返回剩余全部行。
    fn finish(&mut self) -> Result<ExitStatus, EngineError> {
        let status = self.child.wait()?;
        self.status = Some(status);
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
        Ok(status)
    }
}

impl Drop for Listing {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

pub struct YtDlpEngine {
    binary: String,
    ffmpeg_location: Option<String>,
    extra_args: Vec<String>,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg_location: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_ffmpeg_location(mut self, location: Option<String>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// 可执行文件报告的版本号；无法运行时返回 `None`。
    pub fn version(&self) -> Option<String> {
        let mut cmd = std_command(&self.binary);
        cmd.arg("--version");
        cmd.output().ok().and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .map(|s| s.trim().to_string())
        })
    }

    /// 每次调用都带上的格式、重试与后处理参数。
    fn selection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            config.format.as_str().to_string(),
            "--retries".to_string(),
            config.retries.to_string(),
        ];

        for pp in &config.postprocessors {
            match pp {
                PostProcessor::ExtractAudio { codec, quality } => args.extend([
                    "--extract-audio".to_string(),
                    "--audio-format".to_string(),
                    codec.clone(),
                    "--audio-quality".to_string(),
                    audio_quality_arg(quality),
                ]),
                PostProcessor::MergeInto { container } => {
                    args.extend(["--merge-output-format".to_string(), container.clone()])
                }
            }
        }

        if let Some(ref location) = self.ffmpeg_location {
            args.extend(["--ffmpeg-location".to_string(), location.clone()]);
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn spawn_error(&self, source: io::Error) -> EngineError {
        if source.kind() == io::ErrorKind::NotFound {
            EngineError::BinaryNotFound {
                binary: self.binary.clone(),
            }
        } else {
            EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            }
        }
    }

    fn run(&self, args: &[String]) -> Result<Output, EngineError> {
        debug!(binary = %self.binary, ?args, "running yt-dlp");
        let mut cmd = std_command(&self.binary);
        cmd.args(args).stdin(Stdio::null());
        cmd.output().map_err(|source| self.spawn_error(source))
    }

    fn spawn_listing(&self, config: &EngineConfig, url: &str) -> Result<Listing, EngineError> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--yes-playlist".to_string(),
            "--ignore-errors".to_string(),
        ];
        args.extend(self.selection_args(config));
        args.push(url.to_string());

        debug!(binary = %self.binary, ?args, "listing with yt-dlp");
        let mut cmd = std_command(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|source| self.spawn_error(source))?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::Io(io::Error::other("yt-dlp output was not captured")));
            }
        };

        let (tx, rx) = mpsc::channel();
        let drain = thread::spawn(move || {
            let mut reader = BufReader::new(stderr);
            // 接收端消失后仍继续读取，避免子进程写满管道后阻塞
            while let Ok(Some(line)) = read_line_lossy(&mut reader) {
                let _ = tx.send(line);
            }
        });

        Ok(Listing {
            child,
            stdout: BufReader::new(stdout),
            stderr: rx,
            drain: Some(drain),
            status: None,
        })
    }

    fn fetch(&self, config: &EngineConfig, entry: &Entry, info: &ItemInfo) -> Result<Fetch, EngineError> {
        let mut info_file = NamedTempFile::new()?;
        serde_json::to_writer(&mut info_file, &entry.raw).map_err(io::Error::from)?;
        info_file.flush()?;

        let template = config.output_template.for_item(&entry.info);
        let mut args = vec![
            "--load-info-json".to_string(),
            info_file.path().to_string_lossy().into_owned(),
            "-o".to_string(),
            template.engine_template(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-simulate".to_string(),
            "--no-progress".to_string(),
        ];
        if config.overwrite {
            args.push("--force-overwrites".to_string());
        }
        args.extend(self.selection_args(config));

        let output = self.run(&args)?;
        let last_error = forward_diagnostics(config.logger.as_ref(), &output.stderr);

        if !output.status.success() {
            return Ok(Fetch::Failed(last_error.unwrap_or_else(|| {
                format!("{} exited with {}", self.binary, output.status)
            })));
        }

        let printed = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .next_back()
            .map(PathBuf::from);

        match printed {
            Some(path) => Ok(Fetch::Saved(path)),
            // 旧版本 `after_move` 不输出内容，退回到预期路径
            None => match template.render(info) {
                Ok(path) => Ok(Fetch::Saved(path)),
                Err(err) => Ok(Fetch::Failed(err.to_string())),
            },
        }
    }

    /// 单个条目：钩子判定 → 下载 → 完成/出错事件。
    fn process(
        &self,
        config: &mut EngineConfig,
        entry: Entry,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let mut info = entry.info.clone();
        info.ext = config.final_extension(&entry.info).map(str::to_string);

        let starting = ItemEvent {
            status: ItemStatus::Downloading,
            info: &info,
            filename: None,
        };
        if config.dispatch(&starting)? == HookDecision::AlreadyComplete {
            debug!(item = info.display_name(), "item marked complete by hook");
            summary.record(info, ItemOutcome::Skipped);
            return Ok(());
        }

        match self.fetch(config, &entry, &info)? {
            Fetch::Saved(path) => {
                config.dispatch(&ItemEvent {
                    status: ItemStatus::Finished,
                    info: &info,
                    filename: Some(&path),
                })?;
                summary.record(info, ItemOutcome::Downloaded(path));
            }
            Fetch::Failed(reason) => {
                debug!(item = info.display_name(), %reason, "item failed");
                config.dispatch(&ItemEvent {
                    status: ItemStatus::Error,
                    info: &info,
                    filename: None,
                })?;
                summary.record(info, ItemOutcome::Failed(reason));
            }
        }
        Ok(())
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl Engine for YtDlpEngine {
    fn download(&self, config: &mut EngineConfig, urls: &[String]) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();

        for url in urls {
            let mut listing = self.spawn_listing(config, url)?;
            let mut listed = 0usize;
            let mut last_error = None;

            while let Some(line) = listing.next_line()? {
                for diag in listing.pending_diagnostics() {
                    record_listing_line(config.logger.as_ref(), &diag, &mut summary, &mut last_error);
                }
                let Some(entry) = parse_entry(&line, config.logger.as_ref()) else {
                    continue;
                };
                listed += 1;
                self.process(config, entry, &mut summary)?;
            }

            let status = listing.finish()?;
            for diag in listing.pending_diagnostics() {
                record_listing_line(config.logger.as_ref(), &diag, &mut summary, &mut last_error);
            }
            info!(url = %url, items = listed, "playlist processed");

            if listed == 0 && !status.success() {
                return Err(EngineError::Extraction(last_error.unwrap_or_else(|| {
                    format!("{} exited with {}", self.binary, status)
                })));
            }
        }

        Ok(summary)
    }
}

/// 读取一行（去掉行尾换行），非 UTF-8 字节按有损方式转换；EOF 返回 `None`。
fn read_line_lossy<R: Read>(reader: &mut BufReader<R>) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).trim_end().to_string()))
}

/// yt-dlp 把大于 10 的值当作码率，需要带 `K` 后缀。
fn audio_quality_arg(quality: &str) -> String {
    match quality.parse::<u32>() {
        Ok(q) if q > 10 => format!("{q}K"),
        _ => quality.to_string(),
    }
}

/// 按级别转发一行 stderr；是错误行时返回错误内容。
fn forward_line<'a>(logger: &dyn Logger, line: &'a str) -> Option<&'a str> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    if let Some(msg) = line.strip_prefix("ERROR:") {
        let msg = msg.trim_start();
        logger.error(msg);
        Some(msg)
    } else if let Some(msg) = line.strip_prefix("WARNING:") {
        logger.warning(msg.trim_start());
        None
    } else {
        logger.debug(line);
        None
    }
}

/// 转发整段 stderr，返回最后一条错误。
fn forward_diagnostics(logger: &dyn Logger, stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .filter_map(|line| forward_line(logger, line))
        .last()
        .map(str::to_string)
}

/// 枚举阶段的一行 stderr：转发，并把带条目 id 的错误记为失败条目。
fn record_listing_line(
    logger: &dyn Logger,
    line: &str,
    summary: &mut RunSummary,
    last_error: &mut Option<String>,
) {
    let Some(msg) = forward_line(logger, line) else {
        return;
    };
    if let Some((info, reason)) = item_failure(msg) {
        summary.record(info, ItemOutcome::Failed(reason));
    }
    *last_error = Some(msg.to_string());
}

fn item_failure(msg: &str) -> Option<(ItemInfo, String)> {
    let caps = re_item_error().captures(msg)?;
    let info = ItemInfo {
        id: Some(caps["id"].to_string()),
        ..ItemInfo::default()
    };
    Some((info, caps["reason"].trim().to_string()))
}

fn parse_entry(line: &str, logger: &dyn Logger) -> Option<Entry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(err) => {
            logger.debug(&format!("ignoring non-JSON output line: {err}"));
            return None;
        }
    };
    match ItemInfo::deserialize(&raw) {
        Ok(info) => Some(Entry { info, raw }),
        Err(err) => {
            logger.debug(&format!("ignoring malformed item info: {err}"));
            None
        }
    }
}
