//! 跳过已存在文件的生命周期钩子。
//!
//! 在条目进入 `Downloading` 状态、尚未拉取任何数据之前，用条目元数据和输出模板
//! 重建目标路径；文件已存在且未要求强制替换时，告知引擎该条目已完成。

use std::path::{Path, PathBuf};

use tracing::info;

use crate::engine::template::{FIELD_PLAYLIST_INDEX, OutputTemplate, TemplateError};
use crate::engine::{BoxError, HookDecision, ItemEvent, ItemInfo, ItemStatus, LifecycleObserver};

pub fn skip_notice(path: &Path) -> String {
    format!("File '{}' already exists and was skipped.", path.display())
}

pub struct SkipExistingGuard {
    template: OutputTemplate,
    /// 去掉播放列表序号的同一模板，用于不在播放列表中的条目。
    fallback: Option<OutputTemplate>,
    force_replace: bool,
}

impl SkipExistingGuard {
    pub fn new(template: OutputTemplate, force_replace: bool) -> Self {
        let fallback = template
            .contains_field(FIELD_PLAYLIST_INDEX)
            .then(|| template.without_field(FIELD_PLAYLIST_INDEX));
        Self {
            template,
            fallback,
            force_replace,
        }
    }

    /// `info` 的预期目标路径。只有缺少播放列表序号时才回退，
    /// 其他替换失败直接返回错误。
    pub fn resolve(&self, info: &ItemInfo) -> Result<PathBuf, TemplateError> {
        match self.template.render(info) {
            Err(TemplateError::MissingField(field)) if field == FIELD_PLAYLIST_INDEX => {
                match &self.fallback {
                    Some(fallback) => fallback.render(info),
                    None => Err(TemplateError::MissingField(field)),
                }
            }
            other => other,
        }
    }
}

impl LifecycleObserver for SkipExistingGuard {
    fn on_event(&mut self, event: &ItemEvent<'_>) -> Result<HookDecision, BoxError> {
        if event.status != ItemStatus::Downloading {
            return Ok(HookDecision::Proceed);
        }

        let path = self.resolve(event.info)?;
        if self.force_replace || !path.exists() {
            return Ok(HookDecision::Proceed);
        }

        println!("{}", skip_notice(&path));
        info!(path = %path.display(), "目标文件已存在，跳过");
        Ok(HookDecision::AlreadyComplete)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const PREFIXED: &str = "%(playlist_index)03d-%(title)s.%(ext)s";

    fn item(title: Option<&str>, index: Option<u64>) -> ItemInfo {
        ItemInfo {
            id: Some("id0".to_string()),
            title: title.map(str::to_string),
            ext: Some("mp3".to_string()),
            playlist_index: index,
        }
    }

    fn downloading(info: &ItemInfo) -> ItemEvent<'_> {
        ItemEvent {
            status: ItemStatus::Downloading,
            info,
            filename: None,
        }
    }

    #[test]
    fn existing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("002-Song.mp3"), b"old").unwrap();
        let template = OutputTemplate::parse(dir.path(), PREFIXED).unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        let info = item(Some("Song"), Some(2));
        assert_eq!(
            guard.on_event(&downloading(&info)).unwrap(),
            HookDecision::AlreadyComplete
        );
    }

    #[test]
    fn absent_file_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let template = OutputTemplate::parse(dir.path(), PREFIXED).unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        let info = item(Some("Song"), Some(2));
        assert_eq!(guard.on_event(&downloading(&info)).unwrap(), HookDecision::Proceed);
    }

    #[test]
    fn force_replace_proceeds_over_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Song.mp3"), b"old").unwrap();
        let template = OutputTemplate::parse(dir.path(), "%(title)s.%(ext)s").unwrap();
        let mut guard = SkipExistingGuard::new(template, true);

        let info = item(Some("Song"), None);
        assert_eq!(guard.on_event(&downloading(&info)).unwrap(), HookDecision::Proceed);
    }

    #[test]
    fn single_item_falls_back_to_unprefixed_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Song.mp3"), b"old").unwrap();
        let template = OutputTemplate::parse(dir.path(), PREFIXED).unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        let info = item(Some("Song"), None);
        assert_eq!(guard.resolve(&info).unwrap(), dir.path().join("Song.mp3"));
        assert_eq!(
            guard.on_event(&downloading(&info)).unwrap(),
            HookDecision::AlreadyComplete
        );
    }

    #[test]
    fn other_missing_fields_are_hard_errors() {
        let template = OutputTemplate::parse("out", PREFIXED).unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        let info = item(None, Some(1));
        assert_eq!(
            guard.resolve(&info),
            Err(TemplateError::MissingField("title".to_string()))
        );
        assert!(guard.on_event(&downloading(&info)).is_err());
    }

    #[test]
    fn finished_events_are_ignored() {
        let template = OutputTemplate::parse("out", PREFIXED).unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        // 在 `Downloading` 阶段会是硬错误
        let info = item(None, None);
        let event = ItemEvent {
            status: ItemStatus::Finished,
            info: &info,
            filename: Some(Path::new("out/whatever.mp3")),
        };
        assert_eq!(guard.on_event(&event).unwrap(), HookDecision::Proceed);
    }

    #[test]
    fn timestamp_title_matches_engine_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Live at 10_30.mp3"), b"old").unwrap();
        let template = OutputTemplate::parse(dir.path(), "%(title)s.%(ext)s").unwrap();
        let mut guard = SkipExistingGuard::new(template, false);

        let info = item(Some("Live at 10:30"), None);
        assert_eq!(guard.resolve(&info).unwrap(), dir.path().join("Live at 10_30.mp3"));
        assert_eq!(
            guard.on_event(&downloading(&info)).unwrap(),
            HookDecision::AlreadyComplete
        );
    }

    #[test]
    fn notice_names_the_path() {
        assert_eq!(
            skip_notice(Path::new("out/001-Song.mp3")),
            "File 'out/001-Song.mp3' already exists and was skipped."
        );
    }
}
