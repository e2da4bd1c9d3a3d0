//! 由 [`DownloadRequest`] 构建引擎配置。

use crate::base_system::settings::Settings;
use crate::engine::template::{OutputTemplate, TemplateError};
use crate::engine::{EngineConfig, FormatSelector, LifecycleObserver, PostProcessor};

use super::console::ConsoleLogger;
use super::guard::SkipExistingGuard;
use super::request::DownloadRequest;

pub const INDEX_PREFIX: &str = "%(playlist_index)03d-";
pub const NAME_PATTERN: &str = "%(title)s.%(ext)s";

pub fn output_template(request: &DownloadRequest) -> Result<OutputTemplate, TemplateError> {
    let pattern = if request.prefix_index {
        format!("{INDEX_PREFIX}{NAME_PATTERN}")
    } else {
        NAME_PATTERN.to_string()
    };
    OutputTemplate::parse(&request.output_dir, &pattern)
}

pub fn format_selection(
    request: &DownloadRequest,
    settings: &Settings,
) -> (FormatSelector, Vec<PostProcessor>) {
    if request.audio_only {
        (
            FormatSelector::AudioOnly,
            vec![PostProcessor::ExtractAudio {
                codec: settings.audio_codec.clone(),
                quality: settings.audio_quality.clone(),
            }],
        )
    } else {
        (
            FormatSelector::VideoAudio,
            vec![PostProcessor::MergeInto {
                container: settings.merge_output_format.clone(),
            }],
        )
    }
}

pub fn build_engine_config(
    request: &DownloadRequest,
    settings: &Settings,
) -> Result<EngineConfig, TemplateError> {
    let template = output_template(request)?;
    let (format, postprocessors) = format_selection(request, settings);
    let guard: Box<dyn LifecycleObserver> =
        Box::new(SkipExistingGuard::new(template.clone(), request.force_replace));

    Ok(EngineConfig {
        output_template: template,
        format,
        postprocessors,
        logger: Box::new(ConsoleLogger),
        lifecycle_hooks: vec![guard],
        retries: request.retry_count,
        overwrite: request.force_replace,
    })
}
