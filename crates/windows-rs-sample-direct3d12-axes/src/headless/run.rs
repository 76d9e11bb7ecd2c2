use eyre::eyre;
use tracing::error;
use tracing::info;

use super::HeadlessBackend;
use super::HeadlessInstance;
use super::HeadlessWindow;
use crate::config::RendererSettings;
use crate::config::SampleCommandLine;
use crate::renderer::Renderer;
use crate::sample_error::MyResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub adapter: String,
    pub frames: u64,
    pub final_fence_value: u64,
    pub presents: usize,
    pub signals: usize,
    pub event_waits: usize,
}

/// Renders the configured number of frames without a window or a GPU, then checks
/// that nothing was left alive and nothing was recorded wrongly.
pub fn run(command_line: &SampleCommandLine) -> MyResult<RunSummary> {
    let instance = HeadlessInstance::default();
    let window = HeadlessWindow {
        width: command_line.width,
        height: command_line.height,
    };
    let settings = RendererSettings::from(command_line);
    let frames = command_line.frame_limit().unwrap_or_default();

    let mut renderer = Renderer::<HeadlessBackend>::init(
        instance.factory(),
        &window,
        window.width,
        window.height,
        &settings,
    )?;
    for _ in 0..frames {
        renderer.render()?;
    }
    let final_fence_value = renderer.fence_value();
    let adapter = renderer.adapter_desc().name.clone();
    renderer.destroy()?;

    let stats = instance.stats();
    for message in instance.validation_errors() {
        error!("{message}");
    }
    if stats.validation_errors > 0 {
        return Err(eyre!("{} validation errors", stats.validation_errors).into());
    }
    let leaked = instance.live_object_kinds();
    if !leaked.is_empty() {
        return Err(eyre!("objects still alive after destroy: {leaked:?}").into());
    }

    let summary = RunSummary {
        adapter,
        frames,
        final_fence_value,
        presents: stats.presents,
        signals: stats.signals,
        event_waits: stats.event_waits,
    };
    info!("headless run finished: {summary:?}");
    Ok(summary)
}
