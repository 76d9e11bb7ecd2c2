use sample_direct3d12_axes::config::build_command_line;
use sample_direct3d12_axes::headless;
use sample_direct3d12_axes::sample_error::MyResult;
use tracing::info;

pub fn main() -> MyResult<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_target(false)
        .init();

    let command_line = build_command_line()?;
    info!("{command_line:?}");

    if command_line.headless {
        headless::run(&command_line)?;
        return Ok(());
    }

    #[cfg(windows)]
    {
        sample_direct3d12_axes::window::run_windowed(&command_line)
    }

    #[cfg(not(windows))]
    {
        info!("no window system available, rendering headless");
        let command_line = sample_direct3d12_axes::config::SampleCommandLine {
            headless: true,
            ..command_line
        };
        headless::run(&command_line)?;
        Ok(())
    }
}
