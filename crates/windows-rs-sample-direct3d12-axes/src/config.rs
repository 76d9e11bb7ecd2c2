use tracing::warn;

use crate::gpu::FeatureLevel;
use crate::sample_error::MyResult;
use crate::sample_error::StartupError;
use crate::scene::CLEAR_COLOR;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;
pub const DEFAULT_SHADER: &str = "vcolors";
pub const DEFAULT_HEADLESS_FRAMES: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCommandLine {
    pub use_warp_device: bool,
    pub headless: bool,
    /// `None` renders until the window closes.
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub shader: String,
}

impl Default for SampleCommandLine {
    fn default() -> Self {
        Self {
            use_warp_device: false,
            headless: false,
            frames: None,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            shader: DEFAULT_SHADER.to_owned(),
        }
    }
}

impl SampleCommandLine {
    /// Frames to render; headless runs stop after a fixed count when none is given.
    pub fn frame_limit(&self) -> Option<u64> {
        match (self.frames, self.headless) {
            (Some(frames), _) => Some(frames),
            (None, true) => Some(DEFAULT_HEADLESS_FRAMES),
            (None, false) => None,
        }
    }
}

pub fn build_command_line() -> MyResult<SampleCommandLine> {
    parse_command_line(std::env::args().skip(1))
}

fn parse_number<T: std::str::FromStr>(argument: &str, value: Option<String>) -> MyResult<T> {
    let value = value.unwrap_or_default();
    match value.parse::<T>() {
        Ok(n) => Ok(n),
        Err(_) => Err(StartupError::InvalidArgument {
            argument: argument.to_owned(),
            value,
        }
        .into()),
    }
}

fn parse_dimension(argument: &str, value: Option<String>) -> MyResult<u32> {
    let n: u32 = parse_number(argument, value)?;
    if n == 0 {
        return Err(StartupError::InvalidArgument {
            argument: argument.to_owned(),
            value: n.to_string(),
        }
        .into());
    }
    Ok(n)
}

/// Flags are matched case-insensitively; `-`, `--` and `/` prefixes are interchangeable.
pub fn parse_command_line(args: impl IntoIterator<Item = String>) -> MyResult<SampleCommandLine> {
    let mut command_line = SampleCommandLine::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let flag = arg
            .trim_start_matches('-')
            .trim_start_matches('/')
            .to_ascii_lowercase();
        match flag.as_str() {
            "warp" => command_line.use_warp_device = true,
            "headless" => command_line.headless = true,
            "frames" => command_line.frames = Some(parse_number(&arg, args.next())?),
            "width" => command_line.width = parse_dimension(&arg, args.next())?,
            "height" => command_line.height = parse_dimension(&arg, args.next())?,
            "shader" => match args.next() {
                Some(name) if !name.is_empty() => command_line.shader = name,
                other => {
                    return Err(StartupError::InvalidArgument {
                        argument: arg,
                        value: other.unwrap_or_default(),
                    }
                    .into())
                }
            },
            _ => warn!("ignoring unrecognized argument {arg:?}"),
        }
    }

    Ok(command_line)
}

/// What the renderer needs from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    pub minimum_feature_level: FeatureLevel,
    pub use_warp_device: bool,
    pub shader: String,
    pub clear_color: [f32; 4],
    pub sync_interval: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            minimum_feature_level: FeatureLevel::Level11_0,
            use_warp_device: false,
            shader: DEFAULT_SHADER.to_owned(),
            clear_color: CLEAR_COLOR,
            sync_interval: 1,
        }
    }
}

impl From<&SampleCommandLine> for RendererSettings {
    fn from(command_line: &SampleCommandLine) -> Self {
        Self {
            use_warp_device: command_line.use_warp_device,
            shader: command_line.shader.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> MyResult<SampleCommandLine> {
        parse_command_line(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn defaults() {
        let command_line = parse(&[]).unwrap();
        assert_eq!(command_line, SampleCommandLine::default());
        assert_eq!(command_line.width, 800);
        assert_eq!(command_line.height, 600);
        assert_eq!(command_line.frame_limit(), None);
    }

    #[test]
    fn warp_spellings() {
        for spelling in ["-warp", "/warp", "--WARP", "-Warp"] {
            assert!(parse(&[spelling]).unwrap().use_warp_device, "{spelling}");
        }
    }

    #[test]
    fn headless_defaults_to_a_hundred_frames() {
        let command_line = parse(&["--headless"]).unwrap();
        assert_eq!(command_line.frame_limit(), Some(100));
        let command_line = parse(&["--headless", "--frames", "3"]).unwrap();
        assert_eq!(command_line.frame_limit(), Some(3));
    }

    #[test]
    fn sizes_and_shader() {
        let command_line =
            parse(&["--width", "1024", "--height", "768", "--shader", "flat"]).unwrap();
        assert_eq!((command_line.width, command_line.height), (1024, 768));
        assert_eq!(command_line.shader, "flat");
    }

    #[test]
    fn unknown_arguments_are_ignored() {
        assert_eq!(
            parse(&["--verbose", "extra"]).unwrap(),
            SampleCommandLine::default()
        );
    }

    #[test]
    fn malformed_numbers_are_startup_errors() {
        for args in [
            &["--frames", "many"][..],
            &["--width", "0"][..],
            &["--height"][..],
        ] {
            let report = parse(args).unwrap_err();
            assert!(
                matches!(
                    report.downcast_ref::<StartupError>(),
                    Some(StartupError::InvalidArgument { .. })
                ),
                "{args:?}"
            );
        }
    }

    #[test]
    fn settings_follow_the_command_line() {
        let settings = RendererSettings::from(&parse(&["-warp", "--shader", "flat"]).unwrap());
        assert!(settings.use_warp_device);
        assert_eq!(settings.shader, "flat");
        assert_eq!(settings.minimum_feature_level, FeatureLevel::Level11_0);
        assert_eq!(settings.sync_interval, 1);
        assert_eq!(settings.clear_color, [0.6, 0.7, 0.8, 1.0]);
    }
}
