//! The Win32 window and message loop that drive the D3D12 renderer.

mod sample_window;
mod window_class;

use tracing::error;
use tracing::info;
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::*;
use windows::Win32::UI::WindowsAndMessaging::*;

pub use sample_window::SampleWindow;
pub use window_class::create_window;
pub use window_class::create_window_class_struct;
pub use window_class::register_window_class;
pub use window_class::WindowClass;

use crate::config::RendererSettings;
use crate::config::SampleCommandLine;
use crate::d3d12::create_factory;
use crate::d3d12::D3D12Backend;
use crate::renderer::Renderer;
use crate::sample_error::MyResult;

fn get_handle_to_file_used_to_create_the_calling_process() -> MyResult<HMODULE> {
    let mut out = Default::default();
    unsafe { GetModuleHandleExW(Default::default(), None, &mut out)? };
    Ok(out)
}

/// Opens the window, renders until it closes (or the frame limit is reached), then tears
/// the renderer down after the GPU has gone idle.
pub fn run_windowed(command_line: &SampleCommandLine) -> MyResult<()> {
    let our_module = get_handle_to_file_used_to_create_the_calling_process()?;

    let window_class = create_window_class_struct::<SampleWindow>(our_module)?;
    register_window_class(&window_class)?;

    let (width, height) = (command_line.width, command_line.height);
    let mut window_rect = RECT {
        left: 0,
        top: 0,
        right: width as i32,
        bottom: height as i32,
    };
    // Calculates the required size of the window rectangle, based on the desired size of the client rectangle.
    unsafe { AdjustWindowRect(&mut window_rect, WS_OVERLAPPEDWINDOW, false)? };

    let title = match command_line.use_warp_device {
        true => w!("Direct3D 12 Axes (WARP)"),
        false => w!("Direct3D 12 Axes"),
    };
    let hwnd = create_window(our_module, window_rect, title, SampleWindow::default())?;

    let factory = create_factory()?;
    let settings = RendererSettings::from(command_line);
    let mut renderer =
        match Renderer::<D3D12Backend>::init(factory.clone(), &hwnd, width, height, &settings) {
            Ok(renderer) => renderer,
            Err(e) => {
                error!("Renderer initialization failed: {e}");
                factory.print_debug_messages();
                unsafe { DestroyWindow(hwnd) }.ok();
                return Err(e);
            }
        };

    unsafe { _ = ShowWindow(hwnd, SW_SHOW) };

    let frame_limit = command_line.frame_limit();
    let mut render_error = None;
    let mut closing = false;
    let mut done = false;
    while !done {
        let mut message = MSG::default();

        if unsafe { PeekMessageA(&mut message, None, 0, 0, PM_REMOVE) }.into() {
            unsafe {
                _ = TranslateMessage(&message);
                DispatchMessageA(&message);
            }

            if message.message == WM_QUIT {
                done = true;
            }
        } else if !closing {
            // Render when idle
            if let Err(e) = renderer.render() {
                error!("Render error: {e:?}");
                factory.print_debug_messages();
                render_error = Some(e);
            }
            let limit_reached = frame_limit.is_some_and(|limit| renderer.frames_rendered() >= limit);
            if render_error.is_some() || limit_reached {
                closing = true;
                unsafe { DestroyWindow(hwnd)? };
            }
        }
    }

    info!("message loop finished after {} frames", renderer.frames_rendered());
    renderer.destroy()?;
    match render_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
