use tracing::debug;
use windows::core::*;
use windows::Win32::Foundation::WPARAM;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::window_class::WindowClass;

/// Logs keyboard input; rendering is driven from the message loop, not from here.
#[derive(Debug, Default)]
pub struct SampleWindow {
    held_keys: Vec<u16>,
}

impl WindowClass for SampleWindow {
    const ID: PCWSTR = w!("SampleDirect3D12Axes");

    fn handle(&mut self, message: u32, wparam: WPARAM) -> bool {
        match message {
            WM_KEYDOWN => {
                let key = wparam.0 as u16;
                if !self.held_keys.contains(&key) {
                    self.held_keys.push(key);
                    debug!("key down: 0x{key:02X}");
                }
                true
            }
            WM_KEYUP => {
                let key = wparam.0 as u16;
                self.held_keys.retain(|held| *held != key);
                debug!("key up: 0x{key:02X}");
                true
            }
            _ => false,
        }
    }
}
