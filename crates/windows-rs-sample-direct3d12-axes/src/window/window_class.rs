use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::sample_error::MyResult;

/// Per-window behaviour, owned by the window for its whole lifetime.
pub trait WindowClass: Sized {
    /// The name of the window class.
    const ID: PCWSTR;

    /// Returns `true` when the message was handled and `DefWindowProcW` must be skipped.
    fn handle(&mut self, message: u32, wparam: WPARAM) -> bool;
}

pub fn create_window_class_struct<W: WindowClass>(instance: HMODULE) -> MyResult<WNDCLASSEXW> {
    // WNDCLASSEXW - https://learn.microsoft.com/en-us/windows/win32/api/winuser/ns-winuser-wndclassexw
    let wc = WNDCLASSEXW {
        cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wndproc::<W>),
        hInstance: instance.into(),
        hCursor: unsafe { LoadCursorW(None, IDC_ARROW)? },
        lpszClassName: W::ID,
        ..Default::default()
    };
    Ok(wc)
}

pub fn register_window_class(class: &WNDCLASSEXW) -> MyResult<u16> {
    let atom = unsafe { RegisterClassExW(class) };
    if atom == 0 {
        return Err(Error::from(unsafe { GetLastError() }.to_hresult()).into());
    }
    Ok(atom)
}

/// Creates a window of class `W`. The window takes ownership of `behaviour` and drops it
/// on `WM_NCDESTROY`.
pub fn create_window<W: WindowClass>(
    our_module: HMODULE,
    window_rect: RECT,
    title: PCWSTR,
    behaviour: W,
) -> MyResult<HWND> {
    let behaviour = Box::into_raw(Box::new(behaviour));
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            W::ID,
            title,
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            window_rect.right - window_rect.left,
            window_rect.bottom - window_rect.top,
            None,
            None,
            Some(our_module.into()),
            Some(behaviour as *const _),
        )
    };
    match hwnd {
        Ok(hwnd) => Ok(hwnd),
        Err(e) => {
            // WM_CREATE always succeeds, so creation failed before it stored the pointer.
            drop(unsafe { Box::from_raw(behaviour) });
            Err(e.into())
        }
    }
}

fn safe_handle<W: WindowClass>(behaviour: &mut W, message: u32, wparam: WPARAM) -> bool {
    // Unwinding across the FFI boundary is undefined; treat a panic as unhandled.
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        behaviour.handle(message, wparam)
    }))
    .unwrap_or(false)
}

extern "system" fn wndproc<W: WindowClass>(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if message == WM_CREATE {
        unsafe {
            let create_struct: &CREATESTRUCTW = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(window, GWLP_USERDATA, create_struct.lpCreateParams as _);
        }
        return LRESULT(0);
    }

    let user_data = unsafe { GetWindowLongPtrW(window, GWLP_USERDATA) };
    let Some(mut behaviour) = std::ptr::NonNull::<W>::new(user_data as *mut W) else {
        // We can get messages before WM_CREATE or after WM_NCDESTROY.
        return unsafe { DefWindowProcW(window, message, wparam, lparam) };
    };

    let handled = match message {
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            true
        }
        WM_NCDESTROY => {
            unsafe {
                SetWindowLongPtrW(window, GWLP_USERDATA, 0);
                drop(Box::from_raw(behaviour.as_ptr()));
            }
            false
        }
        _ => safe_handle(unsafe { behaviour.as_mut() }, message, wparam),
    };

    if handled {
        LRESULT(0)
    } else {
        unsafe { DefWindowProcW(window, message, wparam, lparam) }
    }
}
