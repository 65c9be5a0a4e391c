//! [`Desktop`] over plain Win32 window messages.
//!
//! Every request to a control of the target goes through
//! `SendMessageTimeoutW`, so a hung message loop surfaces as
//! [`UiError::NotReady`] instead of blocking the driver. Clicks and menu
//! commands are posted, because they usually open a modal dialog and a sent
//! message would not return until that dialog closes.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::mem::size_of;

use tracing::{debug, trace};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT, TRUE, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BI_RGB, BITMAPINFO, BITMAPINFOHEADER, BitBlt, CreateCompatibleBitmap, CreateCompatibleDC,
    DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC, SRCCOPY, SelectObject,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    VIRTUAL_KEY, VK_DOWN, VK_END, VK_ESCAPE, VK_HOME, VK_LEFT, VK_RETURN, VK_RIGHT, VK_TAB, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BM_CLICK, BM_GETCHECK, CB_FINDSTRINGEXACT, CB_SETCURSEL, CBN_SELCHANGE, EnumChildWindows,
    EnumWindows, GA_PARENT, GetAncestor, GetClassNameW, GetDlgCtrlID, GetMenu, GetMenuItemCount,
    GetMenuItemID, GetMenuState, GetMenuStringW, GetSubMenu, GetWindowRect,
    GetWindowThreadProcessId, HMENU, IsWindow, IsWindowEnabled, IsWindowVisible, MF_BYPOSITION,
    MF_DISABLED, MF_GRAYED, MN_GETHMENU, PostMessageW, SMTO_ABORTIFHUNG, SW_MINIMIZE,
    SendMessageTimeoutW, ShowWindow, WM_CHAR, WM_COMMAND, WM_GETTEXT, WM_GETTEXTLENGTH,
    WM_INITMENUPOPUP, WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_SETTEXT,
};

use crate::core::keys::Key;
use crate::error::UiError;
use crate::io::desktop::{
    Control, ControlSelector, Desktop, Screenshot, WindowId, WindowQuery, WindowState,
    menu_path_segments, pick_menu_entry,
};

/// Per-message budget before the target counts as unresponsive.
const MESSAGE_TIMEOUT_MS: u32 = 2_000;
/// Class of the window that hosts a tracked popup menu.
const POPUP_MENU_CLASS: &str = "#32768";
/// Undocumented, but stable since NT: highlight an item of a popup menu window.
const MN_SELECTITEM: u32 = 0x01E5;
const MK_LBUTTON: usize = 0x0001;
const BST_CHECKED: usize = 1;

/// Desktop automation through window messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Desktop;

impl Win32Desktop {
    pub fn new() -> Self {
        Self
    }
}

fn hwnd(window: WindowId) -> HWND {
    HWND(window.0 as *mut c_void)
}

fn window_id(hwnd: HWND) -> WindowId {
    WindowId(hwnd.0 as isize)
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(Some(0)).collect()
}

unsafe extern "system" fn push_hwnd(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam is the `&mut Vec<HWND>` passed by `top_level_windows` or
    // `child_windows`, alive for the duration of the enumeration.
    let found = unsafe { &mut *(lparam.0 as *mut Vec<HWND>) };
    found.push(hwnd);
    TRUE
}

fn top_level_windows() -> Vec<HWND> {
    let mut found: Vec<HWND> = Vec::new();
    // SAFETY: the callback only pushes into `found`, which outlives the call.
    unsafe {
        let _ = EnumWindows(Some(push_hwnd), LPARAM(&mut found as *mut Vec<HWND> as isize));
    }
    found
}

/// All descendants of `parent`, parents before children.
fn child_windows(parent: HWND) -> Vec<HWND> {
    let mut found: Vec<HWND> = Vec::new();
    // SAFETY: as in `top_level_windows`.
    unsafe {
        let _ = EnumChildWindows(
            parent,
            Some(push_hwnd),
            LPARAM(&mut found as *mut Vec<HWND> as isize),
        );
    }
    found
}

fn class_name(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    // SAFETY: the buffer length is passed implicitly by the slice.
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

fn owner_pid(hwnd: HWND) -> u32 {
    let mut pid = 0u32;
    // SAFETY: `pid` is a valid out pointer.
    unsafe {
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
    }
    pid
}

/// `SendMessageTimeoutW` that maps a hung or failed call to `NotReady`.
fn send(hwnd: HWND, msg: u32, wparam: usize, lparam: isize, what: &str) -> Result<usize, UiError> {
    let mut result = 0usize;
    // SAFETY: any pointer carried in `lparam` is owned by the caller and lives
    // until this synchronous call returns.
    let ok = unsafe {
        SendMessageTimeoutW(
            hwnd,
            msg,
            WPARAM(wparam),
            LPARAM(lparam),
            SMTO_ABORTIFHUNG,
            MESSAGE_TIMEOUT_MS,
            Some(&mut result),
        )
    };
    if ok.0 == 0 {
        trace!(msg, what, "message timed out");
        return Err(UiError::NotReady(what.to_string()));
    }
    Ok(result)
}

fn post(hwnd: HWND, msg: u32, wparam: usize, lparam: isize, what: &str) -> Result<(), UiError> {
    // SAFETY: posted messages carry no pointers.
    unsafe { PostMessageW(hwnd, msg, WPARAM(wparam), LPARAM(lparam)) }
        .map_err(|err| UiError::Backend(format!("post to {what}: {err}")))
}

fn window_text(hwnd: HWND, what: &str) -> Result<String, UiError> {
    let len = send(hwnd, WM_GETTEXTLENGTH, 0, 0, what)?;
    let mut buf = vec![0u16; len + 1];
    let copied = send(hwnd, WM_GETTEXT, buf.len(), buf.as_mut_ptr() as isize, what)?;
    buf.truncate(copied.min(len));
    Ok(String::from_utf16_lossy(&buf))
}

fn make_lparam(x: i32, y: i32) -> isize {
    (((y as u32 & 0xffff) << 16) | (x as u32 & 0xffff)) as i32 as isize
}

fn virtual_key(key: Key) -> Option<VIRTUAL_KEY> {
    let vk = match key {
        Key::Enter => VK_RETURN,
        Key::Tab => VK_TAB,
        Key::Escape => VK_ESCAPE,
        Key::Home => VK_HOME,
        Key::End => VK_END,
        Key::Up => VK_UP,
        Key::Down => VK_DOWN,
        Key::Left => VK_LEFT,
        Key::Right => VK_RIGHT,
        Key::Char(_) => return None,
    };
    Some(vk)
}

impl Win32Desktop {
    fn resolve(&self, window: WindowId, control: &Control) -> Result<HWND, UiError> {
        let parent = hwnd(window);
        // SAFETY: IsWindow accepts any handle value.
        if !unsafe { IsWindow(parent) }.as_bool() {
            return Err(UiError::NotFound(format!("window for {control}")));
        }
        let mut ordinal = 0usize;
        for child in child_windows(parent) {
            if class_name(child) != control.class {
                continue;
            }
            match &control.selector {
                ControlSelector::Nth(wanted) => {
                    ordinal += 1;
                    if ordinal == *wanted {
                        return Ok(child);
                    }
                }
                ControlSelector::Titled(title) => {
                    if window_text(child, &control.to_string())? == *title {
                        return Ok(child);
                    }
                }
            }
        }
        Err(UiError::NotFound(control.to_string()))
    }

    fn require_enabled(&self, control_hwnd: HWND, control: &Control) -> Result<(), UiError> {
        // SAFETY: plain handle queries.
        let enabled = unsafe { IsWindowEnabled(control_hwnd) }.as_bool();
        if enabled {
            Ok(())
        } else {
            Err(UiError::Disabled(control.to_string()))
        }
    }

    /// Walk a `Top->Sub->Item` path to the menu and position of its last item.
    fn walk_menu(&self, owner: HWND, path: &str) -> Result<(HMENU, u32), UiError> {
        let segments = menu_path_segments(path);
        if segments.is_empty() {
            return Err(UiError::NotFound(format!("menu {path:?}")));
        }
        // SAFETY: GetMenu tolerates any window handle.
        let mut menu = unsafe { GetMenu(owner) };
        if menu.0.is_null() {
            return Err(UiError::NotReady(format!("menu bar for {path}")));
        }
        for (depth, segment) in segments.iter().enumerate() {
            let labels = menu_labels(menu);
            let Some(position) = pick_menu_entry(&labels, segment) else {
                return Err(UiError::NotFound(format!("menu item {segment:?} of {path}")));
            };
            if depth + 1 == segments.len() {
                return Ok((menu, position as u32));
            }
            // SAFETY: `menu` came from GetMenu/GetSubMenu of a live window.
            let sub = unsafe { GetSubMenu(menu, position as i32) };
            if sub.0.is_null() {
                return Err(UiError::NotFound(format!("submenu {segment:?} of {path}")));
            }
            // Lets the application refresh item labels and enabled states.
            send(
                owner,
                WM_INITMENUPOPUP,
                sub.0 as usize,
                position as isize,
                path,
            )?;
            menu = sub;
        }
        Err(UiError::NotFound(format!("menu {path:?}")))
    }
}

fn menu_labels(menu: HMENU) -> Vec<String> {
    // SAFETY: `menu` is a live menu handle; buffers are sized by the slice.
    unsafe {
        let count = GetMenuItemCount(menu).max(0) as u32;
        (0..count)
            .map(|position| {
                let mut buf = [0u16; 256];
                let len = GetMenuStringW(menu, position, Some(&mut buf), MF_BYPOSITION);
                String::from_utf16_lossy(&buf[..len.max(0) as usize])
            })
            .collect()
    }
}

impl Desktop for Win32Desktop {
    fn find_window(&self, pid: u32, query: &WindowQuery) -> Result<Option<WindowId>, UiError> {
        let mut fallback = None;
        for candidate in top_level_windows() {
            if owner_pid(candidate) != pid {
                continue;
            }
            if let Some(class) = &query.class
                && class_name(candidate) != *class
            {
                continue;
            }
            if let Some(title) = &query.title
                && window_text(candidate, &query.to_string())? != *title
            {
                continue;
            }
            // SAFETY: plain handle query.
            if unsafe { IsWindowVisible(candidate) }.as_bool() {
                return Ok(Some(window_id(candidate)));
            }
            fallback.get_or_insert(window_id(candidate));
        }
        Ok(fallback)
    }

    fn window_state(&self, window: WindowId) -> Result<Option<WindowState>, UiError> {
        let handle = hwnd(window);
        // SAFETY: plain handle queries.
        unsafe {
            if !IsWindow(handle).as_bool() {
                return Ok(None);
            }
            Ok(Some(WindowState {
                visible: IsWindowVisible(handle).as_bool(),
                enabled: IsWindowEnabled(handle).as_bool(),
            }))
        }
    }

    fn control_text(&self, window: WindowId, control: &Control) -> Result<Option<String>, UiError> {
        match self.resolve(window, control) {
            Ok(child) => window_text(child, &control.to_string()).map(Some),
            Err(UiError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn click(&self, window: WindowId, control: &Control) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        self.require_enabled(child, control)?;
        debug!(control = %control, "click");
        post(child, BM_CLICK, 0, 0, &control.to_string())
    }

    fn click_at(&self, window: WindowId, control: &Control, x: i32, y: i32) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        self.require_enabled(child, control)?;
        debug!(control = %control, x, y, "click at");
        let what = control.to_string();
        let at = make_lparam(x, y);
        post(child, WM_LBUTTONDOWN, MK_LBUTTON, at, &what)?;
        post(child, WM_LBUTTONUP, 0, at, &what)
    }

    fn set_text(&self, window: WindowId, control: &Control, text: &str) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        let buf = wide(text);
        send(child, WM_SETTEXT, 0, buf.as_ptr() as isize, &control.to_string())?;
        Ok(())
    }

    fn set_checked(&self, window: WindowId, control: &Control, checked: bool) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        self.require_enabled(child, control)?;
        let what = control.to_string();
        let current = send(child, BM_GETCHECK, 0, 0, &what)? == BST_CHECKED;
        if current != checked {
            post(child, BM_CLICK, 0, 0, &what)?;
        }
        Ok(())
    }

    fn select_item(&self, window: WindowId, control: &Control, item: &str) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        self.require_enabled(child, control)?;
        let what = control.to_string();
        let buf = wide(item);
        let index = send(child, CB_FINDSTRINGEXACT, usize::MAX, buf.as_ptr() as isize, &what)?;
        if index as isize == -1 {
            return Err(UiError::NotFound(format!("{item:?} in {what}")));
        }
        send(child, CB_SETCURSEL, index, 0, &what)?;

        // Setting the selection programmatically sends no notification.
        // SAFETY: plain handle queries.
        let (parent, id) = unsafe { (GetAncestor(child, GA_PARENT), GetDlgCtrlID(child)) };
        let wparam = ((CBN_SELCHANGE as usize) << 16) | (id as usize & 0xffff);
        post(parent, WM_COMMAND, wparam, child.0 as isize, &what)
    }

    fn send_keys(&self, window: WindowId, control: &Control, keys: &[Key]) -> Result<(), UiError> {
        let child = self.resolve(window, control)?;
        let what = control.to_string();
        for key in keys {
            match (virtual_key(*key), key) {
                (Some(vk), _) => {
                    post(child, WM_KEYDOWN, vk.0 as usize, 1, &what)?;
                    post(child, WM_KEYUP, vk.0 as usize, 0xC000_0001u32 as i32 as isize, &what)?;
                }
                (None, Key::Char(ch)) => {
                    let mut units = [0u16; 2];
                    for unit in ch.encode_utf16(&mut units) {
                        post(child, WM_CHAR, *unit as usize, 1, &what)?;
                    }
                }
                (None, _) => {}
            }
        }
        Ok(())
    }

    fn select_menu(&self, window: WindowId, path: &str) -> Result<(), UiError> {
        let owner = hwnd(window);
        let (menu, position) = self.walk_menu(owner, path)?;
        // SAFETY: `menu` and `position` come from `walk_menu` on a live window.
        let (state, id) = unsafe {
            (
                GetMenuState(menu, position, MF_BYPOSITION),
                GetMenuItemID(menu, position as i32),
            )
        };
        if state & (MF_GRAYED.0 | MF_DISABLED.0) != 0 {
            return Err(UiError::Disabled(path.to_string()));
        }
        if id == u32::MAX {
            return Err(UiError::NotFound(format!("{path} opens a submenu")));
        }
        debug!(path, id, "menu command");
        post(owner, WM_COMMAND, id as usize, 0, path)
    }

    fn menu_item_text(&self, window: WindowId, path: &str) -> Result<String, UiError> {
        let (menu, position) = self.walk_menu(hwnd(window), path)?;
        let labels = menu_labels(menu);
        labels
            .into_iter()
            .nth(position as usize)
            .ok_or_else(|| UiError::NotFound(path.to_string()))
    }

    fn select_popup_item(&self, pid: u32, item: &str) -> Result<(), UiError> {
        let popup = top_level_windows().into_iter().find(|candidate| {
            owner_pid(*candidate) == pid
                && class_name(*candidate) == POPUP_MENU_CLASS
                // SAFETY: plain handle query.
                && unsafe { IsWindowVisible(*candidate) }.as_bool()
        });
        let Some(popup) = popup else {
            return Err(UiError::NotFound(format!("popup menu for {item:?}")));
        };
        let raw = send(popup, MN_GETHMENU, 0, 0, item)?;
        let menu = HMENU(raw as *mut c_void);
        let labels = menu_labels(menu);
        let Some(position) = pick_menu_entry(&labels, item) else {
            return Err(UiError::NotFound(format!("popup item {item:?}")));
        };
        debug!(item, position, "popup item");
        post(popup, MN_SELECTITEM, position, 0, item)?;
        post(popup, WM_KEYDOWN, VK_RETURN.0 as usize, 1, item)
    }

    fn minimize(&self, window: WindowId) -> Result<(), UiError> {
        // SAFETY: ShowWindow tolerates any handle; the return value is the
        // previous visibility, not an error.
        unsafe {
            let _ = ShowWindow(hwnd(window), SW_MINIMIZE);
        }
        Ok(())
    }

    fn capture(&self, window: WindowId) -> Result<Screenshot, UiError> {
        let handle = hwnd(window);
        let mut rect = RECT::default();
        // SAFETY: every GDI object created here is released before returning;
        // `pixels` is sized for the 32-bit top-down DIB requested.
        unsafe {
            GetWindowRect(handle, &mut rect)
                .map_err(|err| UiError::Backend(format!("window rect: {err}")))?;
            let width = rect.right - rect.left;
            let height = rect.bottom - rect.top;
            if width <= 0 || height <= 0 {
                return Err(UiError::NotReady("window has no visible area".to_string()));
            }

            let screen = GetDC(HWND::default());
            let mem_dc = CreateCompatibleDC(screen);
            let bitmap = CreateCompatibleBitmap(screen, width, height);
            let old = SelectObject(mem_dc, bitmap);
            let blit = BitBlt(mem_dc, 0, 0, width, height, screen, rect.left, rect.top, SRCCOPY);

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut pixels = vec![0u8; width as usize * height as usize * 4];
            SelectObject(mem_dc, old);
            let lines = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(pixels.as_mut_ptr().cast::<c_void>()),
                &mut info,
                DIB_RGB_COLORS,
            );

            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen);

            blit.map_err(|err| UiError::Backend(format!("copy window pixels: {err}")))?;
            if lines != height {
                return Err(UiError::Backend("read window pixels".to_string()));
            }
            for pixel in pixels.chunks_exact_mut(4) {
                pixel.swap(0, 2);
                pixel[3] = 0xff;
            }
            Ok(Screenshot {
                width: width as u32,
                height: height as u32,
                rgba: pixels,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lparam_packs_client_coordinates() {
        assert_eq!(make_lparam(44, 73), (73 << 16) | 44);
    }

    #[test]
    fn only_named_keys_map_to_virtual_keys() {
        assert_eq!(virtual_key(Key::Down), Some(VK_DOWN));
        assert_eq!(virtual_key(Key::Char('p')), None);
    }
}
