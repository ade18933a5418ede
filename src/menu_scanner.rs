//! Menu shortcut scanner using the macOS Accessibility APIs.
//!
//! Given a process id, walks the application's AX menu tree
//! (AXApplication -> AXMenuBar -> AXMenuBarItem -> AXMenu -> AXMenuItem)
//! and extracts every declared command key, formatted canonically.
//!
//! The tree belongs to another process and its shape is not under our
//! control, so the walk is an explicit work-list with a depth bound and a
//! cap on total elements visited. Elements that do not answer the queried
//! attributes are treated as "no shortcut here" and their children are
//! still visited.
//!
//! Requires Accessibility permission in System Settings > Privacy &
//! Security > Accessibility.

#![allow(non_upper_case_globals)]

use crate::config::Config;
use crate::error::Result;
use tracing::debug;

/// Bounds on one menu-tree walk.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub element_cap: usize,
}

impl ScanLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.menu_depth,
            element_cap: config.menu_element_cap,
        }
    }
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Check if accessibility permissions are granted.
#[cfg(target_os = "macos")]
pub fn has_accessibility_permission() -> bool {
    macos_accessibility_client::accessibility::application_is_trusted()
}

/// Request accessibility permissions (shows the system prompt).
#[cfg(target_os = "macos")]
pub fn request_accessibility_permission() -> bool {
    macos_accessibility_client::accessibility::application_is_trusted_with_prompt()
}

#[cfg(not(target_os = "macos"))]
pub fn has_accessibility_permission() -> bool {
    false
}

#[cfg(not(target_os = "macos"))]
pub fn request_accessibility_permission() -> bool {
    false
}

/// Collect the formatted shortcuts declared in the menu tree of `pid`.
///
/// Returns combos in traversal order; duplicates are left for the catalog
/// to collapse. Attribute reads that fail are skipped, never fatal.
#[cfg(target_os = "macos")]
pub fn scan_menu_shortcuts(pid: i32, limits: ScanLimits) -> Result<Vec<String>> {
    ax::scan(pid, limits)
}

#[cfg(not(target_os = "macos"))]
pub fn scan_menu_shortcuts(_pid: i32, _limits: ScanLimits) -> Result<Vec<String>> {
    Err(crate::error::ScoutError::Accessibility(
        "menu scanning requires the macOS accessibility APIs".into(),
    ))
}

#[cfg(target_os = "macos")]
mod ax {
    use super::ScanLimits;
    use crate::error::{Result, ScoutError};
    use crate::formatter::format_menu_combo;
    use std::ffi::c_void;
    use tracing::debug;

    type AXUIElementRef = *const c_void;
    type CFTypeRef = *const c_void;
    type CFStringRef = *const c_void;
    type CFArrayRef = *const c_void;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        fn AXUIElementCreateApplication(pid: i32) -> AXUIElementRef;
        fn AXUIElementCopyAttributeValue(
            element: AXUIElementRef,
            attribute: CFStringRef,
            value: *mut CFTypeRef,
        ) -> i32;
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFRelease(cf: *const c_void);
        fn CFRetain(cf: *const c_void) -> *const c_void;
        fn CFStringCreateWithCString(
            alloc: *const c_void,
            c_str: *const i8,
            encoding: u32,
        ) -> CFStringRef;
        fn CFStringGetCString(
            string: CFStringRef,
            buffer: *mut i8,
            buffer_size: i64,
            encoding: u32,
        ) -> bool;
        fn CFStringGetLength(string: CFStringRef) -> i64;
        fn CFArrayGetCount(array: CFArrayRef) -> i64;
        fn CFArrayGetValueAtIndex(array: CFArrayRef, index: i64) -> CFTypeRef;
        fn CFGetTypeID(cf: CFTypeRef) -> u64;
        fn CFStringGetTypeID() -> u64;
        fn CFNumberGetTypeID() -> u64;
        fn CFNumberGetValue(number: CFTypeRef, number_type: i32, value_ptr: *mut c_void) -> bool;
    }

    const kCFStringEncodingUTF8: u32 = 0x08000100;
    const kCFNumberSInt32Type: i32 = 3;
    const kCFNumberSInt64Type: i32 = 4;

    const kAXErrorSuccess: i32 = 0;
    const kAXErrorAPIDisabled: i32 = -25211;

    const AX_MENU_BAR: &str = "AXMenuBar";
    const AX_CHILDREN: &str = "AXChildren";
    const AX_MENU_ITEM_CMD_CHAR: &str = "AXMenuItemCmdChar";
    const AX_MENU_ITEM_CMD_MODIFIERS: &str = "AXMenuItemCmdModifiers";

    fn create_cf_string(s: &str) -> CFStringRef {
        unsafe {
            let c_str = std::ffi::CString::new(s).unwrap();
            CFStringCreateWithCString(std::ptr::null(), c_str.as_ptr(), kCFStringEncodingUTF8)
        }
    }

    fn cf_string_to_string(cf_string: CFStringRef) -> Option<String> {
        if cf_string.is_null() {
            return None;
        }
        unsafe {
            let length = CFStringGetLength(cf_string);
            if length <= 0 {
                return Some(String::new());
            }
            let buffer_size = (length * 4 + 1) as usize;
            let mut buffer: Vec<i8> = vec![0; buffer_size];
            if CFStringGetCString(
                cf_string,
                buffer.as_mut_ptr(),
                buffer_size as i64,
                kCFStringEncodingUTF8,
            ) {
                let c_str = std::ffi::CStr::from_ptr(buffer.as_ptr());
                c_str.to_str().ok().map(|s| s.to_string())
            } else {
                None
            }
        }
    }

    fn cf_release(cf: CFTypeRef) {
        if !cf.is_null() {
            unsafe { CFRelease(cf) };
        }
    }

    fn get_ax_attribute(element: AXUIElementRef, attribute: &str) -> Result<CFTypeRef> {
        let attr_str = create_cf_string(attribute);
        let mut value: CFTypeRef = std::ptr::null();
        let result =
            unsafe { AXUIElementCopyAttributeValue(element, attr_str, &mut value as *mut _) };
        cf_release(attr_str);
        match result {
            kAXErrorSuccess => Ok(value),
            kAXErrorAPIDisabled => Err(ScoutError::Accessibility(
                "Accessibility API is disabled".into(),
            )),
            _ => Err(ScoutError::Accessibility(format!(
                "attribute {} unavailable: error {}",
                attribute, result
            ))),
        }
    }

    fn get_ax_string_attribute(element: AXUIElementRef, attribute: &str) -> Option<String> {
        let value = get_ax_attribute(element, attribute).ok()?;
        let result = unsafe {
            if CFGetTypeID(value) == CFStringGetTypeID() {
                cf_string_to_string(value as CFStringRef)
            } else {
                None
            }
        };
        cf_release(value);
        result
    }

    fn get_ax_number_attribute(element: AXUIElementRef, attribute: &str) -> Option<i32> {
        let value = get_ax_attribute(element, attribute).ok()?;
        let result = unsafe {
            if CFGetTypeID(value) == CFNumberGetTypeID() {
                let mut num32: i32 = 0;
                if CFNumberGetValue(value, kCFNumberSInt32Type, &mut num32 as *mut _ as *mut c_void)
                {
                    Some(num32)
                } else {
                    let mut num64: i64 = 0;
                    if CFNumberGetValue(
                        value,
                        kCFNumberSInt64Type,
                        &mut num64 as *mut _ as *mut c_void,
                    ) {
                        Some(num64 as i32)
                    } else {
                        None
                    }
                }
            } else {
                None
            }
        };
        cf_release(value);
        result
    }

    pub fn scan(pid: i32, limits: ScanLimits) -> Result<Vec<String>> {
        if !super::has_accessibility_permission() {
            return Err(ScoutError::Accessibility(
                "Accessibility permission required for menu scanning".into(),
            ));
        }

        let ax_app = unsafe { AXUIElementCreateApplication(pid) };
        if ax_app.is_null() {
            return Err(ScoutError::Accessibility(format!(
                "failed to create AXUIElement for pid {}",
                pid
            )));
        }

        let menu_bar = match get_ax_attribute(ax_app, AX_MENU_BAR) {
            Ok(bar) => bar,
            Err(e) => {
                cf_release(ax_app);
                return Err(e);
            }
        };

        let mut combos = Vec::new();
        let mut visited = 0usize;

        // Work-list of (owned element ref, depth). Each entry holds its own
        // retain and is released after processing.
        let mut stack: Vec<(CFTypeRef, usize)> = vec![(menu_bar, 0)];

        while let Some((element, depth)) = stack.pop() {
            visited += 1;
            if visited > limits.element_cap {
                debug!(pid, cap = limits.element_cap, "Menu scan element cap hit");
                cf_release(element);
                for (leftover, _) in stack.drain(..) {
                    cf_release(leftover);
                }
                break;
            }

            if let Some(cmd_char) = get_ax_string_attribute(element, AX_MENU_ITEM_CMD_CHAR) {
                if !cmd_char.is_empty() {
                    let raw_mods = get_ax_number_attribute(element, AX_MENU_ITEM_CMD_MODIFIERS)
                        .unwrap_or(0) as u32;
                    combos.push(format_menu_combo(&cmd_char, raw_mods));
                }
            }

            // Recurse into children regardless of whether this element had a
            // shortcut; submenus hide behind intermediate AXMenu nodes.
            if depth < limits.max_depth {
                if let Ok(children) = get_ax_attribute(element, AX_CHILDREN) {
                    let count = unsafe { CFArrayGetCount(children as CFArrayRef) };
                    for i in 0..count {
                        let child = unsafe { CFArrayGetValueAtIndex(children as CFArrayRef, i) };
                        if child.is_null() {
                            continue;
                        }
                        // The array owns its elements; retain each child so
                        // it outlives the array's release below.
                        unsafe { CFRetain(child) };
                        stack.push((child, depth + 1));
                    }
                    cf_release(children);
                }
            }

            cf_release(element);
        }

        cf_release(ax_app);

        debug!(pid, count = combos.len(), visited, "Menu scan complete");
        Ok(combos)
    }
}

/// Scan and log, returning an empty list on failure. The catalog treats a
/// failed scan like an app with no menu shortcuts.
pub fn scan_or_empty(pid: i32, limits: ScanLimits) -> Vec<String> {
    match scan_menu_shortcuts(pid, limits) {
        Ok(combos) => combos,
        Err(e) => {
            debug!(pid, error = %e, "Menu scan failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_reaches_nested_submenus() {
        // With the menu bar at depth 0, an item inside a second-level
        // submenu is at depth 7; the default bound must not skip it.
        assert!(ScanLimits::default().max_depth >= 7);
    }

    #[test]
    fn limits_follow_config() {
        let mut config = Config::default();
        config.menu_depth = 4;
        config.menu_element_cap = 10;
        let limits = ScanLimits::from_config(&config);
        assert_eq!(limits.max_depth, 4);
        assert_eq!(limits.element_cap, 10);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn scan_is_unavailable_off_macos() {
        assert!(scan_menu_shortcuts(1, ScanLimits::default()).is_err());
        assert!(scan_or_empty(1, ScanLimits::default()).is_empty());
    }
}
