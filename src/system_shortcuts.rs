//! System-scope shortcut collection.
//!
//! Two sources feed the System scope: the user's custom "App Shortcuts"
//! table (the `NSUserKeyEquivalents` dictionary in the global preferences
//! domain, stored in the legacy `@~^$` key-equivalent notation) and a
//! built-in table of stock macOS shortcuts that no preferences file lists.
//! Both are re-read as one unit whenever the System scope refreshes.

#![allow(non_upper_case_globals)]

use crate::config::Config;
use crate::formatter::decode_key_equivalent;
use tracing::debug;

/// Stock shortcuts the OS binds out of the box, already in canonical form.
const STOCK_SYSTEM_SHORTCUTS: &[&str] = &[
    "⌘⇥",   // app switcher
    "⌘␣",   // Spotlight
    "⇧⌘3",  // screenshot (full screen)
    "⇧⌘4",  // screenshot (selection)
    "⇧⌘5",  // screenshot/recording options
    "⌃⌘Q",  // lock screen
    "⌃↑",   // Mission Control
    "⌃↓",   // application windows
    "⌃←",   // move space left
    "⌃→",   // move space right
];

/// Gather every System-scope combo: decoded user key-equivalents first,
/// then the stock table when the config asks for it. The caller hands the
/// result to the catalog as one atomic scope replacement.
pub fn collect_system_shortcuts(config: &Config) -> Vec<String> {
    let mut combos: Vec<String> = read_user_key_equivalents()
        .into_iter()
        .map(|raw| decode_key_equivalent(&raw))
        .collect();

    if config.seed_system_defaults {
        combos.extend(STOCK_SYSTEM_SHORTCUTS.iter().map(|s| s.to_string()));
    }

    debug!(count = combos.len(), "Collected system shortcuts");
    combos
}

/// Raw legacy key-equivalent strings from the user's global
/// NSUserKeyEquivalents table. Empty when the table is absent or unreadable.
#[cfg(target_os = "macos")]
fn read_user_key_equivalents() -> Vec<String> {
    prefs::user_key_equivalents()
}

#[cfg(not(target_os = "macos"))]
fn read_user_key_equivalents() -> Vec<String> {
    Vec::new()
}

#[cfg(target_os = "macos")]
mod prefs {
    use std::ffi::c_void;
    use tracing::debug;

    type CFTypeRef = *const c_void;
    type CFStringRef = *const c_void;
    type CFDictionaryRef = *const c_void;

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFPreferencesCopyAppValue(key: CFStringRef, application_id: CFStringRef) -> CFTypeRef;
        static kCFPreferencesAnyApplication: CFStringRef;

        fn CFRelease(cf: *const c_void);
        fn CFGetTypeID(cf: CFTypeRef) -> u64;
        fn CFStringGetTypeID() -> u64;
        fn CFDictionaryGetTypeID() -> u64;
        fn CFDictionaryGetCount(dict: CFDictionaryRef) -> i64;
        fn CFDictionaryGetKeysAndValues(
            dict: CFDictionaryRef,
            keys: *mut CFTypeRef,
            values: *mut CFTypeRef,
        );
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
    }

    const kCFStringEncodingUTF8: u32 = 0x08000100;

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

    pub fn user_key_equivalents() -> Vec<String> {
        unsafe {
            let key = {
                let c_str = std::ffi::CString::new("NSUserKeyEquivalents").unwrap();
                CFStringCreateWithCString(std::ptr::null(), c_str.as_ptr(), kCFStringEncodingUTF8)
            };
            let value = CFPreferencesCopyAppValue(key, kCFPreferencesAnyApplication);
            CFRelease(key);

            if value.is_null() {
                return Vec::new();
            }
            if CFGetTypeID(value) != CFDictionaryGetTypeID() {
                CFRelease(value);
                return Vec::new();
            }

            let dict = value as CFDictionaryRef;
            let count = CFDictionaryGetCount(dict);
            let mut keys: Vec<CFTypeRef> = vec![std::ptr::null(); count as usize];
            let mut values: Vec<CFTypeRef> = vec![std::ptr::null(); count as usize];
            CFDictionaryGetKeysAndValues(dict, keys.as_mut_ptr(), values.as_mut_ptr());

            // Only the values matter: each is the legacy key-equivalent
            // string for one menu title.
            let mut raw = Vec::with_capacity(count as usize);
            for v in values {
                if !v.is_null() && CFGetTypeID(v) == CFStringGetTypeID() {
                    if let Some(s) = cf_string_to_string(v as CFStringRef) {
                        raw.push(s);
                    }
                }
            }

            CFRelease(value);
            debug!(count = raw.len(), "Read NSUserKeyEquivalents");
            raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_table_is_canonical() {
        // Every stock entry must already respect the ⌃⌥⇧⌘ glyph order so it
        // matches what the formatter would emit for the same chord.
        for combo in STOCK_SYSTEM_SHORTCUTS {
            let glyph_positions: Vec<Option<usize>> = ["⌃", "⌥", "⇧", "⌘"]
                .iter()
                .map(|g| combo.find(*g))
                .collect();
            let present: Vec<usize> = glyph_positions.into_iter().flatten().collect();
            let mut sorted = present.clone();
            sorted.sort_unstable();
            assert_eq!(present, sorted, "glyph order wrong in {}", combo);
        }
    }

    #[test]
    fn seed_flag_controls_stock_table() {
        let mut config = Config::default();
        config.seed_system_defaults = true;
        let with_stock = collect_system_shortcuts(&config);
        assert!(with_stock.iter().any(|c| c == "⇧⌘3"));

        config.seed_system_defaults = false;
        let without = collect_system_shortcuts(&config);
        assert!(without.len() < with_stock.len());
    }
}
