//! Canonical shortcut rendering.
//!
//! Everything that turns raw key identities and modifier bits into display
//! strings lives here, so the event tap, the menu scanner, and the system
//! key-equivalents reader all agree on one canonical form.
//!
//! Modifier glyphs always render in the fixed order Control, Option, Shift,
//! Command (⌃⌥⇧⌘), regardless of the order the bits arrived in. Key names
//! resolve through a static table of named keys first; anything else goes
//! through the live keyboard layout (`UCKeyTranslate`) for the base
//! character, upper-cased. If translation is unavailable or ambiguous the
//! result is a `<code>` placeholder - formatting never fails.

#![allow(non_upper_case_globals)]

use bitflags::bitflags;

bitflags! {
    /// Modifier keys of a shortcut, in a source-neutral encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const CONTROL = 1 << 0;
        const OPTION = 1 << 1;
        const SHIFT = 1 << 2;
        const COMMAND = 1 << 3;
    }
}

// CGEventFlags bits for the modifier masks (CGEventTypes.h).
const kCGEventFlagMaskShift: u64 = 1 << 17;
const kCGEventFlagMaskControl: u64 = 1 << 18;
const kCGEventFlagMaskAlternate: u64 = 1 << 19;
const kCGEventFlagMaskCommand: u64 = 1 << 20;

// AXMenuItemCmdModifiers bits (Carbon menu glyph encoding). Command is
// implied unless the "no command" bit is set.
const kMenuShiftModifier: u32 = 1 << 0;
const kMenuOptionModifier: u32 = 1 << 1;
const kMenuControlModifier: u32 = 1 << 2;
const kMenuNoCommandModifier: u32 = 1 << 3;

impl Modifiers {
    /// Decode the flags word of a CGEvent.
    pub fn from_cg_flags(flags: u64) -> Self {
        let mut mods = Modifiers::empty();
        if flags & kCGEventFlagMaskControl != 0 {
            mods |= Modifiers::CONTROL;
        }
        if flags & kCGEventFlagMaskAlternate != 0 {
            mods |= Modifiers::OPTION;
        }
        if flags & kCGEventFlagMaskShift != 0 {
            mods |= Modifiers::SHIFT;
        }
        if flags & kCGEventFlagMaskCommand != 0 {
            mods |= Modifiers::COMMAND;
        }
        mods
    }

    /// Decode an `AXMenuItemCmdModifiers` value. A raw value of 0 means
    /// Command alone; bit 3 marks menu items that carry no Command key.
    pub fn from_ax_menu(raw: u32) -> Self {
        let mut mods = Modifiers::empty();
        if raw & kMenuControlModifier != 0 {
            mods |= Modifiers::CONTROL;
        }
        if raw & kMenuOptionModifier != 0 {
            mods |= Modifiers::OPTION;
        }
        if raw & kMenuShiftModifier != 0 {
            mods |= Modifiers::SHIFT;
        }
        if raw & kMenuNoCommandModifier == 0 {
            mods |= Modifiers::COMMAND;
        }
        mods
    }

    /// Glyph prefix in the canonical ⌃⌥⇧⌘ order.
    pub fn glyphs(&self) -> String {
        let mut s = String::new();
        if self.contains(Modifiers::CONTROL) {
            s.push('⌃');
        }
        if self.contains(Modifiers::OPTION) {
            s.push('⌥');
        }
        if self.contains(Modifiers::SHIFT) {
            s.push('⇧');
        }
        if self.contains(Modifiers::COMMAND) {
            s.push('⌘');
        }
        s
    }
}

// Virtual key codes from Carbon HIToolbox/Events.h.
const kVK_Return: u16 = 0x24;
const kVK_Tab: u16 = 0x30;
const kVK_Space: u16 = 0x31;
const kVK_Delete: u16 = 0x33;
const kVK_Escape: u16 = 0x35;
const kVK_F17: u16 = 0x40;
const kVK_F18: u16 = 0x4F;
const kVK_F19: u16 = 0x50;
const kVK_F20: u16 = 0x5A;
const kVK_F5: u16 = 0x60;
const kVK_F6: u16 = 0x61;
const kVK_F7: u16 = 0x62;
const kVK_F3: u16 = 0x63;
const kVK_F8: u16 = 0x64;
const kVK_F9: u16 = 0x65;
const kVK_F11: u16 = 0x67;
const kVK_F13: u16 = 0x69;
const kVK_F16: u16 = 0x6A;
const kVK_F14: u16 = 0x6B;
const kVK_F10: u16 = 0x6D;
const kVK_F12: u16 = 0x6F;
const kVK_F15: u16 = 0x71;
const kVK_Home: u16 = 0x73;
const kVK_PageUp: u16 = 0x74;
const kVK_ForwardDelete: u16 = 0x75;
const kVK_F4: u16 = 0x76;
const kVK_End: u16 = 0x77;
const kVK_F2: u16 = 0x78;
const kVK_PageDown: u16 = 0x79;
const kVK_F1: u16 = 0x7A;
const kVK_LeftArrow: u16 = 0x7B;
const kVK_RightArrow: u16 = 0x7C;
const kVK_DownArrow: u16 = 0x7D;
const kVK_UpArrow: u16 = 0x7E;

/// Format a physical key press as a canonical combo string.
pub fn format_key(key_code: u16, modifiers: Modifiers) -> String {
    let mut combo = modifiers.glyphs();
    combo.push_str(&key_name(key_code));
    combo
}

/// Format a menu item's command character and raw AX modifier value.
pub fn format_menu_combo(cmd_char: &str, raw_modifiers: u32) -> String {
    let mut combo = Modifiers::from_ax_menu(raw_modifiers).glyphs();
    combo.push_str(&cmd_char.to_uppercase());
    combo
}

/// Resolve a key code to its display label.
///
/// Named keys map to glyphs or mnemonic labels; everything else asks the
/// live keyboard layout for the base character.
fn key_name(key_code: u16) -> String {
    let named = match key_code {
        kVK_Space => "␣",
        kVK_Return => "⏎",
        kVK_Delete => "⌫",
        kVK_ForwardDelete => "⌦",
        kVK_Escape => "⎋",
        kVK_Tab => "⇥",
        kVK_LeftArrow => "←",
        kVK_RightArrow => "→",
        kVK_UpArrow => "↑",
        kVK_DownArrow => "↓",
        kVK_PageUp => "⇞",
        kVK_PageDown => "⇟",
        kVK_Home => "↖",
        kVK_End => "↘",
        kVK_F1 => "F1",
        kVK_F2 => "F2",
        kVK_F3 => "F3",
        kVK_F4 => "F4",
        kVK_F5 => "F5",
        kVK_F6 => "F6",
        kVK_F7 => "F7",
        kVK_F8 => "F8",
        kVK_F9 => "F9",
        kVK_F10 => "F10",
        kVK_F11 => "F11",
        kVK_F12 => "F12",
        kVK_F13 => "F13",
        kVK_F14 => "F14",
        kVK_F15 => "F15",
        kVK_F16 => "F16",
        kVK_F17 => "F17",
        kVK_F18 => "F18",
        kVK_F19 => "F19",
        kVK_F20 => "F20",
        _ => "",
    };
    if !named.is_empty() {
        return named.to_string();
    }

    match layout_base_character(key_code) {
        Some(c) => c.to_uppercase().to_string(),
        None => format!("<{}>", key_code),
    }
}

/// Decode a legacy textual key-equivalent string, e.g. the values stored in
/// the user's NSUserKeyEquivalents table. Marker characters encode the
/// modifiers: `@` Command, `~` Option, `^` Control, `$` Shift. The remainder
/// is the literal key, with DEL (0x7F) standing for the delete key.
pub fn decode_key_equivalent(raw: &str) -> String {
    let mut mods = Modifiers::empty();
    let mut key = String::new();
    for c in raw.chars() {
        match c {
            '@' => mods |= Modifiers::COMMAND,
            '~' => mods |= Modifiers::OPTION,
            '^' => mods |= Modifiers::CONTROL,
            '$' => mods |= Modifiers::SHIFT,
            _ => key.push(c),
        }
    }

    let mut combo = mods.glyphs();
    match key.as_str() {
        "\u{7F}" => combo.push('⌫'),
        _ => combo.push_str(&key.to_uppercase()),
    }
    combo
}

/// Ask the current keyboard layout for the unmodified character a key code
/// produces. Returns None when the layout is unavailable or the translation
/// is ambiguous (dead keys, multi-character output).
#[cfg(target_os = "macos")]
fn layout_base_character(key_code: u16) -> Option<char> {
    layout::base_character(key_code)
}

#[cfg(not(target_os = "macos"))]
fn layout_base_character(_key_code: u16) -> Option<char> {
    None
}

#[cfg(target_os = "macos")]
mod layout {
    use std::ffi::c_void;

    type TISInputSourceRef = *mut c_void;
    type CFStringRef = *const c_void;
    type CFDataRef = *const c_void;

    #[link(name = "Carbon", kind = "framework")]
    extern "C" {
        fn TISCopyCurrentKeyboardLayoutInputSource() -> TISInputSourceRef;
        fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> *mut c_void;
        fn UCKeyTranslate(
            key_layout: *const c_void,
            virtual_key_code: u16,
            key_action: u16,
            modifier_key_state: u32,
            keyboard_type: u32,
            key_translate_options: u32,
            dead_key_state: *mut u32,
            max_string_length: usize,
            actual_string_length: *mut usize,
            unicode_string: *mut u16,
        ) -> i32;
        fn LMGetKbdType() -> u8;
        static kTISPropertyUnicodeKeyLayoutData: CFStringRef;
    }

    #[link(name = "CoreFoundation", kind = "framework")]
    extern "C" {
        fn CFDataGetBytePtr(data: CFDataRef) -> *const u8;
        fn CFRelease(cf: *const c_void);
    }

    const kUCKeyActionDisplay: u16 = 3;
    const kUCKeyTranslateNoDeadKeysMask: u32 = 1;

    pub fn base_character(key_code: u16) -> Option<char> {
        unsafe {
            let source = TISCopyCurrentKeyboardLayoutInputSource();
            if source.is_null() {
                return None;
            }

            // Get rule: the layout data is owned by the input source, only
            // the source itself needs releasing.
            let data = TISGetInputSourceProperty(source, kTISPropertyUnicodeKeyLayoutData);
            let result = if data.is_null() {
                None
            } else {
                translate(CFDataGetBytePtr(data as CFDataRef) as *const c_void, key_code)
            };

            CFRelease(source as *const c_void);
            result
        }
    }

    unsafe fn translate(key_layout: *const c_void, key_code: u16) -> Option<char> {
        if key_layout.is_null() {
            return None;
        }

        let mut dead_key_state: u32 = 0;
        let mut chars: [u16; 4] = [0; 4];
        let mut length: usize = 0;

        // Modifier state 0: we want the base character only; modifiers are
        // rendered separately as glyphs.
        let status = UCKeyTranslate(
            key_layout,
            key_code,
            kUCKeyActionDisplay,
            0,
            LMGetKbdType() as u32,
            kUCKeyTranslateNoDeadKeysMask,
            &mut dead_key_state,
            chars.len(),
            &mut length,
            chars.as_mut_ptr(),
        );

        if status != 0 || length != 1 {
            return None;
        }
        char::decode_utf16(chars[..1].iter().copied())
            .next()
            .and_then(|r| r.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyphs_render_in_fixed_order() {
        // Bits set in "reverse" order still come out ⌃⌥⇧⌘.
        let mods = Modifiers::COMMAND | Modifiers::SHIFT | Modifiers::OPTION | Modifiers::CONTROL;
        assert_eq!(mods.glyphs(), "⌃⌥⇧⌘");
    }

    #[test]
    fn cg_flags_decode() {
        let flags = kCGEventFlagMaskCommand | kCGEventFlagMaskShift;
        let mods = Modifiers::from_cg_flags(flags);
        assert_eq!(mods, Modifiers::COMMAND | Modifiers::SHIFT);
        assert_eq!(mods.glyphs(), "⇧⌘");
    }

    #[test]
    fn ax_menu_zero_means_command_alone() {
        assert_eq!(format_menu_combo("S", 0), "⌘S");
    }

    #[test]
    fn ax_menu_no_command_bit() {
        // Shift set, command suppressed.
        let raw = kMenuShiftModifier | kMenuNoCommandModifier;
        assert_eq!(format_menu_combo("f", raw), "⇧F");
    }

    #[test]
    fn ax_menu_full_chord() {
        let raw = kMenuShiftModifier | kMenuOptionModifier | kMenuControlModifier;
        assert_eq!(format_menu_combo("x", raw), "⌃⌥⇧⌘X");
    }

    #[test]
    fn named_keys_have_glyphs() {
        assert_eq!(format_key(kVK_Space, Modifiers::COMMAND), "⌘␣");
        assert_eq!(format_key(kVK_Return, Modifiers::empty()), "⏎");
        assert_eq!(format_key(kVK_Delete, Modifiers::COMMAND), "⌘⌫");
        assert_eq!(format_key(kVK_Escape, Modifiers::empty()), "⎋");
        assert_eq!(format_key(kVK_LeftArrow, Modifiers::empty()), "←");
        assert_eq!(format_key(kVK_F20, Modifiers::CONTROL), "⌃F20");
    }

    #[test]
    fn format_is_deterministic() {
        let a = format_key(kVK_Tab, Modifiers::COMMAND | Modifiers::OPTION);
        let b = format_key(kVK_Tab, Modifiers::OPTION | Modifiers::COMMAND);
        assert_eq!(a, b);
        assert_eq!(a, "⌥⌘⇥");
    }

    #[test]
    fn unknown_key_falls_back_to_placeholder() {
        // Without a usable layout translation the formatter yields the
        // raw-code placeholder; it must never panic.
        #[cfg(not(target_os = "macos"))]
        assert_eq!(format_key(0xFFFF, Modifiers::empty()), "<65535>");
        #[cfg(target_os = "macos")]
        assert!(!format_key(0xFFFF, Modifiers::empty()).is_empty());
    }

    #[test]
    fn legacy_equivalent_examples() {
        assert_eq!(decode_key_equivalent("@~^f"), "⌃⌥⌘F");
        assert_eq!(decode_key_equivalent("@\u{7F}"), "⌘⌫");
        assert_eq!(decode_key_equivalent("$@s"), "⇧⌘S");
        assert_eq!(decode_key_equivalent("q"), "Q");
    }

    #[test]
    fn legacy_equivalent_marker_order_is_irrelevant() {
        assert_eq!(decode_key_equivalent("^~@f"), decode_key_equivalent("@~^f"));
    }
}
