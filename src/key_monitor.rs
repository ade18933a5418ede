//! Global key monitor: a listen-only CGEventTap on system-wide key-downs.
//!
//! The tap callback runs on an OS-managed thread and never touches the
//! catalog. Each qualifying event (first press only, resolvable target
//! process) is reduced to an immutable `(combo, scope)` message and sent
//! over a bounded channel to the state thread, which owns all mutation.
//!
//! Tap creation fails without the Input Monitoring / Accessibility
//! permission; that is surfaced as an observable flag, not an error, and
//! `start()` may be retried after the user grants access.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use async_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::catalog::{CatalogMessage, Scope};
#[cfg(target_os = "macos")]
use crate::error::ResultExt;
use crate::formatter::{format_key, Modifiers};

/// Target pid the OS reports for events it owns itself.
pub const SYSTEM_PID_SENTINEL: i64 = 0;

/// One-shot routing slot for "try a shortcut" capture mode.
///
/// While armed, exactly the next qualifying key-down is delivered to the
/// armed receiver instead of the catalog; the slot disarms itself on
/// delivery.
#[derive(Clone, Default)]
pub struct CaptureSlot {
    inner: Arc<Mutex<Option<Sender<String>>>>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot and return the receiver for the single captured combo.
    /// Re-arming replaces any previous, undelivered capture request.
    pub fn arm(&self) -> async_channel::Receiver<String> {
        let (tx, rx) = async_channel::bounded(1);
        *self.inner.lock() = Some(tx);
        rx
    }

    pub fn disarm(&self) {
        self.inner.lock().take();
    }

    pub fn is_armed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Deliver a captured combo if armed. Returns true when the event was
    /// consumed by capture mode.
    pub fn deliver(&self, combo: &str) -> bool {
        if let Some(tx) = self.inner.lock().take() {
            // Receiver may have gone away; either way the slot is spent.
            let _ = tx.try_send(combo.to_string());
            true
        } else {
            false
        }
    }
}

/// A qualifying key press reduced to catalog-ready values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyObservation {
    pub combo: String,
    pub scope: Scope,
}

/// Reduce one raw key-down to an observation, or None when the event does
/// not qualify: key repeats are ignored, and an unresolvable target process
/// drops the event rather than producing a malformed record.
pub fn derive_observation(
    key_code: u16,
    flag_bits: u64,
    is_repeat: bool,
    target_pid: i64,
    resolve_name: impl FnOnce(i32) -> Option<String>,
) -> Option<KeyObservation> {
    if is_repeat {
        return None;
    }

    let scope = if target_pid == SYSTEM_PID_SENTINEL {
        Scope::System
    } else {
        let pid = i32::try_from(target_pid).ok()?;
        let name = resolve_name(pid)?;
        Scope::application(pid, name)
    };

    Some(KeyObservation {
        combo: format_key(key_code, Modifiers::from_cg_flags(flag_bits)),
        scope,
    })
}

/// Route one observation: capture mode wins, otherwise it becomes an
/// insert message for the state thread. A full channel drops the event;
/// the feed is advisory and the tap thread must never block.
pub fn dispatch_observation(
    observation: KeyObservation,
    capture: &CaptureSlot,
    sender: &Sender<CatalogMessage>,
) {
    if capture.deliver(&observation.combo) {
        debug!(combo = %observation.combo, "Captured combo for try-mode");
        return;
    }
    let message = CatalogMessage::Insert {
        combo: observation.combo,
        scope: observation.scope,
    };
    if sender.try_send(message).is_err() {
        debug!("State channel full; key event dropped");
    }
}

struct TapShared {
    sender: Sender<CatalogMessage>,
    capture: CaptureSlot,
}

/// Lifecycle cells shared between the facade-facing handle and the tap
/// thread. Every `start()` mints a new generation; a tap thread may only
/// publish or clear these cells while its own generation is still current,
/// so a stale thread unwinding after a quick stop/start cycle cannot
/// clobber the state of its successor.
struct TapState {
    running: AtomicBool,
    tap_acquired: AtomicBool,
    run_loop: AtomicPtr<c_void>,
    generation: Mutex<u64>,
}

impl TapState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            tap_acquired: AtomicBool::new(false),
            run_loop: AtomicPtr::new(std::ptr::null_mut()),
            generation: Mutex::new(0),
        }
    }

    /// Publish this thread's run loop and mark the tap live. Fails when a
    /// newer generation has started since this thread was spawned.
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    fn activate(&self, my_generation: u64, run_loop: *mut c_void) -> bool {
        let generation = self.generation.lock();
        if *generation != my_generation {
            return false;
        }
        self.run_loop.store(run_loop, Ordering::SeqCst);
        self.tap_acquired.store(true, Ordering::SeqCst);
        true
    }

    /// Clear the lifecycle cells on thread exit, unless a newer generation
    /// owns them now.
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    fn deactivate(&self, my_generation: u64) -> bool {
        let generation = self.generation.lock();
        if *generation != my_generation {
            return false;
        }
        self.tap_acquired.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.run_loop.store(std::ptr::null_mut(), Ordering::SeqCst);
        true
    }
}

/// Lifecycle owner of the event tap and its run-loop thread.
pub struct KeyMonitor {
    state: Arc<TapState>,
    shared: Arc<TapShared>,
}

impl KeyMonitor {
    pub fn new(sender: Sender<CatalogMessage>, capture: CaptureSlot) -> Self {
        Self {
            state: Arc::new(TapState::new()),
            shared: Arc::new(TapShared { sender, capture }),
        }
    }

    /// Whether the OS granted the event tap. Observable by the facade so a
    /// UI can point the user at the permission pane and retry `start()`.
    pub fn tap_acquired(&self) -> bool {
        self.state.tap_acquired.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Start the tap thread. Idempotent: a second call while running is a
    /// no-op. Failure to acquire the tap clears `tap_acquired` and leaves
    /// the monitor stopped so the call can be retried.
    #[cfg(target_os = "macos")]
    pub fn start(&self) {
        // The generation bump and the running transition form one unit;
        // a stale thread checking its generation can then never interleave
        // between them.
        let my_generation = {
            let mut generation = self.state.generation.lock();
            if self.state.running.swap(true, Ordering::SeqCst) {
                return;
            }
            *generation += 1;
            *generation
        };

        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);

        let spawned = std::thread::Builder::new()
            .name("key-monitor".into())
            .spawn(move || {
                macos::tap_thread(shared, state, my_generation);
            })
            .log_err();
        if spawned.is_none() {
            self.state.running.store(false, Ordering::SeqCst);
        }
    }

    #[cfg(not(target_os = "macos"))]
    pub fn start(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        info!("Global key monitoring not available on this platform");
    }

    /// Stop the tap. Safe to call when not running.
    pub fn stop(&self) {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return;
        }
        #[cfg(target_os = "macos")]
        {
            let rl = self.state.run_loop.swap(std::ptr::null_mut(), Ordering::SeqCst);
            if !rl.is_null() {
                unsafe { core_foundation_sys::runloop::CFRunLoopStop(rl as _) };
            }
        }
        info!("Key monitor stopped");
    }
}

impl Drop for KeyMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "macos")]
mod macos {
    #![allow(non_upper_case_globals)]

    use super::*;
    use core_foundation::base::TCFType;
    use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopRun};
    use core_foundation_sys::runloop::CFRunLoopAddSource;
    use core_graphics::event::{CGEventFlags, CGEventTapLocation, CGEventType};
    use tracing::warn;

    // Direct FFI for CGEventTap; the core-graphics crate does not wrap the
    // listen-only tap shape we need.
    extern "C" {
        fn CGEventTapCreate(
            tap: CGEventTapLocation,
            place: i32,
            options: i32,
            events_of_interest: u64,
            callback: extern "C" fn(
                proxy: *mut c_void,
                event_type: CGEventType,
                event: *mut c_void,
                user_info: *mut c_void,
            ) -> *mut c_void,
            user_info: *mut c_void,
        ) -> *mut c_void;

        fn CGEventTapEnable(tap: *mut c_void, enable: bool);

        fn CFMachPortCreateRunLoopSource(
            allocator: *mut c_void,
            port: *mut c_void,
            order: i64,
        ) -> *mut c_void;

        fn CGEventGetFlags(event: *mut c_void) -> CGEventFlags;
        fn CGEventGetIntegerValueField(event: *mut c_void, field: i32) -> i64;

        fn CFRelease(cf: *const c_void);
    }

    // CGEventTapPlacement / CGEventTapOptions
    const kCGHeadInsertEventTap: i32 = 0;
    const kCGEventTapOptionListenOnly: i32 = 1;

    // CGEventField
    const kCGKeyboardEventAutorepeat: i32 = 8;
    const kCGKeyboardEventKeycode: i32 = 9;
    const kCGEventTargetUnixProcessID: i32 = 40;

    fn event_mask() -> u64 {
        1u64 << (CGEventType::KeyDown as u64)
    }

    extern "C" fn tap_callback(
        _proxy: *mut c_void,
        event_type: CGEventType,
        event: *mut c_void,
        user_info: *mut c_void,
    ) -> *mut c_void {
        // Never unwind across the FFI boundary; drain autoreleased objects
        // created by the NSRunningApplication lookup.
        let _ = std::panic::catch_unwind(|| {
            objc::rc::autoreleasepool(|| unsafe {
                handle_event(event_type, event, user_info);
            });
        });
        event
    }

    unsafe fn handle_event(event_type: CGEventType, event: *mut c_void, user_info: *mut c_void) {
        if event_type as u32 != CGEventType::KeyDown as u32 || event.is_null() || user_info.is_null()
        {
            return;
        }

        let shared = &*(user_info as *const TapShared);

        let key_code = CGEventGetIntegerValueField(event, kCGKeyboardEventKeycode) as u16;
        let is_repeat = CGEventGetIntegerValueField(event, kCGKeyboardEventAutorepeat) != 0;
        let target_pid = CGEventGetIntegerValueField(event, kCGEventTargetUnixProcessID);
        let flags = CGEventGetFlags(event);

        let observation = match derive_observation(
            key_code,
            flags.bits(),
            is_repeat,
            target_pid,
            app_name_for_pid,
        ) {
            Some(o) => o,
            None => {
                if !is_repeat {
                    debug!(target_pid, "Dropped key event with unresolvable process");
                }
                return;
            }
        };

        dispatch_observation(observation, &shared.capture, &shared.sender);
    }

    /// Resolve a live process to its display name via NSRunningApplication.
    fn app_name_for_pid(pid: i32) -> Option<String> {
        use objc::runtime::{Class, Object};
        use objc::{msg_send, sel, sel_impl};

        unsafe {
            let cls = Class::get("NSRunningApplication")?;
            let app: *mut Object = msg_send![cls, runningApplicationWithProcessIdentifier: pid];
            if app.is_null() {
                return None;
            }
            let name: *mut Object = msg_send![app, localizedName];
            if let Some(name) = nsstring_to_string(name) {
                return Some(name);
            }
            let bundle_id: *mut Object = msg_send![app, bundleIdentifier];
            nsstring_to_string(bundle_id)
        }
    }

    unsafe fn nsstring_to_string(nsstring: *mut objc::runtime::Object) -> Option<String> {
        use objc::{msg_send, sel, sel_impl};

        if nsstring.is_null() {
            return None;
        }
        let utf8: *const i8 = msg_send![nsstring, UTF8String];
        if utf8.is_null() {
            return None;
        }
        std::ffi::CStr::from_ptr(utf8)
            .to_str()
            .ok()
            .map(|s| s.to_string())
    }

    pub fn tap_thread(shared: Arc<TapShared>, state: Arc<TapState>, my_generation: u64) {
        unsafe {
            let tap = CGEventTapCreate(
                CGEventTapLocation::Session,
                kCGHeadInsertEventTap,
                kCGEventTapOptionListenOnly,
                event_mask(),
                tap_callback,
                Arc::as_ptr(&shared) as *mut c_void,
            );

            if tap.is_null() {
                state.deactivate(my_generation);
                warn!(error = %crate::error::ScoutError::TapUnavailable, "Event tap not created");
                return;
            }

            let source = CFMachPortCreateRunLoopSource(std::ptr::null_mut(), tap, 0);
            if source.is_null() {
                CFRelease(tap);
                state.deactivate(my_generation);
                warn!("Failed to create run-loop source for event tap");
                return;
            }

            let current = CFRunLoop::get_current();
            if !state.activate(my_generation, current.as_concrete_TypeRef() as *mut c_void) {
                CFRelease(source);
                CFRelease(tap);
                debug!("Tap thread superseded before going live");
                return;
            }
            CFRunLoopAddSource(
                current.as_concrete_TypeRef(),
                source as _,
                kCFRunLoopDefaultMode,
            );
            CGEventTapEnable(tap, true);
            info!("Event tap active");

            // stop() may have landed between spawn and activation; its
            // CFRunLoopStop had no loop to hit, so do not enter one.
            if state.running.load(Ordering::SeqCst) {
                // Blocks until stop() calls CFRunLoopStop on this loop.
                CFRunLoopRun();
            }

            CGEventTapEnable(tap, false);
            CFRelease(source);
            CFRelease(tap);
            if state.deactivate(my_generation) {
                debug!("Key monitor thread exited");
            } else {
                debug!("Key monitor thread exited; successor owns the state");
            }
        }

        drop(shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_some(pid: i32) -> Option<String> {
        Some(format!("App{}", pid))
    }

    #[test]
    fn repeat_events_are_dropped() {
        let obs = derive_observation(0, 1 << 20, true, 42, resolve_some);
        assert!(obs.is_none());
    }

    #[test]
    fn first_press_is_recorded_once() {
        // A press of cmd+space followed by synthetic repeats yields exactly
        // one insert.
        let capture = CaptureSlot::new();
        let (tx, rx) = async_channel::bounded(8);

        for is_repeat in [false, true, true, true] {
            if let Some(obs) = derive_observation(0x31, 1 << 20, is_repeat, 42, resolve_some) {
                dispatch_observation(obs, &capture, &tx);
            }
        }

        assert_eq!(rx.len(), 1);
        match rx.try_recv().unwrap() {
            CatalogMessage::Insert { combo, scope } => {
                assert_eq!(combo, "⌘␣");
                assert_eq!(scope, Scope::application(42, "App42"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn sentinel_pid_is_system_scope() {
        let obs = derive_observation(0, 0, false, SYSTEM_PID_SENTINEL, |_| None).unwrap();
        assert_eq!(obs.scope, Scope::System);
    }

    #[test]
    fn unresolvable_pid_drops_event() {
        let obs = derive_observation(0, 0, false, 999, |_| None);
        assert!(obs.is_none());
    }

    #[test]
    fn capture_slot_takes_exactly_one_event() {
        let capture = CaptureSlot::new();
        let (tx, state_rx) = async_channel::bounded(8);
        let capture_rx = capture.arm();

        let first = derive_observation(0x31, 1 << 20, false, 42, resolve_some).unwrap();
        let second = derive_observation(0x24, 1 << 20, false, 42, resolve_some).unwrap();
        dispatch_observation(first, &capture, &tx);
        dispatch_observation(second, &capture, &tx);

        // First event went to the capture receiver, not the catalog.
        assert_eq!(capture_rx.try_recv().unwrap(), "⌘␣");
        assert!(!capture.is_armed());
        // Second event flowed to the state channel.
        assert_eq!(state_rx.len(), 1);
    }

    #[test]
    fn disarm_cancels_pending_capture() {
        let capture = CaptureSlot::new();
        let (tx, state_rx) = async_channel::bounded(8);
        let _rx = capture.arm();
        capture.disarm();

        let obs = derive_observation(0, 0, false, SYSTEM_PID_SENTINEL, |_| None).unwrap();
        dispatch_observation(obs, &capture, &tx);
        assert_eq!(state_rx.len(), 1);
    }

    #[test]
    fn stop_when_not_running_is_noop() {
        let (tx, _rx) = async_channel::bounded(8);
        let monitor = KeyMonitor::new(tx, CaptureSlot::new());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(!monitor.tap_acquired());
    }

    #[test]
    fn stale_teardown_does_not_clobber_successor() {
        let state = TapState::new();
        let p1 = 0x1000 as *mut c_void;
        let p2 = 0x2000 as *mut c_void;

        // Generation 1 goes live.
        *state.generation.lock() = 1;
        state.running.store(true, Ordering::SeqCst);
        assert!(state.activate(1, p1));

        // stop() then an immediate start(): generation 2 goes live while
        // the old thread is still unwinding.
        state.running.store(false, Ordering::SeqCst);
        state.run_loop.store(std::ptr::null_mut(), Ordering::SeqCst);
        *state.generation.lock() = 2;
        state.running.store(true, Ordering::SeqCst);
        assert!(state.activate(2, p2));

        // The stale generation-1 teardown must leave the new state alone.
        assert!(!state.deactivate(1));
        assert!(state.running.load(Ordering::SeqCst));
        assert!(state.tap_acquired.load(Ordering::SeqCst));
        assert_eq!(state.run_loop.load(Ordering::SeqCst), p2);

        // The live generation still tears down normally.
        assert!(state.deactivate(2));
        assert!(!state.running.load(Ordering::SeqCst));
        assert!(!state.tap_acquired.load(Ordering::SeqCst));
        assert!(state.run_loop.load(Ordering::SeqCst).is_null());
    }

    #[test]
    fn superseded_thread_cannot_go_live() {
        let state = TapState::new();
        *state.generation.lock() = 2;
        assert!(!state.activate(1, 0x1000 as *mut c_void));
        assert!(!state.tap_acquired.load(Ordering::SeqCst));
        assert!(state.run_loop.load(Ordering::SeqCst).is_null());
    }
}
