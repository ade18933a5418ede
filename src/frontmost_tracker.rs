//! Frontmost-application tracker.
//!
//! A background observer watches `NSWorkspaceDidActivateApplicationNotification`.
//! On each activation the shared "current scope" pointer is updated and a
//! menu scan for the newly active process is kicked off on its own thread;
//! the notification-delivery thread never blocks on accessibility calls.
//! The finished combo list travels to the state thread as one atomic
//! scope replacement, so stale menu records never linger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use async_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::catalog::{CatalogMessage, Scope};
use crate::error::ResultExt;
use crate::menu_scanner::{scan_or_empty, ScanLimits};

/// Everything the activation callback needs, shared with the facade.
pub struct TrackerContext {
    pub sender: Sender<CatalogMessage>,
    pub frontmost: Arc<RwLock<Option<Scope>>>,
    /// Scans run only while the facade is started; activations still update
    /// the frontmost scope when stopped.
    pub scanning: Arc<AtomicBool>,
    pub limits: ScanLimits,
}

/// Observer callbacks arrive on an Objective-C thread with no way to carry
/// a Rust context, so the context lives here. `start_tracking` refreshes it
/// on every call, which also lets a restarted facade re-point the channel.
static TRACKER_CTX: LazyLock<RwLock<Option<TrackerContext>>> =
    LazyLock::new(|| RwLock::new(None));

/// Whether the workspace observer thread has been spawned.
static TRACKING_STARTED: AtomicBool = AtomicBool::new(false);

/// Handle one activation: update the frontmost scope, then re-scan the
/// process's menus off-thread.
pub(crate) fn handle_activation(pid: i32, name: String) {
    let ctx = TRACKER_CTX.read();
    if let Some(ctx) = ctx.as_ref() {
        handle_activation_with(ctx, pid, name);
    }
}

fn handle_activation_with(ctx: &TrackerContext, pid: i32, name: String) {
    let scope = Scope::application(pid, name);
    debug!(pid, app = %scope.title(), "Application activated");
    *ctx.frontmost.write() = Some(scope.clone());

    if !ctx.scanning.load(Ordering::SeqCst) {
        return;
    }

    let sender = ctx.sender.clone();
    let limits = ctx.limits;
    std::thread::Builder::new()
        .name("menu-scan".into())
        .spawn(move || {
            let start = std::time::Instant::now();
            let combos = scan_or_empty(pid, limits);
            debug!(
                pid,
                count = combos.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Menu scan finished"
            );
            let _ = sender.send_blocking(CatalogMessage::ReplaceScope { scope, combos });
        })
        .log_err();
}

/// Start observing application activations.
///
/// Safe to call multiple times; later calls refresh the shared context
/// without spawning a second observer.
#[cfg(target_os = "macos")]
pub fn start_tracking(ctx: TrackerContext) {
    *TRACKER_CTX.write() = Some(ctx);

    if TRACKING_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }

    info!("Starting frontmost application tracker");
    macos::capture_current_frontmost();
    std::thread::Builder::new()
        .name("activation-observer".into())
        .spawn(|| {
            macos::run_workspace_observer();
        })
        .log_err();
}

#[cfg(not(target_os = "macos"))]
pub fn start_tracking(ctx: TrackerContext) {
    *TRACKER_CTX.write() = Some(ctx);
    TRACKING_STARTED.store(true, Ordering::SeqCst);
    info!("Frontmost application tracking not available on this platform");
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use objc::declare::ClassDecl;
    use objc::runtime::{Class, Object, Sel};
    use objc::{msg_send, sel, sel_impl};
    use std::os::raw::c_void;
    use tracing::warn;

    /// Seed the frontmost scope and scan once at startup.
    pub fn capture_current_frontmost() {
        unsafe {
            objc::rc::autoreleasepool(|| {
                let workspace_class = match Class::get("NSWorkspace") {
                    Some(c) => c,
                    None => return,
                };
                let workspace: *mut Object = msg_send![workspace_class, sharedWorkspace];
                let app: *mut Object = msg_send![workspace, frontmostApplication];
                if app.is_null() {
                    return;
                }
                if let Some((pid, name)) = read_running_application(app) {
                    handle_activation(pid, name);
                }
            });
        }
    }

    pub fn run_workspace_observer() {
        unsafe {
            let superclass = Class::get("NSObject").unwrap();
            let mut decl = match ClassDecl::new("ShortcutScoutActivationObserver", superclass) {
                Some(d) => d,
                None => {
                    warn!("Activation observer class already registered");
                    return;
                }
            };

            // SAFETY: invoked from Objective-C on this thread's run loop.
            // Autoreleasepool drains NSStrings created below; catch_unwind
            // keeps panics from crossing the FFI boundary.
            extern "C" fn handle_notification(
                _this: &Object,
                _sel: Sel,
                notification: *mut Object,
            ) {
                let _ = std::panic::catch_unwind(|| {
                    objc::rc::autoreleasepool(|| unsafe {
                        handle_notification_inner(notification);
                    });
                });
            }

            unsafe fn handle_notification_inner(notification: *mut Object) {
                if notification.is_null() {
                    return;
                }
                let user_info: *mut Object = msg_send![notification, userInfo];
                if user_info.is_null() {
                    return;
                }
                let key = nsstring("NSWorkspaceApplicationKey");
                let app: *mut Object = msg_send![user_info, objectForKey: key];
                if app.is_null() {
                    return;
                }
                if let Some((pid, name)) = read_running_application(app) {
                    handle_activation(pid, name);
                }
            }

            decl.add_method(
                sel!(handleActivation:),
                handle_notification as extern "C" fn(&Object, Sel, *mut Object),
            );
            let observer_class = decl.register();

            let observer: *mut Object = msg_send![observer_class, alloc];
            let observer: *mut Object = msg_send![observer, init];

            let workspace_class = Class::get("NSWorkspace").unwrap();
            let workspace: *mut Object = msg_send![workspace_class, sharedWorkspace];
            let notification_center: *mut Object = msg_send![workspace, notificationCenter];
            let notification_name = nsstring("NSWorkspaceDidActivateApplicationNotification");

            let _: () = msg_send![
                notification_center,
                addObserver: observer
                selector: sel!(handleActivation:)
                name: notification_name
                object: std::ptr::null::<c_void>()
            ];

            info!("NSWorkspace activation observer registered");

            // Run the run loop forever to keep receiving notifications.
            let run_loop: *mut Object =
                msg_send![Class::get("NSRunLoop").unwrap(), currentRunLoop];
            let _: () = msg_send![run_loop, run];
        }
    }

    /// Extract (pid, display name) from an NSRunningApplication, preferring
    /// the localized name and falling back to the bundle identifier.
    unsafe fn read_running_application(app: *mut Object) -> Option<(i32, String)> {
        let pid: i32 = msg_send![app, processIdentifier];
        if pid <= 0 {
            return None;
        }
        let name = nsstring_to_string(msg_send![app, localizedName])
            .or_else(|| nsstring_to_string(msg_send![app, bundleIdentifier]))?;
        Some((pid, name))
    }

    unsafe fn nsstring_to_string(nsstring: *mut Object) -> Option<String> {
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

    unsafe fn nsstring(s: &str) -> *mut Object {
        let cls = Class::get("NSString").unwrap();
        let c_str = std::ffi::CString::new(s).unwrap();
        msg_send![cls, stringWithUTF8String: c_str.as_ptr()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_updates_scope_and_triggers_scan() {
        let (tx, rx) = async_channel::bounded(8);
        let frontmost: Arc<RwLock<Option<Scope>>> = Arc::new(RwLock::new(None));
        let scanning = Arc::new(AtomicBool::new(true));

        let ctx = TrackerContext {
            sender: tx,
            frontmost: Arc::clone(&frontmost),
            scanning: Arc::clone(&scanning),
            limits: ScanLimits::default(),
        };

        handle_activation_with(&ctx, 321, "Editor".to_string());
        assert_eq!(
            frontmost.read().clone(),
            Some(Scope::application(321, "Editor"))
        );

        // The scan thread reports a ReplaceScope for that process, even
        // when the scan itself finds nothing.
        match rx.recv_blocking().unwrap() {
            CatalogMessage::ReplaceScope { scope, .. } => {
                assert_eq!(scope, Scope::application(321, "ignored"));
            }
            other => panic!("unexpected message {:?}", other),
        }

        // With scanning off, activations still update the scope pointer but
        // spawn no scan.
        scanning.store(false, Ordering::SeqCst);
        handle_activation_with(&ctx, 654, "Browser".to_string());
        assert_eq!(
            frontmost.read().clone(),
            Some(Scope::application(654, "Browser"))
        );
        assert!(rx.is_empty());
    }

    #[test]
    fn activation_never_panics_without_context() {
        handle_activation(1, "Nothing".to_string());
    }
}
