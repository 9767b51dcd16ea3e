//! Explicit call-context plumbing.
//!
//! Each thread keeps a stack of frames, one per [`AccessController::run_as`]
//! or privileged block. Snapshots walk that stack from the most recent frame
//! down, stopping at the first privileged frame.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::AccessControlContext;
use crate::domain::ProtectionDomain;
use crate::error::EngineError;
use crate::permission::{BasicPermission, Permission};

thread_local! {
    static CALL_STACK: RefCell<CallStack> = RefCell::new(CallStack::default());
}

#[derive(Default)]
struct CallStack {
    frames: Vec<Frame>,
    inherited: Option<AccessControlContext>,
}

struct Frame {
    domain: Option<Arc<ProtectionDomain>>,
    privilege: Privilege,
}

enum Privilege {
    None,
    Privileged(Option<AccessControlContext>),
}

/// Pops the frame it pushed, also when the closure unwinds.
struct FrameGuard;

impl FrameGuard {
    fn push(frame: Frame) -> Self {
        CALL_STACK.with(|stack| stack.borrow_mut().frames.push(frame));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = CALL_STACK.try_with(|stack| stack.borrow_mut().frames.pop());
    }
}

/// Restores the previously inherited context.
struct InheritGuard(Option<AccessControlContext>);

impl Drop for InheritGuard {
    fn drop(&mut self) {
        let previous = self.0.take();
        let _ = CALL_STACK.try_with(|stack| stack.borrow_mut().inherited = previous);
    }
}

/// Entry points for running code under a domain and checking permissions
/// against the current call context.
pub struct AccessController;

impl AccessController {
    /// Run `f` as code belonging to `domain`.
    pub fn run_as<R>(domain: Arc<ProtectionDomain>, f: impl FnOnce() -> R) -> R {
        let _guard = FrameGuard::push(Frame {
            domain: Some(domain),
            privilege: Privilege::None,
        });
        f()
    }

    /// Run `f` with the privileges of the calling domain alone.
    ///
    /// Snapshots taken inside `f` stop at the caller: domains of code further
    /// down the stack are not consulted.
    pub fn do_privileged<R>(f: impl FnOnce() -> R) -> R {
        Self::privileged(None, f)
    }

    /// Like [`AccessController::do_privileged`], but snapshots are further
    /// restricted by `context`.
    pub fn do_privileged_with<R>(context: AccessControlContext, f: impl FnOnce() -> R) -> R {
        Self::privileged(Some(context), f)
    }

    /// Run `f` as system code: a privileged frame with no domain, so
    /// snapshots taken inside `f` allow everything regardless of the
    /// caller.
    ///
    /// For library code that must act on its own authority, such as
    /// loading configured providers.
    pub fn as_system<R>(f: impl FnOnce() -> R) -> R {
        let _guard = FrameGuard::push(Frame {
            domain: None,
            privilege: Privilege::Privileged(None),
        });
        f()
    }

    fn privileged<R>(context: Option<AccessControlContext>, f: impl FnOnce() -> R) -> R {
        let caller = CALL_STACK.with(|stack| {
            stack
                .borrow()
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.domain.clone())
        });
        let _guard = FrameGuard::push(Frame {
            domain: caller,
            privilege: Privilege::Privileged(context),
        });
        f()
    }

    /// Snapshot the current call context.
    pub fn context() -> AccessControlContext {
        let (domains, privileged, inherited) = CALL_STACK.with(|stack| {
            let stack = stack.borrow();
            let mut domains = Vec::new();
            let mut privileged = None;
            for frame in stack.frames.iter().rev() {
                if let Some(domain) = &frame.domain {
                    domains.push(Arc::clone(domain));
                }
                if let Privilege::Privileged(context) = &frame.privilege {
                    privileged = Some(context.clone());
                    break;
                }
            }
            (domains, privileged, stack.inherited.clone())
        });

        let is_privileged = privileged.is_some();
        let snapshot = AccessControlContext::from_parts(domains, is_privileged);
        let assigned = match privileged {
            Some(context) => context,
            None => inherited,
        };
        snapshot.combine(assigned.as_ref())
    }

    /// Check `permission` against the current call context.
    pub fn check_permission(permission: &dyn Permission) -> Result<(), EngineError> {
        Self::context().check_permission(permission)
    }

    /// Check `SecurityPermission(directive)` against the current call
    /// context.
    pub fn check_security_access(directive: &str) -> Result<(), EngineError> {
        let permission = BasicPermission::security(directive)?;
        Self::check_permission(&permission)
    }

    /// Run `f` with `context` as the inherited context of this thread.
    pub fn with_inherited<R>(context: AccessControlContext, f: impl FnOnce() -> R) -> R {
        let previous = CALL_STACK.with(|stack| stack.borrow_mut().inherited.replace(context));
        let _guard = InheritGuard(previous);
        f()
    }

    /// Spawn a thread that inherits the current call context.
    pub fn spawn<F, T>(f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = Self::context();
        debug!(domains = context.domains().len(), "spawning thread with inherited context");
        thread::spawn(move || Self::with_inherited(context, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{PermissionCollection, Permissions};

    fn domain(granted: &[&str]) -> Arc<ProtectionDomain> {
        let permissions = Permissions::new();
        for name in granted {
            permissions
                .add(BasicPermission::runtime(*name).unwrap().into_arc())
                .unwrap();
        }
        Arc::new(ProtectionDomain::new(None, Some(Arc::new(permissions))))
    }

    fn exit_vm() -> BasicPermission {
        BasicPermission::runtime("exitVM").unwrap()
    }

    #[test]
    fn test_empty_stack_is_system() {
        assert!(AccessController::context().is_system());
        assert!(AccessController::check_permission(&exit_vm()).is_ok());
    }

    #[test]
    fn test_every_frame_must_imply() {
        let trusted = domain(&["exitVM"]);
        let untrusted = domain(&[]);

        AccessController::run_as(untrusted, || {
            AccessController::run_as(trusted.clone(), || {
                assert!(AccessController::check_permission(&exit_vm()).is_err());
            })
        });

        AccessController::run_as(trusted, || {
            assert!(AccessController::check_permission(&exit_vm()).is_ok());
        });
    }

    #[test]
    fn test_snapshot_is_most_recent_first() {
        let outer = domain(&[]);
        let inner = domain(&[]);
        AccessController::run_as(outer.clone(), || {
            AccessController::run_as(inner.clone(), || {
                let ids: Vec<_> = AccessController::context()
                    .domains()
                    .iter()
                    .map(|d| d.id())
                    .collect();
                assert_eq!(ids, vec![inner.id(), outer.id()]);
            })
        });
        assert!(AccessController::context().is_system());
    }

    #[test]
    fn test_privileged_stops_at_caller() {
        let trusted = domain(&["exitVM"]);
        let untrusted = domain(&[]);

        AccessController::run_as(untrusted, || {
            AccessController::run_as(trusted, || {
                AccessController::do_privileged(|| {
                    let context = AccessController::context();
                    assert!(context.is_privileged());
                    assert_eq!(context.domains().len(), 1);
                    assert!(AccessController::check_permission(&exit_vm()).is_ok());
                })
            })
        });
    }

    #[test]
    fn test_privileged_with_context_restricts() {
        let trusted = domain(&["exitVM"]);
        let restricted = AccessControlContext::new(vec![domain(&[])]);

        AccessController::run_as(trusted, || {
            AccessController::do_privileged_with(restricted, || {
                assert!(AccessController::check_permission(&exit_vm()).is_err());
            })
        });
    }

    #[test]
    fn test_system_frame_ignores_callers() {
        AccessController::run_as(domain(&[]), || {
            AccessController::as_system(|| {
                assert!(AccessController::context().is_system());
                assert!(AccessController::check_permission(&exit_vm()).is_ok());
            });
            assert!(AccessController::check_permission(&exit_vm()).is_err());
        });
    }

    #[test]
    fn test_frames_popped_on_unwind() {
        let untrusted = domain(&[]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            AccessController::run_as(untrusted, || panic!("boom"))
        }));
        assert!(result.is_err());
        assert!(AccessController::context().is_system());
    }

    #[test]
    fn test_spawned_thread_inherits_context() {
        let untrusted = domain(&[]);
        let handle = AccessController::run_as(untrusted, || {
            AccessController::spawn(|| AccessController::check_permission(&exit_vm()).is_err())
        });
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_security_directive_check() {
        let untrusted = domain(&[]);
        AccessController::run_as(untrusted, || {
            let err = AccessController::check_security_access("setPolicy").unwrap_err();
            assert_eq!(err.denied_permission().unwrap().kind, "SecurityPermission");
        });
    }
}
