use std::panic::Location;
use std::sync::{Mutex, MutexGuard};

/// Acquire `mutex`, treating poisoning as unrecoverable.
///
/// A poisoned registry means another thread panicked halfway through a mutation,
/// so the guarded state can no longer be trusted.
#[track_caller]
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            let loc = Location::caller();
            tracing::error!(
                target: "svm.jdwp",
                context,
                file = loc.file(),
                line = loc.line(),
                column = loc.column(),
                error = %err,
                "mutex poisoned; aborting"
            );
            panic!("{context}: mutex poisoned");
        }
    }
}
