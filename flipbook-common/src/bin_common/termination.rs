use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use signal_hook::{consts::signal::*, low_level};

/// Counts received SIGINT and SIGTERM. The pipeline polls it between steps so that it
/// can stop and still remove its scratch directory. The third signal kills the process
/// the default way.
#[derive(Clone, Debug)]
pub struct Cookie {
    count: Arc<AtomicUsize>,
}

impl Cookie {
    pub fn new() -> Result<Self, std::io::Error> {
        let count = Arc::new(AtomicUsize::new(0));

        for flag in [SIGINT, SIGTERM] {
            let count = Arc::clone(&count);
            // SAFETY: this only uses atomic stuff and functions the crate itself is using
            // in signal handlers
            unsafe {
                low_level::register(flag, move || {
                    let prev = count.fetch_add(1, Ordering::SeqCst);
                    if prev >= 2 {
                        let _ = low_level::emulate_default_handler(flag);
                    }
                })?;
            };
        }

        Ok(Self { count })
    }

    /// A cookie that is never triggered by a signal, only by [`Cookie::terminate`].
    pub fn detached() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Behave as if a signal was received.
    pub fn terminate(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_terminating(&self) -> bool {
        self.count.load(Ordering::SeqCst) >= 1
    }
}
