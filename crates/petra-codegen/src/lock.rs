//! Net lock discipline of generated firing code.
//!
//! A firing function runs with its net's mutex held, drops it around user
//! code and remote sends, re-takes it for local token additions and must
//! leave with the mutex released on every path. [`NetLock`] follows the lock
//! state while code is generated: where the state is statically known it
//! emits plain `lock()`/`unlock()` calls, and only where branches disagree
//! does it fall back to the runtime `lock` flag.
//!
//! The guard is `#[must_use]` and consumed by [`NetLock::finish`], which
//! emits the final release. Forgetting to finish is a compile warning in
//! the generator, not a deadlock in the output.

use crate::writer::CodeWriter;

/// What the generator knows about the mutex at the current point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Held,
    Released,
    /// Depends on which branch ran; read the runtime flag.
    Unknown,
}

#[must_use = "a NetLock must be finished so the emitted code releases the net"]
#[derive(Debug)]
pub struct NetLock {
    net: String,
    flag: String,
    state: LockState,
}

impl NetLock {
    /// Declare the runtime flag for `net` and start tracking from `held`.
    pub fn declare(w: &mut CodeWriter, net: &str, flag: &str, held: bool) -> Self {
        w.line(format!("bool {flag} = {held};"));
        Self {
            net: net.to_string(),
            flag: flag.to_string(),
            state: if held {
                LockState::Held
            } else {
                LockState::Released
            },
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn ensure_held(&mut self, w: &mut CodeWriter) {
        let (net, flag) = (&self.net, &self.flag);
        match self.state {
            LockState::Held => {}
            LockState::Released => {
                w.line(format!("{net}->lock();"));
                w.line(format!("{flag} = true;"));
            }
            LockState::Unknown => {
                w.if_line(format!("!{flag}"), format!("{net}->lock(); {flag} = true;"));
            }
        }
        self.state = LockState::Held;
    }

    pub fn ensure_released(&mut self, w: &mut CodeWriter) {
        let (net, flag) = (&self.net, &self.flag);
        match self.state {
            LockState::Released => {}
            LockState::Held => {
                w.line(format!("{net}->unlock();"));
                w.line(format!("{flag} = false;"));
            }
            LockState::Unknown => {
                w.if_line(flag.as_str(), format!("{net}->unlock(); {flag} = false;"));
            }
        }
        self.state = LockState::Released;
    }

    /// Restart tracking from a saved state, e.g. at the top of an `else`.
    pub fn restore(&mut self, state: LockState) {
        self.state = state;
    }

    /// Join the state reached on another path into the current one.
    pub fn merge(&mut self, other: LockState) {
        if self.state != other {
            self.state = LockState::Unknown;
        }
    }

    /// Emit the final release.
    pub fn finish(self, w: &mut CodeWriter) {
        match self.state {
            LockState::Held => w.line(format!("{}->unlock();", self.net)),
            LockState::Released => {}
            LockState::Unknown => w.if_line(self.flag.as_str(), format!("{}->unlock();", self.net)),
        }
    }
}
