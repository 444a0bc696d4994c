use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop request for one playback session.
///
/// Cloning shares the flag. Any collaborator may call [`QuitFlag::request`]; the playback
/// loop, the decode retry loop and the packet queue poll it cooperatively.
#[derive(Clone, Debug, Default)]
pub struct QuitFlag(Arc<AtomicBool>);

impl QuitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask everything sharing this flag to wind down.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_request() {
        let quit = QuitFlag::new();
        let other = quit.clone();
        assert!(!other.is_set());
        quit.request();
        assert!(other.is_set());
    }
}
