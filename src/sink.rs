use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The prompt that started the session.
    Prompt,
    /// Shown before the first unit arrives.
    Placeholder,
    /// Everything received so far.
    Partial,
    /// Complete response; last update of the session.
    Final,
    /// Configuration or transport failure; last update of the session.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub session: u64,
    pub kind: UpdateKind,
    pub text: String,
}

/// Where session output goes (an editor panel, a terminal).
///
/// Only the session controller writes here, and only for the current
/// session.
pub trait OutputSink {
    fn post_update(&self, update: Update);
}

/// Keeps every update in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    updates: Mutex<Vec<Update>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<Update> {
        self.lock().clone()
    }

    pub fn take(&self) -> Vec<Update> {
        std::mem::take(&mut *self.lock())
    }

    /// Text of the most recent update, if any.
    pub fn latest_text(&self) -> Option<String> {
        self.lock().last().map(|u| u.text.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Update>> {
        // A panic while pushing leaves the vec intact; keep serving it.
        self.updates.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputSink for MemorySink {
    fn post_update(&self, update: Update) {
        self.lock().push(update);
    }
}
