//! Seams to the host page and the embedded container.
//!
//! The engine never touches a document directly. A browser binding
//! implements [`HostPage`] over `location`/`history` and [`EmbeddedFrame`]
//! over the container element; the in-memory versions here back the
//! headless CLI and the tests.

use serde_json::Value;

use crate::navigation::address_bar::origin_of;

/// Most recent calls kept by each in-memory recorder.
pub const RECORD_LIMIT: usize = 64;

/// Entries kept on the history stack; the oldest fall off first.
pub const HISTORY_LIMIT: usize = 50;

fn record<T>(log: &mut Vec<T>, item: T) {
    if log.len() >= RECORD_LIMIT {
        log.drain(..RECORD_LIMIT / 2);
    }
    log.push(item);
}

/// Direct inspection of the embedded session was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameAccessError {
    #[error("embedded session is cross-origin")]
    CrossOrigin,
}

/// The page hosting the portal.
pub trait HostPage: Send {
    /// Current address-bar URL.
    fn href(&self) -> String;

    fn origin(&self) -> String {
        origin_of(&self.href()).unwrap_or_default()
    }

    /// Rewrite the current history entry without reloading.
    fn replace_state(&mut self, state_path: &str, url: &str);

    /// Add a visible history entry.
    fn push_state(&mut self, state_path: &str, url: &str);

    /// Leave the portal for `url`.
    fn redirect(&mut self, url: &str);
}

/// The container the backend session is rendered in.
pub trait EmbeddedFrame: Send {
    /// Live location of the session; fails when cross-origin.
    fn location(&self) -> Result<String, FrameAccessError>;

    /// The container's source attribute.
    fn src(&self) -> Option<String>;

    /// Point the container at `url`, reloading it.
    fn set_src(&mut self, url: &str);

    /// Navigate the session itself; fails when cross-origin.
    fn assign_location(&mut self, url: &str) -> Result<(), FrameAccessError>;

    fn post_message(&mut self, message: &Value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Replace,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub state_path: String,
    pub url: String,
}

/// Host page with an in-memory history stack.
#[derive(Debug)]
pub struct MemoryHost {
    entries: Vec<HistoryEntry>,
    index: usize,
    writes: Vec<HistoryEntry>,
    redirects: Vec<String>,
}

impl MemoryHost {
    pub fn new(href: &str) -> Self {
        Self {
            entries: vec![HistoryEntry {
                kind: HistoryKind::Replace,
                state_path: String::new(),
                url: href.to_string(),
            }],
            index: 0,
            writes: Vec::new(),
            redirects: Vec::new(),
        }
    }

    /// Recent `replace_state`/`push_state` calls, oldest first.
    pub fn writes(&self) -> &[HistoryEntry] {
        &self.writes
    }

    pub fn pushes(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| w.kind == HistoryKind::Push)
            .count()
    }

    pub fn redirects(&self) -> &[String] {
        &self.redirects
    }

    /// Step back one entry, returning the state to hand to the popstate handler.
    pub fn back(&mut self) -> Option<String> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        let state = &self.entries[self.index].state_path;
        Some(state.clone()).filter(|s| !s.is_empty())
    }

    pub fn forward(&mut self) -> Option<String> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        let state = &self.entries[self.index].state_path;
        Some(state.clone()).filter(|s| !s.is_empty())
    }
}

impl HostPage for MemoryHost {
    fn href(&self) -> String {
        self.entries[self.index].url.clone()
    }

    fn replace_state(&mut self, state_path: &str, url: &str) {
        let entry = HistoryEntry {
            kind: HistoryKind::Replace,
            state_path: state_path.to_string(),
            url: url.to_string(),
        };
        self.entries[self.index] = entry.clone();
        record(&mut self.writes, entry);
    }

    fn push_state(&mut self, state_path: &str, url: &str) {
        let entry = HistoryEntry {
            kind: HistoryKind::Push,
            state_path: state_path.to_string(),
            url: url.to_string(),
        };
        self.entries.truncate(self.index + 1);
        self.entries.push(entry.clone());
        if self.entries.len() > HISTORY_LIMIT {
            self.entries.remove(0);
        }
        self.index = self.entries.len() - 1;
        record(&mut self.writes, entry);
    }

    fn redirect(&mut self, url: &str) {
        record(&mut self.redirects, url.to_string());
    }
}

/// Embedded container double. Cross-origin frames refuse location access.
#[derive(Debug, Default)]
pub struct MemoryFrame {
    cross_origin: bool,
    src: Option<String>,
    location: Option<String>,
    loads: Vec<String>,
    posted: Vec<Value>,
}

impl MemoryFrame {
    pub fn same_origin() -> Self {
        Self::default()
    }

    pub fn cross_origin() -> Self {
        Self {
            cross_origin: true,
            ..Self::default()
        }
    }

    /// Client-side route change inside the session; `src` stays put.
    pub fn navigate_within(&mut self, url: &str) {
        self.location = Some(url.to_string());
    }

    /// Recent URLs the container was pointed at, oldest first.
    pub fn loads(&self) -> &[String] {
        &self.loads
    }

    pub fn posted(&self) -> &[Value] {
        &self.posted
    }
}

impl EmbeddedFrame for MemoryFrame {
    fn location(&self) -> Result<String, FrameAccessError> {
        if self.cross_origin {
            return Err(FrameAccessError::CrossOrigin);
        }
        Ok(self
            .location
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    fn src(&self) -> Option<String> {
        self.src.clone()
    }

    fn set_src(&mut self, url: &str) {
        self.src = Some(url.to_string());
        self.location = Some(url.to_string());
        record(&mut self.loads, url.to_string());
    }

    fn assign_location(&mut self, url: &str) -> Result<(), FrameAccessError> {
        if self.cross_origin {
            return Err(FrameAccessError::CrossOrigin);
        }
        self.location = Some(url.to_string());
        Ok(())
    }

    fn post_message(&mut self, message: &Value) {
        record(&mut self.posted, message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_stack_back_and_forward() {
        let mut host = MemoryHost::new("https://p.example/portal.html");
        host.replace_state("/", "https://p.example/portal.html");
        host.push_state("/a", "https://p.example/portal.html?subpage=%2Fa");
        host.push_state("/b", "https://p.example/portal.html?subpage=%2Fb");

        assert_eq!(host.back().as_deref(), Some("/a"));
        assert!(host.href().ends_with("%2Fa"));
        assert_eq!(host.back().as_deref(), Some("/"));
        assert_eq!(host.back(), None);
        assert_eq!(host.forward().as_deref(), Some("/a"));

        host.push_state("/c", "https://p.example/portal.html?subpage=%2Fc");
        assert_eq!(host.forward(), None);
        assert_eq!(host.pushes(), 3);
        assert_eq!(host.origin(), "https://p.example");
    }

    #[test]
    fn cross_origin_frame_refuses_access() {
        let mut frame = MemoryFrame::cross_origin();
        frame.set_src("https://t.example/");
        assert_eq!(frame.location(), Err(FrameAccessError::CrossOrigin));
        assert!(frame.assign_location("https://t.example/x").is_err());
        assert_eq!(frame.src().as_deref(), Some("https://t.example/"));
    }

    #[test]
    fn same_origin_frame_tracks_internal_navigation() {
        let mut frame = MemoryFrame::same_origin();
        frame.set_src("https://t.example/");
        frame.navigate_within("https://t.example/inner");
        assert_eq!(frame.location().unwrap(), "https://t.example/inner");
        assert_eq!(frame.src().as_deref(), Some("https://t.example/"));
        assert_eq!(frame.loads().len(), 1);
    }

    #[test]
    fn recorders_keep_only_recent_calls() {
        let mut frame = MemoryFrame::cross_origin();
        for i in 0..10 * RECORD_LIMIT {
            frame.post_message(&serde_json::json!({ "type": "get-url", "n": i }));
            frame.set_src(&format!("https://t.example/{i}"));
        }
        assert!(frame.posted().len() <= RECORD_LIMIT);
        assert!(frame.loads().len() <= RECORD_LIMIT);
        assert_eq!(frame.posted().last().unwrap()["n"], 10 * RECORD_LIMIT - 1);
        assert_eq!(
            frame.loads().last().map(String::as_str),
            Some(format!("https://t.example/{}", 10 * RECORD_LIMIT - 1).as_str())
        );

        let mut host = MemoryHost::new("https://p.example/portal.html");
        for i in 0..10 * RECORD_LIMIT {
            host.push_state(&format!("/{i}"), &format!("https://p.example/portal.html?n={i}"));
        }
        assert!(host.writes().len() <= RECORD_LIMIT);
        assert!(host.href().ends_with(&format!("n={}", 10 * RECORD_LIMIT - 1)));
        let mut steps = 0;
        while host.back().is_some() {
            steps += 1;
        }
        assert!(steps < HISTORY_LIMIT);
    }
}
