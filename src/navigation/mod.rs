//! Navigation synchronizer.
//!
//! Keeps the host's `subpage` parameter in step with the embedded session's
//! route. Three signal sources, most trusted first:
//!
//! 1. the session's live location (same-origin only)
//! 2. cooperative messages from the session ([`messages`])
//! 3. the container's source attribute
//!
//! Source 3 goes stale as soon as a cross-origin single-page app routes on
//! the client, so it is disabled for the rest of the session once any
//! message arrives, and it yields to a fresher message for the priority
//! window in any case.
//!
//! Every write funnels through one place that drops no-ops, debounces pushes,
//! replaces (not pushes) the very first entry, and holds a short re-entrancy
//! guard. Debounced writes are trailing: the newest path is written once the
//! window closes, see [`NavigationSynchronizer::flush_deadline`].

pub mod address_bar;
pub mod messages;

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::NavigationConfig;
use crate::host::{EmbeddedFrame, FrameAccessError, HostPage};
use address_bar::{clean_for_bookmark, extract_path, frame_target, subpage, with_subpage};
use messages::{get_url_request, normalize, origin_allowed};

/// Why a signal was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A write or history replay is in flight.
    Guard,
    /// Message from an origin that is neither the tunnel nor the host.
    Origin,
    /// Message carried no route.
    NotNavigation,
    /// The session talks to us; its source attribute is stale.
    MessagesAuthoritative,
    /// A fresher message disagrees.
    MessagePriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    /// The address bar now shows `path`.
    Written { path: String, push: bool },
    /// Debounced; `path` is written once the window closes.
    Deferred { path: String },
    /// History navigation replayed into the session.
    FrameNavigated { url: String },
    Ignored(IgnoreReason),
    /// The session fell back to the host's sign-in surface; the page left.
    Reentry { url: String },
}

#[derive(Debug)]
pub struct NavigationSynchronizer {
    debounce: Duration,
    priority_window: Duration,
    write_guard: Duration,
    history_guard: Duration,
    reentry_marker: String,
    reentry_url: String,

    base: String,
    current_path: String,
    cross_origin: bool,
    message_seen: bool,
    last_message: Option<(String, Instant)>,
    last_src: Option<String>,
    last_push_at: Option<Instant>,
    guard_until: Option<Instant>,
    initial_written: bool,
    pending: Option<String>,
}

impl NavigationSynchronizer {
    pub fn new(config: &NavigationConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            priority_window: Duration::from_millis(config.priority_window_ms),
            write_guard: Duration::from_millis(config.write_guard_ms),
            history_guard: Duration::from_millis(config.history_guard_ms),
            reentry_marker: config.reentry_marker.clone(),
            reentry_url: config.reentry_url.clone(),
            base: String::new(),
            current_path: "/".to_string(),
            cross_origin: false,
            message_seen: false,
            last_message: None,
            last_src: None,
            last_push_at: None,
            guard_until: None,
            initial_written: false,
            pending: None,
        }
    }

    /// Last known route inside the embedded session.
    pub fn current_path(&self) -> &str {
        &self.current_path
    }

    pub fn is_cross_origin(&self) -> bool {
        self.cross_origin
    }

    pub fn message_seen(&self) -> bool {
        self.message_seen
    }

    /// A new embedded session is loading `src` on `base` at `path`.
    ///
    /// Per-session knowledge (origin, whether it sends messages) is reset;
    /// the last message time is kept so its priority window still applies.
    pub fn attach(&mut self, base: &str, path: &str, src: &str) {
        self.base = base.trim_end_matches('/').to_string();
        self.current_path = path.to_string();
        self.cross_origin = false;
        self.message_seen = false;
        self.last_src = Some(src.to_string());
        self.pending = None;
    }

    /// The first write: a bookmark-safe URL replacing the current entry.
    pub fn write_initial(&mut self, host: &mut dyn HostPage, path: &str, now: Instant) {
        let url = clean_for_bookmark(&host.href(), path);
        host.replace_state(path, &url);
        debug!("Navigation: address bar cleaned: {url}");
        self.initial_written = true;
        self.guard_until = Some(now + self.write_guard);
    }

    fn guarded(&self, now: Instant) -> bool {
        self.guard_until.is_some_and(|until| now < until)
    }

    fn is_reentry(&self, text: &str) -> bool {
        !self.reentry_marker.is_empty() && text.contains(&self.reentry_marker)
    }

    fn reenter(&mut self, host: &mut dyn HostPage) -> SyncOutcome {
        info!("Navigation: embedded session reached the sign-in page, leaving portal");
        self.pending = None;
        host.redirect(&self.reentry_url);
        SyncOutcome::Reentry {
            url: self.reentry_url.clone(),
        }
    }

    /// The single write funnel.
    fn write(&mut self, path: String, host: &mut dyn HostPage, now: Instant) -> SyncOutcome {
        let href = host.href();
        if subpage(&href) == path {
            self.pending = None;
            return SyncOutcome::Unchanged;
        }
        if !self.initial_written {
            self.write_initial(host, &path, now);
            return SyncOutcome::Written { path, push: false };
        }
        if let Some(last) = self.last_push_at {
            if now < last + self.debounce {
                self.pending = Some(path.clone());
                return SyncOutcome::Deferred { path };
            }
        }
        let url = with_subpage(&href, &path);
        host.push_state(&path, &url);
        debug!("Navigation: address bar -> {path}");
        self.pending = None;
        self.last_push_at = Some(now);
        self.guard_until = Some(now + self.write_guard);
        SyncOutcome::Written { path, push: true }
    }

    fn adopt(&mut self, path: String, host: &mut dyn HostPage, now: Instant) -> SyncOutcome {
        if path == self.current_path && self.pending.is_none() {
            return SyncOutcome::Unchanged;
        }
        self.current_path.clone_from(&path);
        self.write(path, host, now)
    }

    /// When a deferred write becomes due.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(self.last_push_at.map_or_else(Instant::now, |t| t + self.debounce))
    }

    /// Write the deferred path if its window has closed.
    pub fn flush(&mut self, host: &mut dyn HostPage, now: Instant) -> SyncOutcome {
        match self.flush_deadline() {
            Some(due) if now >= due => match self.pending.take() {
                Some(path) => self.write(path, host, now),
                None => SyncOutcome::Unchanged,
            },
            _ => SyncOutcome::Unchanged,
        }
    }

    /// Periodic pass over the direct and attribute sources.
    pub fn poll(
        &mut self,
        frame: &mut dyn EmbeddedFrame,
        host: &mut dyn HostPage,
        now: Instant,
    ) -> SyncOutcome {
        if self.guarded(now) {
            return SyncOutcome::Ignored(IgnoreReason::Guard);
        }

        match frame.location() {
            Ok(location) => {
                if self.cross_origin {
                    debug!("Navigation: embedded session is readable again");
                    self.cross_origin = false;
                }
                if self.is_reentry(&location) {
                    return self.reenter(host);
                }
                let path = extract_path(&location, &self.base);
                return self.adopt(path, host, now);
            }
            Err(FrameAccessError::CrossOrigin) => {
                if !self.cross_origin {
                    debug!("Navigation: embedded session is cross-origin, relying on messages");
                    self.cross_origin = true;
                }
            }
        }

        frame.post_message(&get_url_request());
        self.poll_source_attribute(frame, host, now)
    }

    fn poll_source_attribute(
        &mut self,
        frame: &dyn EmbeddedFrame,
        host: &mut dyn HostPage,
        now: Instant,
    ) -> SyncOutcome {
        if self.message_seen {
            return SyncOutcome::Ignored(IgnoreReason::MessagesAuthoritative);
        }
        let Some(src) = frame.src() else {
            return SyncOutcome::Unchanged;
        };
        if self.is_reentry(&src) {
            return self.reenter(host);
        }
        if self.last_src.as_deref() == Some(src.as_str()) {
            return SyncOutcome::Unchanged;
        }
        let path = extract_path(&src, &self.base);
        if let Some((message_path, at)) = &self.last_message {
            if now < *at + self.priority_window && *message_path != path {
                return SyncOutcome::Ignored(IgnoreReason::MessagePriority);
            }
        }
        self.last_src = Some(src);
        self.adopt(path, host, now)
    }

    /// A message posted by the embedded session.
    pub fn on_message(
        &mut self,
        origin: &str,
        value: &Value,
        host: &mut dyn HostPage,
        now: Instant,
    ) -> SyncOutcome {
        if !origin_allowed(origin, &self.base, &host.origin()) {
            if !self.base.is_empty() {
                debug!("Navigation: ignoring message from {origin}");
            }
            return SyncOutcome::Ignored(IgnoreReason::Origin);
        }
        let Some(message) = normalize(value, &self.base) else {
            return SyncOutcome::Ignored(IgnoreReason::NotNavigation);
        };
        if self.is_reentry(&message.path)
            || message.raw_url.as_deref().is_some_and(|u| self.is_reentry(u))
        {
            return self.reenter(host);
        }
        self.message_seen = true;
        self.last_message = Some((message.path.clone(), now));
        self.adopt(message.path, host, now)
    }

    /// The host's own back/forward fired. `state_path` is the history state, if any.
    pub fn on_history_navigation(
        &mut self,
        state_path: Option<&str>,
        frame: &mut dyn EmbeddedFrame,
        host: &dyn HostPage,
        now: Instant,
    ) -> SyncOutcome {
        if self.guarded(now) {
            return SyncOutcome::Ignored(IgnoreReason::Guard);
        }
        let path = state_path
            .filter(|p| !p.is_empty())
            .map_or_else(|| subpage(&host.href()), ToString::to_string);
        if path == self.current_path {
            return SyncOutcome::Unchanged;
        }
        self.guard_until = Some(now + self.history_guard);
        self.pending = None;

        let target = frame_target(&self.base, &path);
        if !self.cross_origin {
            match frame.location() {
                Ok(location) => {
                    if location != target && frame.assign_location(&target).is_err() {
                        self.cross_origin = true;
                    }
                }
                Err(FrameAccessError::CrossOrigin) => self.cross_origin = true,
            }
        }
        if self.cross_origin && frame.src().as_deref() != Some(target.as_str()) {
            frame.set_src(&target);
            self.last_src = Some(target.clone());
        }
        debug!("Navigation: history -> {path}");
        self.current_path = path;
        SyncOutcome::FrameNavigated { url: target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HistoryKind, MemoryFrame, MemoryHost};
    use serde_json::json;

    const PAGE: &str = "https://portal.example/portal.html";
    const BASE: &str = "https://t.example";

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn setup(frame: &mut MemoryFrame) -> (NavigationSynchronizer, MemoryHost, Instant) {
        let mut sync = NavigationSynchronizer::new(&NavigationConfig::default());
        let mut host = MemoryHost::new(PAGE);
        let start = Instant::now();
        frame.set_src(&format!("{BASE}/"));
        sync.attach(BASE, "/", &format!("{BASE}/"));
        sync.write_initial(&mut host, "/", start);
        (sync, host, start)
    }

    #[test]
    fn initial_write_replaces() {
        let mut frame = MemoryFrame::same_origin();
        let (_, host, _) = setup(&mut frame);
        assert_eq!(host.writes().len(), 1);
        assert_eq!(host.writes()[0].kind, HistoryKind::Replace);
    }

    #[test]
    fn same_origin_location_drives_the_address_bar() {
        let mut frame = MemoryFrame::same_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        frame.navigate_within("https://t.example/a/b?x=1");

        let outcome = sync.poll(&mut frame, &mut host, start + ms(1000));
        assert_eq!(
            outcome,
            SyncOutcome::Written {
                path: "/a/b?x=1".into(),
                push: true
            }
        );
        assert_eq!(subpage(&host.href()), "/a/b?x=1");
        assert_eq!(sync.current_path(), "/a/b?x=1");
    }

    #[test]
    fn write_guard_suppresses_the_next_poll() {
        let mut frame = MemoryFrame::same_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        frame.navigate_within("https://t.example/a");
        assert_eq!(
            sync.poll(&mut frame, &mut host, start + ms(50)),
            SyncOutcome::Ignored(IgnoreReason::Guard)
        );
        assert!(matches!(
            sync.poll(&mut frame, &mut host, start + ms(150)),
            SyncOutcome::Written { .. }
        ));
    }

    #[test]
    fn bursts_are_debounced_without_duplicates() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        let origin = "https://t.example";

        let t0 = start + ms(1000);
        sync.on_message(origin, &json!({"path": "/one"}), &mut host, t0);
        let second = sync.on_message(origin, &json!({"path": "/two"}), &mut host, t0 + ms(50));
        assert_eq!(second, SyncOutcome::Deferred { path: "/two".into() });
        sync.on_message(origin, &json!({"path": "/two"}), &mut host, t0 + ms(100));
        assert_eq!(host.pushes(), 1);

        assert_eq!(sync.flush_deadline(), Some(t0 + ms(300)));
        assert_eq!(sync.flush(&mut host, t0 + ms(299)), SyncOutcome::Unchanged);
        assert!(matches!(
            sync.flush(&mut host, t0 + ms(300)),
            SyncOutcome::Written { .. }
        ));
        assert_eq!(host.pushes(), 2);
        assert_eq!(subpage(&host.href()), "/two");
        assert_eq!(sync.flush_deadline(), None);
    }

    #[test]
    fn bounce_back_cancels_pending_write() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        let origin = "https://t.example";
        let t0 = start + ms(1000);
        sync.on_message(origin, &json!({"path": "/one"}), &mut host, t0);
        sync.on_message(origin, &json!({"path": "/two"}), &mut host, t0 + ms(10));
        let back = sync.on_message(origin, &json!({"path": "/one"}), &mut host, t0 + ms(20));
        assert_eq!(back, SyncOutcome::Unchanged);
        assert_eq!(sync.flush_deadline(), None);
        assert_eq!(host.pushes(), 1);
    }

    #[test]
    fn message_disables_source_attribute_for_the_session() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);

        sync.poll(&mut frame, &mut host, start + ms(500));
        assert!(sync.is_cross_origin());
        assert_eq!(frame.posted().last(), Some(&get_url_request()));

        sync.on_message(
            "https://t.example",
            &json!({"type": "url-change", "path": "/spa"}),
            &mut host,
            start + ms(1000),
        );
        frame.set_src("https://t.example/elsewhere");
        for step in 1..20 {
            assert_eq!(
                sync.poll(&mut frame, &mut host, start + ms(1000 + step * 5000)),
                SyncOutcome::Ignored(IgnoreReason::MessagesAuthoritative)
            );
        }
        assert_eq!(sync.current_path(), "/spa");
    }

    #[test]
    fn source_attribute_is_used_before_any_message() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        frame.set_src("https://t.example/from-src");
        let outcome = sync.poll(&mut frame, &mut host, start + ms(1000));
        assert_eq!(
            outcome,
            SyncOutcome::Written {
                path: "/from-src".into(),
                push: true
            }
        );
    }

    #[test]
    fn foreign_origin_is_ignored() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        let outcome = sync.on_message(
            "https://evil.example",
            &json!({"path": "/x"}),
            &mut host,
            start + ms(1000),
        );
        assert_eq!(outcome, SyncOutcome::Ignored(IgnoreReason::Origin));
        assert!(!sync.message_seen());
    }

    #[test]
    fn reentry_redirects_whole_page() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        let outcome = sync.on_message(
            PAGE.trim_end_matches("/portal.html"),
            &json!({"url": "https://portal.example/gateway.html"}),
            &mut host,
            start + ms(1000),
        );
        assert_eq!(
            outcome,
            SyncOutcome::Reentry {
                url: "./gateway.html".into()
            }
        );
        assert_eq!(host.redirects(), ["./gateway.html".to_string()]);
    }

    #[test]
    fn history_replays_into_cross_origin_session() {
        let mut frame = MemoryFrame::cross_origin();
        let (mut sync, mut host, start) = setup(&mut frame);
        let origin = "https://t.example";
        sync.on_message(origin, &json!({"path": "/a"}), &mut host, start + ms(1000));
        sync.on_message(origin, &json!({"path": "/b"}), &mut host, start + ms(2000));

        let state = host.back();
        let outcome =
            sync.on_history_navigation(state.as_deref(), &mut frame, &host, start + ms(3000));
        assert_eq!(
            outcome,
            SyncOutcome::FrameNavigated {
                url: "https://t.example/a".into()
            }
        );
        assert_eq!(frame.src().as_deref(), Some("https://t.example/a"));
        assert_eq!(
            sync.on_history_navigation(Some("/"), &mut frame, &host, start + ms(3100)),
            SyncOutcome::Ignored(IgnoreReason::Guard)
        );
    }

    #[test]
    fn history_assigns_location_when_same_origin() {
        let mut frame = MemoryFrame::same_origin();
        let (mut sync, host, start) = setup(&mut frame);
        let outcome = sync.on_history_navigation(Some("/deep"), &mut frame, &host, start + ms(500));
        assert_eq!(
            outcome,
            SyncOutcome::FrameNavigated {
                url: "https://t.example/deep".into()
            }
        );
        assert_eq!(frame.location().unwrap(), "https://t.example/deep");
        assert_eq!(frame.loads().len(), 1);
    }
}
