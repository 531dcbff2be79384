//! Session protection: validation, sanitization, rate limiting, and
//! per-session write locks.
//!
//! Every inbound turn passes through [`SessionProtection`] before it reaches
//! the chat engine proper.  The checks are deliberately cheap — string scans
//! and sliding-window counters — so they can sit on the hot path.
//!
//! The per-session write lock serialises concurrent turns against the same
//! session.  It is an in-process advisory lock; a multi-process deployment
//! would need to promote it to a shared lock, which this crate does not
//! attempt.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

/// Rejected input.
#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.0)
    }
}

impl std::error::Error for ValidationError {}

/// Sliding-window limit exceeded.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    /// Seconds until the oldest counted request leaves the window.
    pub retry_after_s: u64,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limit exceeded, retry after {}s", self.retry_after_s)
    }
}

impl std::error::Error for RateLimitError {}

/// Tunables for [`SessionProtection`].
#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    /// Persisted content cap, bytes.
    pub max_content_bytes: usize,
    /// Requests allowed per session within one window.
    pub session_max_requests: usize,
    /// Requests allowed per agent within one window.
    pub agent_max_requests: usize,
    /// Sliding window length.
    pub window: Duration,
    /// Idle windows older than this are swept by the janitor.
    pub window_ttl: Duration,
    /// A session with at least this many messages refuses new turns.
    pub max_session_messages: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 100 * 1024,
            session_max_requests: 30,
            agent_max_requests: 120,
            window: Duration::from_secs(60),
            window_ttl: Duration::from_secs(2 * 60 * 60),
            max_session_messages: 1000,
        }
    }
}

struct Window {
    hits: Vec<Instant>,
    last_seen: Instant,
}

/// Validation, sanitization, rate limiting, and session write locks.
pub struct SessionProtection {
    config: ProtectionConfig,
    windows: Mutex<HashMap<String, Window>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionProtection {
    pub fn new(config: ProtectionConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Validate an inbound message: role must be known, content must be
    /// non-empty after trimming.
    pub fn validate_message(&self, role: &str, content: &str) -> Result<(), ValidationError> {
        match role {
            "user" | "assistant" | "system" | "tool" => {}
            other => return Err(ValidationError(format!("unknown role '{}'", other))),
        }
        if content.trim().is_empty() {
            return Err(ValidationError("content is empty".into()));
        }
        Ok(())
    }

    /// Strip control characters and truncate to the configured byte cap.
    pub fn sanitize_content(&self, content: &str) -> String {
        let stripped = strip_control_chars(content);
        truncate_utf8(&stripped, self.config.max_content_bytes)
    }

    /// Refuse turns against sessions that have hit the message cap.
    pub fn check_session_capacity(&self, message_count: u64) -> Result<(), ValidationError> {
        if message_count >= self.config.max_session_messages {
            return Err(ValidationError(format!(
                "session is full ({} messages)",
                message_count
            )));
        }
        Ok(())
    }

    fn check_window(&self, key: String, max_requests: usize) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("window lock poisoned");
        let window = windows.entry(key).or_insert_with(|| Window {
            hits: Vec::new(),
            last_seen: now,
        });
        window.last_seen = now;
        window
            .hits
            .retain(|hit| now.duration_since(*hit) < self.config.window);
        if window.hits.len() >= max_requests {
            let oldest = window.hits[0];
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(oldest));
            return Err(RateLimitError {
                retry_after_s: retry_after.as_secs().max(1),
            });
        }
        window.hits.push(now);
        Ok(())
    }

    /// Count one request against the session's sliding window.
    pub fn check_session_rate(&self, session_id: &str) -> Result<(), RateLimitError> {
        self.check_window(
            format!("session:{}", session_id),
            self.config.session_max_requests,
        )
    }

    /// Count one request against the agent's sliding window.
    pub fn check_agent_rate(&self, agent_id: &str) -> Result<(), RateLimitError> {
        self.check_window(
            format!("agent:{}", agent_id),
            self.config.agent_max_requests,
        )
    }

    /// The advisory write lock for a session, created lazily.
    ///
    /// Callers hold the guard across the whole turn (including the tool
    /// loop); nothing else in the engine takes this lock.
    pub fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("session-lock map poisoned");
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop idle rate windows and unreferenced locks.  Called by the janitor
    /// task; safe to call at any time.
    pub fn sweep(&self) {
        let ttl = self.config.window_ttl;
        let now = Instant::now();
        {
            let window = self.config.window;
            let mut windows = self.windows.lock().expect("window lock poisoned");
            windows.retain(|_, w| {
                w.hits.retain(|hit| now.duration_since(*hit) < window);
                !w.hits.is_empty() || now.duration_since(w.last_seen) < ttl
            });
        }
        {
            let mut locks = self.locks.lock().expect("session-lock map poisoned");
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }

    /// Spawn the periodic janitor that calls [`sweep`](Self::sweep).
    pub fn spawn_janitor(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let protection = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                protection.sweep();
            }
        })
    }
}

impl Default for SessionProtection {
    fn default() -> Self {
        Self::new(ProtectionConfig::default())
    }
}

/// Strip C0 control characters (except `\t`, `\n`, `\r`) and DEL.
pub fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(c,
                '\u{00}'..='\u{08}'
                | '\u{0b}'
                | '\u{0c}'
                | '\u{0e}'..='\u{1f}'
                | '\u{7f}')
        })
        .collect()
}

/// Truncate a string to at most `max_bytes` on a character boundary.
pub fn truncate_utf8(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    input[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_characters_are_stripped() {
        let dirty = "he\u{00}llo\u{1f} wo\u{7f}rld\nkeep\ttabs\r";
        assert_eq!(strip_control_chars(dirty), "hello world\nkeep\ttabs\r");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; cutting at byte 1 would split it.
        let s = "é";
        assert_eq!(truncate_utf8(s, 1), "");
        assert_eq!(truncate_utf8(s, 2), "é");
        assert_eq!(truncate_utf8("hello", 3), "hel");
    }

    #[test]
    fn empty_content_is_rejected() {
        let protection = SessionProtection::default();
        assert!(protection.validate_message("user", "   ").is_err());
        assert!(protection.validate_message("user", "hi").is_ok());
        assert!(protection.validate_message("robot", "hi").is_err());
    }

    #[test]
    fn session_rate_limit_trips_and_reports_retry_after() {
        let protection = SessionProtection::new(ProtectionConfig {
            session_max_requests: 3,
            ..Default::default()
        });
        for _ in 0..3 {
            protection.check_session_rate("s1").unwrap();
        }
        let err = protection.check_session_rate("s1").unwrap_err();
        assert!(err.retry_after_s >= 1);
        // A different session is unaffected.
        protection.check_session_rate("s2").unwrap();
    }

    #[test]
    fn capacity_check_enforces_cap() {
        let protection = SessionProtection::new(ProtectionConfig {
            max_session_messages: 10,
            ..Default::default()
        });
        assert!(protection.check_session_capacity(9).is_ok());
        assert!(protection.check_session_capacity(10).is_err());
    }

    #[tokio::test]
    async fn session_locks_serialize_by_id() {
        let protection = SessionProtection::default();
        let lock_a = protection.session_lock("s1");
        let lock_b = protection.session_lock("s1");
        let guard = lock_a.lock().await;
        assert!(lock_b.try_lock().is_err(), "same id must share one lock");
        drop(guard);
        assert!(protection.session_lock("s2").try_lock().is_ok());
    }

    #[test]
    fn sweep_drops_unreferenced_locks() {
        let protection = SessionProtection::default();
        {
            let _lock = protection.session_lock("gone");
        }
        protection.sweep();
        let locks = protection.locks.lock().unwrap();
        assert!(!locks.contains_key("gone"));
    }
}
