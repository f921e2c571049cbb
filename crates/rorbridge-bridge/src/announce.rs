//! Rotating announcements posted to game chat.

use std::time::Duration;

/// Announcement settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnouncementConfig {
    pub enabled: bool,
    /// Time between two announcements.
    pub interval: Duration,
    /// Messages, posted in order and then repeated.
    pub messages: Vec<String>,
    /// RoR colour code prefixed to every announcement.
    pub colour: String,
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(300),
            messages: Vec::new(),
            colour: "#FFFF00".to_string(),
        }
    }
}

/// Cycles through the configured messages.
#[derive(Debug)]
pub struct Announcer {
    messages: Vec<String>,
    colour: String,
    next: usize,
}

impl Announcer {
    /// `None` when announcements are disabled or there is nothing to say.
    pub fn new(config: &AnnouncementConfig) -> Option<Self> {
        if !config.enabled || config.messages.is_empty() || config.interval.is_zero() {
            return None;
        }
        Some(Self {
            messages: config.messages.clone(),
            colour: config.colour.clone(),
            next: 0,
        })
    }

    /// The next announcement line.
    pub fn next_line(&mut self) -> String {
        let message = &self.messages[self.next];
        self.next = (self.next + 1) % self.messages.len();
        format!("{}ANNOUNCEMENT: {message}", self.colour)
    }
}
