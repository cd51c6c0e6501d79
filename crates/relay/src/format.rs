//! Mapping from an [`IssueRecord`] to the text posted in the chat channel.

use serde::{Deserialize, Serialize};

use crate::IssueRecord;

/// Longest message body the output channel accepts, in characters.
///
/// Discord rejects message content over 2000 characters.
pub const MAX_NOTIFICATION_CHARS: usize = 2000;

const HEADLINE: &str = "New Help Wanted Issue";
const ELLIPSIS: char = '…';

/// A formatted, ready-to-send notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    content: String,
}

impl Notification {
    /// Wraps already formatted text.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Returns the message body.
    pub fn content(&self) -> &str {
        &self.content
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.content)
    }
}

/// Renders the notification for one issue.
///
/// ```text
/// New Help Wanted Issue
/// Org: <organization>
/// Repo: <repository>
/// Title: <title>
/// <url>
/// ```
///
/// The title is shortened (ending in `…`) when the whole message would exceed
/// [`MAX_NOTIFICATION_CHARS`]. Only when the other lines alone are too long is
/// the message itself cut at the limit, URL included.
pub fn format_notification(issue: &IssueRecord) -> Notification {
    let render = |title: &str| {
        format!(
            "{HEADLINE}\nOrg: {}\nRepo: {}\nTitle: {}\n{}",
            issue.organization(),
            issue.repository(),
            title,
            issue.url()
        )
    };

    let full = render(issue.title());
    let overflow = full.chars().count().saturating_sub(MAX_NOTIFICATION_CHARS);
    if overflow == 0 {
        return Notification::new(full);
    }

    let title_chars = issue.title().chars().count();
    let keep = title_chars.saturating_sub(overflow + 1);
    let mut title: String = issue.title().chars().take(keep).collect();
    title.push(ELLIPSIS);
    let shortened = render(&title);
    if shortened.chars().count() <= MAX_NOTIFICATION_CHARS {
        return Notification::new(shortened);
    }

    let mut clipped: String = shortened.chars().take(MAX_NOTIFICATION_CHARS - 1).collect();
    clipped.push(ELLIPSIS);
    Notification::new(clipped)
}
