//! Status line vocabulary.
//!
//! Consumers parse the leading tag of every status line, so the tag strings
//! below are a stable contract.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    Start,
    Copy,
    Delete,
    Error,
    Info,
    End,
    Canceled,
}

impl StatusTag {
    pub const ALL: [StatusTag; 7] = [
        StatusTag::Start,
        StatusTag::Copy,
        StatusTag::Delete,
        StatusTag::Error,
        StatusTag::Info,
        StatusTag::End,
        StatusTag::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusTag::Start => "[START]",
            StatusTag::Copy => "[COPY]",
            StatusTag::Delete => "[DELETE]",
            StatusTag::Error => "[ERR]",
            StatusTag::Info => "[INFO]",
            StatusTag::End => "[END]",
            StatusTag::Canceled => "[CANCELED]",
        }
    }

    /// Recover the tag from a status line produced by [`status_line`].
    pub fn parse_line(line: &str) -> Option<StatusTag> {
        Self::ALL
            .into_iter()
            .find(|tag| line.starts_with(tag.as_str()))
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn status_line(tag: StatusTag, message: impl AsRef<str>) -> String {
    format!("{} {}", tag, message.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_prefix() {
        let line = status_line(StatusTag::Copy, "Copying 'a.txt'...");
        assert_eq!(line, "[COPY] Copying 'a.txt'...");
    }

    #[test]
    fn test_parse_line_recovers_every_tag() {
        for tag in StatusTag::ALL {
            let line = status_line(tag, "message");
            assert_eq!(StatusTag::parse_line(&line), Some(tag));
        }
        assert_eq!(StatusTag::parse_line("no tag here"), None);
    }
}
