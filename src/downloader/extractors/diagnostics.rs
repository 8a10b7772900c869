// Failure diagnostics - classifies extractor error text
//
// The extractor only reports free-form text, so classification is substring
// matching against wording YouTube and yt-dlp have used. This is the one place
// expected to break when that wording changes; the tests below pin the
// historical strings.

use std::fmt;

/// Closed classification of an extraction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The site demanded proof that the client is not a bot.
    AntiBot,
    /// The video is gone, private or otherwise not viewable.
    Unavailable,
    Other,
}

impl FailureKind {
    /// Whether switching acquisition strategy may get past this failure.
    pub fn is_strategy_dependent(&self) -> bool {
        matches!(self, Self::AntiBot)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AntiBot => write!(f, "anti-bot"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

const ANTI_BOT_PHRASES: &[&str] = &[
    "confirm you're not a bot",
    "confirm you\u{2019}re not a bot",
    "the following content is not available on this app",
];

const UNAVAILABLE_PHRASES: &[&str] = &[
    "video unavailable",
    "video is unavailable",
    "this video is no longer available",
    "video has been removed",
    "private video",
];

/// Classify extractor error text. Matching is case-insensitive.
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();

    let sign_in_for_bot = lower.contains("sign in to confirm") && lower.contains("not a bot");
    if sign_in_for_bot || ANTI_BOT_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::AntiBot;
    }

    if UNAVAILABLE_PHRASES.iter().any(|p| lower.contains(p)) {
        return FailureKind::Unavailable;
    }

    FailureKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_bot_detection() {
        let error = "ERROR: [youtube] xyz: Sign in to confirm you're not a bot. \
                     Use --cookies-from-browser or --cookies for the authentication.";
        assert_eq!(classify_failure(error), FailureKind::AntiBot);
    }

    #[test]
    fn test_curly_apostrophe_detection() {
        let error = "Please confirm you\u{2019}re not a bot";
        assert_eq!(classify_failure(error), FailureKind::AntiBot);
    }

    #[test]
    fn test_app_content_detection() {
        let error = "ERROR: [youtube] abc: The following content is not available on this app.";
        assert_eq!(classify_failure(error), FailureKind::AntiBot);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify_failure("SIGN IN TO CONFIRM YOU'RE NOT A BOT"), FailureKind::AntiBot);
    }

    #[test]
    fn test_age_gate_is_not_anti_bot() {
        let error = "ERROR: [youtube] abc: Sign in to confirm your age";
        assert_eq!(classify_failure(error), FailureKind::Other);
    }

    #[test]
    fn test_unavailable_detection() {
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Video unavailable"),
            FailureKind::Unavailable
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] abc: Private video. Sign in if you've been granted access"),
            FailureKind::Unavailable
        );
    }

    #[test]
    fn test_generic_failure() {
        assert_eq!(classify_failure("HTTP Error 403: Forbidden"), FailureKind::Other);
        assert_eq!(classify_failure(""), FailureKind::Other);
    }
}
