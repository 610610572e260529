//! Greeting, sign-off and length normalization for email bodies.
//!
//! Whatever shape the model returns, a normalized body has exactly one
//! greeting line at the top, one sign-off block at the bottom, and a bounded
//! amount of text in between.

use std::sync::LazyLock;

use regex::Regex;

/// Hard cap on words between greeting and sign-off.
pub const MAX_BODY_WORDS: usize = 250;

/// Hard cap on subject length, in characters.
pub const MAX_SUBJECT_CHARS: usize = 150;

/// Salutation plus up to three name words, ending at `,` `:` `!` or the line end.
static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:dear|hi|hello|hey|greetings|good (?:morning|afternoon|evening))\b(?:\s+[\w.'-]+){0,3}?\s*(?:[,:!]|$)",
    )
    .unwrap()
});

/// A regards or sincerely line opens the sign-off whatever follows it; the
/// shorter closers only count when they stand alone.
static SIGN_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:(?:best|kind|warm|warmest)\s+)?regards\b|^sincerely\b|^(?:cheers|best|best wishes|thanks|thank you|many thanks)\s*[,!.]?$",
    )
    .unwrap()
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").unwrap());

/// Split a line into its leading greeting and whatever text follows it.
pub fn split_greeting(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    GREETING
        .find(line)
        .map(|m| (line[..m.end()].trim_end(), line[m.end()..].trim_start()))
}

pub fn is_greeting(line: &str) -> bool {
    split_greeting(line).is_some()
}

pub fn is_sign_off(line: &str) -> bool {
    SIGN_OFF.is_match(line.trim())
}

/// Greeting line used when the model did not write one.
pub fn greeting_for(first_name: Option<&str>) -> String {
    match first_name.map(str::trim) {
        Some(name) if !name.is_empty() => format!("Dear {name},"),
        _ => "Hello,".to_string(),
    }
}

/// Sign-off block used when the model did not write one.
pub fn sign_off_for(sender_name: &str) -> String {
    format!("Best regards,\n{sender_name}")
}

/// Keep at most `max_words` words, preserving the original line layout.
pub fn truncate_words(text: &str, max_words: usize) -> &str {
    match WORD.find_iter(text).nth(max_words) {
        Some(word) => text[..word.start()].trim_end(),
        None => text,
    }
}

/// Normalize a model-written body.
///
/// Leading greetings collapse to the first one (or a generated greeting),
/// text sharing a line with a greeting becomes content, the text is cut at
/// the first sign-off line, and the sign-off keeps at most its own line plus
/// the following name line.
pub fn normalize_body(body: &str, first_name: Option<&str>, sender_name: &str) -> String {
    let text = body.replace("\r\n", "\n");
    let lines: Vec<&str> = text.trim().lines().collect();
    let mut idx = 0;

    // Greeting: keep the model's first one, drop repeats and blank lines after it
    let mut greeting = None;
    let mut lead = None;
    while idx < lines.len() {
        let line = lines[idx].trim();
        if line.is_empty() {
            idx += 1;
            continue;
        }
        let Some((salutation, remainder)) = split_greeting(line) else {
            break;
        };
        greeting.get_or_insert_with(|| salutation.to_string());
        idx += 1;
        if !remainder.is_empty() {
            lead = Some(remainder);
            break;
        }
    }
    let greeting = greeting.unwrap_or_else(|| greeting_for(first_name));

    // Content runs until the first sign-off line
    let rest: Vec<&str> = lead.into_iter().chain(lines[idx..].iter().copied()).collect();
    let sign_off_at = rest.iter().position(|l| is_sign_off(l));
    let content = rest[..sign_off_at.unwrap_or(rest.len())].join("\n");
    let content = truncate_words(content.trim(), MAX_BODY_WORDS);

    let sign_off = match sign_off_at {
        Some(at) => {
            let line = rest[at].trim();
            let inline_name = line
                .split_once(',')
                .is_some_and(|(_, after)| !after.trim().is_empty());
            let name = rest[at + 1..]
                .iter()
                .map(|l| l.trim())
                .find(|l| !l.is_empty())
                .filter(|l| !is_sign_off(l) && WORD.find_iter(l).count() <= 3);
            match name {
                _ if inline_name => line.to_string(),
                Some(name) => format!("{line}\n{name}"),
                None => format!("{line}\n{sender_name}"),
            }
        }
        None => sign_off_for(sender_name),
    };

    if content.is_empty() {
        format!("{greeting}\n\n{sign_off}")
    } else {
        format!("{greeting}\n\n{content}\n\n{sign_off}")
    }
}

/// Collapse a subject to one bounded line. Blank input yields `None`.
pub fn normalize_subject(subject: &str) -> Option<String> {
    let line = subject.split_whitespace().collect::<Vec<_>>().join(" ");
    let line = line.trim_matches('"').trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(MAX_SUBJECT_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greetings(body: &str) -> usize {
        body.lines().filter(|l| is_greeting(l)).count()
    }

    fn sign_offs(body: &str) -> usize {
        body.lines().filter(|l| is_sign_off(l)).count()
    }

    #[test]
    fn adds_missing_greeting_and_sign_off() {
        let body = normalize_body("We built a widget for you.", Some("Ann"), "Alex");
        assert_eq!(
            body,
            "Dear Ann,\n\nWe built a widget for you.\n\nBest regards,\nAlex"
        );
    }

    #[test]
    fn keeps_existing_greeting_and_sign_off() {
        let raw = "Dear Ann,\n\nWe built a widget.\n\nBest regards,\nAlex";
        assert_eq!(normalize_body(raw, Some("Ann"), "Alex"), raw);
    }

    #[test]
    fn collapses_duplicate_greetings() {
        let raw = "Dear Ann,\n\nHi Ann,\nWe built a widget.";
        let body = normalize_body(raw, Some("Ann"), "Alex");
        assert_eq!(greetings(&body), 1);
        assert!(body.starts_with("Dear Ann,\n\nWe built a widget."));
    }

    #[test]
    fn drops_everything_after_first_sign_off() {
        let raw = "Hello Ann,\nText.\n\nBest regards,\nAlex\n\nBest regards,\nAlex";
        let body = normalize_body(raw, Some("Ann"), "Alex");
        assert_eq!(sign_offs(&body), 1);
        assert_eq!(body, "Hello Ann,\n\nText.\n\nBest regards,\nAlex");
    }

    #[test]
    fn inline_sign_off_is_kept_alone() {
        let raw = "Dear Bob,\nText.\nBest regards, Alex";
        let body = normalize_body(raw, Some("Bob"), "Alex");
        assert_eq!(body, "Dear Bob,\n\nText.\n\nBest regards, Alex");
    }

    #[test]
    fn sign_off_without_name_gets_sender() {
        let body = normalize_body("Dear Bob,\nText.\nRegards,", Some("Bob"), "Alex");
        assert!(body.ends_with("Regards,\nAlex"));
    }

    #[test]
    fn greeting_without_first_name() {
        let body = normalize_body("Text.", None, "Alex");
        assert!(body.starts_with("Hello,\n\n"));
        let body = normalize_body("Text.", Some("  "), "Alex");
        assert!(body.starts_with("Hello,\n\n"));
    }

    #[test]
    fn long_bodies_are_bounded() {
        let raw = "word ".repeat(1000);
        let body = normalize_body(&raw, Some("Ann"), "Alex");
        let words = body.split_whitespace().count();
        // greeting (2) + content + sign-off (3)
        assert!(words <= MAX_BODY_WORDS + 5, "got {words} words");
        assert!(body.ends_with("Best regards,\nAlex"));
    }

    #[test]
    fn sentence_starting_with_thanks_is_content() {
        let raw = "Thanks for your time last week.\nMore text.";
        let body = normalize_body(raw, Some("Ann"), "Alex");
        assert!(body.contains("Thanks for your time last week."));
        assert_eq!(sign_offs(&body), 1);
    }

    #[test]
    fn inline_greeting_is_not_repeated() {
        let raw = "Dear Ann, I hope the quarter is off to a strong start for the whole team at Acme.\n\nOur widget helps.\n\nBest regards,\nAlex";
        let body = normalize_body(raw, Some("Ann"), "Alex");
        assert_eq!(body.matches("Dear Ann").count(), 1);
        assert_eq!(
            body,
            "Dear Ann,\n\nI hope the quarter is off to a strong start for the whole team at Acme.\n\nOur widget helps.\n\nBest regards,\nAlex"
        );
    }

    #[test]
    fn exclaimed_greeting_keeps_the_sentence_as_content() {
        let body = normalize_body("Hello! Quick question about your roadmap.", Some("Ann"), "Alex");
        assert_eq!(
            body,
            "Hello!\n\nQuick question about your roadmap.\n\nBest regards,\nAlex"
        );
        assert_eq!(greetings(&body), 1);
    }

    #[test]
    fn long_inline_sign_off_is_not_repeated() {
        let raw = "Dear Ann,\n\nOur widget helps.\n\nBest regards, Alex from the Acme Widget team";
        let body = normalize_body(raw, Some("Ann"), "Alex");
        assert_eq!(body.matches("Best regards").count(), 1);
        assert!(body.ends_with("Best regards, Alex from the Acme Widget team"));
    }

    #[test]
    fn sincerely_with_inline_name_gets_no_extra_name() {
        let body = normalize_body("Dear Bob,\nText.\nSincerely, Alex", Some("Bob"), "Alex");
        assert_eq!(body, "Dear Bob,\n\nText.\n\nSincerely, Alex");
    }

    #[test]
    fn words_that_merely_start_like_greetings_are_content() {
        assert!(!is_greeting("Hiring is hard this year."));
        assert!(!is_greeting("Hi-res mockups are attached."));
        assert_eq!(split_greeting("Hi there, quick note"), Some(("Hi there,", "quick note")));
    }

    #[test]
    fn truncate_keeps_layout() {
        assert_eq!(truncate_words("a b\nc d", 3), "a b\nc");
        assert_eq!(truncate_words("a b", 5), "a b");
    }

    #[test]
    fn subject_is_single_bounded_line() {
        assert_eq!(normalize_subject("  Quick\nquestion  ").as_deref(), Some("Quick question"));
        assert_eq!(normalize_subject("\"Quoted\"").as_deref(), Some("Quoted"));
        assert_eq!(normalize_subject("   "), None);
        let long = "x".repeat(500);
        assert_eq!(normalize_subject(&long).unwrap().len(), MAX_SUBJECT_CHARS);
    }
}
