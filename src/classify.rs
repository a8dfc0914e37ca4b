//! Rule-based ticket classification.
//!
//! Pure keyword matching over the case-folded subject + message. The
//! keyword lists are data, not design; tune them freely.

use crate::models::{Sentiment, Urgency};

const HIGH_URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "critical",
    "emergency",
    "asap",
    "immediately",
    "lawsuit",
    "legal",
    "lawyer",
    "attorney",
    "court",
    "refund",
    "chargeback",
    "fraud",
    "security breach",
    "data breach",
    "gdpr",
    "compliance",
    "violation",
    "outage",
    "down",
    "not working",
    "broken",
    "crashed",
];

const MEDIUM_URGENCY_KEYWORDS: &[&str] = &[
    "issue",
    "problem",
    "error",
    "bug",
    "concern",
    "complaint",
    "unhappy",
    "dissatisfied",
    "disappointed",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "angry",
    "frustrated",
    "terrible",
    "awful",
    "horrible",
    "worst",
    "hate",
    "useless",
    "broken",
    "disappointed",
    "unacceptable",
    "poor",
    "bad",
    "annoyed",
    "upset",
];

const POSITIVE_KEYWORDS: &[&str] = &[
    "thank",
    "thanks",
    "appreciate",
    "great",
    "excellent",
    "good",
    "happy",
    "satisfied",
    "wonderful",
    "love",
];

const ACTION_KEYWORDS: &[&str] = &[
    "refund",
    "cancel",
    "delete",
    "remove",
    "fix",
    "help",
    "urgent",
    "asap",
    "immediately",
    "lawsuit",
    "legal",
    "gdpr",
    "compliance",
    "broken",
    "not working",
    "error",
    "issue",
];

/// Classifier output for one ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub urgency: Urgency,
    pub sentiment: Sentiment,
    pub requires_action: bool,
}

/// Classify a ticket from its subject and message. Never fails.
///
/// High urgency always implies `requires_action`.
pub fn classify(subject: &str, message: &str) -> Classification {
    let text = format!("{} {}", subject, message).to_lowercase();

    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    let urgency = if contains_any(HIGH_URGENCY_KEYWORDS) {
        Urgency::High
    } else if contains_any(MEDIUM_URGENCY_KEYWORDS) {
        Urgency::Medium
    } else {
        Urgency::Low
    };

    let sentiment = if contains_any(NEGATIVE_KEYWORDS) {
        Sentiment::Negative
    } else if contains_any(POSITIVE_KEYWORDS) {
        Sentiment::Positive
    } else {
        Sentiment::Neutral
    };

    let requires_action = urgency == Urgency::High || contains_any(ACTION_KEYWORDS);

    Classification {
        urgency,
        sentiment,
        requires_action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_urgency_keyword_wins() {
        let c = classify("URGENT: service outage", "everything is fine otherwise");
        assert_eq!(c.urgency, Urgency::High);
        assert!(c.requires_action);
    }

    #[test]
    fn medium_urgency_when_no_high_keyword() {
        let c = classify("Small problem", "I found a bug in the export");
        assert_eq!(c.urgency, Urgency::Medium);
    }

    #[test]
    fn defaults_are_low_and_neutral() {
        let c = classify("Question about invoices", "Where can I see last month?");
        assert_eq!(c.urgency, Urgency::Low);
        assert_eq!(c.sentiment, Sentiment::Neutral);
        assert!(!c.requires_action);
    }

    #[test]
    fn negative_sentiment_beats_positive() {
        let c = classify("Terrible experience", "thanks for nothing");
        assert_eq!(c.sentiment, Sentiment::Negative);
    }

    #[test]
    fn positive_sentiment() {
        let c = classify("Great support", "I appreciate the quick reply");
        assert_eq!(c.sentiment, Sentiment::Positive);
    }

    #[test]
    fn action_keyword_without_high_urgency() {
        let c = classify("Please cancel my subscription", "no longer needed");
        assert_eq!(c.urgency, Urgency::Low);
        assert!(c.requires_action);
    }

    #[test]
    fn case_folding_covers_both_fields() {
        let c = classify("", "REFUND me NOW");
        assert_eq!(c.urgency, Urgency::High);
        let c = classify("ChArGeBaCk", "");
        assert_eq!(c.urgency, Urgency::High);
    }

    #[test]
    fn empty_input_never_fails() {
        let c = classify("", "");
        assert_eq!(c.urgency, Urgency::Low);
        assert_eq!(c.sentiment, Sentiment::Neutral);
        assert!(!c.requires_action);
    }
}
