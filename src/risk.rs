//! Coarse risk classification of incoming reports.

/// Confidence scores strictly above this mark a report as high risk.
pub const HIGH_CONFIDENCE_THRESHOLD: i64 = 80;

/// Abuse types that are always high risk. Compared lower-cased.
pub const HIGH_RISK_ABUSE_TYPES: [&str; 2] = ["phishing", "malware"];

/// Substrings commonly used to impersonate financial or login pages.
pub const SUSPICIOUS_KEYWORDS: [&str; 6] = ["paypal", "secure", "login", "chase", "amazon", "bank"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Standard,
    High,
}

impl RiskLevel {
    /// The stored numeric form of the level.
    pub const fn score(self) -> i64 {
        match self {
            Self::Standard => 50,
            Self::High => 100,
        }
    }
}

/// Classify a report. Any single signal is enough to make it high risk.
pub fn classify(abuse_type: &str, confidence_score: i64, domain_name: &str) -> RiskLevel {
    let domain = domain_name.to_lowercase();
    let abuse_type = abuse_type.to_lowercase();

    if confidence_score > HIGH_CONFIDENCE_THRESHOLD
        || HIGH_RISK_ABUSE_TYPES.contains(&abuse_type.as_str())
        || SUSPICIOUS_KEYWORDS.iter().any(|kw| domain.contains(kw))
    {
        RiskLevel::High
    } else {
        RiskLevel::Standard
    }
}
