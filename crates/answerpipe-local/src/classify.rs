//! Query classification: entity class + whether external verification must be forced.

use crate::contract::EntityClass;
use crate::prompts::VERIFICATION_DIRECTIVE;
use answerpipe_core::Query;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const EDUCATION_TERMS: &[&str] = &[
    "university",
    "universities",
    "college",
    "colleges",
    "school",
    "schools",
    "institute",
    "academy",
    "campus",
    "admission",
    "admissions",
    "faculty",
    "polytechnic",
    "tuition",
];

const COMPANY_TERMS: &[&str] = &[
    "company",
    "companies",
    "corporation",
    "corp",
    "inc",
    "ltd",
    "llc",
    "plc",
    "gmbh",
    "startup",
    "business",
    "firm",
    "enterprise",
    "headquarters",
    "ceo",
    "subsidiary",
];

const RECENCY_TERMS: &[&str] = &[
    "recent",
    "latest",
    "new",
    "current",
    "update",
    "today",
    "this month",
    "this year",
    "next year",
    "upcoming",
    "future",
    "scheduled",
    "announced",
    "released",
    "planned",
    "will happen",
    "expected",
];

const DOMAIN_TERMS: &[&str] = &[
    "champions trophy",
    "world cup",
    "olympics",
    "championship",
    "tournament",
    "match",
    "game",
    "series",
    "season",
    "league",
    "grand prix",
];

static EDUCATION_RE: OnceLock<Regex> = OnceLock::new();
static COMPANY_RE: OnceLock<Regex> = OnceLock::new();
static YEAR_RE: OnceLock<Regex> = OnceLock::new();

fn keyword_re(terms: &[&str]) -> Regex {
    let alts = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alts})\b")).expect("keyword pattern compiles")
}

fn education_re() -> &'static Regex {
    EDUCATION_RE.get_or_init(|| keyword_re(EDUCATION_TERMS))
}

fn company_re() -> &'static Regex {
    COMPANY_RE.get_or_init(|| keyword_re(COMPANY_TERMS))
}

fn year_re() -> &'static Regex {
    // 2023..=2099
    YEAR_RE.get_or_init(|| Regex::new(r"20(2[3-9]|[3-9][0-9])").expect("year pattern compiles"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub entity: EntityClass,
    pub force_verification: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    current_year: i32,
}

/// First year of the verification window.
pub const WINDOW_START: i32 = 2023;
/// Years past this are clamped so the window never leaves four-digit years.
pub const MAX_CURRENT_YEAR: i32 = 9989;

impl Classifier {
    pub fn new(current_year: i32) -> Self {
        Self {
            current_year: current_year.min(MAX_CURRENT_YEAR),
        }
    }

    /// Uses the local wall-clock year.
    pub fn for_today() -> Self {
        use chrono::Datelike;
        Self::new(chrono::Local::now().year())
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    /// Education keywords are checked first, so a query naming both resolves to Education.
    pub fn entity_class(&self, query: &str) -> EntityClass {
        if education_re().is_match(query) {
            EntityClass::Education
        } else if company_re().is_match(query) {
            EntityClass::Company
        } else {
            EntityClass::Generic
        }
    }

    /// Recall-biased: a spurious `true` only costs a search, a missed one risks stale answers.
    pub fn force_verification(&self, query: &str) -> bool {
        let q = query.to_lowercase();

        let window_end = self.current_year.saturating_add(10);
        let has_listed_year = (WINDOW_START..=window_end).any(|y| q.contains(&y.to_string()));
        if has_listed_year || year_re().is_match(&q) {
            return true;
        }

        let has_recency = RECENCY_TERMS.iter().any(|t| q.contains(t));
        if !has_recency {
            return false;
        }
        DOMAIN_TERMS.iter().any(|t| q.contains(t))
            || education_re().is_match(query)
            || company_re().is_match(query)
    }

    pub fn classify(&self, query: &Query) -> Classification {
        Classification {
            entity: self.entity_class(query.as_str()),
            force_verification: self.force_verification(query.as_str()),
        }
    }
}

/// The message actually sent to the agent. The caller keeps `query` for validation.
pub fn dispatch_message(query: &Query, classification: &Classification) -> String {
    if classification.force_verification {
        format!("{VERIFICATION_DIRECTIVE} {}", query.as_str())
    } else {
        query.as_str().to_string()
    }
}
