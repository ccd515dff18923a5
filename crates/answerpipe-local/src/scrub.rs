//! Removal of echoed instruction text and agent self-narration.
//!
//! Every pattern is matched against the unscrubbed document and the union of matched spans is
//! removed in one pass. Removing one span can therefore never create a match for another pattern.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Remove only the matched text.
    Match,
    /// Remove every line the match touches, including the line break.
    Line,
}

#[derive(Debug, Clone, Copy)]
pub struct LeakPattern {
    pub name: &'static str,
    pub pattern: &'static str,
    pub scope: Scope,
}

/// Evaluated in this order; order only affects reporting since spans are merged.
pub const LEAK_PATTERNS: &[LeakPattern] = &[
    LeakPattern {
        name: "think_block",
        pattern: r"(?s)<think>.*?</think>",
        scope: Scope::Match,
    },
    LeakPattern {
        name: "verification_directive",
        pattern: r"(?i)IMPORTANT: This question is about a recent or future event.*?Query:",
        scope: Scope::Match,
    },
    LeakPattern {
        name: "system_protocol",
        pattern: r#"(?m)^.*?(?:You are an advanced information retrieval system|follow this protocol EXACTLY|analyze if the query references:|Any year from 2023 onwards|Recent or upcoming events$|Current status/information that may have changed after 2023|Sports events, competitions, or tournaments \(especially|For queries matching ANY of these criteria|IMMEDIATELY use your search tools|NEVER state "As of my last update"|For the specific query:|matches the criteria in step 1|you may use general knowledge, but still search|Always provide sources for your information under|whenever it can be shown in a table).*$"#,
        scope: Scope::Line,
    },
    LeakPattern {
        name: "answer_structure",
        pattern: r"(?m)^.*?(?:Structure the answer for this (?:education|company|generic) query:|Start the comparison table with this exact header row:|Label each finding with a confidence level:|section and tag each item \[|Include these fields by name:|Include these headings verbatim:|Follow these research guidelines:|, organize by: |Include direct quotes from official websites when available|When sources conflict, present all perspectives|Always indicate when information might be outdated|Always indicate whether information comes from searched sources).*$",
        scope: Scope::Line,
    },
    LeakPattern {
        name: "instruction_echo",
        pattern: r"(?mi)^.*?(?:start every response by first determining|show the information in table which is possible to be shown in table).*$",
        scope: Scope::Line,
    },
    LeakPattern {
        name: "first_person_planning",
        pattern: r"(?mi)^[ \t]*(?:(?:first|okay|ok|alright|so),?[ \t]+)?(?:I need to|I will now|I'll start by|I should|I must|let me)[ \t]+(?:first[ \t]+)?(?:determine|check|analyze|search|use|look up|delegate|find|verify)\b.*?(?:[.!?](?:[ \t]|$)|$)",
        scope: Scope::Match,
    },
    LeakPattern {
        name: "reformat_preamble",
        pattern: r"(?mi)^[ \t]*(?:here is|here's) the (?:re)?formatted text:?[ \t]*$",
        scope: Scope::Line,
    },
];

struct Compiled {
    set: RegexSet,
    each: Vec<Regex>,
}

static COMPILED: OnceLock<Compiled> = OnceLock::new();

fn compiled() -> &'static Compiled {
    COMPILED.get_or_init(|| {
        let pats: Vec<&str> = LEAK_PATTERNS.iter().map(|p| p.pattern).collect();
        Compiled {
            set: RegexSet::new(&pats).expect("leak patterns compile"),
            each: pats
                .iter()
                .map(|p| Regex::new(p).expect("leak pattern compiles"))
                .collect(),
        }
    })
}

/// Names of the patterns that match `doc`, in table order.
pub fn leak_hits(doc: &str) -> Vec<&'static str> {
    compiled()
        .set
        .matches(doc)
        .into_iter()
        .map(|i| LEAK_PATTERNS[i].name)
        .collect()
}

fn line_bounds(doc: &str, start: usize, end: usize) -> (usize, usize) {
    let s = doc[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let e = match doc[end..].find('\n') {
        Some(i) => end + i + 1,
        None => doc.len(),
    };
    (s, e)
}

/// Extends a match over trailing spaces; a match that fills its whole line takes the line with it.
fn match_bounds(doc: &str, start: usize, end: usize) -> (usize, usize) {
    let is_blank = |s: &str| s.chars().all(|c| c == ' ' || c == '\t');
    let (ls, le) = line_bounds(doc, start, end);
    let line_end = doc[..le].trim_end_matches('\n').len().max(end);
    if is_blank(&doc[ls..start]) && is_blank(&doc[end..line_end]) {
        return (ls, le);
    }
    let trailing = doc[end..].len() - doc[end..].trim_start_matches([' ', '\t']).len();
    (start, end + trailing)
}

fn leak_spans(doc: &str) -> Vec<(usize, usize)> {
    let c = compiled();
    let mut spans = Vec::new();
    for i in c.set.matches(doc).into_iter() {
        for m in c.each[i].find_iter(doc) {
            let span = match LEAK_PATTERNS[i].scope {
                Scope::Match => match_bounds(doc, m.start(), m.end()),
                Scope::Line => line_bounds(doc, m.start(), m.end()),
            };
            if span.0 < span.1 {
                spans.push(span);
            }
        }
    }
    spans.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (s, e) in spans {
        match merged.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    merged
}

/// Collapses runs of interior spaces/tabs to one space (leading indentation is kept) and runs of
/// blank lines to a single blank line. Leading/trailing blank lines are dropped.
pub fn collapse_whitespace(doc: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = true;
    for line in doc.lines() {
        if line.trim().is_empty() {
            if !prev_blank {
                lines.push(String::new());
            }
            prev_blank = true;
            continue;
        }
        prev_blank = false;
        let body = line.trim_start_matches([' ', '\t']);
        let indent = &line[..line.len() - body.len()];
        let mut out = String::with_capacity(line.len());
        out.push_str(indent);
        let mut in_gap = false;
        for ch in body.chars() {
            if ch == ' ' || ch == '\t' {
                if !in_gap {
                    out.push(' ');
                }
                in_gap = true;
            } else {
                out.push(ch);
                in_gap = false;
            }
        }
        lines.push(out);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn scrub(doc: &str) -> String {
    let spans = leak_spans(doc);
    let mut kept = String::with_capacity(doc.len());
    let mut at = 0;
    for (s, e) in spans {
        kept.push_str(&doc[at..s]);
        at = e;
    }
    kept.push_str(&doc[at..]);
    collapse_whitespace(&kept)
}
