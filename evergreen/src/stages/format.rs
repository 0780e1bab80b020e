//! Renders earlier outputs into prompt variables.

use crate::core::{BlogOutline, HeadlineSet, ParagraphDetails, QuoteSet};
use std::fmt::Write;

/// Numbered quote list; the number is the index consumers reference.
pub fn quotes(set: &QuoteSet) -> String {
    let mut out = String::new();
    for (i, quote) in set.quotes.iter().enumerate() {
        let _ = writeln!(out, "[{i}] \"{}\" ({}, {})", quote.text, quote.speaker, quote.usage);
    }
    out
}

pub fn outline(outline: &BlogOutline) -> String {
    let mut out = format!("Hook: {}\n", outline.hook);
    for (i, section) in outline.sections.iter().enumerate() {
        let _ = write!(out, "{}. {} ({})", i + 1, section.heading, section.purpose);
        if !section.quote_refs.is_empty() {
            let refs: Vec<String> = section.quote_refs.iter().map(ToString::to_string).collect();
            let _ = write!(out, " quotes: {}", refs.join(", "));
        }
        out.push('\n');
    }
    let _ = write!(out, "Conclusion: {}", outline.conclusion);
    out
}

pub fn paragraphs(details: &ParagraphDetails) -> String {
    let mut out = String::new();
    for plan in &details.paragraphs {
        let _ = writeln!(out, "## {}", plan.section);
        for point in &plan.key_points {
            let _ = writeln!(out, "- {point}");
        }
        if let Some(index) = plan.quote_index {
            let _ = writeln!(out, "- use quote [{index}]");
        }
    }
    out
}

/// Comma-separated list, or `none`.
pub fn list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// The headline for the n-th article, falling back to the first one.
pub fn headline(set: Option<&HeadlineSet>, n: usize) -> String {
    set.and_then(|h| h.headlines.get(n).or_else(|| h.headlines.first()))
        .cloned()
        .unwrap_or_else(|| "(choose a title)".to_string())
}
