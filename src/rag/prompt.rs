// src/rag/prompt.rs
//! Keyword extraction and grounding context for generated answers.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::db::Material;

pub const MAX_KEYWORDS: usize = 32;

/// Stands in for the context block when the search found nothing, so the
/// model is told explicitly that it has no grounding.
pub const NO_RESULTS: &str = "No relevant materials found in the database.";

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Lowercase, drop anything that isn't a letter, digit or whitespace, split
/// on whitespace. Order of first appearance is kept; duplicates and empty
/// tokens are dropped and at most [`MAX_KEYWORDS`] survive.
pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let lowered = prompt.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, "");
    let mut seen = HashSet::new();
    cleaned
        .split_whitespace()
        .filter(|w| seen.insert(*w))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

pub fn build_context(materials: &[Material]) -> String {
    if materials.is_empty() {
        return NO_RESULTS.to_string();
    }
    materials
        .iter()
        .map(|m| {
            format!(
                "Title: {}\nDescription: {}\nClass: {}\nSubject: {}\nType: {}\nDownload: {}",
                m.title,
                m.description.as_deref().unwrap_or(""),
                m.class,
                m.subject,
                m.kind,
                m.file_url
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn system_instruction(app_name: &str, context: &str) -> String {
    format!(
        "You are {app} AI, a helpful assistant that helps students find study materials on {app}.\n\
         Answer only from the materials listed below. If the list says \"{none}\", say so and do not invent materials.\n\
         For every material you recommend, include its download link, class, subject and type.\n\n\
         Materials:\n{context}",
        app = app_name,
        none = NO_RESULTS,
        context = context
    )
}
