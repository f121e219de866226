// src/judge/prompt.rs

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::config::{JUDGE_MAX_RESULTS, JUDGE_SNIPPET_CHARS, NEUTRAL_SCORE};
use crate::models::Chunk;

static SCORE_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([0-9,\s]+)\]").expect("score array pattern is valid"));
static LONE_DIGIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[1-5]\b").expect("lone digit pattern is valid"));

const PROMPT_PREAMBLE: &str = "You are an expert search quality evaluator. Rate how well each search result matches the user's query.

RATING SCALE:
5 = Perfect match - directly answers the query with high relevance
4 = Highly relevant - mostly on-topic and useful
3 = Somewhat relevant - partially useful, some connection to query
2 = Loosely related - minimal value, weak connection
1 = Irrelevant - completely off-topic or unrelated
";

const PROMPT_INSTRUCTIONS: &str = "
Rate each result (1-5). Respond with ONLY the scores in this format:
[score1, score2, score3, score4, score5]

Example: [5, 3, 1, 4, 2]

Scores:";

fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(JUDGE_SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Builds the oracle prompt over at most the first five results.
pub fn build_judge_prompt(query: &str, results: &[Chunk]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(PROMPT_PREAMBLE);
    prompt.push_str(&format!("\nQuery: \"{}\"\n\nSearch Results:\n", query));
    for (i, chunk) in results.iter().take(JUDGE_MAX_RESULTS).enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, snippet(&chunk.text)));
    }
    prompt.push_str(PROMPT_INSTRUCTIONS);
    prompt
}

/// Extracts 1-5 scores from free-form oracle output.
///
/// Looks for a bracketed list first, then for isolated digits 1-5, and finally
/// falls back to a neutral score for every slot. Never fails.
pub fn parse_scores(response: &str) -> Vec<u8> {
    if let Some(caps) = SCORE_ARRAY_RE.captures(response) {
        let scores: Vec<u8> = caps[1]
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match token.parse::<u64>() {
                Ok(n) => n.clamp(1, 5) as u8,
                // Digits only, so a parse failure means overflow: clamp high.
                Err(_) => 5,
            })
            .collect();
        if !scores.is_empty() {
            return scores;
        }
    }

    let digits: Vec<u8> = LONE_DIGIT_RE
        .find_iter(response)
        .take(JUDGE_MAX_RESULTS)
        .filter_map(|m| m.as_str().parse::<u8>().ok())
        .collect();
    if !digits.is_empty() {
        return digits;
    }

    warn!("Could not parse scores from oracle response: {:?}", response);
    vec![NEUTRAL_SCORE; JUDGE_MAX_RESULTS]
}

/// Deterministic scores from query/result word overlap, used when the oracle
/// is unreachable. Each result gets the quintile of its overlap ratio.
pub fn heuristic_scores(query: &str, results: &[Chunk]) -> Vec<u8> {
    let lowered = query.to_lowercase();
    let query_words: HashSet<&str> = lowered.split_whitespace().collect();
    let total = query_words.len() as f64;

    results
        .iter()
        .take(JUDGE_MAX_RESULTS)
        .map(|chunk| {
            let text = chunk.text.to_lowercase();
            let text_words: HashSet<&str> = text.split_whitespace().collect();
            let matches = query_words.intersection(&text_words).count() as f64;
            if matches >= total * 0.8 {
                5
            } else if matches >= total * 0.6 {
                4
            } else if matches >= total * 0.4 {
                3
            } else if matches >= total * 0.2 {
                2
            } else {
                1
            }
        })
        .collect()
}
