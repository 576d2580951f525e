//! Artifact extraction from captured process output.
//!
//! A deliberately simple heuristic, kept out of the result model so it can
//! be swapped for something smarter without touching execution.

const MARKERS: [&str; 4] = ["Created:", "Generated:", "Output:", "Wrote:"];
const PATH_SUFFIXES: [&str; 3] = [".md", ".py", ".json"];

fn looks_like_path(word: &str) -> bool {
    word.contains('/') || PATH_SUFFIXES.iter().any(|suffix| word.ends_with(suffix))
}

/// Scan stdout for marker lines and collect path-like tokens on them.
pub fn extract_artifacts(output: &str) -> Vec<String> {
    let mut artifacts = Vec::new();
    for line in output.lines() {
        if !MARKERS.iter().any(|marker| line.contains(marker)) {
            continue;
        }
        for word in line.split_whitespace() {
            if looks_like_path(word) {
                artifacts.push(word.trim_matches(|c: char| c == '"' || c == '\'').to_string());
            }
        }
    }
    artifacts
}
