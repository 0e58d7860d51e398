//! Fuzzy "did you mean" suggestions for unknown-dependency registration
//! errors (spec §4.1(e), §7).

pub fn suggest<'a>(target: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .map(|c| (c, strsim::jaro_winkler(target, c)))
        .filter(|(_, score)| *score > 0.6)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_closest_key() {
        let candidates = vec!["input.txt", "output.txt", "config.yaml"];
        assert_eq!(suggest("imput.txt", candidates), Some("input.txt".to_string()));
    }

    #[test]
    fn no_suggestion_when_nothing_close() {
        let candidates = vec!["a.txt", "b.txt"];
        assert_eq!(suggest("completely-unrelated-key", candidates), None);
    }
}
