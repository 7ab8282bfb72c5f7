//! Municipality name reconciliation.
//!
//! Names are compared only through their normalized keys. Scoring, first rule that applies:
//! equal keys score 1.0, one key inside the other scores 0.8, otherwise the share of
//! significant tokens in common (over the larger token set).

use std::collections::{BTreeSet, HashMap};

use osc_core::normalize::{normalize_key, significant_tokens};
use osc_core::{MatchKind, MatchResult};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const CONTAINMENT_SCORE: f64 = 0.8;
pub const SUGGESTION_FLOOR: f64 = 0.75;
pub const MAX_SUGGESTIONS: usize = 3;

/// Manual correspondence for a name no score can resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameOverride {
    pub source: String,
    pub target: String,
}

impl NameOverride {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Overrides for names known to disagree between the catalog and the boundary dataset.
pub fn default_overrides() -> Vec<NameOverride> {
    vec![
        NameOverride::new("Diamante D'Oeste", "Diamante do Oeste"),
        NameOverride::new("\u{c1}\u{e2}\u{80}\u{9a}ngulo", "Ângulo"),
    ]
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    key: String,
    tokens: BTreeSet<String>,
}

/// Target names with their keys and token sets computed once.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    // sorted by name so the first best score is also the smallest name
    candidates: Vec<Candidate>,
    by_key: HashMap<String, usize>,
}

impl CandidateSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut candidates: Vec<Candidate> = names
            .into_iter()
            .map(Into::into)
            .filter_map(|name| {
                let key = normalize_key(&name);
                if key.is_empty() {
                    return None;
                }
                let tokens = token_set(&key);
                Some(Candidate { name, key, tokens })
            })
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.dedup_by(|a, b| a.name == b.name);

        let mut by_key = HashMap::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            by_key.entry(candidate.key.clone()).or_insert(idx);
        }
        Self { candidates, by_key }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    fn by_key(&self, key: &str) -> Option<&Candidate> {
        self.by_key.get(key).map(|&idx| &self.candidates[idx])
    }
}

fn token_set(key: &str) -> BTreeSet<String> {
    significant_tokens(key).map(str::to_string).collect()
}

fn score_keys(
    source_key: &str,
    source_tokens: &BTreeSet<String>,
    candidate_key: &str,
    candidate_tokens: &BTreeSet<String>,
) -> (f64, MatchKind) {
    if source_key == candidate_key {
        return (1.0, MatchKind::Exact);
    }
    if source_key.is_empty() || candidate_key.is_empty() {
        return (0.0, MatchKind::None);
    }
    if source_key.contains(candidate_key) || candidate_key.contains(source_key) {
        return (CONTAINMENT_SCORE, MatchKind::Containment);
    }
    let larger = source_tokens.len().max(candidate_tokens.len());
    if larger == 0 {
        return (0.0, MatchKind::None);
    }
    let common = source_tokens.intersection(candidate_tokens).count();
    if common == 0 {
        return (0.0, MatchKind::None);
    }
    (common as f64 / larger as f64, MatchKind::TokenOverlap)
}

/// Similarity of two raw names, in `[0, 1]`, with the rule that produced it.
pub fn similarity(a: &str, b: &str) -> (f64, MatchKind) {
    let (ka, kb) = (normalize_key(a), normalize_key(b));
    score_keys(&ka, &token_set(&ka), &kb, &token_set(&kb))
}

/// Candidate offered for manual review of a name that did not match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub name: String,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct MunicipalityMatcher {
    overrides: HashMap<String, String>,
    threshold: f64,
}

impl Default for MunicipalityMatcher {
    fn default() -> Self {
        Self::new(default_overrides(), DEFAULT_MATCH_THRESHOLD)
    }
}

impl MunicipalityMatcher {
    /// `threshold` is the minimum accepted score; 0.6 to 0.7 suits municipality names.
    pub fn new(overrides: Vec<NameOverride>, threshold: f64) -> Self {
        let overrides = overrides
            .into_iter()
            .filter_map(|o| {
                let key = normalize_key(&o.source);
                (!key.is_empty()).then_some((key, o.target))
            })
            .collect();
        Self {
            overrides,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Best correspondence for `source` among `candidates`, or a no-match carrying the best
    /// score seen.
    pub fn match_name(&self, source: &str, candidates: &CandidateSet) -> MatchResult {
        let key = normalize_key(source);
        if key.is_empty() {
            return MatchResult::no_match(source, 0.0);
        }

        if let Some(target) = self.overrides.get(&key) {
            match candidates.by_key(&normalize_key(target)) {
                Some(candidate) => {
                    return MatchResult {
                        source_name: source.to_string(),
                        matched_name: Some(candidate.name.clone()),
                        score: 1.0,
                        kind: MatchKind::Exact,
                        via_override: true,
                    };
                }
                None => debug!(source, target = %target, "override target is not a candidate"),
            }
        }

        let tokens = token_set(&key);
        let mut best: Option<(&Candidate, f64, MatchKind)> = None;
        for candidate in &candidates.candidates {
            let (score, kind) = score_keys(&key, &tokens, &candidate.key, &candidate.tokens);
            if best.map_or(true, |(_, best_score, _)| score > best_score) {
                best = Some((candidate, score, kind));
            }
        }

        match best {
            Some((candidate, score, kind))
                if kind != MatchKind::None && score >= self.threshold =>
            {
                MatchResult {
                    source_name: source.to_string(),
                    matched_name: Some(candidate.name.clone()),
                    score,
                    kind,
                    via_override: false,
                }
            }
            Some((_, score, _)) => MatchResult::no_match(source, score),
            None => MatchResult::no_match(source, 0.0),
        }
    }

    /// Up to three candidates whose keys are close by Jaro-Winkler, best first. Review aid
    /// only; never changes a match.
    pub fn suggestions(&self, source: &str, candidates: &CandidateSet) -> Vec<Suggestion> {
        let key = normalize_key(source);
        if key.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<Suggestion> = candidates
            .candidates
            .iter()
            .map(|c| Suggestion {
                name: c.name.clone(),
                similarity: jaro_winkler(&key, &c.key),
            })
            .filter(|s| s.similarity >= SUGGESTION_FLOOR)
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.truncate(MAX_SUGGESTIONS);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> CandidateSet {
        CandidateSet::new(names.iter().copied())
    }

    #[test]
    fn exact_match_after_normalization() {
        let matcher = MunicipalityMatcher::default();
        let result = matcher.match_name("Curitiba", &set(&["Curitiba", "Londrina"]));
        assert_eq!(result.matched_name.as_deref(), Some("Curitiba"));
        assert_eq!(result.kind, MatchKind::Exact);
        assert_eq!(result.score, 1.0);
        assert!(!result.via_override);

        let result = matcher.match_name("são josé dos pinhais", &set(&["SAO JOSE DOS PINHAIS"]));
        assert_eq!(result.matched_name.as_deref(), Some("SAO JOSE DOS PINHAIS"));
        assert_eq!(result.kind, MatchKind::Exact);
    }

    #[test]
    fn override_resolves_diamante_doeste() {
        let matcher = MunicipalityMatcher::default();
        let candidates = set(&["Diamante do Oeste", "Diamante do Norte"]);
        let result = matcher.match_name("Diamante D'Oeste", &candidates);
        assert_eq!(result.matched_name.as_deref(), Some("Diamante do Oeste"));
        assert!(result.score >= 0.6);
        assert!(result.via_override);
        assert_eq!(result.kind, MatchKind::Exact);

        // scoring alone cannot tell the two apart
        let plain = MunicipalityMatcher::new(Vec::new(), DEFAULT_MATCH_THRESHOLD);
        let result = plain.match_name("Diamante D'Oeste", &candidates);
        assert!(!result.is_match());
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn override_with_absent_target_falls_back_to_scoring() {
        let matcher = MunicipalityMatcher::new(
            vec![NameOverride::new("Curitiba", "Nowhere")],
            DEFAULT_MATCH_THRESHOLD,
        );
        let result = matcher.match_name("Curitiba", &set(&["CURITIBA"]));
        assert_eq!(result.matched_name.as_deref(), Some("CURITIBA"));
        assert!(!result.via_override);
    }

    #[test]
    fn containment_and_token_overlap_scores() {
        assert_eq!(
            similarity("Itapejara", "Itapejara d'Oeste"),
            (CONTAINMENT_SCORE, MatchKind::Containment)
        );
        let (score, kind) = similarity("Coronel Domingos Soares", "CORONEL DOMINGO SOARES");
        assert_eq!(kind, MatchKind::TokenOverlap);
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(similarity("Curitiba", "Londrina"), (0.0, MatchKind::None));
        assert_eq!(similarity("", "Londrina"), (0.0, MatchKind::None));
    }

    #[test]
    fn ties_go_to_the_smallest_candidate_name() {
        let matcher = MunicipalityMatcher::new(Vec::new(), 0.5);
        // "santa rosa" vs each: 1 of 2 tokens in common
        let result = matcher.match_name("Santa Rosa", &set(&["Rosa Branca", "Santa Maria"]));
        assert_eq!(result.matched_name.as_deref(), Some("Rosa Branca"));
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn threshold_is_a_parameter() {
        let candidates = set(&["CORONEL DOMINGO SOARES"]);
        let lenient = MunicipalityMatcher::new(Vec::new(), 0.6);
        let strict = MunicipalityMatcher::new(Vec::new(), 0.7);
        assert!(lenient.match_name("Coronel Domingos Soares", &candidates).is_match());
        let rejected = strict.match_name("Coronel Domingos Soares", &candidates);
        assert!(!rejected.is_match());
        assert_eq!(rejected.kind, MatchKind::None);
        assert!((rejected.score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_source_or_candidates_never_match() {
        let matcher = MunicipalityMatcher::default();
        assert!(!matcher.match_name("", &set(&["Curitiba"])).is_match());
        assert!(!matcher.match_name(" - ", &set(&["Curitiba"])).is_match());
        assert!(!matcher.match_name("Curitiba", &set(&[])).is_match());
        assert!(!matcher.match_name("Curitiba", &set(&["", "--"])).is_match());
    }

    #[test]
    fn matched_names_are_candidate_names_verbatim() {
        let matcher = MunicipalityMatcher::default();
        let names = ["FOZ DO IGUAÇU", "PONTA GROSSA", "SÃO JOSÉ DOS PINHAIS"];
        let candidates = set(&names);
        for source in ["Foz do Iguacu", "Ponta  Grossa", "Sao Jose dos Pinhais", "Grossa"] {
            let result = matcher.match_name(source, &candidates);
            let matched = result.matched_name.expect("match");
            assert!(names.contains(&matched.as_str()));
        }
    }

    #[test]
    fn suggestions_rank_close_names() {
        let matcher = MunicipalityMatcher::default();
        let candidates = set(&["Marilena", "Maringá", "Londrina", "Marialva"]);
        let suggestions = matcher.suggestions("Maringa PR", &candidates);
        assert!(!suggestions.is_empty());
        assert!(suggestions.len() <= MAX_SUGGESTIONS);
        assert_eq!(suggestions[0].name, "Maringá");
        assert!(suggestions.iter().all(|s| s.similarity >= SUGGESTION_FLOOR));
        assert!(suggestions.iter().all(|s| s.name != "Londrina"));
    }
}
