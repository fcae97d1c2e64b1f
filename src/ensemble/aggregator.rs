//! Vote aggregation
//!
//! Pure merge of raw detector votes into final detections: cluster
//! overlapping spans, elect one entity type per cluster by weighted vote,
//! gate the cluster with the voting strategy, then order the survivors.

use super::weights::WeightProfile;
use super::{Detection, VotingStrategy};
use crate::detectors::DetectorVote;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Votes returned by one detector that completed successfully
#[derive(Debug, Clone)]
pub struct DetectorVotes {
    pub detector: String,
    pub votes: Vec<DetectorVote>,
}

/// Gate parameters for one aggregation
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub strategy: VotingStrategy,
    pub min_confidence: f64,
    pub min_votes: usize,
    pub enabled_entities: Option<HashSet<String>>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Weighted,
            min_confidence: 0.6,
            min_votes: 1,
            enabled_entities: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Ballot<'a> {
    detector: &'a str,
    vote: &'a DetectorVote,
}

/// A vote is usable when it is non-empty, in bounds and char-aligned
fn vote_is_valid(text: &str, vote: &DetectorVote) -> bool {
    vote.start < vote.end
        && vote.end <= text.len()
        && text.is_char_boundary(vote.start)
        && text.is_char_boundary(vote.end)
        && vote.confidence.is_finite()
}

/// Merge raw votes of the active detectors into an ordered, non-overlapping
/// detection list.
pub fn aggregate(
    text: &str,
    ballots: &[DetectorVotes],
    weights: &WeightProfile,
    settings: &AggregatorSettings,
) -> Vec<Detection> {
    let active = ballots.len();
    let mut flat: Vec<Ballot<'_>> = Vec::new();
    let mut dropped = 0usize;
    for ballot in ballots {
        for vote in &ballot.votes {
            if vote_is_valid(text, vote) {
                flat.push(Ballot {
                    detector: &ballot.detector,
                    vote,
                });
            } else {
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        tracing::debug!(count = dropped, "Dropped zero-width or out-of-bounds votes");
    }

    flat.sort_by(|a, b| {
        a.vote
            .start
            .cmp(&b.vote.start)
            .then(a.vote.end.cmp(&b.vote.end))
    });

    let mut detections = Vec::new();
    for cluster in clusters(&flat) {
        if let Some(detection) = resolve_cluster(text, cluster, weights, settings, active) {
            detections.push(detection);
        }
    }

    detections.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
            .then(b.confidence.total_cmp(&a.confidence))
    });
    detections
}

/// Split start-sorted ballots into maximal groups of transitively overlapping spans
fn clusters<'a, 'b>(sorted: &'b [Ballot<'a>]) -> Vec<&'b [Ballot<'a>]> {
    let mut out = Vec::new();
    let mut begin = 0;
    let mut cluster_end = 0;
    for (i, ballot) in sorted.iter().enumerate() {
        if i > begin && ballot.vote.start >= cluster_end {
            out.push(&sorted[begin..i]);
            begin = i;
        }
        if i == begin {
            cluster_end = ballot.vote.end;
        } else {
            cluster_end = cluster_end.max(ballot.vote.end);
        }
    }
    if begin < sorted.len() {
        out.push(&sorted[begin..]);
    }
    out
}

#[derive(Debug, Default)]
struct TypeTally<'a> {
    weight: f64,
    weighted_confidence: f64,
    /// Best vote per detector for this type
    votes: BTreeMap<&'a str, &'a DetectorVote>,
}

fn resolve_cluster(
    text: &str,
    cluster: &[Ballot<'_>],
    weights: &WeightProfile,
    settings: &AggregatorSettings,
    active: usize,
) -> Option<Detection> {
    let mut tallies: BTreeMap<&str, TypeTally<'_>> = BTreeMap::new();
    for ballot in cluster {
        let tally = tallies.entry(ballot.vote.entity_type.as_str()).or_default();
        let keep = match tally.votes.get(ballot.detector) {
            Some(existing) => ballot.vote.confidence > existing.confidence,
            None => true,
        };
        if keep {
            tally.votes.insert(ballot.detector, ballot.vote);
        }
    }
    for tally in tallies.values_mut() {
        tally.weight = 0.0;
        tally.weighted_confidence = 0.0;
        for (detector, vote) in &tally.votes {
            let w = weights.get(detector);
            tally.weight += w;
            tally.weighted_confidence += w * vote.confidence;
        }
    }

    // BTreeMap iteration is lexicographic, so on a full tie the first type wins
    let (entity_type, tally) = tallies.iter().fold(
        None::<(&str, &TypeTally<'_>)>,
        |best, (ty, tally)| match best {
            None => Some((*ty, tally)),
            Some((bty, btally)) => {
                let ord = tally
                    .weight
                    .total_cmp(&btally.weight)
                    .then(tally.weighted_confidence.total_cmp(&btally.weighted_confidence));
                if ord == Ordering::Greater {
                    Some((*ty, tally))
                } else {
                    Some((bty, btally))
                }
            }
        },
    )?;

    if let Some(enabled) = &settings.enabled_entities {
        if !enabled.contains(entity_type) {
            return None;
        }
    }

    let vote_count = tally.votes.len();
    let confidence = if tally.weight > 0.0 {
        (tally.weighted_confidence / tally.weight).clamp(0.0, 1.0)
    } else {
        0.0
    };

    if !passes_gate(settings, vote_count, active, confidence) {
        tracing::debug!(
            entity_type,
            votes = vote_count,
            active,
            confidence,
            "Cluster rejected by voting gate"
        );
        return None;
    }

    let start = tally.votes.values().map(|v| v.start).min()?;
    let end = tally.votes.values().map(|v| v.end).max()?;
    if start >= end || end > text.len() {
        return None;
    }

    Some(Detection {
        text: text[start..end].to_string(),
        entity_type: entity_type.to_string(),
        start,
        end,
        confidence,
        detectors: tally.votes.keys().map(|d| d.to_string()).collect(),
        vote_count,
    })
}

fn passes_gate(
    settings: &AggregatorSettings,
    vote_count: usize,
    active: usize,
    confidence: f64,
) -> bool {
    if vote_count < settings.min_votes.max(1) {
        return false;
    }
    match settings.strategy {
        VotingStrategy::Unanimous => active > 0 && vote_count >= active,
        VotingStrategy::Majority => vote_count * 2 > active,
        VotingStrategy::Any => true,
        VotingStrategy::Weighted => confidence >= settings.min_confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(detector: &str, votes: Vec<DetectorVote>) -> DetectorVotes {
        DetectorVotes {
            detector: detector.to_string(),
            votes,
        }
    }

    fn profile(entries: &[(&str, f64)]) -> WeightProfile {
        WeightProfile::new(entries.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    const TEXT: &str = "Contact John Smith at john.smith@example.com, phone 555-0100.";

    fn scenario_ballots() -> Vec<DetectorVotes> {
        vec![
            ballot(
                "rule_based",
                vec![
                    DetectorVote::new("EMAIL", 22, 44, 0.95),
                    DetectorVote::new("PHONE", 52, 60, 0.75),
                ],
            ),
            ballot("neural_ner", vec![DetectorVote::new("PERSON", 8, 18, 0.79)]),
        ]
    }

    #[test]
    fn test_scenario_weighted() {
        let detections = aggregate(
            TEXT,
            &scenario_ballots(),
            &profile(&[("rule_based", 1.0), ("neural_ner", 1.2)]),
            &AggregatorSettings::default(),
        );
        let types: Vec<&str> = detections.iter().map(|d| d.entity_type.as_str()).collect();
        assert_eq!(types, vec!["PERSON", "EMAIL", "PHONE"]);
        assert_eq!(detections[0].text, "John Smith");
        assert_eq!(detections[2].text, "555-0100");
        assert_eq!(detections[1].vote_count, 1);
    }

    #[test]
    fn test_weighted_gate_threshold() {
        let settings = AggregatorSettings {
            min_confidence: 0.8,
            ..Default::default()
        };
        let detections = aggregate(TEXT, &scenario_ballots(), &WeightProfile::default(), &settings);
        let types: Vec<&str> = detections.iter().map(|d| d.entity_type.as_str()).collect();
        assert_eq!(types, vec!["EMAIL"]);
    }

    #[test]
    fn test_unanimous_and_majority() {
        let ballots = vec![
            ballot("a", vec![DetectorVote::new("PERSON", 0, 4, 0.9)]),
            ballot(
                "b",
                vec![
                    DetectorVote::new("PERSON", 0, 4, 0.8),
                    DetectorVote::new("EMAIL", 10, 20, 0.9),
                ],
            ),
            ballot("c", vec![DetectorVote::new("PERSON", 1, 4, 0.7)]),
        ];
        let text = "John went to the market";
        let w = WeightProfile::default();

        let unanimous = AggregatorSettings {
            strategy: VotingStrategy::Unanimous,
            ..Default::default()
        };
        let out = aggregate(text, &ballots, &w, &unanimous);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].vote_count, 3);
        assert_eq!((out[0].start, out[0].end), (0, 4));

        let majority = AggregatorSettings {
            strategy: VotingStrategy::Majority,
            ..Default::default()
        };
        assert_eq!(aggregate(text, &ballots, &w, &majority).len(), 1);

        let any = AggregatorSettings {
            strategy: VotingStrategy::Any,
            ..Default::default()
        };
        assert_eq!(aggregate(text, &ballots, &w, &any).len(), 2);
    }

    #[test]
    fn test_min_votes_applies_to_every_strategy() {
        let ballots = vec![
            ballot("a", vec![DetectorVote::new("EMAIL", 0, 5, 0.99)]),
            ballot("b", vec![]),
        ];
        let settings = AggregatorSettings {
            strategy: VotingStrategy::Any,
            min_votes: 2,
            ..Default::default()
        };
        assert!(aggregate("a@b.c", &ballots, &WeightProfile::default(), &settings).is_empty());
    }

    #[test]
    fn test_entity_type_weighted_majority() {
        // heavier detector wins the type vote
        let ballots = vec![
            ballot("light", vec![DetectorVote::new("LOCATION", 0, 6, 0.9)]),
            ballot("heavy", vec![DetectorVote::new("PERSON", 0, 6, 0.7)]),
        ];
        let out = aggregate(
            "Milano",
            &ballots,
            &profile(&[("light", 0.5), ("heavy", 1.5)]),
            &AggregatorSettings::default(),
        );
        assert_eq!(out[0].entity_type, "PERSON");
        assert_eq!(out[0].detectors, vec!["heavy".to_string()]);
    }

    #[test]
    fn test_entity_type_tie_break_is_lexicographic() {
        let ballots = vec![
            ballot("a", vec![DetectorVote::new("PERSON", 0, 6, 0.8)]),
            ballot("b", vec![DetectorVote::new("LOCATION", 0, 6, 0.8)]),
        ];
        let out = aggregate(
            "Milano",
            &ballots,
            &WeightProfile::default(),
            &AggregatorSettings::default(),
        );
        assert_eq!(out[0].entity_type, "LOCATION");

        // reversed input order gives the same answer
        let reversed: Vec<DetectorVotes> = ballots.into_iter().rev().collect();
        let out = aggregate(
            "Milano",
            &reversed,
            &WeightProfile::default(),
            &AggregatorSettings::default(),
        );
        assert_eq!(out[0].entity_type, "LOCATION");
    }

    #[test]
    fn test_tie_on_weight_broken_by_confidence() {
        let ballots = vec![
            ballot("a", vec![DetectorVote::new("PERSON", 0, 6, 0.9)]),
            ballot("b", vec![DetectorVote::new("LOCATION", 0, 6, 0.7)]),
        ];
        let out = aggregate(
            "Milano",
            &ballots,
            &WeightProfile::default(),
            &AggregatorSettings::default(),
        );
        assert_eq!(out[0].entity_type, "PERSON");
    }

    #[test]
    fn test_invalid_votes_dropped() {
        let text = "città";
        let ballots = vec![ballot(
            "a",
            vec![
                DetectorVote::new("X", 3, 3, 0.9),
                DetectorVote::new("X", 0, 50, 0.9),
                // splits the two-byte 'à'
                DetectorVote::new("X", 0, 5, 0.9),
            ],
        )];
        let out = aggregate(
            text,
            &ballots,
            &WeightProfile::default(),
            &AggregatorSettings::default(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_transitive_clusters_are_disjoint() {
        let text = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let ballots = vec![
            ballot("a", vec![DetectorVote::new("X", 0, 5, 0.9)]),
            ballot("b", vec![DetectorVote::new("X", 4, 10, 0.9)]),
            ballot("c", vec![DetectorVote::new("Y", 9, 12, 0.6)]),
            ballot("d", vec![DetectorVote::new("Z", 20, 25, 0.9)]),
        ];
        let out = aggregate(
            text,
            &ballots,
            &WeightProfile::default(),
            &AggregatorSettings::default(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].start, out[0].end), (0, 10));
        assert_eq!(out[0].entity_type, "X");
        for pair in out.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_enabled_entities_filter() {
        let settings = AggregatorSettings {
            enabled_entities: Some(["EMAIL".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let out = aggregate(TEXT, &scenario_ballots(), &WeightProfile::default(), &settings);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].entity_type, "EMAIL");
    }

    #[test]
    fn test_empty_input() {
        let ballots = vec![ballot("a", vec![]), ballot("b", vec![])];
        assert!(aggregate(
            "",
            &ballots,
            &WeightProfile::default(),
            &AggregatorSettings::default()
        )
        .is_empty());
    }
}
