//! Alignment Matcher.
//!
//! Each unaligned secondary idea is scored against every primary idea in one
//! generator request. The best candidate above the confidence threshold is
//! linked and its classification and column are copied over. Secondaries
//! aligned earlier keep following their primary without a generator call.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Value, json};

use sprintline_common::{Field, Idea, ItemKey, LinkType, Swimlane};

use crate::errors::{CycleError, GeneratorError};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::tracker::{RetryPolicy, Tracker, with_retry};
use crate::util::{extract_json_object, truncate};

const SUMMARY_LIMIT: usize = 300;

const PROMPT: &str = "You match customer feedback to product initiatives. \
Score how well the feedback below corresponds to each initiative, from 0.0 \
(unrelated) to 1.0 (same request). Respond with only a JSON object mapping \
each initiative key to its score.";

pub fn build_request(secondary: &Idea, primaries: &[&Idea]) -> GenerationRequest {
    let candidates: Vec<String> = primaries
        .iter()
        .map(|p| format!("{}: {}", p.key, truncate(&p.summary, SUMMARY_LIMIT)))
        .collect();
    GenerationRequest::text("alignment", PROMPT)
        .with_context(format!(
            "Feedback {}: {}",
            secondary.key,
            truncate(&secondary.summary, SUMMARY_LIMIT)
        ))
        .with_context(format!("Initiatives:\n{}", candidates.join("\n")))
}

/// Candidate scores from a generator answer. Non-numeric entries are dropped.
pub fn parse_scores(answer: &str) -> Result<HashMap<ItemKey, f64>, GeneratorError> {
    let object = extract_json_object(answer)
        .ok_or_else(|| GeneratorError::Unparsable("no JSON object in answer".into()))?;
    let map: serde_json::Map<String, Value> =
        serde_json::from_str(object).map_err(|e| GeneratorError::Unparsable(e.to_string()))?;
    Ok(map
        .into_iter()
        .filter_map(|(key, score)| Some((ItemKey::new(key), score.as_f64()?)))
        .filter(|(_, score)| score.is_finite())
        .collect())
}

/// Highest-scoring primary strictly above `min_confidence`.
///
/// Equal scores go to the most recently updated primary, then the lower key.
pub fn best_match<'a>(
    scores: &HashMap<ItemKey, f64>,
    primaries: &[&'a Idea],
    min_confidence: f64,
) -> Option<(&'a Idea, f64)> {
    primaries
        .iter()
        .filter_map(|p| scores.get(&p.key).map(|s| (*p, *s)))
        .filter(|(_, score)| *score > min_confidence)
        .max_by(|(a, sa), (b, sb)| {
            sa.total_cmp(sb)
                .then_with(|| a.updated.cmp(&b.updated))
                .then_with(|| b.key.cmp(&a.key))
        })
}

/// Field writes that make `secondary` carry `primary`'s placement.
///
/// A field the primary has cleared is cleared on the secondary with `null`.
pub fn copy_updates(secondary: &Idea, primary: &Idea) -> Vec<(Field, Value)> {
    let mut updates = Vec::new();
    if secondary.classification != primary.classification {
        updates.push((Field::Classification, json!(primary.classification)));
    }
    if secondary.column != primary.column {
        updates.push((Field::RoadmapColumn, json!(primary.column)));
    }
    updates
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignReport {
    /// Newly linked secondary to primary.
    pub aligned: Vec<(ItemKey, ItemKey)>,
    /// Secondaries whose copied fields were refreshed.
    pub refreshed: usize,
    pub unmatched: Vec<ItemKey>,
    pub failed: Vec<ItemKey>,
}

#[derive(Debug, Clone)]
pub struct AlignSettings {
    pub min_confidence: f64,
}

async fn write_copies(
    tracker: &dyn Tracker,
    secondary: &Idea,
    primary: &Idea,
    retry: &RetryPolicy,
) -> Result<bool, crate::errors::TrackerError> {
    let updates = copy_updates(secondary, primary);
    let changed = !updates.is_empty();
    for (field, value) in updates {
        with_retry(retry, "set_field", || {
            tracker.set_field(&secondary.key, field, value.clone())
        })
        .await?;
    }
    Ok(changed)
}

async fn score(
    generator: &dyn ContentGenerator,
    secondary: &Idea,
    primaries: &[&Idea],
) -> Result<HashMap<ItemKey, f64>, GeneratorError> {
    let answer = generator.generate(&build_request(secondary, primaries)).await?;
    parse_scores(&answer)
}

/// Align stage. Callers skip it when the generator is unavailable.
pub async fn align(
    tracker: &dyn Tracker,
    generator: &dyn ContentGenerator,
    settings: &AlignSettings,
    retry: &RetryPolicy,
) -> Result<AlignReport, CycleError> {
    let ideas = with_retry(retry, "query_ideas", || tracker.query_ideas())
        .await
        .map_err(|source| CycleError::Observe { stage: "align", source })?;
    let primaries: Vec<&Idea> = ideas
        .iter()
        .filter(|i| i.swimlane == Swimlane::Primary)
        .collect();
    let by_key: HashMap<&ItemKey, &Idea> = ideas
        .iter()
        .filter(|i| i.swimlane == Swimlane::Primary)
        .map(|p| (&p.key, p))
        .collect();

    let mut report = AlignReport::default();
    let mut secondaries: Vec<&Idea> = ideas
        .iter()
        .filter(|i| i.swimlane == Swimlane::Secondary)
        .collect();
    secondaries.sort_by(|a, b| a.key.cmp(&b.key));

    for secondary in secondaries {
        if let Some(primary) = secondary.aligned_to.as_ref().and_then(|k| by_key.get(k)) {
            match write_copies(tracker, secondary, primary, retry).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(idea = %secondary.key, error = %e, "Could not refresh aligned idea");
                    report.failed.push(secondary.key.clone());
                }
            }
            continue;
        }
        if primaries.is_empty() {
            break;
        }

        let scores = match score(generator, secondary, &primaries).await {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(idea = %secondary.key, error = %e, "Alignment scoring failed, retrying next cycle");
                report.unmatched.push(secondary.key.clone());
                continue;
            }
        };
        let Some((primary, confidence)) = best_match(&scores, &primaries, settings.min_confidence)
        else {
            tracing::debug!(idea = %secondary.key, "No primary above the confidence threshold");
            report.unmatched.push(secondary.key.clone());
            continue;
        };

        let linked = with_retry(retry, "create_link", || {
            tracker.create_link(&secondary.key, &primary.key, LinkType::Alignment)
        })
        .await;
        if let Err(e) = linked {
            tracing::warn!(idea = %secondary.key, primary = %primary.key, error = %e, "Could not link aligned idea");
            report.failed.push(secondary.key.clone());
            continue;
        }
        tracing::info!(idea = %secondary.key, primary = %primary.key, confidence, "Aligned idea");
        report.aligned.push((secondary.key.clone(), primary.key.clone()));
        if let Err(e) = write_copies(tracker, secondary, primary, retry).await {
            tracing::warn!(idea = %secondary.key, error = %e, "Aligned idea not fully updated");
            report.failed.push(secondary.key.clone());
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fixtures::idea;
    use crate::generator::ScriptedGenerator;
    use crate::tracker::InMemoryTracker;
    use crate::tracker::memory::{BoardFixture, Mutation};
    use chrono::{TimeZone, Utc};

    fn primary(key: &str, column: &str, tag: &str, day: u32) -> Idea {
        Idea {
            column: Some(column.into()),
            classification: Some(tag.into()),
            updated: Some(Utc.with_ymd_and_hms(2026, 10, day, 9, 0, 0).unwrap()),
            ..idea(key, Some(4))
        }
    }

    fn secondary(key: &str) -> Idea {
        Idea {
            swimlane: Swimlane::Secondary,
            ..idea(key, None)
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> HashMap<ItemKey, f64> {
        pairs.iter().map(|(k, s)| (ItemKey::from(*k), *s)).collect()
    }

    #[test]
    fn parse_scores_accepts_surrounding_prose() {
        let parsed =
            parse_scores("Here you go:\n{\"RM-1\": 0.9, \"RM-2\": \"high\", \"RM-3\": null}\nDone.")
                .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[&ItemKey::from("RM-1")], 0.9);
        assert!(matches!(
            parse_scores("no idea"),
            Err(GeneratorError::Unparsable(_))
        ));
    }

    #[test]
    fn best_match_needs_confidence_above_threshold() {
        let a = primary("RM-1", "27 Oct 2026", "growth", 1);
        let b = primary("RM-2", "10 Nov 2026", "platform", 2);
        let primaries = vec![&a, &b];
        let (found, _) = best_match(&scores(&[("RM-1", 0.8), ("RM-2", 0.75)]), &primaries, 0.7).unwrap();
        assert_eq!(found.key.as_str(), "RM-1");
        assert!(best_match(&scores(&[("RM-1", 0.7), ("RM-2", 0.2)]), &primaries, 0.7).is_none());
    }

    #[test]
    fn ties_go_to_most_recently_updated_then_lower_key() {
        let older = primary("RM-1", "A", "x", 1);
        let newer = primary("RM-2", "A", "x", 5);
        let twin = primary("RM-3", "A", "x", 5);
        let primaries = vec![&older, &twin, &newer];
        let tied = scores(&[("RM-1", 0.9), ("RM-2", 0.9), ("RM-3", 0.9)]);
        let (found, _) = best_match(&tied, &primaries, 0.7).unwrap();
        assert_eq!(found.key.as_str(), "RM-2");
    }

    #[test]
    fn cleared_primary_fields_are_cleared_on_the_secondary() {
        let placed = Idea {
            column: Some("27 Oct 2026".into()),
            classification: Some("growth".into()),
            ..secondary("FB-1")
        };
        let cleared = idea("RM-1", Some(4));
        assert_eq!(
            copy_updates(&placed, &cleared),
            vec![(Field::Classification, Value::Null), (Field::RoadmapColumn, Value::Null)]
        );
        assert!(copy_updates(&secondary("FB-2"), &cleared).is_empty());
    }

    #[tokio::test]
    async fn aligned_secondary_loses_column_when_primary_leaves_roadmap() {
        let tracker = tracker();
        let generator = ScriptedGenerator::new(vec![
            Ok(r#"{"RM-1": 0.95}"#.into()),
            Ok("{}".into()),
        ]);
        let settings = AlignSettings { min_confidence: 0.7 };
        let retry = RetryPolicy::immediate(1);
        align(&tracker, &generator, &settings, &retry).await.unwrap();
        assert_eq!(tracker.idea("FB-1").unwrap().column.as_deref(), Some("27 Oct 2026"));

        tracker
            .set_field(&"RM-1".into(), Field::RoadmapColumn, Value::Null)
            .await
            .unwrap();
        let generator = ScriptedGenerator::new(vec![Ok("{}".into())]);
        let report = align(&tracker, &generator, &settings, &retry).await.unwrap();
        assert_eq!(report.refreshed, 1);
        let fb1 = tracker.idea("FB-1").unwrap();
        assert_eq!(fb1.column, None);
        assert_eq!(fb1.classification.as_deref(), Some("growth"));
    }

    #[test]
    fn request_lists_every_candidate() {
        let a = primary("RM-1", "A", "x", 1);
        let request = build_request(&secondary("FB-1"), &[&a]);
        assert!(request.render().contains("RM-1: Idea RM-1"));
        assert!(request.render().contains("Feedback FB-1"));
    }

    fn tracker() -> InMemoryTracker {
        InMemoryTracker::from_fixture(BoardFixture {
            ideas: vec![
                primary("RM-1", "27 Oct 2026", "growth", 1),
                primary("RM-2", "10 Nov 2026", "platform", 2),
                secondary("FB-1"),
                secondary("FB-2"),
            ],
            columns: vec!["27 Oct 2026".into(), "10 Nov 2026".into()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn match_links_once_and_copies_placement() {
        let tracker = tracker();
        let generator = ScriptedGenerator::new(vec![
            Ok(r#"{"RM-1": 0.2, "RM-2": 0.91}"#.into()),
            Ok(r#"{"RM-1": 0.3, "RM-2": 0.1}"#.into()),
        ]);
        let settings = AlignSettings { min_confidence: 0.7 };
        let retry = RetryPolicy::immediate(1);

        let report = align(&tracker, &generator, &settings, &retry).await.unwrap();
        assert_eq!(report.aligned, vec![(ItemKey::from("FB-1"), ItemKey::from("RM-2"))]);
        assert_eq!(report.unmatched, vec![ItemKey::from("FB-2")]);
        let fb1 = tracker.idea("FB-1").unwrap();
        assert_eq!(fb1.column.as_deref(), Some("10 Nov 2026"));
        assert_eq!(fb1.classification.as_deref(), Some("platform"));
        assert_eq!(tracker.idea("FB-2").unwrap().column, None);

        // FB-1 is settled; FB-2 is asked again and still finds nothing.
        tracker.clear_mutations();
        let generator = ScriptedGenerator::new(vec![Ok("{}".into())]);
        let again = align(&tracker, &generator, &settings, &retry).await.unwrap();
        assert!(again.aligned.is_empty());
        assert_eq!(generator.request_count(), 1);
        assert!(tracker.mutations().is_empty());
    }

    #[tokio::test]
    async fn aligned_secondary_follows_primary_without_generator() {
        let tracker = tracker();
        let generator = ScriptedGenerator::new(vec![
            Ok(r#"{"RM-1": 0.95}"#.into()),
            Err(GeneratorError::Failed("timeout".into())),
        ]);
        let settings = AlignSettings { min_confidence: 0.7 };
        let retry = RetryPolicy::immediate(1);
        align(&tracker, &generator, &settings, &retry).await.unwrap();

        // The primary moves on the roadmap.
        tracker
            .set_field(&"RM-1".into(), Field::RoadmapColumn, json!("10 Nov 2026"))
            .await
            .unwrap();
        tracker.clear_mutations();

        let generator = ScriptedGenerator::new(vec![Err(GeneratorError::Failed("down".into()))]);
        let report = align(&tracker, &generator, &settings, &retry).await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(tracker.idea("FB-1").unwrap().column.as_deref(), Some("10 Nov 2026"));
        assert_eq!(generator.request_count(), 1);
        assert!(
            !tracker
                .mutations()
                .iter()
                .any(|m| matches!(m, Mutation::CreateLink { .. }))
        );
    }
}
