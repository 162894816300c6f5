//! NLP workers: dictionary-driven entity and alert matching over a
//! segment's transcript text. Two analysers share one
//! dictionary-loading/matching primitive ([`PhraseIndex`]) but are scheduled
//! and metered independently as separate tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::Segment;
use crate::persistence::{NewAlert, NewEntity, TranscriptRepository};
use crate::worker::{Analyser, AnalyserNeeds, Artifact, WorkerContext};
use crate::{Error, Result};

/// One dictionary file's parsed contents: a category/label plus its phrase
/// list. Loaded from `*.yaml` files shaped like `{category: ..., phrases: [...]}`
/// (alerts) or `{label: ..., items: [...]}` (entities).
#[derive(Debug, Clone, Deserialize)]
struct AlertDictionary {
    category: Option<String>,
    #[serde(default)]
    phrases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EntityDictionary {
    label: Option<String>,
    #[serde(default)]
    items: Vec<String>,
}

/// A loaded set of (category/label, phrases) pairs, scanned linearly against
/// transcript text per segment. The initial implementation is a linear scan;
/// a trie or Aho-Corasick index is a future optimisation, not a correctness
/// requirement.
#[derive(Debug, Clone, Default)]
pub struct PhraseIndex {
    entries: Vec<(String, Vec<String>)>,
}

impl PhraseIndex {
    pub fn from_entries(entries: Vec<(String, Vec<String>)>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    /// Finds every (category, phrase, char_start) match of any phrase in
    /// `text`, including repeat occurrences. Within a category, phrases are
    /// scanned longest-first and a match already covered by a longer phrase
    /// is skipped, so e.g. "election day" is reported once rather than also
    /// reporting the "election" it contains.
    pub fn find_matches(&self, text: &str) -> Vec<(String, String, usize)> {
        let mut matches = Vec::new();
        for (category, phrases) in &self.entries {
            let mut by_length: Vec<&String> = phrases.iter().filter(|p| !p.is_empty()).collect();
            by_length.sort_by_key(|p| std::cmp::Reverse(p.len()));

            let mut covered: Vec<std::ops::Range<usize>> = Vec::new();
            for phrase in by_length {
                for (start, matched) in text.match_indices(phrase.as_str()) {
                    let span = start..start + matched.len();
                    if covered.iter().any(|c| c.start < span.end && span.start < c.end) {
                        continue;
                    }
                    covered.push(span);
                    matches.push((category.clone(), phrase.clone(), start));
                }
            }
        }
        matches
    }
}

fn load_yaml_dir<T, F>(dir: &Path, fallback_key: F) -> Vec<(String, Vec<String>)>
where
    T: for<'de> Deserialize<'de>,
    F: Fn(&T, &str) -> (String, Vec<String>),
{
    let mut out = Vec::new();
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(parsed) = serde_yaml_like(&contents) else {
            continue;
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let Ok(doc) = serde_json::from_value::<T>(parsed) else {
            continue;
        };
        let (key, phrases) = fallback_key(&doc, &stem);
        let phrases: Vec<String> = phrases.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
        if !phrases.is_empty() {
            out.push((key, phrases));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Parses a YAML document into a `serde_json::Value` via `yaml-rust2`, since
/// the dictionaries are small flat maps and this avoids pulling in a second
/// full YAML-to-serde bridge crate for a one-shot load at process start.
fn serde_yaml_like(contents: &str) -> Result<serde_json::Value> {
    let docs = yaml_rust2::YamlLoader::load_from_str(contents)
        .map_err(|e| Error::Config(format!("invalid dictionary yaml: {e}")))?;
    let doc = docs.into_iter().next().unwrap_or(yaml_rust2::Yaml::Null);
    Ok(yaml_to_json(&doc))
}

fn yaml_to_json(yaml: &yaml_rust2::Yaml) -> serde_json::Value {
    use yaml_rust2::Yaml;
    match yaml {
        Yaml::Real(s) => s.parse::<f64>().map(|f| json!(f)).unwrap_or(serde_json::Value::Null),
        Yaml::Integer(i) => json!(i),
        Yaml::String(s) => json!(s),
        Yaml::Boolean(b) => json!(b),
        Yaml::Array(items) => serde_json::Value::Array(items.iter().map(yaml_to_json).collect()),
        Yaml::Hash(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    obj.insert(key.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(obj)
        }
        Yaml::Null | Yaml::BadValue | Yaml::Alias(_) => serde_json::Value::Null,
    }
}

fn load_alert_dictionaries(dir: &Path) -> PhraseIndex {
    PhraseIndex::from_entries(load_yaml_dir::<AlertDictionary, _>(dir, |doc, stem| {
        (doc.category.clone().unwrap_or_else(|| stem.to_string()), doc.phrases.clone())
    }))
}

fn load_entity_dictionaries(dir: &Path) -> PhraseIndex {
    PhraseIndex::from_entries(load_yaml_dir::<EntityDictionary, _>(dir, |doc, stem| {
        (doc.label.clone().unwrap_or_else(|| stem.to_string()), doc.items.clone())
    }))
}

/// Loads a segment's transcript and returns the text to scan, preferring the
/// normalised form and falling back to the raw text.
async fn transcript_text(
    transcripts: &dyn TranscriptRepository,
    segment: &Segment,
) -> Result<String> {
    let transcript = transcripts
        .get_transcript(segment.id, segment.started_at)
        .await?
        .ok_or_else(|| Error::MissingMedia {
            path: PathBuf::from(format!("transcript for segment {}", segment.id)),
        })?;
    Ok(transcript.text_norm.unwrap_or(transcript.text))
}

#[derive(Debug, Clone)]
pub struct EntitiesConfig {
    pub dictionaries_dir: PathBuf,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            dictionaries_dir: PathBuf::from("data/dictionaries/entities"),
        }
    }
}

pub struct EntitiesAnalyser {
    pub config: EntitiesConfig,
    pub transcripts: Arc<dyn TranscriptRepository>,
}

impl EntitiesAnalyser {
    pub fn new(config: EntitiesConfig, transcripts: Arc<dyn TranscriptRepository>) -> Self {
        Self { config, transcripts }
    }
}

#[async_trait]
impl Analyser for EntitiesAnalyser {
    fn name(&self) -> &'static str {
        "nlp_entities"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds::default()
    }

    async fn run(&self, _ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let text = transcript_text(self.transcripts.as_ref(), segment).await?;
        let index = load_entity_dictionaries(&self.config.dictionaries_dir);

        if !index.is_empty() {
            return Ok(index
                .find_matches(&text)
                .into_iter()
                .map(|(label, phrase, start)| {
                    Artifact::Entity(NewEntity {
                        segment_id: segment.id,
                        segment_started_at: segment.started_at,
                        channel_id: segment.channel_id.clone(),
                        label,
                        category: "dict".to_string(),
                        start_offset: start as i32,
                        end_offset: (start + phrase.len()) as i32,
                        model_name: "dict-v1".to_string(),
                    })
                })
                .collect());
        }

        // Fallback when no dictionaries are configured: extract unique
        // whitespace tokens of at least 4 characters as generic terms.
        let mut seen = std::collections::HashSet::new();
        let mut artifacts = Vec::new();
        for word in text.split_whitespace() {
            if word.chars().count() < 4 || !seen.insert(word.to_string()) {
                continue;
            }
            artifacts.push(Artifact::Entity(NewEntity {
                segment_id: segment.id,
                segment_started_at: segment.started_at,
                channel_id: segment.channel_id.clone(),
                label: "TERM".to_string(),
                category: "heuristic".to_string(),
                start_offset: 0,
                end_offset: word.len() as i32,
                model_name: "heuristic-v1".to_string(),
            }));
        }
        Ok(artifacts)
    }
}

#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub dictionaries_dir: PathBuf,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dictionaries_dir: PathBuf::from("data/dictionaries/alerts"),
        }
    }
}

pub struct AlertsAnalyser {
    pub config: AlertsConfig,
    pub transcripts: Arc<dyn TranscriptRepository>,
}

impl AlertsAnalyser {
    pub fn new(config: AlertsConfig, transcripts: Arc<dyn TranscriptRepository>) -> Self {
        Self { config, transcripts }
    }
}

#[async_trait]
impl Analyser for AlertsAnalyser {
    fn name(&self) -> &'static str {
        "nlp_alerts"
    }

    fn needs(&self) -> AnalyserNeeds {
        AnalyserNeeds::default()
    }

    async fn run(&self, _ctx: &WorkerContext, segment: &Segment) -> Result<Vec<Artifact>> {
        let text = transcript_text(self.transcripts.as_ref(), segment).await?;
        let index = load_alert_dictionaries(&self.config.dictionaries_dir);

        Ok(index
            .find_matches(&text)
            .into_iter()
            .map(|(category, phrase, _start)| {
                Artifact::Alert(NewAlert {
                    segment_id: segment.id,
                    segment_started_at: segment.started_at,
                    channel_id: segment.channel_id.clone(),
                    matched_phrase: phrase,
                    category: category.clone(),
                    payload: json!({ "segment_started_at": segment.started_at }),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_index_reports_every_match_with_offset() {
        let index = PhraseIndex::from_entries(vec![
            ("politics".to_string(), vec!["election".to_string()]),
            ("economy".to_string(), vec!["inflation".to_string()]),
        ]);
        let matches = index.find_matches("the election caused inflation fears");
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().any(|(cat, phrase, _)| cat == "politics" && phrase == "election"));
        assert!(matches.iter().any(|(cat, phrase, _)| cat == "economy" && phrase == "inflation"));
    }

    #[test]
    fn phrase_index_records_every_repeat_occurrence() {
        let index = PhraseIndex::from_entries(vec![(
            "politics".to_string(),
            vec!["election".to_string()],
        )]);
        let matches = index.find_matches("election day: the election result, a second election");
        let offsets: Vec<usize> = matches
            .iter()
            .filter(|(cat, phrase, _)| cat == "politics" && phrase == "election")
            .map(|(_, _, start)| *start)
            .collect();
        assert_eq!(offsets, vec![0, 18, 44]);
    }

    #[test]
    fn phrase_index_prefers_longest_phrase_over_one_it_contains() {
        let index = PhraseIndex::from_entries(vec![(
            "politics".to_string(),
            vec!["election".to_string(), "election day".to_string()],
        )]);
        let matches = index.find_matches("the election day was calm");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].1, "election day");
    }

    #[test]
    fn phrase_index_empty_reports_no_matches() {
        let index = PhraseIndex::default();
        assert!(index.is_empty());
        assert!(index.find_matches("anything").is_empty());
    }

    #[test]
    fn yaml_alert_dictionary_parses_category_and_phrases() {
        let yaml = "category: breaking\nphrases:\n  - earthquake\n  - evacuation order\n";
        let value = serde_yaml_like(yaml).unwrap();
        let doc: AlertDictionary = serde_json::from_value(value).unwrap();
        assert_eq!(doc.category.as_deref(), Some("breaking"));
        assert_eq!(doc.phrases, vec!["earthquake", "evacuation order"]);
    }
}
