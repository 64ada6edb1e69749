//! Interest catalog: the special interests agents are built around.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Category for entries that don't name one.
pub const DEFAULT_CATEGORY: &str = "general";

/// One catalog entry as written in the config: a bare story, a list of
/// alternative stories, or a story with sampling hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InterestEntry {
    Simple(String),
    Alternatives(Vec<String>),
    Detailed {
        story: String,
        #[serde(default = "default_weight")]
        weight: f64,
        #[serde(default)]
        category: Option<String>,
    },
}

fn default_weight() -> f64 {
    1.0
}

/// An entry in the shape the batch loop samples from.
#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    /// One is picked per crew.
    pub stories: Vec<String>,
    pub weight: f64,
    pub category: String,
}

impl Interest {
    fn sampleable(&self) -> bool {
        self.weight > 0.0 && self.weight.is_finite()
    }
}

impl From<InterestEntry> for Interest {
    fn from(entry: InterestEntry) -> Self {
        match entry {
            InterestEntry::Simple(story) => Self {
                stories: vec![story],
                weight: 1.0,
                category: DEFAULT_CATEGORY.to_string(),
            },
            InterestEntry::Alternatives(stories) => Self {
                stories,
                weight: 1.0,
                category: DEFAULT_CATEGORY.to_string(),
            },
            InterestEntry::Detailed {
                story,
                weight,
                category,
            } => Self {
                stories: vec![story],
                weight,
                category: category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            },
        }
    }
}

/// Interest name → entry, with a per-category index built as entries are
/// added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, InterestEntry>",
    into = "BTreeMap<String, InterestEntry>"
)]
pub struct InterestCatalog {
    entries: BTreeMap<String, InterestEntry>,
    interests: BTreeMap<String, Interest>,
    categories: BTreeMap<String, Vec<String>>,
}

impl InterestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: InterestEntry) {
        let name = name.into();
        if let Some(old) = self.interests.remove(&name) {
            if let Some(names) = self.categories.get_mut(&old.category) {
                names.retain(|n| n != &name);
                if names.is_empty() {
                    self.categories.remove(&old.category);
                }
            }
        }
        self.entries.insert(name.clone(), entry.clone());

        let interest = Interest::from(entry);
        if interest.stories.is_empty() {
            warn!(interest = %name, "Interest has no story, skipping");
            return;
        }
        let names = self.categories.entry(interest.category.clone()).or_default();
        if let Err(at) = names.binary_search(&name) {
            names.insert(at, name.clone());
        }
        self.interests.insert(name, interest);
    }

    pub fn len(&self) -> usize {
        self.interests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Interest> {
        self.interests.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.interests.keys().map(String::as_str)
    }

    /// Category → interest names, sorted.
    pub fn categories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.categories
    }

    /// One of the interest's stories, picked at random.
    pub fn pick_story<R: Rng + ?Sized>(&self, name: &str, rng: &mut R) -> Option<&str> {
        self.interests
            .get(name)?
            .stories
            .choose(rng)
            .map(String::as_str)
    }

    /// Up to `k` distinct interests from `categories` (all when empty),
    /// drawn by weight.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        k: usize,
        categories: &[String],
        rng: &mut R,
    ) -> Vec<String> {
        let mut names: Vec<&String> = if categories.is_empty() {
            self.interests.keys().collect()
        } else {
            categories
                .iter()
                .filter_map(|category| {
                    let names = self.categories.get(category);
                    if names.is_none() {
                        warn!(category = %category, "Unknown interest category");
                    }
                    names
                })
                .flatten()
                .collect()
        };
        names.sort();
        names.dedup();
        let entries: Vec<(&String, &Interest)> = names
            .into_iter()
            .filter_map(|name| self.interests.get(name).map(|interest| (name, interest)))
            .filter(|(_, interest)| interest.sampleable())
            .collect();
        if k > entries.len() {
            warn!(requested = k, available = entries.len(), "Not enough interests in catalog");
        }

        match entries.choose_multiple_weighted(rng, k.min(entries.len()), |(_, i)| i.weight) {
            Ok(chosen) => chosen.map(|(name, _)| (*name).clone()).collect(),
            Err(e) => {
                warn!(error = %e, "Weighted interest sampling failed, sampling uniformly");
                entries
                    .choose_multiple(rng, k)
                    .map(|(name, _)| (*name).clone())
                    .collect()
            }
        }
    }
}

impl From<BTreeMap<String, InterestEntry>> for InterestCatalog {
    fn from(entries: BTreeMap<String, InterestEntry>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<InterestCatalog> for BTreeMap<String, InterestEntry> {
    fn from(catalog: InterestCatalog) -> Self {
        catalog.entries
    }
}

impl FromIterator<(String, InterestEntry)> for InterestCatalog {
    fn from_iter<I: IntoIterator<Item = (String, InterestEntry)>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for (name, entry) in iter {
            catalog.insert(name, entry);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog() -> InterestCatalog {
        serde_yaml::from_str(
            r#"
boats: Boats fascinate you.
birds:
  story: You watch birds.
  category: nature
trees:
  story: You climb trees.
  weight: 3.0
  category: nature
ghosts:
  story: Never picked.
  weight: 0.0
painting:
  - You love oil paint.
  - You love watercolor.
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_entries() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.get("boats").unwrap().stories, vec!["Boats fascinate you."]);
        assert_eq!(catalog.get("trees").unwrap().weight, 3.0);
        assert_eq!(catalog.get("birds").unwrap().weight, 1.0);
        assert_eq!(catalog.get("boats").unwrap().category, DEFAULT_CATEGORY);
    }

    #[test]
    fn test_alternative_stories() {
        let catalog = catalog();
        let painting = catalog.get("painting").unwrap();
        assert_eq!(
            painting.stories,
            vec!["You love oil paint.", "You love watercolor."]
        );

        let mut rng = StdRng::seed_from_u64(1);
        let picked: std::collections::HashSet<&str> = (0..40)
            .filter_map(|_| catalog.pick_story("painting", &mut rng))
            .collect();
        assert_eq!(picked.len(), 2);
        assert!(catalog.pick_story("unknown", &mut rng).is_none());
    }

    #[test]
    fn test_categories_indexed_on_load() {
        let catalog = catalog();
        let groups = catalog.categories();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["nature"], vec!["birds", "trees"]);
        assert_eq!(groups[DEFAULT_CATEGORY], vec!["boats", "ghosts", "painting"]);
    }

    #[test]
    fn test_insert_moves_between_categories() {
        let mut catalog = catalog();
        catalog.insert(
            "birds",
            InterestEntry::Detailed {
                story: "You watch birds.".into(),
                weight: 1.0,
                category: Some("sky".into()),
            },
        );
        assert_eq!(catalog.categories()["nature"], vec!["trees"]);
        assert_eq!(catalog.categories()["sky"], vec!["birds"]);
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn test_serializes_back_to_entries() {
        let catalog = catalog();
        let yaml = serde_yaml::to_string(&catalog).unwrap();
        let reloaded: InterestCatalog = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reloaded, catalog);
    }

    #[test]
    fn test_sample_is_distinct_and_skips_zero_weight() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let picked = catalog.sample(4, &[], &mut rng);
            assert_eq!(picked.len(), 4);
            assert!(!picked.contains(&"ghosts".to_string()));
            let mut unique = picked.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), 4);
        }
    }

    #[test]
    fn test_sample_within_categories() {
        let catalog = catalog();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let mut picked = catalog.sample(5, &["nature".to_string()], &mut rng);
            picked.sort();
            assert_eq!(picked, vec!["birds", "trees"]);
        }
        assert!(catalog
            .sample(2, &["unknown".to_string()], &mut rng)
            .is_empty());
    }

    #[test]
    fn test_sample_caps_at_catalog_size() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(catalog().sample(10, &[], &mut rng).len(), 4);
        assert!(InterestCatalog::new().sample(2, &[], &mut rng).is_empty());
    }
}
