//! Disease cohorts, defined as lists of keywords searched for in the free-text diagnosis.
//!
//! A record belongs to every cohort that has at least one keyword occurring anywhere in its
//! diagnosis (case-insensitive, no word boundaries), so cohorts can overlap.
use crate::{util, ArcStr, Error, Result};
use aho_corasick::AhoCorasick;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
    sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohort {
    name: ArcStr,
    description: Option<ArcStr>,
    /// Lower case, trimmed, never empty.
    keywords: Vec<ArcStr>,
}

impl Cohort {
    pub fn new(
        name: impl Into<String>,
        keywords: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        CohortRaw {
            name: name.into(),
            description: None,
            keywords: keywords
                .into_iter()
                .map(|kw| kw.as_ref().to_owned())
                .collect(),
        }
        .try_into()
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn keywords(&self) -> &[ArcStr] {
        &self.keywords
    }

    /// Whether any keyword occurs in the (already lower-cased) diagnosis.
    fn matches_lowercase(&self, diagnosis: &str) -> bool {
        self.keywords.iter().any(|kw| diagnosis.contains(&**kw))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CohortRaw {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    keywords: Vec<String>,
}

impl TryFrom<CohortRaw> for Cohort {
    type Error = Error;
    fn try_from(raw: CohortRaw) -> Result<Self> {
        let name = raw.name.trim();
        ensure!(!name.is_empty(), "cohort names cannot be empty");
        ensure!(
            !raw.keywords.is_empty(),
            "cohort \"{}\" has no keywords",
            name
        );
        let keywords = raw
            .keywords
            .iter()
            .map(|kw| {
                let kw = kw.trim().to_lowercase();
                ensure!(!kw.is_empty(), "cohort \"{}\" has an empty keyword", name);
                Ok(ArcStr::from(kw))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Cohort {
            name: name.into(),
            description: raw.description.map(Into::into),
            keywords,
        })
    }
}

impl From<Cohort> for CohortRaw {
    fn from(cohort: Cohort) -> Self {
        CohortRaw {
            name: cohort.name.to_string(),
            description: cohort.description.map(|d| d.to_string()),
            keywords: cohort.keywords.iter().map(|kw| kw.to_string()).collect(),
        }
    }
}

/// An ordered list of cohorts with unique names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CohortRaw>", into = "Vec<CohortRaw>")]
pub struct CohortDefinitions {
    cohorts: Arc<Vec<Cohort>>,
}

impl TryFrom<Vec<CohortRaw>> for CohortDefinitions {
    type Error = Error;
    fn try_from(raw: Vec<CohortRaw>) -> Result<Self> {
        let cohorts = raw
            .into_iter()
            .map(Cohort::try_from)
            .collect::<Result<Vec<_>>>()?;
        CohortDefinitions::new(cohorts)
    }
}

impl From<CohortDefinitions> for Vec<CohortRaw> {
    fn from(defs: CohortDefinitions) -> Self {
        defs.iter().cloned().map(Into::into).collect()
    }
}

/// The on-disk layout: `[[cohorts]]` tables in toml, `{"cohorts": [..]}` in json.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CohortFile {
    cohorts: CohortDefinitions,
}

impl CohortDefinitions {
    pub fn new(cohorts: Vec<Cohort>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for cohort in &cohorts {
            ensure!(
                seen.insert(cohort.name.clone()),
                "cohort \"{}\" is defined more than once",
                cohort.name
            );
        }
        Ok(CohortDefinitions {
            cohorts: Arc::new(cohorts),
        })
    }

    /// Load cohort definitions from a `.toml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<CohortDefinitions> {
            let text = fs::read_to_string(path)?;
            let file: CohortFile = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => toml::from_str(&text)?,
                Some("json") => serde_json::from_str(&text)?,
                _ => bail!("cohort definitions should be a `.toml` or `.json` file"),
            };
            Ok(file.cohorts)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading cohorts from \"{}\"", path.display()))
    }

    /// Save the definitions. Format is inferred from the extension (`.toml` or `.json`).
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result {
        let path = path.as_ref();
        ensure!(
            !util::path_exists(path)? || overwrite,
            "file already exists at \"{}\"",
            path.display()
        );
        let file = CohortFile {
            cohorts: self.clone(),
        };
        let text = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(&file).context("serializing cohorts")?,
            Some("json") => serde_json::to_string_pretty(&file).context("serializing cohorts")?,
            _ => bail!("cohort definitions should be a `.toml` or `.json` file"),
        };
        let mut out = util::create_output(path)?;
        std::io::Write::write_all(&mut out, text.as_bytes()).context("saving cohorts")?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Cohort> {
        self.cohorts.iter().find(|cohort| &*cohort.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.cohorts.iter().map(|cohort| &cohort.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cohort> + '_ {
        self.cohorts.iter()
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    /// Cohorts whose keywords occur in `diagnosis`, checking each cohort in turn.
    ///
    /// Use `matcher` when classifying many records.
    pub fn classify(&self, diagnosis: Option<&str>) -> BTreeSet<ArcStr> {
        let Some(diagnosis) = diagnosis else {
            return BTreeSet::new();
        };
        let diagnosis = diagnosis.to_lowercase();
        self.cohorts
            .iter()
            .filter(|cohort| cohort.matches_lowercase(&diagnosis))
            .map(|cohort| cohort.name.clone())
            .collect()
    }

    pub fn matcher(&self) -> CohortMatcher {
        CohortMatcher::new(self.clone())
    }
}

/// Classifies diagnoses against every cohort in one pass over the text.
pub struct CohortMatcher {
    definitions: CohortDefinitions,
    matcher: AhoCorasick,
    /// For each pattern in `matcher`, the indexes of the cohorts it belongs to.
    pattern_cohorts: Vec<Vec<usize>>,
}

impl CohortMatcher {
    fn new(definitions: CohortDefinitions) -> Self {
        let mut patterns: Vec<ArcStr> = vec![];
        let mut pattern_cohorts: Vec<Vec<usize>> = vec![];
        let mut pattern_idx: HashMap<ArcStr, usize> = HashMap::new();
        for (cohort_idx, cohort) in definitions.iter().enumerate() {
            for kw in cohort.keywords() {
                let idx = *pattern_idx.entry(kw.clone()).or_insert_with(|| {
                    patterns.push(kw.clone());
                    pattern_cohorts.push(vec![]);
                    patterns.len() - 1
                });
                if !pattern_cohorts[idx].contains(&cohort_idx) {
                    pattern_cohorts[idx].push(cohort_idx);
                }
            }
        }
        let matcher = AhoCorasick::new(patterns.iter().map(|kw| kw.as_bytes()));
        Self {
            definitions,
            matcher,
            pattern_cohorts,
        }
    }

    /// The names of every cohort with a keyword in `diagnosis`. Missing diagnoses match nothing.
    pub fn classify(&self, diagnosis: Option<&str>) -> BTreeSet<ArcStr> {
        let Some(diagnosis) = diagnosis else {
            return BTreeSet::new();
        };
        let diagnosis = diagnosis.to_lowercase();
        let mut hits = vec![false; self.definitions.len()];
        // overlapping so that a keyword inside another keyword is still seen.
        for mat in self.matcher.find_overlapping_iter(&diagnosis) {
            for &cohort_idx in &self.pattern_cohorts[mat.pattern()] {
                hits[cohort_idx] = true;
            }
        }
        self.definitions
            .iter()
            .zip(hits)
            .filter(|(_, hit)| *hit)
            .map(|(cohort, _)| cohort.name.clone())
            .collect()
    }

    pub fn is_member(&self, diagnosis: Option<&str>, cohort: &str) -> bool {
        match self.definitions.get(cohort) {
            Some(cohort) => diagnosis
                .map(|d| cohort.matches_lowercase(&d.to_lowercase()))
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn definitions(&self) -> &CohortDefinitions {
        &self.definitions
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn defs() -> CohortDefinitions {
        CohortDefinitions::new(vec![
            Cohort::new("gastro", ["gastroenteritis", "diarrh"]).unwrap(),
            Cohort::new("dehydration", ["dehydration"]).unwrap(),
            Cohort::new("respiratory", ["ari", "fever", "Pneumonia "]).unwrap(),
        ])
        .unwrap()
    }

    fn names(set: BTreeSet<ArcStr>) -> Vec<String> {
        set.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn overlapping_membership() {
        let matcher = defs().matcher();
        assert_eq!(
            names(matcher.classify(Some("Acute Gastroenteritis with severe dehydration"))),
            vec!["dehydration", "gastro"]
        );
    }

    #[test]
    fn substring_not_word() {
        let matcher = defs().matcher();
        // "ari" inside "malaria"
        assert_eq!(names(matcher.classify(Some("MALARIA"))), vec!["respiratory"]);
        assert_eq!(names(matcher.classify(Some("Diarrhoea"))), vec!["gastro"]);
        assert!(matcher.classify(Some("fracture")).is_empty());
        assert!(matcher.classify(None).is_empty());
    }

    #[test]
    fn matcher_agrees_with_naive() {
        let defs = defs();
        let matcher = defs.matcher();
        for diagnosis in [
            "viral fever",
            "community acquired pneumonia with dehydration",
            "AGE with diarrhea",
            "",
            "road traffic accident",
        ] {
            assert_eq!(
                matcher.classify(Some(diagnosis)),
                defs.classify(Some(diagnosis)),
                "{}",
                diagnosis
            );
        }
    }

    #[test]
    fn classify_is_idempotent() {
        let matcher = defs().matcher();
        let first = matcher.classify(Some("Fever with diarrhoea"));
        assert_eq!(first, matcher.classify(Some("Fever with diarrhoea")));
        assert!(matcher.is_member(Some("Fever with diarrhoea"), "respiratory"));
        assert!(!matcher.is_member(Some("Fever with diarrhoea"), "dehydration"));
        assert!(!matcher.is_member(Some("Fever"), "no such cohort"));
    }

    #[test]
    fn shared_keywords() {
        let defs = CohortDefinitions::new(vec![
            Cohort::new("a", ["fever"]).unwrap(),
            Cohort::new("b", ["fever", "cough"]).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            names(defs.matcher().classify(Some("FEVER"))),
            vec!["a", "b"]
        );
    }

    #[test]
    fn definition_order_does_not_matter() {
        let cohorts = [
            ("gastro", vec!["gastroenteritis", "diarrh", "fever"]),
            ("dehydration", vec!["dehydration"]),
            ("respiratory", vec!["ari", "fever", "pneumonia"]),
            ("cardiac", vec!["heart", "cardi"]),
        ];
        let build = |order: &[usize]| {
            CohortDefinitions::new(
                order
                    .iter()
                    .map(|&idx| Cohort::new(cohorts[idx].0, &cohorts[idx].1).unwrap())
                    .collect(),
            )
            .unwrap()
        };
        let forward = build(&[0, 1, 2, 3]).matcher();
        let others = [build(&[3, 2, 1, 0]).matcher(), build(&[2, 0, 3, 1]).matcher()];
        for diagnosis in [
            "Acute Gastroenteritis with severe dehydration",
            "viral fever",
            "fever with diarrhoea and cardiac arrest",
            "Pneumonia",
            "fracture",
        ] {
            let expected = forward.classify(Some(diagnosis));
            for other in &others {
                assert_eq!(other.classify(Some(diagnosis)), expected, "{}", diagnosis);
            }
        }
        assert_eq!(
            names(others[0].classify(Some("viral fever"))),
            vec!["gastro", "respiratory"]
        );
    }

    #[test]
    fn keywords_normalized() {
        let cohort = Cohort::new("respiratory", [" Pneumonia "]).unwrap();
        assert_eq!(&*cohort.keywords()[0], "pneumonia");
        assert!(Cohort::new("bad", ["  "]).is_err());
        assert!(Cohort::new("bad", Vec::<&str>::new()).is_err());
        assert!(CohortDefinitions::new(vec![
            Cohort::new("a", ["x"]).unwrap(),
            Cohort::new("a", ["y"]).unwrap(),
        ])
        .is_err());
    }

    #[test]
    fn load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("cohorts.toml");
        fs::write(
            &toml_path,
            r#"
[[cohorts]]
name = "gastroenteritis"
description = "Acute diarrhoeal disease"
keywords = ["Gastro", "diarrh"]

[[cohorts]]
name = "respiratory"
keywords = ["ari"]
"#,
        )
        .unwrap();
        let defs = CohortDefinitions::load(&toml_path).unwrap();
        assert_eq!(defs.len(), 2);
        let gastro = defs.get("gastroenteritis").unwrap();
        assert_eq!(gastro.description(), Some("Acute diarrhoeal disease"));
        assert_eq!(&*gastro.keywords()[0], "gastro");

        let json_path = dir.path().join("cohorts.json");
        defs.save(&json_path, false).unwrap();
        assert!(defs.save(&json_path, false).is_err());
        defs.save(&json_path, true).unwrap();
        assert_eq!(CohortDefinitions::load(&json_path).unwrap(), defs);

        let bad_path = dir.path().join("cohorts.toml");
        fs::write(&bad_path, "[[cohorts]]\nname = \"x\"\nkeywords = [\"\"]\n").unwrap();
        assert!(CohortDefinitions::load(&bad_path).is_err());
    }
}
