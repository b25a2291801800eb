//! Prompt enrichment sources.
//!
//! Candidate profiles, position-specific resume edits, technical knowledge
//! snippets, and company interview styles live outside the engine. The
//! [`EnrichmentSource`] trait is the seam; [`StaticEnrichment`] serves them
//! from JSON files named in the configuration.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DataFiles;
use crate::error::{EngineError, Result};

// ============================================================================
// Candidate profile
// ============================================================================

/// A candidate's resume as used for prompting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    /// Owning user.
    pub user_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// One-line headline.
    #[serde(default)]
    pub headline: String,
    /// Professional summary.
    #[serde(default)]
    pub summary: String,
    /// Skills.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Work history, most recent first.
    #[serde(default)]
    pub experience: Vec<Experience>,
    /// Projects.
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// One position held.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experience {
    /// Job title.
    pub title: String,
    /// Employer.
    pub company: String,
    /// What the candidate did.
    #[serde(default)]
    pub description: String,
}

/// One project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name.
    pub name: String,
    /// What it is.
    #[serde(default)]
    pub description: String,
}

/// Position-specific coaching rewrite of parts of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeEdit {
    /// Edit identifier referenced by sessions.
    pub id: String,
    /// Rewritten sections.
    #[serde(default)]
    pub edits: Vec<SectionEdit>,
}

/// Replacement text for one section of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionEdit {
    /// Section tag, e.g. `summary` or `experience[0].description`.
    pub section: String,
    /// New text.
    pub content: String,
}

static INDEXED_SECTION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(experience|projects)\[(\d+)\]\.([a-z]+)$").ok());

impl CandidateProfile {
    /// Applies a resume edit field by field.
    ///
    /// Edits whose section tag is unknown or points past the end of a list
    /// are logged and skipped.
    #[must_use]
    pub fn with_edit(mut self, edit: &ResumeEdit) -> Self {
        for section in &edit.edits {
            if !self.apply_section(&section.section, &section.content) {
                warn!(
                    edit_id = %edit.id,
                    section = %section.section,
                    "Skipping resume edit that matches no profile section"
                );
            }
        }
        self
    }

    fn apply_section(&mut self, tag: &str, content: &str) -> bool {
        match tag {
            "summary" => self.summary = content.to_string(),
            "headline" => self.headline = content.to_string(),
            "skills" => {
                self.skills = content
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            _ => return self.apply_indexed(tag, content),
        }
        true
    }

    fn apply_indexed(&mut self, tag: &str, content: &str) -> bool {
        let Some(caps) = INDEXED_SECTION.as_ref().and_then(|re| re.captures(tag)) else {
            return false;
        };
        let Ok(index) = caps[2].parse::<usize>() else {
            return false;
        };
        let content = content.to_string();

        let slot = match (&caps[1], &caps[3]) {
            ("experience", field) => {
                let Some(entry) = self.experience.get_mut(index) else {
                    return false;
                };
                match field {
                    "title" => &mut entry.title,
                    "company" => &mut entry.company,
                    "description" => &mut entry.description,
                    _ => return false,
                }
            }
            ("projects", field) => {
                let Some(entry) = self.projects.get_mut(index) else {
                    return false;
                };
                match field {
                    "name" => &mut entry.name,
                    "description" => &mut entry.description,
                    _ => return false,
                }
            }
            _ => return false,
        };
        *slot = content;
        true
    }
}

// ============================================================================
// Knowledge and company styles
// ============================================================================

/// Reference material for a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSnippet {
    /// Topics the snippet covers; more than one marks cross-topic synthesis.
    pub topics: Vec<String>,
    /// Short title.
    pub title: String,
    /// Body text.
    pub content: String,
}

impl KnowledgeSnippet {
    /// Returns `true` for cross-topic synthesis material.
    #[must_use]
    pub fn is_synthesis(&self) -> bool {
        self.topics.len() > 1
    }

    fn touches(&self, topics: &[String]) -> bool {
        self.topics
            .iter()
            .any(|t| topics.iter().any(|s| s.eq_ignore_ascii_case(t)))
    }
}

/// Persona of a company's interview process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyStyle {
    /// Tag sessions refer to (e.g. `amazon`).
    pub tag: String,
    /// Display name.
    pub name: String,
    /// Persona instructions for the interviewer.
    pub persona: String,
    /// Themes the company emphasizes.
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

// ============================================================================
// EnrichmentSource
// ============================================================================

/// Source of the material that enriches the system prompt.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// The caller's candidate profile.
    async fn candidate_profile(&self, user_id: &str) -> Result<Option<CandidateProfile>>;

    /// A resume edit by id.
    async fn resume_edit(&self, edit_id: &str) -> Result<Option<ResumeEdit>>;

    /// Snippets touching any of `topics`.
    async fn knowledge(&self, topics: &[String]) -> Result<Vec<KnowledgeSnippet>>;

    /// A company style by tag.
    async fn company_style(&self, tag: &str) -> Result<Option<CompanyStyle>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<CandidateProfile>,
    #[serde(default)]
    resume_edits: Vec<ResumeEdit>,
}

/// Enrichment served from memory, loaded once from JSON files.
#[derive(Debug, Clone, Default)]
pub struct StaticEnrichment {
    profiles: HashMap<String, CandidateProfile>,
    resume_edits: HashMap<String, ResumeEdit>,
    knowledge: Vec<KnowledgeSnippet>,
    company_styles: HashMap<String, CompanyStyle>,
}

impl StaticEnrichment {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file named in `files`, resolving relative paths against `base`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DataFileError` if a named file cannot be read or parsed.
    pub fn from_files(files: &DataFiles, base: &Path) -> Result<Self> {
        let mut source = Self::new();

        if let Some(path) = &files.profiles_file {
            let parsed: ProfilesFile = read_json(&base.join(path))?;
            for profile in parsed.profiles {
                source = source.with_profile(profile);
            }
            for edit in parsed.resume_edits {
                source = source.with_resume_edit(edit);
            }
        }
        if let Some(path) = &files.knowledge_file {
            source.knowledge = read_json(&base.join(path))?;
        }
        if let Some(path) = &files.company_styles_file {
            let styles: Vec<CompanyStyle> = read_json(&base.join(path))?;
            for style in styles {
                source = source.with_company_style(style);
            }
        }

        info!(
            profiles = source.profiles.len(),
            resume_edits = source.resume_edits.len(),
            snippets = source.knowledge.len(),
            company_styles = source.company_styles.len(),
            "Loaded enrichment data"
        );
        Ok(source)
    }

    /// Adds a candidate profile.
    #[must_use]
    pub fn with_profile(mut self, profile: CandidateProfile) -> Self {
        self.profiles.insert(profile.user_id.clone(), profile);
        self
    }

    /// Adds a resume edit.
    #[must_use]
    pub fn with_resume_edit(mut self, edit: ResumeEdit) -> Self {
        self.resume_edits.insert(edit.id.clone(), edit);
        self
    }

    /// Adds a knowledge snippet.
    #[must_use]
    pub fn with_snippet(mut self, snippet: KnowledgeSnippet) -> Self {
        self.knowledge.push(snippet);
        self
    }

    /// Adds a company style.
    #[must_use]
    pub fn with_company_style(mut self, style: CompanyStyle) -> Self {
        self.company_styles.insert(style.tag.to_lowercase(), style);
        self
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| EngineError::data_file(path, format!("failed to read file: {e}")))?;
    serde_json::from_str(&contents).map_err(|e| EngineError::data_file(path, e.to_string()))
}

#[async_trait]
impl EnrichmentSource for StaticEnrichment {
    async fn candidate_profile(&self, user_id: &str) -> Result<Option<CandidateProfile>> {
        Ok(self.profiles.get(user_id).cloned())
    }

    async fn resume_edit(&self, edit_id: &str) -> Result<Option<ResumeEdit>> {
        Ok(self.resume_edits.get(edit_id).cloned())
    }

    async fn knowledge(&self, topics: &[String]) -> Result<Vec<KnowledgeSnippet>> {
        Ok(self
            .knowledge
            .iter()
            .filter(|s| s.touches(topics))
            .cloned()
            .collect())
    }

    async fn company_style(&self, tag: &str) -> Result<Option<CompanyStyle>> {
        Ok(self.company_styles.get(&tag.to_lowercase()).cloned())
    }
}
