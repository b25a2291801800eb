//! System prompt assembly.
//!
//! Gathering enrichment is async and fallible; rendering is a pure function
//! of the gathered parts, so the same inputs always produce the same prompt.

use std::fmt::Write;

use tracing::warn;

use crate::enrichment::{CandidateProfile, CompanyStyle, EnrichmentSource, KnowledgeSnippet};
use crate::error::{EngineError, Result};
use crate::policy::{FollowUpContext, TierPolicy};
use crate::session::InterviewSession;

/// Per-turn facts the prompt is built from.
#[derive(Debug, Clone)]
pub struct TurnContext<'a> {
    /// The session being interviewed.
    pub session: &'a InterviewSession,
    /// Policy snapshot for this turn.
    pub policy: &'a TierPolicy,
    /// Main questions asked before this turn.
    pub main_questions_before: u32,
    /// Follow-up budget state.
    pub follow_up: FollowUpContext,
    /// Topic of the current main question, if any.
    pub current_topic: Option<&'a str>,
    /// Adaptive difficulty hint (may be empty).
    pub difficulty_hint: &'a str,
    /// Marker for new main questions.
    pub main_marker: &'a str,
    /// Marker for follow-ups.
    pub follow_up_marker: &'a str,
}

impl TurnContext<'_> {
    /// Topic the next main question should cover.
    #[must_use]
    pub fn next_topic(&self) -> &str {
        let topics = &self.session.config.topics;
        if topics.is_empty() {
            return "general software engineering";
        }
        let index = self.main_questions_before as usize % topics.len();
        &topics[index]
    }
}

/// Enrichment gathered for one prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptParts {
    /// Profile with any resume edit applied.
    pub profile: CandidateProfile,
    /// Reference snippets the tier may see.
    pub knowledge: Vec<KnowledgeSnippet>,
    /// Company persona.
    pub company_style: Option<CompanyStyle>,
}

/// Gathers enrichment for a turn.
///
/// A missing candidate profile is an error. Optional enrichment that fails to
/// load is logged and left out.
pub async fn gather(source: &dyn EnrichmentSource, ctx: &TurnContext<'_>) -> Result<PromptParts> {
    let session = ctx.session;
    let mut profile = source
        .candidate_profile(&session.user_id)
        .await?
        .ok_or_else(|| EngineError::ProfileNotFound(session.user_id.clone()))?;

    if let Some(edit_id) = &session.config.resume_edit_id {
        match source.resume_edit(edit_id).await {
            Ok(Some(edit)) => profile = profile.with_edit(&edit),
            Ok(None) => warn!(edit_id = %edit_id, "Resume edit not found, using base profile"),
            Err(e) => warn!(edit_id = %edit_id, error = %e, "Failed to load resume edit"),
        }
    }

    let knowledge = match source.knowledge(&session.config.topics).await {
        Ok(snippets) => snippets
            .into_iter()
            .filter(|s| snippet_allowed(s, ctx.policy))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to load knowledge snippets");
            Vec::new()
        }
    };

    let company_style = match &session.config.company_style {
        Some(tag) if ctx.policy.allowed_company_styles.allows(tag) => {
            match source.company_style(tag).await {
                Ok(style) => {
                    if style.is_none() {
                        warn!(company_style = %tag, "Company style not found");
                    }
                    style
                }
                Err(e) => {
                    warn!(company_style = %tag, error = %e, "Failed to load company style");
                    None
                }
            }
        }
        Some(tag) => {
            warn!(company_style = %tag, "Company style not allowed for tier, ignoring");
            None
        }
        None => None,
    };

    Ok(PromptParts {
        profile,
        knowledge,
        company_style,
    })
}

fn snippet_allowed(snippet: &KnowledgeSnippet, policy: &TierPolicy) -> bool {
    if snippet.is_synthesis() && !policy.cross_tech_allowed {
        return false;
    }
    snippet
        .topics
        .iter()
        .all(|t| policy.allowed_topics.allows(t))
}

/// Renders the system prompt.
#[must_use]
pub fn render(ctx: &TurnContext<'_>, parts: &PromptParts) -> String {
    let session = ctx.session;
    let config = &session.config;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "You are an experienced interviewer running a {} {} mock interview. \
         Ask exactly one question per reply and never answer it yourself.",
        config.difficulty, config.interview_type
    );

    out.push_str("\n## Candidate\n");
    write_profile(&mut out, &parts.profile);

    out.push_str("\n## Interview\n");
    let _ = writeln!(out, "Topics: {}", config.topics.join(", "));
    if let Some(position) = &config.position_id {
        let _ = writeln!(out, "Target position: {position}. Pitch questions at what this role needs.");
    }
    let next = ctx.main_questions_before + 1;
    match ctx.policy.question_limit {
        Some(limit) => {
            let _ = writeln!(out, "A new main question would be number {next} of {limit}.");
        }
        None => {
            let _ = writeln!(out, "A new main question would be number {next}.");
        }
    }
    let _ = writeln!(out, "If you ask a new main question, focus it on: {}", ctx.next_topic());

    out.push_str("\n## Follow-ups\n");
    if ctx.follow_up.can_ask_follow_up {
        let _ = writeln!(
            out,
            "You have asked {} of {} allowed follow-ups on the current question{}. \
             Ask a follow-up only if the last answer was incomplete or invites depth.",
            ctx.follow_up.follow_ups_since_main,
            ctx.follow_up.max_follow_ups,
            ctx.current_topic
                .map(|t| format!(" ({t})"))
                .unwrap_or_default()
        );
    } else {
        out.push_str("The follow-up budget is used up. Do not ask a follow-up; move to a new main question.\n");
    }

    if !parts.knowledge.is_empty() {
        out.push_str("\n## Reference material\n");
        for snippet in &parts.knowledge {
            let _ = writeln!(out, "- {} [{}]: {}", snippet.title, snippet.topics.join(", "), snippet.content);
        }
    }

    if let Some(style) = &parts.company_style {
        out.push_str("\n## Interviewer persona\n");
        let _ = writeln!(out, "Interview in the style of {}. {}", style.name, style.persona);
        if !style.focus_areas.is_empty() {
            let _ = writeln!(out, "Emphasize: {}", style.focus_areas.join(", "));
        }
    }

    if !ctx.difficulty_hint.is_empty() {
        out.push_str("\n## Difficulty guidance\n");
        out.push_str(ctx.difficulty_hint);
        out.push('\n');
    }

    out.push_str("\n## Response format\n");
    let _ = writeln!(
        out,
        "Start every reply with {} or {} on its own line, then the question text.",
        ctx.main_marker, ctx.follow_up_marker
    );
    let _ = writeln!(
        out,
        "Use {} for a new main question and {} for a follow-up on the current one.",
        ctx.main_marker, ctx.follow_up_marker
    );

    out
}

fn write_profile(out: &mut String, profile: &CandidateProfile) {
    if !profile.name.is_empty() {
        let _ = writeln!(out, "Name: {}", profile.name);
    }
    if !profile.headline.is_empty() {
        let _ = writeln!(out, "Headline: {}", profile.headline);
    }
    if !profile.summary.is_empty() {
        let _ = writeln!(out, "Summary: {}", profile.summary);
    }
    if !profile.skills.is_empty() {
        let _ = writeln!(out, "Skills: {}", profile.skills.join(", "));
    }
    for job in &profile.experience {
        let _ = writeln!(out, "- {} at {}: {}", job.title, job.company, job.description);
    }
    for project in &profile.projects {
        let _ = writeln!(out, "- Project {}: {}", project.name, project.description);
    }
}
