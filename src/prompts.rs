//! Prompt templates for rubric scoring.
//!
//! Domain logic for rendering screening prompts. Provider-agnostic.

use crate::gateway::Message;
use crate::screening::types::{Profile, Rubric, RubricItem};

// =============================================================================
// Prompt instance
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

// =============================================================================
// Templates
// =============================================================================

pub const SINGLE_PROFILE_SLUG: &str = "rubric_all_items_v1";
pub const BATCH_SLUG: &str = "rubric_batch_v1";

const SINGLE_PROFILE_SYSTEM: &str = "You are an expert recruiter evaluating candidate profiles. Return only valid JSON responses with scores for all rubric items.";

const BATCH_SYSTEM: &str = "You are an expert recruiter evaluating candidate profiles. Return only valid JSON responses with scores for all profiles and all rubric items.";

/// Response key for the profile at `index` within a batch prompt.
pub fn profile_slot(index: usize) -> String {
    format!("profile_{}", index + 1)
}

fn pretty_profile(profile: &Profile) -> String {
    // Profile holds only strings, bools and sequences, so this cannot fail.
    serde_json::to_string_pretty(profile).unwrap_or_else(|_| "{}".to_string())
}

fn render_item(item: &RubricItem) -> String {
    let descs = &item.score_descriptions;
    format!(
        "{}: {}\nScoring Guide:\n1: {}\n2: {}\n3: {}\n4: {}\n5: {}\n",
        item.id.to_uppercase(),
        item.description,
        descs.level(1),
        descs.level(2),
        descs.level(3),
        descs.level(4),
        descs.level(5),
    )
}

fn render_items(rubric: &Rubric) -> String {
    rubric
        .items
        .iter()
        .map(render_item)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expected response shape for a single-profile prompt, keyed by item id.
pub fn expected_single_shape(rubric: &Rubric) -> String {
    let entries = rubric
        .items
        .iter()
        .map(|item| {
            format!(
                "  \"{}\": {{\n    \"score\": [1-5],\n    \"explanation\": \"detailed explanation for the score\"\n  }}",
                item.id
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n{entries}\n}}")
}

/// Expected response shape for a batch prompt, keyed by profile slot then item id.
pub fn expected_batch_shape(profile_count: usize, rubric: &Rubric) -> String {
    let items = rubric
        .items
        .iter()
        .map(|item| {
            format!(
                "\"{}\": {{\n      \"score\": [1-5],\n      \"explanation\": \"detailed explanation\"\n    }}",
                item.id
            )
        })
        .collect::<Vec<_>>()
        .join(",\n    ");

    let slots = (0..profile_count)
        .map(|i| format!("  \"{}\": {{\n    {items}\n  }}", profile_slot(i)))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n{slots}\n}}")
}

// =============================================================================
// Rendering
// =============================================================================

/// All rubric items for one profile in a single prompt.
pub fn render_profile_prompt(profile: &Profile, rubric: &Rubric) -> PromptInstance {
    let user = format!(
        "Evaluate the following candidate profile based on ALL rubric items below:\n\n\
         Profile:\n{}\n\n\
         RUBRIC ITEMS:\n{}\n\
         Return a JSON object with scores for ALL rubric items:\n{}\n\n\
         Only return valid JSON, no other text.",
        pretty_profile(profile),
        render_items(rubric),
        expected_single_shape(rubric),
    );

    PromptInstance {
        template_slug: SINGLE_PROFILE_SLUG.to_string(),
        system: SINGLE_PROFILE_SYSTEM.to_string(),
        user,
    }
}

/// All rubric items for several profiles in a single prompt.
///
/// Profiles are labelled `PROFILE_1..PROFILE_n` in submission order; the
/// response is expected to be keyed by the matching [`profile_slot`].
pub fn render_batch_prompt(profiles: &[Profile], rubric: &Rubric) -> PromptInstance {
    let profiles_text = profiles
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "{} (ID: {}, Name: {}):\n{}\n",
                profile_slot(i).to_uppercase(),
                p.id,
                p.name,
                pretty_profile(p)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Evaluate the following {} candidate profiles based on ALL rubric items below:\n\n\
         PROFILES:\n{}\n\
         RUBRIC ITEMS:\n{}\n\
         Return a JSON object with scores for ALL profiles and ALL rubric items:\n{}\n\n\
         Only return valid JSON, no other text.",
        profiles.len(),
        profiles_text,
        render_items(rubric),
        expected_batch_shape(profiles.len(), rubric),
    );

    PromptInstance {
        template_slug: BATCH_SLUG.to_string(),
        system: BATCH_SYSTEM.to_string(),
        user,
    }
}
