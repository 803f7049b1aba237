//! Prompt text for every task kind.
//!
//! Prompts are plain sections: `### INSTRUCTION` says what to produce,
//! `### INPUT` carries the graph context. Output format is enforced by the
//! result shape, so prompts never describe JSON.

use brainmap_core::Relation;

pub const SYSTEM_PROMPT: &str = "You are a knowledge graph generator.\n\
Your job is to expand a conceptual graph using specific nodes and relations.";

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ")
}

fn relation_list(relations: &[Relation]) -> String {
    relations.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
}

pub fn describe(label: &str, aspects: &[String]) -> String {
    let mut prompt = String::from("### INSTRUCTION\n");
    prompt.push_str("Provide a short 10-20 words description of the concept.\n");
    prompt.push_str("Pick 1-3 emoji that best represent it.\n");
    if !aspects.is_empty() {
        prompt.push_str("Assign relevance scores (0.0 to 1.0) for each of the specified aspects.\n");
    }
    prompt.push_str("\n### INPUT\n");
    prompt.push_str(&format!("- Concept: \"{}\"\n", label));
    if !aspects.is_empty() {
        prompt.push_str(&format!("- Aspects: [{}]\n", quoted_list(aspects)));
    }
    prompt
}

pub fn explore_new(
    label: &str,
    neighbors: &[String],
    forbidden: &[String],
    relations: &[Relation],
    max_words: u32,
) -> String {
    format!(
        "### INSTRUCTION\n\
         Generate 3-5 NEW unique concepts related to \"{label}\".\n\
         Provide varied relation types and concepts.\n\
         Each concept label has at most {max_words} words.\n\
         Never propose an existing or forbidden label.\n\
         \n\
         ### INPUT\n\
         - Target Concept: \"{label}\"\n\
         - Existing Graph Labels: [{existing}]\n\
         - Forbidden Labels: [{forbidden}]\n\
         - Allowed Relations: [{relations}]\n",
        label = label,
        max_words = max_words.max(1),
        existing = quoted_list(neighbors),
        forbidden = quoted_list(forbidden),
        relations = relation_list(relations),
    )
}

pub fn explore_existing(label: &str, candidates: &[String], relations: &[Relation]) -> String {
    format!(
        "### INSTRUCTION\n\
         Find logical links between \"{label}\" and the candidate concepts below.\n\
         Only use candidates from the list. Skip candidates with no clear relation.\n\
         \n\
         ### INPUT\n\
         - Target Concept: \"{label}\"\n\
         - Candidate Concepts: [{candidates}]\n\
         - Allowed Relations: [{relations}]\n",
        label = label,
        candidates = quoted_list(candidates),
        relations = relation_list(relations),
    )
}

pub fn generate_name(labels: &[String], aspects: &[String]) -> String {
    let mut prompt = String::from(
        "### INSTRUCTION\n\
         Suggest a short title (2-5 words) for a knowledge graph built from the concepts below.\n\
         \n\
         ### INPUT\n",
    );
    prompt.push_str(&format!("- Concepts: [{}]\n", quoted_list(labels)));
    if !aspects.is_empty() {
        prompt.push_str(&format!("- Aspects: [{}]\n", quoted_list(aspects)));
    }
    prompt
}
