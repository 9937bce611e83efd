//! System prompts for the model-backed stages

use secdigest_common::config::ProjectConfig;

/// Summarization instructions; the paper text is sent as the user message
pub const SUMMARY_PROMPT: &str = r#"You are a technical writer covering AI security research.
Present the main findings of the paper succinctly. Highlight the most critical facts and
actionable insights. Focus on outcomes, significant percentages or statistics and their
broader implications. Each finding must stand on its own as a single sentence and must not
refer back to "the paper" or "the research".

Respond with a JSON object with these keys:
"findings": array of exactly 3 single-sentence findings.
"one_liner": one sentence noting what is interesting about the paper.
"emoji": a single emoji that represents the paper.
"tag": one word, "security" for papers about the security of AI systems, "cyber" for papers
about using AI for cybersecurity tasks, "general" for everything else.
"affiliations": array of the institutions the authors belong to, as printed on the first page.
"interest_score": integer from 1 to 10 rating how notable the work is for a security practitioner."#;

/// Binary relevance rubric; the user message carries title and one-liner
pub const RELEVANCE_PROMPT: &str = r#"You screen research papers for an AI red team digest.
A paper is relevant only if it studies attacks on, defenses of, or vulnerabilities in AI
systems (for example prompt injection, jailbreaks, data poisoning, model theft or agent
hijacking), or applies AI to offensive or defensive cybersecurity work.
Papers that merely mention safety, alignment or security in passing are not relevant.

Respond with a JSON object: {"relevant": true} or {"relevant": false}."#;

/// Project matching instructions with the catalog enumerated
pub fn project_prompt(catalog: &[ProjectConfig]) -> String {
    let mut prompt = String::from(
        "You match research papers to ongoing projects.\n\
         Given a paper title and summary, list the ids of every project below that the paper \
         would directly help. Use only ids from this list; return an empty list when none apply.\n\n\
         Projects:\n",
    );
    for project in catalog {
        prompt.push_str(&format!("- {}: {}\n", project.id, project.description));
    }
    prompt.push_str("\nRespond with a JSON object: {\"projects\": [\"<id>\", ...]}.");
    prompt
}

/// User message for both classification stages
pub fn classification_input(title: &str, one_liner: &str) -> String {
    format!("Title: {}\nSummary: {}", title, one_liner)
}
