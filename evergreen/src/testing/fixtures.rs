//! Sample transcripts and canned stage responses.

use std::sync::Arc;

use serde_json::{json, Value};

use super::mocks::ScriptedInvoker;
use crate::config::{EvergreenSettings, SocialMode};
use crate::core::Provider;
use crate::invoker::{Invocation, InvokerSet, ModelInvoker};

/// Sentences the sample transcript cycles through. The first six double as
/// the canned quote set, so the quotes are verbatim.
const SENTENCES: [(&str, &str); 10] = [
    ("Maya", "The best systems are the ones you can explain to a tired colleague at midnight."),
    ("Leo", "Every shortcut you take in the schema shows up later as a support ticket."),
    ("Maya", "We stopped measuring velocity and started measuring how often we were surprised."),
    ("Leo", "A small team with clear ownership beats a large team with a shared backlog."),
    ("Maya", "Write the runbook before the incident, because nobody writes it during one."),
    ("Leo", "If a dashboard needs a legend to be read, it is already too clever."),
    ("Maya", "We moved our deploys to mornings and the pager went quiet within a month."),
    ("Leo", "Most migrations fail on the data nobody remembered was there."),
    ("Maya", "Reviews got faster once we agreed that style nits belong to the formatter."),
    ("Leo", "The cheapest outage is the one your tests caught on a Tuesday afternoon."),
];

/// Usage labels assigned to the canned quotes, in order.
const QUOTE_USAGES: [&str; 6] = ["headline", "pull_quote", "social", "email", "pull_quote", "social"];

/// A two-speaker transcript of at least `words` words.
#[must_use]
pub fn transcript_of_words(words: usize) -> String {
    let mut lines = Vec::new();
    let mut count = 0;
    for (speaker, sentence) in SENTENCES.iter().cycle() {
        if count >= words {
            break;
        }
        count += sentence.split_whitespace().count();
        lines.push(format!("{speaker}: {sentence}"));
    }
    lines.join("\n")
}

/// The standard 500-word sample.
#[must_use]
pub fn sample_transcript() -> String {
    transcript_of_words(500)
}

/// A transcript whose estimated token count exceeds the threshold in
/// `settings`.
#[must_use]
pub fn long_transcript(settings: &EvergreenSettings) -> String {
    let pipeline = &settings.pipeline;
    let chars_needed = (pipeline.preprocess_threshold_tokens + 1) * pipeline.chars_per_token.max(1);
    // Roughly six characters per word including the separator.
    transcript_of_words(chars_needed / 6 + 50)
}

/// A compression result that clears the default minimums.
#[must_use]
pub fn compressed_response() -> Value {
    let summary = SENTENCES
        .iter()
        .map(|(speaker, sentence)| format!("{speaker} argued that {}", sentence.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" ");
    json!({
        "comprehensive_summary": summary,
        "key_topics": ["ownership", "runbooks", "deploy timing", "migrations", "code review", "testing"],
        "speakers": [{"name": "Maya", "role": "host"}, {"name": "Leo", "role": "guest"}],
        "episode_metadata": {"format": "interview", "primary_subject": "engineering practice"}
    })
}

/// A valid transcript analysis.
#[must_use]
pub fn analysis_response() -> Value {
    json!({
        "episode_crux": "Reliable software comes from boring, explainable habits rather than heroics.",
        "key_themes": ["operational simplicity", "team ownership", "preparation"],
        "episode_format": "interview",
        "target_audience": "engineering leads"
    })
}

/// `count` quotes taken verbatim from the sample transcript.
#[must_use]
pub fn quotes_response(count: usize) -> Value {
    let quotes: Vec<Value> = SENTENCES
        .iter()
        .cycle()
        .take(count)
        .enumerate()
        .map(|(i, (speaker, sentence))| {
            json!({
                "text": sentence,
                "speaker": speaker,
                "context": "discussing day-to-day engineering",
                "usage": QUOTE_USAGES[i % QUOTE_USAGES.len()]
            })
        })
        .collect();
    json!({ "quotes": quotes })
}

/// A three-section outline referencing the first quotes.
#[must_use]
pub fn outline_response() -> Value {
    json!({
        "hook": "What if the most reliable teams are simply the most boring ones?",
        "sections": [
            {"heading": "Explainable Systems", "purpose": "Why clarity beats cleverness", "quote_refs": [0, 5]},
            {"heading": "Ownership Over Backlogs", "purpose": "How small teams move faster", "quote_refs": [3]},
            {"heading": "Preparing Before It Breaks", "purpose": "Runbooks and timing", "quote_refs": [4]}
        ],
        "conclusion": "Reliability is a habit, not a hero."
    })
}

/// One paragraph plan per outline section.
#[must_use]
pub fn paragraphs_response() -> Value {
    json!({
        "paragraphs": [
            {"section": "Explainable Systems", "key_points": ["explain at midnight", "legends are a smell"], "quote_index": 0},
            {"section": "Ownership Over Backlogs", "key_points": ["clear owners", "fewer handoffs"], "quote_index": 3},
            {"section": "Preparing Before It Breaks", "key_points": ["write runbooks early", "morning deploys"], "quote_index": 4}
        ]
    })
}

/// Headlines, subheadings and social hooks.
#[must_use]
pub fn headlines_response() -> Value {
    json!({
        "headlines": [
            "The Boring Habits Behind Reliable Software",
            "Why Your Best Engineers Write Runbooks First",
            "Explain It at Midnight: A Reliability Playbook"
        ],
        "subheadings": ["Clarity over cleverness", "Ownership at small scale"],
        "social_hooks": ["Your pager should be bored.", "Runbooks are written before incidents."]
    })
}

/// A markdown article with a title, `headings` sections and about `words`
/// words in total.
#[must_use]
pub fn article_markdown(title: &str, headings: usize, words: usize) -> String {
    let sections = headings.max(1);
    let per_section = words.div_ceil(sections);
    let filler: Vec<&str> = SENTENCES
        .iter()
        .flat_map(|(_, sentence)| sentence.split_whitespace())
        .collect();
    let mut body = format!("# {title}\n");
    let mut cursor = 0;
    for n in 1..=sections {
        body.push_str(&format!("\n## Section {n}\n\n"));
        let words: Vec<&str> = (0..per_section)
            .map(|i| filler[(cursor + i) % filler.len()])
            .collect();
        cursor += per_section;
        body.push_str(&words.join(" "));
        body.push('\n');
    }
    body
}

/// An article that clears the default draft bar.
#[must_use]
pub fn draft_response() -> String {
    article_markdown("The Boring Habits Behind Reliable Software", 3, 720)
}

/// A `{posts: [...]}` batch of `count` posts that fit every platform limit.
#[must_use]
pub fn posts_response(count: usize) -> Value {
    json!({ "posts": posts(count) })
}

fn posts(count: usize) -> Vec<Value> {
    SENTENCES
        .iter()
        .cycle()
        .take(count)
        .map(|(_, sentence)| json!({"text": sentence, "hashtags": ["#engineering"]}))
        .collect()
}

/// A combined response covering every configured platform.
#[must_use]
pub fn combined_posts_response(settings: &EvergreenSettings, count: usize) -> Value {
    let platforms: Vec<Value> = settings
        .platforms
        .iter()
        .map(|platform| json!({"platform": platform.slug(), "posts": posts(count)}))
        .collect();
    json!({ "platforms": platforms })
}

/// A valid email campaign.
#[must_use]
pub fn email_response() -> Value {
    let body = transcript_of_words(80)
        .lines()
        .map(|line| line.split_once(": ").map_or(line, |(_, text)| text))
        .collect::<Vec<_>>()
        .join(" ");
    json!({
        "subject_lines": [
            "The boring habit that keeps pagers quiet",
            "Runbooks before incidents",
            "Explain it at midnight"
        ],
        "preview_text": "This week: why the most reliable teams are the most boring.",
        "body": body
    })
}

/// Scripts valid default replies for every stage under `settings`.
pub fn script_standard_replies(invoker: &ScriptedInvoker, settings: &EvergreenSettings) {
    invoker.set_default("preprocessing", Invocation::structured(compressed_response()));
    invoker.set_default("transcript_analysis", Invocation::structured(analysis_response()));
    invoker.set_default("quote_extraction", Invocation::structured(quotes_response(6)));
    invoker.set_default("blog_outline", Invocation::structured(outline_response()));
    invoker.set_default("paragraph_details", Invocation::structured(paragraphs_response()));
    invoker.set_default("headlines", Invocation::structured(headlines_response()));
    invoker.set_default("draft_generation", Invocation::text(draft_response()));
    invoker.set_default("refinement", Invocation::text(draft_response()));
    let count = settings.pipeline.min_posts_per_platform;
    let social = match settings.social_mode {
        SocialMode::PerPlatform => posts_response(count),
        SocialMode::Combined => combined_posts_response(settings, count),
    };
    invoker.set_default("social_content", Invocation::structured(social));
    invoker.set_default("email_campaign", Invocation::structured(email_response()));
}

/// A scripted invoker with valid replies for every stage.
#[must_use]
pub fn standard_invoker(settings: &EvergreenSettings) -> Arc<ScriptedInvoker> {
    let invoker = ScriptedInvoker::new(Provider::Anthropic);
    script_standard_replies(&invoker, settings);
    Arc::new(invoker)
}

/// Registers one invoker under both providers.
#[must_use]
pub fn shared_invokers(invoker: Arc<ScriptedInvoker>) -> InvokerSet {
    let invoker: Arc<dyn ModelInvoker> = invoker;
    InvokerSet::new()
        .with(Provider::Anthropic, Arc::clone(&invoker))
        .with(Provider::OpenAi, invoker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::PreprocessingGate;
    use crate::validation::{count_section_headings, count_words, markdown_title};

    #[test]
    fn test_sample_transcript_size() {
        let words = count_words(&sample_transcript());
        assert!((500..560).contains(&words), "got {words} words");
        assert!(!PreprocessingGate::default().evaluate(&sample_transcript()).needed);
    }

    #[test]
    fn test_long_transcript_trips_gate() {
        let settings = EvergreenSettings::default();
        let gate = PreprocessingGate::from_settings(&settings.pipeline);
        assert!(gate.evaluate(&long_transcript(&settings)).needed);
    }

    #[test]
    fn test_draft_clears_default_bar() {
        let draft = draft_response();
        assert!(count_words(&draft) >= 600);
        assert_eq!(count_section_headings(&draft), 3);
        assert!(markdown_title(&draft).is_some());
    }

    #[test]
    fn test_quotes_are_verbatim() {
        let transcript = sample_transcript();
        let quotes = quotes_response(6);
        for quote in quotes["quotes"].as_array().unwrap() {
            assert!(transcript.contains(quote["text"].as_str().unwrap()));
        }
    }
}
