//! Stage 5: headlines, subheadings and social hooks.

use super::{format, StageEnv};
use crate::context::{episode_crux, require};
use crate::core::{BlogOutline, HeadlineSet, StageOutcome};
use crate::errors::EvergreenError;
use crate::prompts::VarsBuilder;
use crate::validation::{Rule, Validator};
use serde_json::{json, Value};

const MIN_HEADLINES: usize = 3;

fn schema() -> Value {
    let strings = json!({"type": "array", "items": {"type": "string"}});
    json!({
        "type": "object",
        "required": ["headlines"],
        "properties": {
            "headlines": strings,
            "subheadings": strings,
            "social_hooks": strings
        }
    })
}

pub(super) async fn run(env: &StageEnv) -> Result<StageOutcome, EvergreenError> {
    let crux = episode_crux(&env.ctx, env.id())?;
    let outline = require::<BlogOutline>(&env.ctx, env.id())?;

    let prompt = env.render(
        "headlines",
        VarsBuilder::new()
            .set("episode_crux", crux)
            .set("outline", format::outline(outline)),
    )?;

    let validator = Validator::new("headlines")
        .rule(Rule::MinItems("/headlines", MIN_HEADLINES))
        .rule(Rule::EachRequired {
            array: "/headlines",
            field: "",
        });
    let (set, usage): (HeadlineSet, _) = env.extract(&prompt, schema(), &validator).await?;

    let text = set.headlines.join("\n");
    Ok(StageOutcome::with_output(set).text(text).usage(usage))
}
