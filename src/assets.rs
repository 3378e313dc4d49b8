//! Parsing of the markdown artifacts the design phases write.
//!
//! `design-exploration.md` and `visual-prompts.md` share a format: one
//! `## section` per item, plain `key: "value"` lines below it. Agents
//! sometimes bold the keys anyway, so stray `**` markers are stripped
//! before matching.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s+(.+?)\s*$").unwrap());

static KEY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^(name|philosophy|prompt|size|output):\s*"?(.*?)"?\s*$"#).unwrap());

const ALLOWED_SIZES: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4", "3:2", "2:3"];

/// One proposed design direction from the exploration phase.
#[derive(Debug, Clone)]
pub struct DesignDirection {
    pub key: String,
    pub name: String,
    pub philosophy: String,
    pub prompt: String,
    pub size: String,
    pub output: String,
}

/// A direction paired with its generated mockup image.
#[derive(Debug, Clone)]
pub struct DesignVariant {
    pub key: String,
    pub name: String,
    pub philosophy: String,
    pub image_url: String,
    pub output: String,
}

/// One brand-asset prompt from the translation phase.
#[derive(Debug, Clone)]
pub struct VisualPrompt {
    pub name: String,
    pub prompt: String,
    pub size: String,
    pub output: String,
}

fn strip_bold(text: &str) -> String {
    text.replace("**", "")
}

fn clamp_size(raw: &str, default: &str) -> String {
    let size = raw.trim();
    if ALLOWED_SIZES.contains(&size) {
        size.to_string()
    } else {
        default.to_string()
    }
}

/// Split a markdown document into `(section title, section body)` pairs.
fn sections(markdown: &str) -> Vec<(String, String)> {
    let text = strip_bold(markdown);
    let headers: Vec<_> = SECTION_HEADER.captures_iter(&text).collect();
    let mut out = Vec::new();
    for (i, cap) in headers.iter().enumerate() {
        let title = cap[1].trim().to_string();
        let start = cap.get(0).unwrap().end();
        let end = headers
            .get(i + 1)
            .map(|next| next.get(0).unwrap().start())
            .unwrap_or(text.len());
        out.push((title, text[start..end].to_string()));
    }
    out
}

fn field(body: &str, key: &str) -> Option<String> {
    KEY_LINE
        .captures_iter(body)
        .find(|cap| &cap[1] == key)
        .map(|cap| cap[2].trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `docs/design/design-exploration.md` into design directions.
///
/// Sections without a `prompt` key (like the CONTEXT preamble) are skipped.
/// Errors only when no usable direction exists at all.
pub fn parse_design_exploration(markdown: &str) -> Result<Vec<DesignDirection>> {
    let mut directions = Vec::new();
    for (title, body) in sections(markdown) {
        let Some(prompt) = field(&body, "prompt") else {
            continue;
        };
        let key = title.to_lowercase().replace(' ', "-");
        let n = directions.len() + 1;
        directions.push(DesignDirection {
            name: field(&body, "name").unwrap_or_else(|| title.clone()),
            philosophy: field(&body, "philosophy").unwrap_or_default(),
            size: clamp_size(&field(&body, "size").unwrap_or_default(), "16:9"),
            output: field(&body, "output")
                .unwrap_or_else(|| format!("docs/design/mockups/direction-{n}.png")),
            key,
            prompt,
        });
    }
    if directions.is_empty() {
        bail!("design exploration file contains no parsable directions");
    }
    Ok(directions)
}

/// Parse `docs/design/visual-prompts.md` into asset prompts.
///
/// Assets default to square; a missing file upstream is handled by the
/// caller, an unparsable one is an error here.
pub fn parse_visual_prompts(markdown: &str) -> Result<Vec<VisualPrompt>> {
    let mut prompts = Vec::new();
    for (title, body) in sections(markdown) {
        let Some(prompt) = field(&body, "prompt") else {
            continue;
        };
        let name = field(&body, "name").unwrap_or_else(|| title.to_lowercase().replace(' ', "-"));
        prompts.push(VisualPrompt {
            size: clamp_size(&field(&body, "size").unwrap_or_default(), "1:1"),
            output: field(&body, "output")
                .unwrap_or_else(|| format!("public/assets/{name}.png")),
            name,
            prompt,
        });
    }
    if prompts.is_empty() {
        bail!("visual prompts file contains no parsable assets");
    }
    Ok(prompts)
}

/// Interpret a human's variant-selection reply.
///
/// The reply leads with a 1-based variant number; anything after it is
/// free-form feedback for the translation phase.
pub fn parse_variant_reply(reply: &str, variant_count: usize) -> Result<(usize, String)> {
    let trimmed = reply.trim();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    let number: usize = digits
        .parse()
        .with_context(|| format!("reply must start with a variant number 1-{variant_count}"))?;
    if number < 1 || number > variant_count {
        bail!("variant {number} is out of range 1-{variant_count}");
    }
    let feedback = trimmed[digits.len()..].trim().to_string();
    Ok((number - 1, feedback))
}

/// Render the approved-direction record committed back into the repo.
pub fn approved_direction_markdown(variant: &DesignVariant, feedback: &str) -> String {
    let mut doc = format!(
        "# Approved Design Direction\n\n\
         name: \"{}\"\nphilosophy: \"{}\"\nmockup: \"{}\"\nmockup_url: \"{}\"\n",
        variant.name, variant.philosophy, variant.output, variant.image_url
    );
    if !feedback.is_empty() {
        doc.push_str(&format!("feedback: \"{feedback}\"\n"));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPLORATION: &str = r#"## CONTEXT
App: a recipe sharing site
Anti-patterns: generic bootstrap look

## direction-1
name: "Warm Hearth"
philosophy: "Cooking as comfort"
prompt: "high-fidelity UI screenshot, cream background #faf6f0, terracotta accents #c65d3b"
size: "16:9"
output: "docs/design/mockups/direction-1.png"

## direction-2
**name:** "Midnight Kitchen"
**philosophy:** "Bold and nocturnal"
**prompt:** "high-fidelity UI screenshot, near-black #0a0a0f, violet accent #7c3aed"
**size:** "3:1"
"#;

    #[test]
    fn parses_directions_and_skips_context() {
        let dirs = parse_design_exploration(EXPLORATION).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].name, "Warm Hearth");
        assert_eq!(dirs[0].key, "direction-1");
        assert!(dirs[0].prompt.contains("#c65d3b"));
    }

    #[test]
    fn strips_bold_keys_and_defaults_bad_size() {
        let dirs = parse_design_exploration(EXPLORATION).unwrap();
        assert_eq!(dirs[1].name, "Midnight Kitchen");
        // "3:1" is not an allowed aspect ratio
        assert_eq!(dirs[1].size, "16:9");
        assert_eq!(dirs[1].output, "docs/design/mockups/direction-2.png");
    }

    #[test]
    fn exploration_without_prompts_is_an_error() {
        assert!(parse_design_exploration("## CONTEXT\nApp: x\n").is_err());
    }

    #[test]
    fn parses_visual_prompts_with_square_default() {
        let md = "## Logo\nname: \"logo\"\nprompt: \"minimalist chef hat, #c65d3b on cream\"\noutput: \"public/assets/logo.png\"\n\n\
                  ## Hero\nname: \"hero\"\nprompt: \"rustic kitchen table flat lay\"\nsize: \"16:9\"\n";
        let prompts = parse_visual_prompts(md).unwrap();
        assert_eq!(prompts[0].size, "1:1");
        assert_eq!(prompts[1].size, "16:9");
        assert_eq!(prompts[1].output, "public/assets/hero.png");
    }

    #[test]
    fn variant_reply_with_feedback() {
        let (index, feedback) = parse_variant_reply("2 but darker background please", 3).unwrap();
        assert_eq!(index, 1);
        assert_eq!(feedback, "but darker background please");
    }

    #[test]
    fn variant_reply_bare_number() {
        let (index, feedback) = parse_variant_reply(" 3 ", 3).unwrap();
        assert_eq!(index, 2);
        assert!(feedback.is_empty());
    }

    #[test]
    fn variant_reply_out_of_range_or_missing_number() {
        assert!(parse_variant_reply("5", 3).is_err());
        assert!(parse_variant_reply("the second one", 3).is_err());
        assert!(parse_variant_reply("0", 3).is_err());
    }

    #[test]
    fn approved_direction_document() {
        let variant = DesignVariant {
            key: "direction-1".into(),
            name: "Warm Hearth".into(),
            philosophy: "Cooking as comfort".into(),
            image_url: "https://img.example/mock.png".into(),
            output: "docs/design/mockups/direction-1.png".into(),
        };
        let doc = approved_direction_markdown(&variant, "less orange");
        assert!(doc.contains("name: \"Warm Hearth\""));
        assert!(doc.contains("mockup_url: \"https://img.example/mock.png\""));
        assert!(doc.contains("feedback: \"less orange\""));
        let doc = approved_direction_markdown(&variant, "");
        assert!(!doc.contains("feedback:"));
    }
}
