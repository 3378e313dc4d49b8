//! The fixed, ordered phase list and its prompt builders.
//!
//! A `Phase` is an immutable descriptor: name, worker model, emoji, a kind
//! tag driving post-processing, and a pure `RunContext -> prompt` function.
//! Phase identity is its 1-based index in `phases()`.

use crate::context::{RunContext, ScopeLevel};

pub const OPUS: &str = "claude-4.6-opus-high-thinking";
pub const CODEX: &str = "gpt-5.3-codex-high";
pub const GPT: &str = "gpt-5.2-high";
pub const COMPOSER: &str = "composer-1.5";

const ENV_CHECK: &str = "ENVIRONMENT: Check architecture docs for required API keys/env vars.\n\
If a key is missing, implement a mock/fallback and write BLOCKER in the handoff.";

/// What post-processing a phase needs after its job succeeds.
///
/// The orchestrator matches exhaustively on this tag instead of comparing
/// phase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// Job output merges straight through.
    Standard,
    /// Generates mockup variants, gates on a human selection, records the
    /// approved direction.
    DesignExploration,
    /// Generates brand assets from the prompts file the agent wrote.
    DesignTranslation,
    /// Read-only review pass; skipped entirely at nano scope.
    Review,
}

/// Immutable descriptor of one pipeline phase.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub name: &'static str,
    pub model: &'static str,
    pub emoji: &'static str,
    pub kind: PhaseKind,
    prompt_fn: fn(&RunContext) -> String,
}

impl Phase {
    pub const fn new(
        name: &'static str,
        model: &'static str,
        emoji: &'static str,
        kind: PhaseKind,
        prompt_fn: fn(&RunContext) -> String,
    ) -> Self {
        Self {
            name,
            model,
            emoji,
            kind,
            prompt_fn,
        }
    }

    /// Render the launch prompt for this phase from the current context.
    pub fn prompt(&self, ctx: &RunContext) -> String {
        (self.prompt_fn)(ctx)
    }

    /// Whether the scope tier marks this phase optional.
    pub fn skipped_for_scope(&self, scope: ScopeLevel) -> bool {
        self.kind == PhaseKind::Review && scope == ScopeLevel::Nano
    }
}

/// The full ordered pipeline. Index + 1 is the phase number used in
/// `--from` and in all reporting.
pub fn phases() -> &'static [Phase] {
    &[
        Phase {
            name: "Requirements Engineer",
            model: GPT,
            emoji: "📋",
            kind: PhaseKind::Standard,
            prompt_fn: requirements_prompt,
        },
        Phase {
            name: "Architect",
            model: OPUS,
            emoji: "🏗️",
            kind: PhaseKind::Standard,
            prompt_fn: architect_prompt,
        },
        Phase {
            name: "Design Explorer",
            model: GPT,
            emoji: "🎨",
            kind: PhaseKind::DesignExploration,
            prompt_fn: design_explorer_prompt,
        },
        Phase {
            name: "Design Translator",
            model: OPUS,
            emoji: "🖌️",
            kind: PhaseKind::DesignTranslation,
            prompt_fn: design_translator_prompt,
        },
        Phase {
            name: "Engineer",
            model: CODEX,
            emoji: "⚙️",
            kind: PhaseKind::Standard,
            prompt_fn: engineer_prompt,
        },
        Phase {
            name: "QA Reviewer",
            model: COMPOSER,
            emoji: "🔍",
            kind: PhaseKind::Review,
            prompt_fn: qa_prompt,
        },
    ]
}

fn requirements_prompt(ctx: &RunContext) -> String {
    let docs = match ctx.scope {
        ScopeLevel::Nano => {
            "docs/requirements/01-requirements.md — 3-5 Must reqs, Given/When/Then criteria only"
        }
        ScopeLevel::Micro => {
            "docs/requirements/00-project-brief.md — vision + constraints (half page)\n\
             docs/requirements/01-requirements.md — 5-8 Must/Should reqs"
        }
        ScopeLevel::Standard => {
            "docs/requirements/00-project-brief.md — vision, personas, constraints\n\
             docs/requirements/01-requirements.md — 8-12 Must/Should reqs, Given/When/Then\n\
             docs/requirements/glossary.md — key terms"
        }
        ScopeLevel::Large => {
            "docs/requirements/00-project-brief.md — vision, personas, constraints, success metrics\n\
             docs/requirements/01-requirements.md — 15-20 Must/Should reqs, Given/When/Then\n\
             docs/requirements/glossary.md — domain terms"
        }
    };
    format!(
        "Req Engineer. PROJECT: {} | SCOPE: {}\nIDEA: {}\n\n\
         Create (no planning, no preamble):\n{}\n\n\
         ## Handoff — artifacts, open questions, env vars needed, blockers\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        ctx.user_prompt,
        docs,
        ENV_CHECK
    )
}

fn architect_prompt(ctx: &RunContext) -> String {
    let docs = match ctx.scope {
        ScopeLevel::Nano => {
            "docs/architecture/00-system-overview.md — Mermaid diagram + tech stack decisions (1 page max)"
        }
        ScopeLevel::Micro => {
            "docs/architecture/00-system-overview.md — Mermaid diagram + components\n\
             docs/architecture/api-spec.md — endpoints"
        }
        ScopeLevel::Standard => {
            "docs/architecture/00-system-overview.md — Mermaid, components, deployment\n\
             docs/architecture/adr/ — 1-2 ADRs max\n\
             docs/architecture/api-spec.md — endpoints\n\
             docs/architecture/data-model.md — Mermaid ER"
        }
        ScopeLevel::Large => {
            "docs/architecture/00-system-overview.md — Mermaid, components, deployment\n\
             docs/architecture/adr/ — 3-5 ADRs (significant decisions only)\n\
             docs/architecture/api-spec.md — all endpoints + schemas\n\
             docs/architecture/data-model.md — Mermaid ER"
        }
    };
    format!(
        "Architect. Read docs/requirements/ first.\nPROJECT: {} | SCOPE: {}\n\n\
         Create (no planning):\n{}\n\n\
         ## Handoff — artifacts, env vars needed, blockers\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        docs,
        ENV_CHECK
    )
}

fn design_explorer_prompt(ctx: &RunContext) -> String {
    let count = ctx.scope.variant_count();
    let directions: Vec<String> = (1..=count)
        .map(|n| {
            let name_hint = if n == count && count > 2 {
                "<experimental — breaks conventions>"
            } else {
                "<evocative name>"
            };
            format!(
                "## direction-{n}\n\
                 name: \"{name_hint}\"\n\
                 philosophy: \"<1 sentence>\"\n\
                 prompt: \"high-fidelity UI screenshot of [app type] app, [exact layout], \
                 [hex colors e.g. #0a0a0f bg #7c3aed accent], [typography: font style + weights], \
                 [surface: glass/metal/matte], [1-2 unique elements]. Photorealistic, actual content, \
                 no lorem ipsum, 16:9.\"\n\
                 size: \"16:9\"\n\
                 output: \"docs/design/mockups/direction-{n}.png\""
            )
        })
        .collect();
    let experimental_rule = if count > 2 {
        "\n- Last direction is experimental (radial nav / brutalist / vertical text etc)."
    } else {
        ""
    };
    format!(
        "Design Explorer. Read docs/requirements/ + docs/architecture/ first.\n\
         PROJECT: {} | SCOPE: {} → {count} directions\n\n\
         Create docs/design/design-exploration.md with EXACTLY this structure (no markdown bold, no ** around keys):\n\n\
         ## CONTEXT\nApp: <one-line>\nAnti-patterns: <what to avoid>\n\n{}\n\n\
         FORMAT RULES:\n\
         - Write keys as plain text: `name: \"...\"` NOT `**name:** \"...\"` — this file is parsed programmatically.{experimental_rule}\n\
         - Each direction = different studio, zero overlap in color/layout/typography. Exact hex values in every prompt.\n\n\
         DO NOT attempt to generate images. DO NOT report missing image-generation API keys as blockers.\n\
         Image generation runs automatically after you finish — your only job is writing this markdown file.\n\n\
         ## Handoff — open questions, env vars for the app itself, blockers unrelated to image generation\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        directions.join("\n\n"),
        ENV_CHECK
    )
}

fn design_translator_prompt(ctx: &RunContext) -> String {
    let components = match ctx.scope {
        ScopeLevel::Nano => "Button, Card",
        ScopeLevel::Micro => "Button, Card, Input, Badge",
        _ => "all components visible in mockup",
    };
    let screens = match ctx.scope {
        ScopeLevel::Nano => "1 primary screen",
        ScopeLevel::Micro => "2-3 screens",
        _ => "all major screens",
    };
    let approved = match &ctx.design {
        Some(d) => {
            let mut line = format!("APPROVED: {} ({})", d.approved_mockup_url, d.variant_name);
            if !d.feedback.is_empty() {
                line.push_str(&format!("\nFEEDBACK: {}", d.feedback));
            }
            if let Some(path) = &d.scaffold_path {
                line.push_str(&format!("\nSCAFFOLD: {path} — refine to match mockup"));
            }
            line
        }
        None => "Read docs/design/approved-direction.md for mockup URL.".to_string(),
    };
    let assets = if ctx.scope == ScopeLevel::Nano {
        String::new()
    } else {
        "\n6. docs/design/visual-prompts.md — ALL visual assets the app needs, one ## section per asset:\n\
         ## Logo\nname: \"logo\"\nprompt: \"<detailed image prompt with exact hex colors, style, subject>\"\n\
         size: \"1:1\"\noutput: \"public/assets/logo.png\"\n\
         Minimum assets: logo (1:1), favicon (1:1), og-image (16:9). Add hero/banner (16:9) and any other \
         images visible in the mockup. Use exact hex values from design-spec.md. Each prompt must describe \
         a photorealistic or stylized image — NOT an SVG or vector."
            .to_string()
    };
    format!(
        "Design Translator. PROJECT: {} | SCOPE: {}\n{}\n\n\
         Analyze mockup via vision → output:\n\
         1. docs/design/design-spec.md — exact hex palette, type scale, spacing, component list\n\
         2. design-system/tailwind.config.ts — full custom theme from spec values only\n\
         3. design-system/globals.css — CSS vars, @import fonts, base + utility styles\n\
         4. design-system/components/ui/ — {} (all states: hover/focus/active/disabled)\n\
         5. screens/ — {} (pixel-intent mockup match){}\n\n\
         Mockup = source of truth. No invention. Every value extracted from Step 1.\n\
         DO NOT generate images. DO NOT report missing image-generation API keys as blockers. \
         Asset generation runs automatically after you finish.\n\n\
         ## Handoff — artifacts, blockers unrelated to image generation\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        approved,
        components,
        screens,
        assets,
        ENV_CHECK
    )
}

fn engineer_prompt(ctx: &RunContext) -> String {
    let tests = match ctx.scope {
        ScopeLevel::Nano => "No tests required.",
        ScopeLevel::Micro => "Tests for critical paths only.",
        _ => "Tests for all critical paths.",
    };
    format!(
        "Engineer. Read docs/requirements/, docs/architecture/, docs/design/design-spec.md.\n\
         PROJECT: {} | SCOPE: {}\n\n\
         1. Import from design-system/components/ui/ — theme tokens only, never hardcode\n\
         2. Use screens/ as UI base — add logic, don't redesign\n\
         3. Implement: routing, state, data fetching, error handling, all component states\n\
         4. Use public/assets/ images (logo.png, favicon.png, og-image.png, hero.png etc.) — they are pre-generated PNGs\n\
         5. {}\n\
         6. vercel.json for deployment + README.md\n\
         Conventional commits: feat/fix/refactor/test/docs\n\n\
         CRITICAL — VISUAL ASSETS:\n\
         - NEVER generate SVG files for logos, icons, illustrations, or any visual assets\n\
         - NEVER write inline SVG markup for decorative/brand imagery\n\
         - All visual assets are pre-generated PNGs in public/assets/ — use <img> tags or CSS background-image\n\
         - For icons, use a library (lucide-react, heroicons, etc.) — do NOT hand-write SVG paths\n\
         - If a needed image is missing from public/assets/, use a CSS gradient/solid-color placeholder and add a NOTE in the handoff\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        tests,
        ENV_CHECK
    )
}

fn qa_prompt(ctx: &RunContext) -> String {
    let (max_findings, checks) = if ctx.scope == ScopeLevel::Micro {
        (3, "correctness, basic security, code quality")
    } else {
        (
            5,
            "correctness, OWASP security, performance, code quality, a11y, design compliance",
        )
    };
    let today = chrono::Utc::now().format("%Y-%m-%d");
    format!(
        "QA Reviewer. Read docs/ + src/ + tests/.\nPROJECT: {} | SCOPE: {}\n\n\
         Create docs/reviews/review-{today}.md:\n\
         - Max {} findings (CRITICAL/WARNING only)\n\
         - Check: {}\n\
         - Requirements traceability matrix\n\
         - Verdict: PASS / PASS WITH ISSUES / FAIL\n\n\
         Read only. No code changes.\n{}",
        ctx.project,
        ctx.scope.as_str().to_uppercase(),
        max_findings,
        checks,
        ENV_CHECK
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RunContext, RunMode};

    fn ctx(scope: ScopeLevel) -> RunContext {
        RunContext::new(
            "demo",
            "build a recipe sharing site",
            "https://github.com/acme/demo.git",
            "acme",
            "main",
            RunMode::Init,
            scope,
        )
    }

    #[test]
    fn pipeline_has_six_ordered_phases() {
        let list = phases();
        assert_eq!(list.len(), 6);
        assert_eq!(list[0].name, "Requirements Engineer");
        assert_eq!(list[2].kind, PhaseKind::DesignExploration);
        assert_eq!(list[3].kind, PhaseKind::DesignTranslation);
        assert_eq!(list[5].kind, PhaseKind::Review);
    }

    #[test]
    fn review_phase_skipped_only_at_nano() {
        let review = phases()[5];
        assert!(review.skipped_for_scope(ScopeLevel::Nano));
        assert!(!review.skipped_for_scope(ScopeLevel::Micro));
        let engineer = phases()[4];
        assert!(!engineer.skipped_for_scope(ScopeLevel::Nano));
    }

    #[test]
    fn explorer_prompt_requests_scope_sized_variant_count() {
        let prompt = phases()[2].prompt(&ctx(ScopeLevel::Large));
        assert!(prompt.contains("4 directions"));
        assert!(prompt.contains("## direction-4"));
        assert!(prompt.contains("experimental"));

        let prompt = phases()[2].prompt(&ctx(ScopeLevel::Micro));
        assert!(prompt.contains("2 directions"));
        assert!(!prompt.contains("## direction-3"));
    }

    #[test]
    fn translator_prompt_uses_design_context_when_present() {
        let mut c = ctx(ScopeLevel::Standard);
        c.design = Some(crate::context::DesignContext {
            approved_mockup_url: "https://img.example/mock.png".into(),
            variant_name: "Neon Dusk".into(),
            feedback: "darker background".into(),
            scaffold_path: Some("docs/design/v0-scaffold.md".into()),
        });
        let prompt = phases()[3].prompt(&c);
        assert!(prompt.contains("APPROVED: https://img.example/mock.png (Neon Dusk)"));
        assert!(prompt.contains("FEEDBACK: darker background"));
        assert!(prompt.contains("SCAFFOLD: docs/design/v0-scaffold.md"));
    }

    #[test]
    fn translator_prompt_falls_back_to_repo_doc() {
        let prompt = phases()[3].prompt(&ctx(ScopeLevel::Standard));
        assert!(prompt.contains("docs/design/approved-direction.md"));
    }

    #[test]
    fn nano_translator_prompt_omits_visual_prompts_file() {
        let prompt = phases()[3].prompt(&ctx(ScopeLevel::Nano));
        assert!(!prompt.contains("visual-prompts.md"));
    }

    #[test]
    fn every_prompt_names_the_project_and_scope() {
        for phase in phases() {
            let prompt = phase.prompt(&ctx(ScopeLevel::Standard));
            assert!(prompt.contains("demo"), "{} misses project", phase.name);
            assert!(prompt.contains("STANDARD"), "{} misses scope", phase.name);
        }
    }
}
