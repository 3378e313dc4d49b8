//! Heuristics that size a run from the user's prompt text.
//!
//! Scope tier, feat-vs-fix mode, and the auto-skip start phase are all
//! inferred from keyword signals; every heuristic can be overridden on the
//! command line.

use std::sync::LazyLock;

use regex::Regex;

use crate::context::ScopeLevel;

static NANO_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(single page|one page|landing page|simple|quick|just a|todo|calculator|counter|minimal|demo|prototype|toy)\b").unwrap()
});

static FIX_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(fix|bug|typo|broken|error|crash|wrong|patch|hotfix)\b").unwrap()
});

static CODE_ONLY_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(fix|bug|typo|hotfix|patch|broken|error|crash|rename|refactor|update dep|upgrade)\b").unwrap()
});

static DESIGN_ONLY_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(redesign|rebrand|new look|theme|logo|color|font|ui refresh|visual|design system)\b").unwrap()
});

static TRANSLATE_ONLY_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(translate design|implement design|code the design|build from mockup|mockup to code)\b").unwrap()
});

static ARCH_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(api|database|schema|migrate|infrastructure|deploy|auth|endpoint|backend|microservice)\b").unwrap()
});

static COMPLEXITY_SIGNALS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(api|rest|graphql|grpc)\b",
        r"\b(auth|oauth|jwt|login|signup)\b",
        r"\b(database|sql|postgres|mysql|mongo|redis|supabase)\b",
        r"\b(real.?time|websocket|stream|live)\b",
        r"\b(payment|stripe|billing|subscription)\b",
        r"\b(search|filter|sort|paginate)\b",
        r"\b(analytics|dashboard|chart|metric)\b",
        r"\b(upload|media|file|cdn)\b",
        r"\b(notification|email|sms|push)\b",
        r"\b(ai|ml|llm|embedding|vector)\b",
        r"\b(multi.?tenant|enterprise|saas|platform)\b",
        r"\b(cache|queue|job|worker|webhook)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Size a run from word count and complexity signals in the prompt.
pub fn infer_scope(prompt: &str) -> ScopeLevel {
    let lower = prompt.to_lowercase();
    let words = prompt.split_whitespace().count();

    if words <= 30 || (words <= 50 && NANO_KEYWORDS.is_match(&lower)) {
        return ScopeLevel::Nano;
    }

    let signals = COMPLEXITY_SIGNALS
        .iter()
        .filter(|p| p.is_match(&lower))
        .count();

    if signals >= 4 || words > 120 {
        ScopeLevel::Large
    } else if signals >= 2 || words > 50 {
        ScopeLevel::Standard
    } else {
        ScopeLevel::Micro
    }
}

/// Decide feat-vs-fix for prompts against an existing repo.
pub fn infer_fix(prompt: &str) -> bool {
    FIX_KEYWORDS.is_match(&prompt.to_lowercase())
}

/// Pick the 1-based phase to auto-skip to based on what the prompt asks for.
///
/// Code-only changes jump straight to the Engineer phase; design-only work
/// to the Design Explorer; backend-shaped work to the Architect.
pub fn infer_start_phase(prompt: &str) -> usize {
    let lower = prompt.to_lowercase();
    if CODE_ONLY_KEYWORDS.is_match(&lower) {
        5
    } else if DESIGN_ONLY_KEYWORDS.is_match(&lower) {
        3
    } else if TRANSLATE_ONLY_KEYWORDS.is_match(&lower) {
        4
    } else if ARCH_KEYWORDS.is_match(&lower) {
        2
    } else {
        1
    }
}

/// Kebab-case slug for branch names, capped at 40 chars.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 40 {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}
