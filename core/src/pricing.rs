//! Per-model pricing tables with source-level fallback rates
//!
//! Rates are USD per million tokens. Unknown models fall through a fuzzy
//! substring match and finally to the source's base rate, so a cost is
//! always produced when usage is known.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::channel::Source;

const ONE_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    const fn io(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cache_creation: 0.0,
            cache_read: 0.0,
        }
    }

    const fn full(input: f64, output: f64, cache_creation: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }
}

/// Token counts extracted from one upstream response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
    pub cached: u64,
    pub reasoning: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }

    pub fn is_empty(&self) -> bool {
        self.input == 0 && self.output == 0
    }
}

static CLAUDE_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        ("claude-sonnet-4-5-20250929", ModelPricing::full(3.0, 15.0, 3.75, 0.30)),
        ("claude-sonnet-4-20250514", ModelPricing::full(3.0, 15.0, 3.75, 0.30)),
        ("claude-sonnet-3-5-20241022", ModelPricing::full(3.0, 15.0, 3.75, 0.30)),
        ("claude-sonnet-3-5-20240620", ModelPricing::full(3.0, 15.0, 3.75, 0.30)),
        ("claude-opus-4-20250514", ModelPricing::full(15.0, 75.0, 18.75, 1.50)),
        ("claude-opus-3-20240229", ModelPricing::full(15.0, 75.0, 18.75, 1.50)),
        ("claude-haiku-3-5-20241022", ModelPricing::full(0.8, 4.0, 1.0, 0.08)),
        ("claude-3-5-haiku-20241022", ModelPricing::full(0.8, 4.0, 1.0, 0.08)),
    ])
});

static CODEX_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", ModelPricing::io(2.5, 10.0)),
        ("gpt-4o-2024-11-20", ModelPricing::io(2.5, 10.0)),
        ("gpt-4o-mini", ModelPricing::io(0.15, 0.6)),
        ("gpt-4-turbo", ModelPricing::io(10.0, 30.0)),
        ("gpt-4", ModelPricing::io(30.0, 60.0)),
        ("gpt-3.5-turbo", ModelPricing::io(0.5, 1.5)),
        ("o1", ModelPricing::io(15.0, 60.0)),
        ("o1-mini", ModelPricing::io(3.0, 12.0)),
        ("o1-pro", ModelPricing::io(150.0, 600.0)),
        ("o3", ModelPricing::io(10.0, 40.0)),
        ("o3-mini", ModelPricing::io(1.1, 4.4)),
        ("o4-mini", ModelPricing::io(1.1, 4.4)),
        // Claude models reached through OpenAI-compatible relays
        ("claude-sonnet-4-5-20250929", ModelPricing::io(3.0, 15.0)),
        ("claude-sonnet-4-20250514", ModelPricing::io(3.0, 15.0)),
        ("claude-opus-4-20250514", ModelPricing::io(15.0, 75.0)),
        ("claude-3-5-sonnet-20241022", ModelPricing::io(3.0, 15.0)),
        ("claude-3-5-haiku-20241022", ModelPricing::io(0.8, 4.0)),
    ])
});

static GEMINI_PRICING: Lazy<HashMap<&'static str, ModelPricing>> = Lazy::new(|| {
    HashMap::from([
        ("gemini-2.5-pro", ModelPricing::io(1.25, 5.0)),
        ("gemini-2.5-flash", ModelPricing::io(0.075, 0.3)),
        ("gemini-2.0-flash-exp", ModelPricing::io(0.0, 0.0)),
        ("gemini-2.0-flash-thinking-exp-1219", ModelPricing::io(0.0, 0.0)),
        ("gemini-1.5-pro", ModelPricing::io(1.25, 5.0)),
        ("gemini-1.5-flash", ModelPricing::io(0.075, 0.3)),
        ("gemini-1.5-flash-8b", ModelPricing::io(0.0375, 0.15)),
        ("gemini-1.0-pro", ModelPricing::io(0.5, 1.5)),
        ("gemini-pro", ModelPricing::io(0.5, 1.5)),
        ("gemini-pro-vision", ModelPricing::io(0.5, 1.5)),
    ])
});

/// Ordered longest-pattern-first so e.g. "gpt-4o-mini" wins over "gpt-4o".
const CODEX_FUZZY: &[(&str, &str)] = &[
    ("gpt-4o-mini", "gpt-4o-mini"),
    ("gpt-4o", "gpt-4o"),
    ("gpt-4", "gpt-4"),
    ("gpt-3.5", "gpt-3.5-turbo"),
    ("o1-mini", "o1-mini"),
    ("o1-pro", "o1-pro"),
    ("o1", "o1"),
    ("o3-mini", "o3-mini"),
    ("o3", "o3"),
    ("o4-mini", "o4-mini"),
    ("claude", "claude-sonnet-4-5-20250929"),
];

const GEMINI_FUZZY: &[(&str, &str)] = &[
    ("gemini-2.5-pro", "gemini-2.5-pro"),
    ("gemini-2.5-flash", "gemini-2.5-flash"),
    ("gemini-2.0-flash-thinking", "gemini-2.0-flash-thinking-exp-1219"),
    ("gemini-2.0-flash", "gemini-2.0-flash-exp"),
    ("gemini-1.5-pro", "gemini-1.5-pro"),
    ("gemini-1.5-flash-8b", "gemini-1.5-flash-8b"),
    ("gemini-1.5-flash", "gemini-1.5-flash"),
    ("gemini-1.0-pro", "gemini-1.0-pro"),
    ("gemini-pro", "gemini-pro"),
];

fn base_pricing(source: Source) -> ModelPricing {
    match source {
        Source::Claude => ModelPricing::full(3.0, 15.0, 3.75, 0.30),
        Source::Codex => ModelPricing::io(2.5, 10.0),
        Source::Gemini => ModelPricing::io(1.25, 5.0),
    }
}

fn resolve(source: Source, model: &str) -> ModelPricing {
    let (table, fuzzy): (&HashMap<&str, ModelPricing>, &[(&str, &str)]) = match source {
        Source::Claude => (&CLAUDE_PRICING, &[]),
        Source::Codex => (&CODEX_PRICING, CODEX_FUZZY),
        Source::Gemini => (&GEMINI_PRICING, GEMINI_FUZZY),
    };

    if let Some(pricing) = table.get(model) {
        return *pricing;
    }

    let lower = model.to_ascii_lowercase();
    for (pattern, key) in fuzzy {
        if lower.contains(pattern) {
            if let Some(pricing) = table.get(key) {
                return *pricing;
            }
        }
    }

    base_pricing(source)
}

/// Cost in USD for one request's usage.
pub fn cost(source: Source, model: &str, usage: &TokenUsage) -> f64 {
    let pricing = resolve(source, model);
    (usage.input as f64 * pricing.input
        + usage.output as f64 * pricing.output
        + usage.cache_creation as f64 * pricing.cache_creation
        + usage.cache_read as f64 * pricing.cache_read)
        / ONE_MILLION
}
