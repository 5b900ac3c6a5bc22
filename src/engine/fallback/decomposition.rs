use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;

use super::stages::{ExactMatch, ParameterAdaptation, SemanticMatch};
use super::{FallbackChain, Resolved, ResolutionContext, ResolutionStage, StageOutcome};
use crate::config::EngineConfig;
use crate::types::{ResolutionComponent, ResolutionRequest, ResolutionStatus, Strategy};

/// Splits a compound utterance into spans that may each carry one intent.
pub trait SpanSplitter: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
}

/// Splits on conjunctions and list punctuation.
pub struct RegexSpanSplitter {
    pattern: Regex,
}

const CONJUNCTIONS: &str =
    r"(?i)\s*(?:\b(?:as\s+well\s+as|and\s+then|and|then|also|plus)\b|[;&,])\s*";

impl RegexSpanSplitter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Default for RegexSpanSplitter {
    fn default() -> Self {
        Self {
            pattern: Regex::new(CONJUNCTIONS).expect("conjunction pattern is valid"),
        }
    }
}

impl SpanSplitter for RegexSpanSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        self.pattern
            .split(text)
            .map(|span| span.trim().trim_matches(|c: char| c == '.' || c == '?' || c == '!'))
            .map(str::trim)
            .filter(|span| !span.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Resolves each span through exact, semantic and parameter-adapted matching
/// at `decomposition_threshold`, and composes a `partial` result when at least
/// two spans resolve.
pub struct IntentDecomposition {
    splitter: Box<dyn SpanSplitter>,
    spans: FallbackChain,
}

impl IntentDecomposition {
    pub fn new(splitter: Box<dyn SpanSplitter>) -> Self {
        Self {
            splitter,
            spans: FallbackChain::new(vec![
                Box::new(ExactMatch),
                Box::new(SemanticMatch),
                Box::new(ParameterAdaptation),
            ]),
        }
    }

    fn span_config(config: &EngineConfig) -> EngineConfig {
        EngineConfig {
            similarity_threshold: config.decomposition_threshold,
            decomposition_enabled: false,
            ..config.clone()
        }
    }
}

impl Default for IntentDecomposition {
    fn default() -> Self {
        Self::new(Box::new(RegexSpanSplitter::default()))
    }
}

#[async_trait]
impl ResolutionStage for IntentDecomposition {
    fn strategy(&self) -> Strategy {
        Strategy::IntentDecomposition
    }

    async fn attempt(&self, ctx: &mut ResolutionContext<'_>) -> StageOutcome {
        if !ctx.config.decomposition_enabled {
            return StageOutcome::defer("decomposition disabled");
        }
        let parent = ctx.request;
        let Some(text) = parent.text() else {
            return StageOutcome::defer("no utterance to decompose");
        };
        let spans = self.splitter.split(text);
        if spans.len() < 2 {
            return StageOutcome::defer("no conjunction splits the utterance");
        }

        let config = Self::span_config(ctx.config);
        let mut components = Vec::with_capacity(spans.len());
        let mut best_score: Option<f32> = None;

        for span in &spans {
            let request = ResolutionRequest {
                utterance: span.clone(),
                action: None,
                parameters: parent.parameters.clone(),
                category_hint: parent.category_hint.clone(),
                passthrough: Default::default(),
            };
            let mut span_ctx = ResolutionContext::for_span(&request, &config, ctx);
            let (found, _) = self.spans.run_stages(&mut span_ctx).await;
            ctx.absorb_span(&span_ctx);
            // Only similarity feeds the reported score; an exact span hit is 1.0 by fiat.
            let similarity = span_ctx.best_candidate().map(|c| c.similarity_score);

            let component = match found {
                Some((strategy, resolved)) => ResolutionComponent {
                    span: span.clone(),
                    status: resolved.status,
                    action: resolved.action,
                    agent_id: resolved.agent_id,
                    confidence: resolved.confidence,
                    strategy_applied: strategy.applied(),
                    missing_parameters: resolved.missing_parameters,
                },
                None => ResolutionComponent {
                    span: span.clone(),
                    status: ResolutionStatus::Unmatched,
                    action: None,
                    agent_id: None,
                    confidence: similarity.unwrap_or(0.0),
                    strategy_applied: Strategy::GracefulFailure,
                    missing_parameters: BTreeSet::new(),
                },
            };
            if let Some(score) = similarity {
                best_score = Some(best_score.map_or(score, |b: f32| b.max(score)));
            }
            components.push(component);
        }

        let summary = components
            .iter()
            .map(|c| match &c.action {
                Some(action) => format!("'{}' -> {} ({:.2})", c.span, action, c.confidence),
                None => format!("'{}' -> unresolved", c.span),
            })
            .collect::<Vec<_>>()
            .join("; ");

        let resolved: Vec<&ResolutionComponent> = components
            .iter()
            .filter(|c| c.status != ResolutionStatus::Unmatched)
            .collect();
        if resolved.len() < 2 {
            let detail = format!(
                "{} of {} spans resolved: {}",
                resolved.len(),
                components.len(),
                summary
            );
            return match best_score {
                Some(score) => StageOutcome::defer_with_score(score, detail),
                None => StageOutcome::defer(detail),
            };
        }

        let confidence = resolved
            .iter()
            .map(|c| c.confidence)
            .fold(f32::INFINITY, f32::min);
        let missing_parameters: BTreeSet<String> = resolved
            .iter()
            .flat_map(|c| c.missing_parameters.iter().cloned())
            .collect();
        let detail = format!(
            "split into {} spans, {} resolved: {}",
            components.len(),
            resolved.len(),
            summary
        );

        StageOutcome::resolve(
            Resolved {
                status: ResolutionStatus::Partial,
                action: None,
                agent_id: None,
                confidence,
                bound_parameters: parent.parameters.clone(),
                missing_parameters,
                components,
                suggestions: Vec::new(),
                note: String::new(),
            },
            Some(confidence),
            detail,
        )
    }
}
