//! # Evaluation State Machine
//! Drives one content item through model invocation, response parsing,
//! bounded retry, and a guaranteed-terminal fallback:
//!
//! `CallModel → Parse → {Succeeded | retry → CallModel | Exhausted}`
//!
//! The contract of `evaluate` is that it never returns an error: a gateway
//! failure is folded into the attempt as garbage parse input, parse failures
//! burn retry budget, and an exhausted budget yields a deterministic
//! fallback result. Callers can rely on a well-formed `EvaluationResult`
//! for any input whatsoever.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::gateway::ModelGateway;
use crate::model::{clamp_score, truncate_chars, Decision, EvaluationResult};

/// Default retry budget: 2 retries, i.e. up to 3 model invocations.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Default deterministic content prefix handed to the model.
pub const DEFAULT_CONTENT_PREFIX_CHARS: usize = 3000;

const MAX_KEY_CONCEPTS: usize = 5;
const MAX_TLDR_CHARS: usize = 100;
const MAX_REASONING_CHARS: usize = 200;

/// Fixed evaluation rubric. Decision thresholds are described to the model;
/// validation deliberately does not re-check them against the scores.
const SYSTEM_PROMPT: &str = r#"You are an expert content evaluator.

Evaluate the provided article and answer with exactly one JSON object of this shape:
{
    "innovation_score": <integer 0-10>,
    "depth_score": <integer 0-10>,
    "decision": "<INTERESTING|BOOKMARK|SKIP>",
    "key_concepts": [<up to 5 key concepts as strings>],
    "tldr": "<one-sentence summary, at most 100 characters>",
    "reasoning": "<short justification>"
}

Scoring dimensions:
1. innovation_score (0-10): novelty and originality of the content
   - 8-10: genuinely groundbreaking findings
   - 6-7: important new insights that advance the field
   - 4-5: some new ideas, but shallow
   - 1-3: mostly restates existing knowledge

2. depth_score (0-10): depth and rigor of the content
   - 8-10: thorough, evidence-backed analysis
   - 6-7: reasonably deep discussion with supporting logic
   - 4-5: medium depth, basic argumentation
   - 1-3: surface-level discussion

3. decision:
   - INTERESTING: innovation_score >= 7 AND depth_score >= 6
   - BOOKMARK: innovation_score >= 5 OR depth_score >= 5
   - SKIP: everything else

Return only the JSON object, with no surrounding text."#;

/// Closed set of states the machine moves through. Terminal states carry
/// the outcome; there is no open-ended mutable bag threaded between steps.
#[derive(Debug)]
enum EvalState {
    CallModel,
    Parse,
    Succeeded(EvaluationResult),
    Exhausted,
}

/// One model exchange: what came back (or why nothing did).
#[derive(Debug, Clone)]
pub struct EvaluationAttempt {
    pub index: u32,
    pub raw_response: Option<String>,
    pub error: Option<String>,
}

pub struct Evaluator {
    gateway: Arc<dyn ModelGateway>,
    max_retries: u32,
    content_prefix_chars: usize,
}

impl Evaluator {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            gateway,
            max_retries: DEFAULT_MAX_RETRIES,
            content_prefix_chars: DEFAULT_CONTENT_PREFIX_CHARS,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_content_prefix_chars(mut self, chars: usize) -> Self {
        self.content_prefix_chars = chars;
        self
    }

    pub fn version(&self) -> &str {
        self.gateway.version()
    }

    /// Evaluate one piece of content. Never errors: the worst case is the
    /// deterministic fallback after the retry budget is exhausted.
    pub async fn evaluate(&self, title: &str, content: &str, url: &str) -> EvaluationResult {
        let user_prompt = self.build_user_prompt(title, content, url);
        let mut attempts: Vec<EvaluationAttempt> = Vec::new();
        let mut state = EvalState::CallModel;

        loop {
            state = match state {
                EvalState::CallModel => {
                    let index = attempts.len() as u32;
                    let attempt = match self.gateway.invoke(SYSTEM_PROMPT, &user_prompt).await {
                        Ok(text) => EvaluationAttempt {
                            index,
                            raw_response: Some(text),
                            error: None,
                        },
                        // Gateway failure is not raised: it becomes an
                        // attempt with empty parse input.
                        Err(e) => EvaluationAttempt {
                            index,
                            raw_response: None,
                            error: Some(e.to_string()),
                        },
                    };
                    attempts.push(attempt);
                    EvalState::Parse
                }

                EvalState::Parse => {
                    let attempt = attempts.last_mut().expect("parse without an attempt");
                    let parsed = match (&attempt.raw_response, &attempt.error) {
                        (Some(raw), _) => {
                            parse_and_validate(raw, title, self.gateway.version())
                        }
                        (None, err) => Err(ParseError::Gateway(
                            err.clone().unwrap_or_else(|| "empty response".into()),
                        )),
                    };
                    match parsed {
                        Ok(result) => EvalState::Succeeded(result),
                        Err(e) => {
                            attempt.error = Some(e.to_string());
                            debug!(attempt = attempt.index, error = %e, "attempt failed");
                            if (attempts.len() as u32) <= self.max_retries {
                                counter!("eval_retries_total").increment(1);
                                EvalState::CallModel
                            } else {
                                EvalState::Exhausted
                            }
                        }
                    }
                }

                EvalState::Succeeded(result) => {
                    counter!("eval_success_total").increment(1);
                    return result;
                }

                EvalState::Exhausted => {
                    warn!(
                        attempts = attempts.len(),
                        title, "retry budget exhausted, returning fallback"
                    );
                    counter!("eval_fallback_total").increment(1);
                    return self.fallback_result(title, attempts.len());
                }
            };
        }
    }

    fn build_user_prompt(&self, title: &str, content: &str, url: &str) -> String {
        // Deterministic prefix keeps cost and latency bounded and the call
        // reproducible for a given item.
        let body = truncate_chars(content, self.content_prefix_chars);
        format!(
            "Evaluate the following content:\n\n\
             Title: {title}\n\n\
             Content: {body}\n\n\
             URL: {url}\n\n\
             Answer with the JSON object only, no extra text."
        )
    }

    /// Deterministic terminal result once every attempt has failed.
    fn fallback_result(&self, title: &str, attempts: usize) -> EvaluationResult {
        EvaluationResult {
            innovation_score: 5,
            depth_score: 5,
            decision: Decision::Bookmark,
            key_concepts: Vec::new(),
            tldr: truncate_chars(title, MAX_TLDR_CHARS),
            reasoning: format!("Evaluation failed after {attempts} attempts"),
            evaluator_version: self.gateway.version().to_string(),
        }
    }
}

/// Locate the first balanced JSON object in `text`. String literals and
/// escapes are honored so braces inside them do not confuse the depth count.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull an integer score out of the response object. A missing field is
/// tolerated (neutral 5); a present but non-numeric value is a parse error.
fn score_field(obj: &serde_json::Value, field: &'static str) -> Result<i32, ParseError> {
    match obj.get(field) {
        None | Some(serde_json::Value::Null) => Ok(5),
        Some(serde_json::Value::Number(n)) => {
            // Truncate toward zero like an integer cast, then clamp.
            let raw = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .ok_or(ParseError::BadField(field))?;
            Ok(clamp_score(raw))
        }
        Some(serde_json::Value::String(s)) => {
            let raw: i64 = s
                .trim()
                .parse::<i64>()
                .or_else(|_| s.trim().parse::<f64>().map(|f| f.trunc() as i64))
                .map_err(|_| ParseError::BadField(field))?;
            Ok(clamp_score(raw))
        }
        Some(_) => Err(ParseError::BadField(field)),
    }
}

/// Parse a raw model response and normalize it into a valid result.
/// Out-of-range scores are clamped, unknown decisions default to BOOKMARK,
/// and over-long sequences/strings are truncated.
pub fn parse_and_validate(
    raw: &str,
    title: &str,
    evaluator_version: &str,
) -> Result<EvaluationResult, ParseError> {
    let json = extract_json_object(raw).ok_or(ParseError::NoJson)?;
    let obj: serde_json::Value = serde_json::from_str(json)?;

    let innovation_score = score_field(&obj, "innovation_score")?;
    let depth_score = score_field(&obj, "depth_score")?;

    let decision = match obj.get("decision").and_then(|v| v.as_str()) {
        Some(raw) => Decision::from_model_literal(raw),
        None => Decision::Bookmark,
    };

    let key_concepts = match obj.get("key_concepts") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .take(MAX_KEY_CONCEPTS)
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(_) => return Err(ParseError::BadField("key_concepts")),
    };

    let tldr = match obj.get("tldr").and_then(|v| v.as_str()) {
        Some(s) => truncate_chars(s, MAX_TLDR_CHARS),
        None => truncate_chars(title, MAX_TLDR_CHARS),
    };

    let reasoning = match obj.get("reasoning").and_then(|v| v.as_str()) {
        Some(s) => truncate_chars(s, MAX_REASONING_CHARS),
        None => String::new(),
    };

    Ok(EvaluationResult {
        innovation_score,
        depth_score,
        decision,
        key_concepts,
        tldr,
        reasoning,
        evaluator_version: evaluator_version.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_balanced_object() {
        let text = "Sure! Here you go: {\"a\": {\"b\": 1}} trailing";
        assert_eq!(extract_json_object(text), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn braces_inside_strings_do_not_close_the_object() {
        let text = r#"{"a": "}", "b": 2}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn unbalanced_object_yields_none() {
        assert_eq!(extract_json_object("{\"a\": 1"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn missing_scores_default_to_neutral() {
        let r = parse_and_validate(r#"{"decision":"SKIP"}"#, "t", "v").unwrap();
        assert_eq!(r.innovation_score, 5);
        assert_eq!(r.depth_score, 5);
        assert_eq!(r.decision, Decision::Skip);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let r = parse_and_validate(
            r#"{"innovation_score": 12, "depth_score": -3}"#,
            "t",
            "v",
        )
        .unwrap();
        assert_eq!(r.innovation_score, 10);
        assert_eq!(r.depth_score, 0);
    }

    #[test]
    fn float_scores_truncate_toward_zero() {
        let r = parse_and_validate(
            r#"{"innovation_score": 7.9, "depth_score": "6"}"#,
            "t",
            "v",
        )
        .unwrap();
        assert_eq!(r.innovation_score, 7);
        assert_eq!(r.depth_score, 6);
    }

    #[test]
    fn non_numeric_score_is_a_parse_error() {
        let e = parse_and_validate(r#"{"innovation_score": "high"}"#, "t", "v");
        assert!(e.is_err());
    }

    #[test]
    fn key_concepts_are_capped_at_five() {
        let r = parse_and_validate(
            r#"{"key_concepts": ["a","b","c","d","e","f","g"]}"#,
            "t",
            "v",
        )
        .unwrap();
        assert_eq!(r.key_concepts.len(), 5);
        assert_eq!(r.key_concepts[0], "a");
    }

    #[test]
    fn tldr_defaults_to_title_and_is_capped() {
        let long_title = "x".repeat(300);
        let r = parse_and_validate("{}", &long_title, "v").unwrap();
        assert_eq!(r.tldr.chars().count(), 100);
    }

    #[test]
    fn reasoning_is_capped_at_200_chars() {
        let raw = format!(r#"{{"reasoning": "{}"}}"#, "r".repeat(500));
        let r = parse_and_validate(&raw, "t", "v").unwrap();
        assert_eq!(r.reasoning.chars().count(), 200);
    }
}
