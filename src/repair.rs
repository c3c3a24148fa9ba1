//! Three-stage repair of model output that should be JSON.
//!
//! 1. Classify the envelope once and strictly parse its body.
//! 2. Heuristically close a truncated structure and reparse.
//! 3. One extra model call asking only for the corrected JSON.
//!
//! Every stage outcome is written to the audit log under one run id.
//! There is exactly one pass per document; a failure after stage 3 is a
//! [`MirageError::Parse`].

use std::sync::Arc;

use pkgmirage_core::error::{MirageError, MirageResult};
use pkgmirage_core::llm::{Completer, JSON_REPAIR};
use pkgmirage_core::repair::{classify, complete_truncated, parse_strict, Envelope};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};

const REPAIR_SYSTEM_PROMPT: &str = "You are a JSON repair utility. The user will provide a malformed JSON string. \
Your sole task is to correct any syntax errors (e.g., trailing commas, missing brackets, incorrect quoting) \
and return only the valid, minified JSON object. \
Do not add any commentary, explanations, or markdown fences.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Strict,
    Completion,
    Model,
}

impl RepairStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStage::Strict => "strict",
            RepairStage::Completion => "completion",
            RepairStage::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub value: Value,
    /// The stage that produced `value`.
    pub stage: RepairStage,
}

pub struct RepairPipeline {
    completer: Arc<dyn Completer>,
    audit: AuditLog,
}

impl RepairPipeline {
    pub fn new(completer: Arc<dyn Completer>, audit: AuditLog) -> Self {
        Self { completer, audit }
    }

    pub async fn repair(&self, raw: &str) -> MirageResult<Repaired> {
        let run = Uuid::new_v4();
        let envelope = classify(raw);
        let body = envelope.body();
        let shape = match envelope {
            Envelope::Fenced { .. } => "fenced",
            Envelope::Malformed { .. } => "malformed",
            Envelope::Unfenced(_) => "unfenced",
        };

        match parse_strict(body) {
            Ok(value) => {
                self.stage_ok(run, RepairStage::Strict, shape);
                return Ok(Repaired {
                    value,
                    stage: RepairStage::Strict,
                });
            }
            Err(e) => self.stage_failed(run, RepairStage::Strict, &e.to_string(), body),
        }

        match complete_truncated(body).map(|s| parse_strict(&s)) {
            Some(Ok(value)) => {
                self.stage_ok(run, RepairStage::Completion, shape);
                tracing::info!("repaired truncated JSON without a model call");
                return Ok(Repaired {
                    value,
                    stage: RepairStage::Completion,
                });
            }
            Some(Err(e)) => {
                self.stage_failed(run, RepairStage::Completion, &e.to_string(), body)
            }
            None => self.stage_failed(run, RepairStage::Completion, "not completable", body),
        }

        let fixed = match self
            .completer
            .complete_once(REPAIR_SYSTEM_PROMPT, body, JSON_REPAIR)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                self.stage_failed(run, RepairStage::Model, &e.to_string(), body);
                return Err(MirageError::Parse(format!(
                    "all repair stages failed; repair call: {}",
                    e
                )));
            }
        };

        let fixed_body = classify(&fixed).body();
        match parse_strict(fixed_body) {
            Ok(value) => {
                self.stage_ok(run, RepairStage::Model, shape);
                tracing::info!("repaired JSON with a model call");
                Ok(Repaired {
                    value,
                    stage: RepairStage::Model,
                })
            }
            Err(e) => {
                self.stage_failed(run, RepairStage::Model, &e.to_string(), &fixed);
                tracing::warn!(error = %e, "model-repaired JSON is still invalid");
                Err(MirageError::Parse(format!(
                    "all repair stages failed: {}",
                    e
                )))
            }
        }
    }

    fn stage_ok(&self, run: Uuid, stage: RepairStage, shape: &str) {
        self.audit.record(
            AuditEvent::new(stage.as_str(), "ok")
                .run(run)
                .detail(shape),
        );
    }

    fn stage_failed(&self, run: Uuid, stage: RepairStage, reason: &str, raw: &str) {
        tracing::debug!(stage = stage.as_str(), reason, "repair stage failed");
        self.audit.record(
            AuditEvent::new(stage.as_str(), "failed")
                .run(run)
                .detail(reason)
                .raw(raw),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgmirage_core::testing::ScriptedCompleter;
    use serde_json::json;

    fn pipeline(completer: Arc<ScriptedCompleter>) -> RepairPipeline {
        RepairPipeline::new(completer, AuditLog::disabled())
    }

    #[tokio::test]
    async fn fenced_json_parses_at_stage_one() {
        let model = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
        let out = pipeline(model.clone())
            .repair("```json\n{\"results\": []}\n```")
            .await
            .unwrap();
        assert_eq!(out.stage, RepairStage::Strict);
        assert_eq!(out.value, json!({"results": []}));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn truncated_json_completes_without_model_call() {
        let model = Arc::new(ScriptedCompleter::new(Vec::<String>::new()));
        let out = pipeline(model.clone())
            .repair("```json\n{\"results\": [{\"name\": \"fakepkg123\", \"version\": \"0.1")
            .await
            .unwrap();
        assert_eq!(out.stage, RepairStage::Completion);
        assert_eq!(out.value["results"][0]["name"], "fakepkg123");
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_model_once() {
        let model = Arc::new(ScriptedCompleter::new(["```json\n{\"a\": 1}\n```"]));
        let out = pipeline(model.clone())
            .repair("{\"a\": 1,, }")
            .await
            .unwrap();
        assert_eq!(out.stage, RepairStage::Model);
        assert_eq!(out.value, json!({"a": 1}));
        assert_eq!(model.call_count(), 1);
        assert_eq!(model.params()[0], JSON_REPAIR);
        assert_eq!(model.user_prompts()[0], "{\"a\": 1,, }");
    }

    #[tokio::test]
    async fn exhausted_stages_are_a_parse_error() {
        let model = Arc::new(ScriptedCompleter::new(["still not json"]));
        let err = pipeline(model.clone())
            .repair("definitely not json")
            .await
            .unwrap_err();
        assert!(matches!(err, MirageError::Parse(_)));
        assert_eq!(model.call_count(), 1);

        let failing = Arc::new(ScriptedCompleter::new(Vec::<String>::new()).then_fail("503"));
        let err = pipeline(failing).repair("nope").await.unwrap_err();
        assert!(matches!(err, MirageError::Parse(_)));
    }

    #[tokio::test]
    async fn every_stage_is_audited_under_one_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let (log, writer) = AuditLog::to_file(&path);
        let model = Arc::new(ScriptedCompleter::new(["{\"a\": 1}"]));
        let pipeline = RepairPipeline::new(model, log.clone());

        pipeline.repair("{\"a\": 1,, }").await.unwrap();
        pipeline.repair("[1, 2]").await.unwrap();
        drop(pipeline);
        drop(log);
        writer.await.unwrap();

        let events: Vec<serde_json::Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let stages: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e["stage"].as_str().unwrap(), e["outcome"].as_str().unwrap()))
            .collect();
        assert_eq!(
            stages,
            vec![
                ("strict", "failed"),
                ("completion", "failed"),
                ("model", "ok"),
                ("strict", "ok"),
            ]
        );

        assert_eq!(events[0]["run_id"], events[1]["run_id"]);
        assert_eq!(events[1]["run_id"], events[2]["run_id"]);
        assert_ne!(events[2]["run_id"], events[3]["run_id"]);
        assert_eq!(events[0]["raw"], "{\"a\": 1,, }");
        assert_eq!(events[1]["raw"], "{\"a\": 1,, }");
        assert!(events[2].get("raw").is_none());
        assert!(events[3].get("raw").is_none());
    }
}
