//! The answer pipeline: classify, dispatch, extract, reformat, validate, scrub.
//!
//! `Pipeline` is shared across requests and holds only immutable capability handles. Everything
//! request-specific lives in [`Prepared`].

use crate::aggregate::{single_shot, Aggregated};
use crate::classify::{dispatch_message, Classification, Classifier};
use crate::prompts::system_directive;
use crate::reformat::reformat;
use crate::scrub::{leak_hits, scrub};
use crate::validate::{validate, ValidationReport};
use answerpipe_core::{
    DispatchRequest, Error, EventStream, GenerationAgent, Query, Reformatter, Result,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct Pipeline {
    agent: Arc<dyn GenerationAgent>,
    reformatter: Arc<dyn Reformatter>,
    classifier: Classifier,
}

/// Per-request state derived from the query before any collaborator call.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub query: Query,
    pub classification: Classification,
    pub dispatch: DispatchRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub classification: Classification,
    pub report: ValidationReport,
}

impl Pipeline {
    pub fn new(
        agent: Arc<dyn GenerationAgent>,
        reformatter: Arc<dyn Reformatter>,
        classifier: Classifier,
    ) -> Self {
        Self {
            agent,
            reformatter,
            classifier,
        }
    }

    pub fn agent_name(&self) -> &'static str {
        self.agent.name()
    }

    pub fn reformatter_name(&self) -> &'static str {
        self.reformatter.name()
    }

    pub fn prepare(&self, raw: &str, stream: bool) -> Result<Prepared> {
        let query = Query::parse(raw)?;
        let classification = self.classifier.classify(&query);
        let dispatch = DispatchRequest {
            message: dispatch_message(&query, &classification),
            system: system_directive(query.as_str(), classification.entity),
            stream,
        };
        tracing::info!(
            target: "answerpipe::pipeline",
            entity = classification.entity.as_str(),
            force_verification = classification.force_verification,
            stream,
            "query classified"
        );
        Ok(Prepared {
            query,
            classification,
            dispatch,
        })
    }

    /// Non-streaming path.
    pub async fn answer(&self, raw: &str) -> Result<Answer> {
        let prepared = self.prepare(raw, false)?;
        let event = self.agent.run(&prepared.dispatch).await.map_err(|e| {
            tracing::warn!(
                target: "answerpipe::pipeline",
                agent = self.agent.name(),
                error = %e,
                "agent run failed"
            );
            e
        })?;
        let doc = single_shot(&event);
        self.finish_document(&prepared, &doc).await
    }

    pub async fn open_stream(&self, prepared: &Prepared) -> Result<EventStream> {
        self.agent.run_stream(&prepared.dispatch).await
    }

    /// Post-processing for a completely aggregated stream.
    pub async fn finish(&self, prepared: &Prepared, aggregated: &Aggregated) -> Result<Answer> {
        match &aggregated.error {
            Some(Error::Stream(m)) => return Err(Error::Stream(m.clone())),
            Some(other) => return Err(Error::Stream(other.to_string())),
            None => {}
        }
        self.finish_document(prepared, &aggregated.document).await
    }

    async fn finish_document(&self, prepared: &Prepared, doc: &str) -> Result<Answer> {
        let formatted = reformat(self.reformatter.as_ref(), doc).await?;
        let (corrected, report) = validate(&formatted, prepared.classification.entity);
        if !report.is_clean() {
            tracing::info!(
                target: "answerpipe::pipeline",
                entity = prepared.classification.entity.as_str(),
                findings = report.findings.len(),
                "contract findings appended"
            );
        }
        let leaks = leak_hits(&corrected);
        if !leaks.is_empty() {
            tracing::debug!(
                target: "answerpipe::pipeline",
                patterns = ?leaks,
                "leaked text scrubbed"
            );
        }
        Ok(Answer {
            text: scrub(&corrected),
            classification: prepared.classification,
            report,
        })
    }
}

/// Text salvaged from an interrupted stream: scrubbed only, never reformatted or validated.
pub fn salvage(partial: &str) -> String {
    scrub(partial)
}
