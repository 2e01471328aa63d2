//! Map-then-combine summarisation over sampled rows of a view.

use rand::Rng;
use serde_json::json;

use analyst_core::dataset::{DatasetRecord, DatasetView};
use analyst_core::domain::message::Message;

use crate::errors::TurnError;
use crate::llm::{CompletionRequest, CompletionService, LlmError};
use crate::prompts::{PromptLibrary, PromptTemplate};

pub const EMPTY_VIEW_SUMMARY: &str = "The current view contains no rows to summarise.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Summarizer {
    batch_size: usize,
    batch_count: usize,
}

impl Summarizer {
    pub fn new(batch_size: usize, batch_count: usize) -> Self {
        Self { batch_size: batch_size.max(1), batch_count: batch_count.max(1) }
    }

    pub fn batches<R>(&self, view: &DatasetView, rng: &mut R) -> Vec<Vec<DatasetRecord>>
    where
        R: Rng + ?Sized,
    {
        view.batches(self.batch_size, self.batch_count, rng)
    }

    /// Each batch is summarised in its own call that sees only that batch, then a
    /// final call merges the partial summaries.
    pub async fn summarize<S>(
        &self,
        service: &S,
        prompts: &PromptLibrary,
        request: &str,
        batches: Vec<Vec<DatasetRecord>>,
    ) -> Result<String, TurnError>
    where
        S: CompletionService + ?Sized,
    {
        if batches.is_empty() {
            return Ok(EMPTY_VIEW_SUMMARY.to_string());
        }

        let batch_prompt = prompts.render(PromptTemplate::SummarizeBatch, &json!({"request": request}))?;
        let mut partials = Vec::with_capacity(batches.len());
        for (index, batch) in batches.iter().enumerate() {
            let records = serde_json::to_string(batch)
                .map_err(|error| LlmError::InvalidResponse(format!("encode batch: {error}")))?;
            let response = service
                .complete(CompletionRequest::new(vec![
                    Message::system(batch_prompt.clone()),
                    Message::human(records),
                ]))
                .await?;
            tracing::debug!(
                event_name = "turn.tool.summarize.batch",
                batch = index + 1,
                rows = batch.len(),
                "batch summarised"
            );
            partials.push(response.content);
        }

        let combine_prompt = prompts.render(
            PromptTemplate::SummarizeCombine,
            &json!({
                "request": request,
                "batch_count": partials.len(),
                "batch_size": self.batch_size,
            }),
        )?;
        let joined = partials
            .iter()
            .enumerate()
            .map(|(index, summary)| format!("Batch {}:\n{}", index + 1, summary.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let combined = service
            .complete(CompletionRequest::new(vec![
                Message::system(combine_prompt),
                Message::human(joined),
            ]))
            .await?;
        Ok(combined.content)
    }
}
