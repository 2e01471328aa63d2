//! Tool Execution Layer.
//!
//! Every tool the agents can call is a variant of [`ToolCall`]; the model's
//! invocation is parsed into one, then executed by a single exhaustive match.
//! Input problems never abort the turn: they come back as a tool-result payload
//! of the form `{"error": "<kind>", "message": "..."}` so the next reasoning step
//! can recover.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use analyst_core::dataset::{Column, DatasetError, DatasetRecord, DatasetView};
use analyst_core::domain::message::ToolInvocation;
use analyst_core::flows::AgentKind;

use crate::errors::TurnError;
use crate::llm::{CompletionService, ToolSpec};
use crate::prompts::PromptLibrary;
use crate::summarize::Summarizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ListIntents,
    ListCategories,
    FilterIntent,
    FilterCategory,
    CountRows,
    CountCategory,
    CountIntent,
    SampleRows,
    SortByValue,
    Sum,
    Summarize,
    Finish,
}

impl ToolKind {
    pub const ALL: [ToolKind; 12] = [
        ToolKind::ListIntents,
        ToolKind::ListCategories,
        ToolKind::FilterIntent,
        ToolKind::FilterCategory,
        ToolKind::CountRows,
        ToolKind::CountCategory,
        ToolKind::CountIntent,
        ToolKind::SampleRows,
        ToolKind::SortByValue,
        ToolKind::Sum,
        ToolKind::Summarize,
        ToolKind::Finish,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListIntents => "get_possible_intents_tool",
            Self::ListCategories => "get_possible_categories_tool",
            Self::FilterIntent => "select_semantic_intent_tool",
            Self::FilterCategory => "select_semantic_category_tool",
            Self::CountRows => "count_rows_tool",
            Self::CountCategory => "count_category_tool",
            Self::CountIntent => "count_intent_tool",
            Self::SampleRows => "sample_rows_tool",
            Self::SortByValue => "sort_dict_by_values_tool",
            Self::Sum => "sum_tool",
            Self::Summarize => "summarize_tool",
            Self::Finish => "finish_tool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn available_to(&self, agent: AgentKind) -> bool {
        // Summarization is the only tool scoped to one agent; counting and
        // arithmetic helpers serve both.
        !matches!((self, agent), (Self::Summarize, AgentKind::Structured))
    }

    pub fn for_agent(agent: AgentKind) -> Vec<ToolKind> {
        Self::ALL.into_iter().filter(|kind| kind.available_to(agent)).collect()
    }

    fn description(&self) -> &'static str {
        match self {
            Self::ListIntents => "List the distinct intent values present in the current view.",
            Self::ListCategories => "List the distinct category values present in the current view.",
            Self::FilterIntent => {
                "Keep only rows whose intent is one of the given names. Narrows the current view."
            }
            Self::FilterCategory => {
                "Keep only rows whose category is one of the given names. Narrows the current view."
            }
            Self::CountRows => "Count the rows in the current view.",
            Self::CountCategory => "Count the rows of the current view with the given category.",
            Self::CountIntent => "Count the rows of the current view with the given intent.",
            Self::SampleRows => {
                "Return n rows drawn at random without replacement from the current view."
            }
            Self::SortByValue => {
                "Sort a JSON object mapping keys to numbers by value. Ties keep their original order."
            }
            Self::Sum => "Add two integers.",
            Self::Summarize => {
                "Summarise the customer messages of the current view with respect to a request."
            }
            Self::Finish => "Finish the turn with the final answer for the user.",
        }
    }

    fn parameters(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(
            "reasoning".to_string(),
            json!({"type": "string", "description": "Why this tool is being called."}),
        );
        let mut required = vec!["reasoning"];

        let mut add = |name: &'static str, schema: Value| {
            properties.insert(name.to_string(), schema);
            required.push(name);
        };
        match self {
            Self::ListIntents | Self::ListCategories | Self::CountRows => {}
            Self::FilterIntent => add(
                "intent_names",
                json!({"type": "array", "items": {"type": "string"}, "description": "Exact intent names."}),
            ),
            Self::FilterCategory => add(
                "category_names",
                json!({"type": "array", "items": {"type": "string"}, "description": "Exact category names."}),
            ),
            Self::CountCategory => add("category", json!({"type": "string"})),
            Self::CountIntent => add("intent", json!({"type": "string"})),
            Self::SampleRows => add("n", json!({"type": "integer", "minimum": 0})),
            Self::SortByValue => {
                add(
                    "mapping",
                    json!({"type": "string", "description": "JSON object of key to number."}),
                );
                add("ascending", json!({"type": "boolean"}));
            }
            Self::Sum => {
                add("a", json!({"type": "integer"}));
                add("b", json!({"type": "integer"}));
            }
            Self::Summarize => add(
                "request",
                json!({"type": "string", "description": "What the summary should focus on."}),
            ),
            Self::Finish => add(
                "final_response",
                json!({"type": "string", "description": "The complete answer shown to the user."}),
            ),
        }

        json!({"type": "object", "properties": properties, "required": required})
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

pub fn tool_specs(agent: AgentKind) -> Vec<ToolSpec> {
    ToolKind::for_agent(agent).iter().map(ToolKind::spec).collect()
}

/// A parsed invocation with its typed arguments.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolCall {
    ListIntents,
    ListCategories,
    FilterIntent { intent_names: Vec<String> },
    FilterCategory { category_names: Vec<String> },
    CountRows,
    CountCategory { category: String },
    CountIntent { intent: String },
    SampleRows { n: usize },
    SortByValue { mapping: Value, ascending: bool },
    Sum { a: i64, b: i64 },
    Summarize { request: String },
    Finish { final_response: String },
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::ListIntents => ToolKind::ListIntents,
            Self::ListCategories => ToolKind::ListCategories,
            Self::FilterIntent { .. } => ToolKind::FilterIntent,
            Self::FilterCategory { .. } => ToolKind::FilterCategory,
            Self::CountRows => ToolKind::CountRows,
            Self::CountCategory { .. } => ToolKind::CountCategory,
            Self::CountIntent { .. } => ToolKind::CountIntent,
            Self::SampleRows { .. } => ToolKind::SampleRows,
            Self::SortByValue { .. } => ToolKind::SortByValue,
            Self::Sum { .. } => ToolKind::Sum,
            Self::Summarize { .. } => ToolKind::Summarize,
            Self::Finish { .. } => ToolKind::Finish,
        }
    }

    /// Resolves the name and decodes the arguments. Returns the model's
    /// `reasoning` alongside the call.
    pub fn parse(invocation: &ToolInvocation) -> Result<(ToolCall, String), ToolError> {
        let kind = ToolKind::from_name(&invocation.name)
            .ok_or_else(|| ToolError::UnknownTool(invocation.name.clone()))?;
        let arguments = match &invocation.arguments {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };

        let call = match kind {
            ToolKind::ListIntents => decode::<NoArgs>(kind, arguments).map(|args| (ToolCall::ListIntents, args.reasoning)),
            ToolKind::ListCategories => {
                decode::<NoArgs>(kind, arguments).map(|args| (ToolCall::ListCategories, args.reasoning))
            }
            ToolKind::FilterIntent => decode::<FilterIntentArgs>(kind, arguments).map(|args| {
                (ToolCall::FilterIntent { intent_names: args.intent_names }, args.reasoning)
            }),
            ToolKind::FilterCategory => decode::<FilterCategoryArgs>(kind, arguments).map(|args| {
                (ToolCall::FilterCategory { category_names: args.category_names }, args.reasoning)
            }),
            ToolKind::CountRows => decode::<NoArgs>(kind, arguments).map(|args| (ToolCall::CountRows, args.reasoning)),
            ToolKind::CountCategory => decode::<CountCategoryArgs>(kind, arguments)
                .map(|args| (ToolCall::CountCategory { category: args.category }, args.reasoning)),
            ToolKind::CountIntent => decode::<CountIntentArgs>(kind, arguments)
                .map(|args| (ToolCall::CountIntent { intent: args.intent }, args.reasoning)),
            ToolKind::SampleRows => decode::<SampleRowsArgs>(kind, arguments)
                .map(|args| (ToolCall::SampleRows { n: args.n }, args.reasoning)),
            ToolKind::SortByValue => decode::<SortArgs>(kind, arguments).map(|args| {
                (ToolCall::SortByValue { mapping: args.mapping, ascending: args.ascending }, args.reasoning)
            }),
            ToolKind::Sum => {
                decode::<SumArgs>(kind, arguments).map(|args| (ToolCall::Sum { a: args.a, b: args.b }, args.reasoning))
            }
            ToolKind::Summarize => decode::<SummarizeArgs>(kind, arguments)
                .map(|args| (ToolCall::Summarize { request: args.request }, args.reasoning)),
            ToolKind::Finish => decode::<FinishArgs>(kind, arguments).map(|args| {
                (ToolCall::Finish { final_response: args.final_response }, args.reasoning)
            }),
        }?;
        Ok(call)
    }
}

#[derive(Deserialize)]
struct NoArgs {
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct FilterIntentArgs {
    #[serde(default)]
    reasoning: String,
    intent_names: Vec<String>,
}

#[derive(Deserialize)]
struct FilterCategoryArgs {
    #[serde(default)]
    reasoning: String,
    category_names: Vec<String>,
}

#[derive(Deserialize)]
struct CountCategoryArgs {
    #[serde(default)]
    reasoning: String,
    category: String,
}

#[derive(Deserialize)]
struct CountIntentArgs {
    #[serde(default)]
    reasoning: String,
    intent: String,
}

#[derive(Deserialize)]
struct SampleRowsArgs {
    #[serde(default)]
    reasoning: String,
    n: usize,
}

#[derive(Deserialize)]
struct SortArgs {
    #[serde(default)]
    reasoning: String,
    mapping: Value,
    #[serde(default = "ascending_by_default")]
    ascending: bool,
}

fn ascending_by_default() -> bool {
    true
}

#[derive(Deserialize)]
struct SumArgs {
    #[serde(default)]
    reasoning: String,
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct SummarizeArgs {
    #[serde(default)]
    reasoning: String,
    request: String,
}

#[derive(Deserialize)]
struct FinishArgs {
    #[serde(default)]
    reasoning: String,
    final_response: String,
}

fn decode<T>(kind: ToolKind, arguments: Value) -> Result<T, ToolError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(arguments)
        .map_err(|error| ToolError::InvalidArguments { tool: kind.name(), reason: error.to_string() })
}

/// Recoverable tool input errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("tool `{tool}` is not available to the {agent} agent")]
    NotAvailable { tool: &'static str, agent: &'static str },
    #[error("invalid arguments for `{tool}`: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
    #[error("cannot sample {requested} rows from a view with {available} rows")]
    SampleTooLarge { requested: usize, available: usize },
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
    #[error("the turn is already complete; `{0}` was not executed")]
    TurnComplete(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::NotAvailable { .. } => "not_available",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::SampleTooLarge { .. } => "sample_too_large",
            Self::InvalidMapping(_) => "invalid_mapping",
            Self::TurnComplete(_) => "turn_complete",
        }
    }

    pub fn payload(&self) -> Value {
        json!({"error": self.kind(), "message": self.to_string()})
    }
}

/// What one invocation produced.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub payload: Value,
    pub view: Option<DatasetView>,
    pub completion: Option<String>,
    pub rejection: Option<ToolError>,
}

impl ToolOutcome {
    fn result(payload: Value) -> Self {
        Self { payload, view: None, completion: None, rejection: None }
    }

    pub fn rejected(error: ToolError) -> Self {
        Self { payload: error.payload(), rejection: Some(error), ..Self::result(Value::Null) }
    }
}

pub struct ToolExecutor {
    completion: Arc<dyn CompletionService>,
    prompts: Arc<PromptLibrary>,
    summarizer: Summarizer,
    rng: Mutex<StdRng>,
}

impl ToolExecutor {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        prompts: Arc<PromptLibrary>,
        summarizer: Summarizer,
    ) -> Self {
        Self { completion, prompts, summarizer, rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Runs one invocation against `view`. Only summarisation can fail the turn.
    pub async fn execute(
        &self,
        agent: AgentKind,
        invocation: &ToolInvocation,
        view: &DatasetView,
    ) -> Result<ToolOutcome, TurnError> {
        let (call, reasoning) = match ToolCall::parse(invocation) {
            Ok(parsed) => parsed,
            Err(error) => return Ok(ToolOutcome::rejected(error)),
        };
        let kind = call.kind();
        if !kind.available_to(agent) {
            return Ok(ToolOutcome::rejected(ToolError::NotAvailable {
                tool: kind.name(),
                agent: agent.as_str(),
            }));
        }
        tracing::debug!(
            event_name = "turn.tool.dispatch",
            tool = kind.name(),
            reasoning = %reasoning,
            "dispatching tool call"
        );

        let outcome = match call {
            ToolCall::ListIntents => {
                ToolOutcome::result(json!({"possible_intents": view.distinct(Column::Intent)}))
            }
            ToolCall::ListCategories => {
                ToolOutcome::result(json!({"possible_categories": view.distinct(Column::Category)}))
            }
            ToolCall::FilterIntent { intent_names } => {
                let next = view.filter(Column::Intent, intent_names);
                ToolOutcome {
                    view: Some(next.clone()),
                    ..ToolOutcome::result(json!({
                        "selected_intents": next.distinct(Column::Intent),
                        "number_of_rows": next.count_rows(),
                    }))
                }
            }
            ToolCall::FilterCategory { category_names } => {
                let next = view.filter(Column::Category, category_names);
                ToolOutcome {
                    view: Some(next.clone()),
                    ..ToolOutcome::result(json!({
                        "selected_categories": next.distinct(Column::Category),
                        "number_of_rows": next.count_rows(),
                    }))
                }
            }
            ToolCall::CountRows => ToolOutcome::result(json!({"number_of_rows": view.count_rows()})),
            ToolCall::CountCategory { category } => {
                let count = view.count_where(Column::Category, &category);
                ToolOutcome::result(json!({"category": category, "count": count}))
            }
            ToolCall::CountIntent { intent } => {
                let count = view.count_where(Column::Intent, &intent);
                ToolOutcome::result(json!({"intent": intent, "count": count}))
            }
            ToolCall::SampleRows { n } => match self.sample(view, n) {
                Ok(rows) => ToolOutcome::result(json!({"rows": rows})),
                Err(error) => ToolOutcome::rejected(error),
            },
            ToolCall::SortByValue { mapping, ascending } => match sort_by_value(&mapping, ascending) {
                Ok(sorted) => ToolOutcome::result(json!({"sorted": sorted})),
                Err(error) => ToolOutcome::rejected(error),
            },
            ToolCall::Sum { a, b } => match a.checked_add(b) {
                Some(sum) => ToolOutcome::result(json!({"sum": sum})),
                None => ToolOutcome::rejected(ToolError::InvalidArguments {
                    tool: kind.name(),
                    reason: format!("{a} + {b} overflows a 64-bit integer"),
                }),
            },
            ToolCall::Summarize { request } => {
                let batches = {
                    let mut rng = match self.rng.lock() {
                        Ok(rng) => rng,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    self.summarizer.batches(view, &mut *rng)
                };
                let summary = self
                    .summarizer
                    .summarize(self.completion.as_ref(), &self.prompts, &request, batches)
                    .await?;
                ToolOutcome::result(json!({"summary": summary}))
            }
            ToolCall::Finish { final_response } => ToolOutcome {
                completion: Some(final_response.clone()),
                ..ToolOutcome::result(json!({"final_response": final_response}))
            },
        };
        Ok(outcome)
    }

    fn sample(&self, view: &DatasetView, n: usize) -> Result<Vec<DatasetRecord>, ToolError> {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        view.sample(n, &mut *rng).map_err(|error| match error {
            DatasetError::SampleTooLarge { requested, available } => {
                ToolError::SampleTooLarge { requested, available }
            }
            other => ToolError::InvalidArguments {
                tool: ToolKind::SampleRows.name(),
                reason: other.to_string(),
            },
        })
    }
}

/// Reorders a `key -> number` object by value. The sort is stable in both
/// directions, so equal values keep their input order.
pub fn sort_by_value(mapping: &Value, ascending: bool) -> Result<Map<String, Value>, ToolError> {
    let object = match mapping {
        Value::String(raw) => serde_json::from_str::<Map<String, Value>>(raw)
            .map_err(|error| ToolError::InvalidMapping(format!("not a JSON object: {error}")))?,
        Value::Object(object) => object.clone(),
        other => {
            return Err(ToolError::InvalidMapping(format!(
                "expected a JSON object, got {other}"
            )))
        }
    };

    let mut entries = Vec::with_capacity(object.len());
    for (key, value) in object {
        let number = value
            .as_f64()
            .ok_or_else(|| ToolError::InvalidMapping(format!("value of `{key}` is not a number")))?;
        entries.push((key, value, number));
    }

    entries.sort_by(|left, right| {
        let ordering = left.2.partial_cmp(&right.2).unwrap_or(Ordering::Equal);
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
    Ok(entries.into_iter().map(|(key, value, _)| (key, value)).collect())
}
