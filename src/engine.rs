//! # Processing engine
//!
//! Turns a dataset plus a templated prompt pair into a sequence of model
//! exchanges and reassembles the outputs into a derived column.
//!
//! One run is a linear pass with no state kept across calls:
//!
//! 1. collect the variable set (placeholders of system prompt ∪ user prompt),
//! 2. validate it against the dataset's columns (fail fast, before any call),
//! 3. map every row to a [RowInput] in row order,
//! 4. drive the chain under the requested [ExecutionMode],
//! 5. check the output count against the row count and assemble the result.
//!
//! A failed exchange aborts the whole run; outputs already computed for prior
//! rows are discarded and nothing is published to the caller. There is no
//! retry, no timeout and no cancellation at this level.

use std::collections::HashSet;
use std::str::FromStr;
use futures::future::join_all;
use log::debug;
use crate::chain::{Chain, RowInput};
use crate::client::{ClientConfig, ModelClient};
use crate::client::errors::{ConfigError, InvocationError};
use crate::dataset::{Cell, Dataset};
use crate::engine::errors::{ProcessError, UnknownMode};

/// How the prepared row inputs are driven through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One exchange per row, strictly in order, one in flight at a time.
    Sequential,
    /// Consecutive chunks of `batch_size` rows, one chunk at a time, rows
    /// within a chunk exchanged one after another.
    Batch,
    /// Same chunking as [ExecutionMode::Batch], but the rows of a chunk are
    /// dispatched concurrently and joined before the next chunk starts.
    AsyncBatch,
}

impl ExecutionMode {
    pub fn tag(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Batch => "batch",
            ExecutionMode::AsyncBatch => "async_batch",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(ExecutionMode::Sequential),
            "batch" => Ok(ExecutionMode::Batch),
            "async_batch" => Ok(ExecutionMode::AsyncBatch),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

/// Emitted after each unit of work (row or chunk) completes. Ephemeral, never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 1-based index of the completed unit.
    pub current: usize,
    /// Total number of units in this run.
    pub total: usize,
    /// Rows completed so far.
    pub rows_done: usize,
    /// Total number of rows in this run.
    pub total_rows: usize,
}

/// Observational progress callback. Runs inline with the processing loop, so
/// implementations must be cheap and non-blocking.
pub type ProgressCallback<'a> = &'a mut (dyn FnMut(Progress) + Send);

struct ProgressSink<'a>(Option<ProgressCallback<'a>>);

impl ProgressSink<'_> {
    fn report(&mut self, progress: Progress) {
        if let Some(callback) = self.0.as_mut() {
            callback(progress);
        }
    }
}

/// Immutable description of one processing run.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// System prompt; may reference `{column_name}` variables.
    pub system_prompt: String,
    /// User prompt template; may reference `{column_name}` variables.
    pub user_prompt_template: String,
    /// Appended verbatim to the system message; placeholders inside are passed
    /// through to the model unsubstituted.
    pub formatting_instructions: String,
    /// Name of the derived column. Replaces an existing column of that name.
    pub output_column: String,
    pub mode: ExecutionMode,
    /// Rows per chunk for the batch modes; must be at least 1. Ignored by
    /// [ExecutionMode::Sequential].
    pub batch_size: usize,
}

/// The deduplicated union of placeholder names across a system and user
/// prompt pair.
pub fn variable_union(system_prompt: &str, user_prompt_template: &str) -> HashSet<String> {
    let mut variables = crate::prompt::get_placeholders(system_prompt);
    variables.extend(crate::prompt::get_placeholders(user_prompt_template));
    variables
}

/// Variable names that do not name a dataset column, sorted for stable
/// reporting. An empty result means the variable set is valid.
pub fn invalid_variables(variables: &HashSet<String>, dataset: &Dataset) -> Vec<String> {
    let mut invalid: Vec<String> = variables.iter()
        .filter(|v| dataset.column_index(v).is_none())
        .cloned()
        .collect();
    invalid.sort();
    invalid
}

/// Map every dataset row to a [RowInput], in row order. A variable naming an
/// existing column takes that row's value coerced to text (null becomes the
/// empty string); a variable without a matching column maps to the empty
/// string in every row.
pub fn row_inputs(dataset: &Dataset, variables: &HashSet<String>) -> Vec<RowInput> {
    let bindings: Vec<(&String, Option<usize>)> = variables.iter()
        .map(|v| (v, dataset.column_index(v)))
        .collect();
    dataset.rows()
        .map(|row| {
            bindings.iter()
                .map(|(name, index)| {
                    let value = index.map(|i| row[i].to_text()).unwrap_or_default();
                    ((*name).clone(), value)
                })
                .collect()
        })
        .collect()
}

/// A model client ready to process datasets.
pub struct Processor {
    client: ModelClient,
}

impl Processor {
    /// Construct the model client for `config`. Fails with a configuration
    /// error before any invocation can start.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self { client: ModelClient::new(config)? })
    }

    /// Wrap an already constructed client.
    pub fn with_client(client: ModelClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ModelClient {
        &self.client
    }

    /// Run one job over `dataset` and return a new dataset with the derived
    /// column. The input dataset is never touched; on any error nothing is
    /// returned and partial outputs are discarded.
    pub async fn process_dataset(
        &self,
        dataset: &Dataset,
        job: &JobSpec,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<Dataset, ProcessError> {
        if job.mode != ExecutionMode::Sequential && job.batch_size == 0 {
            return Err(ProcessError::InvalidBatchSize);
        }

        let chain = Chain::new(
            &self.client,
            &job.system_prompt,
            &job.user_prompt_template,
            &job.formatting_instructions,
        );
        let variables = chain.variables();
        if variables.is_empty() {
            return Err(ProcessError::NoVariables);
        }
        let invalid = invalid_variables(&variables, dataset);
        if !invalid.is_empty() {
            return Err(ProcessError::UnknownVariables(invalid));
        }

        let inputs = row_inputs(dataset, &variables);
        debug!("processing {} rows in {} mode (batch size {})",
               inputs.len(), job.mode.tag(), job.batch_size);

        let mut sink = ProgressSink(progress);
        let outputs = match job.mode {
            ExecutionMode::Sequential => sequential(&chain, &inputs, &mut sink).await?,
            ExecutionMode::Batch => batch(&chain, &inputs, job.batch_size, &mut sink).await?,
            ExecutionMode::AsyncBatch => async_batch(&chain, &inputs, job.batch_size, &mut sink).await?,
        };

        if outputs.len() != inputs.len() {
            return Err(ProcessError::OutputLengthMismatch {
                expected: inputs.len(),
                actual: outputs.len(),
            });
        }
        let cells = outputs.into_iter().map(Cell::Text).collect();
        dataset.with_column(&job.output_column, cells)
            .map_err(|e| ProcessError::OutputLengthMismatch {
                expected: e.expected,
                actual: e.actual,
            })
    }
}

async fn sequential(
    chain: &Chain<'_>,
    inputs: &[RowInput],
    sink: &mut ProgressSink<'_>,
) -> Result<Vec<String>, InvocationError> {
    let total_rows = inputs.len();
    let mut outputs = Vec::with_capacity(total_rows);
    for (index, input) in inputs.iter().enumerate() {
        outputs.push(chain.invoke(input).await?);
        sink.report(Progress {
            current: index + 1,
            total: total_rows,
            rows_done: index + 1,
            total_rows,
        });
    }
    Ok(outputs)
}

async fn batch(
    chain: &Chain<'_>,
    inputs: &[RowInput],
    batch_size: usize,
    sink: &mut ProgressSink<'_>,
) -> Result<Vec<String>, InvocationError> {
    let total_rows = inputs.len();
    let total_units = (total_rows + batch_size - 1) / batch_size;
    let mut outputs = Vec::with_capacity(total_rows);
    for (unit, chunk) in inputs.chunks(batch_size).enumerate() {
        let chunk_outputs = chain.invoke_many(chunk).await?;
        outputs.extend(chunk_outputs);
        sink.report(Progress {
            current: unit + 1,
            total: total_units,
            rows_done: outputs.len(),
            total_rows,
        });
    }
    Ok(outputs)
}

async fn async_batch(
    chain: &Chain<'_>,
    inputs: &[RowInput],
    batch_size: usize,
    sink: &mut ProgressSink<'_>,
) -> Result<Vec<String>, InvocationError> {
    let total_rows = inputs.len();
    let total_units = (total_rows + batch_size - 1) / batch_size;
    let mut outputs = Vec::with_capacity(total_rows);
    for (unit, chunk) in inputs.chunks(batch_size).enumerate() {
        // Fan out the chunk, join everything, then realign by row index so the
        // output order never depends on completion order.
        let exchanges = chunk.iter()
            .enumerate()
            .map(|(index, input)| async move { (index, chain.invoke(input).await) });
        let mut chunk_outputs: Vec<Option<String>> = vec![None; chunk.len()];
        for (index, result) in join_all(exchanges).await {
            chunk_outputs[index] = Some(result?);
        }
        // every index in 0..chunk.len() was joined exactly once
        outputs.extend(chunk_outputs.into_iter().flatten());
        sink.report(Progress {
            current: unit + 1,
            total: total_units,
            rows_done: outputs.len(),
            total_rows,
        });
    }
    Ok(outputs)
}

pub mod errors {
    use std::error::Error;
    use std::fmt;
    use std::fmt::Formatter;
    use crate::client::errors::InvocationError;

    /// An execution mode tag that is not one of `sequential`, `batch`,
    /// `async_batch`.
    #[derive(Debug, Clone)]
    pub struct UnknownMode(pub String);

    impl fmt::Display for UnknownMode {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "unknown execution mode: {} (expected sequential, batch or async_batch)", self.0)
        }
    }

    impl Error for UnknownMode {}

    /// Everything that can end a processing run. Validation problems are
    /// detected before any model call is made; an invocation failure aborts
    /// mid-run with all partial outputs discarded; a length mismatch after a
    /// strategy completes indicates a backend bug.
    #[derive(Debug)]
    pub enum ProcessError {
        /// Batch or async-batch mode with a batch size of zero.
        InvalidBatchSize,
        /// Prompt variables that do not name a dataset column.
        UnknownVariables(Vec<String>),
        /// Neither prompt references any variable; nothing to process.
        NoVariables,
        Invocation(InvocationError),
        OutputLengthMismatch { expected: usize, actual: usize },
    }

    impl fmt::Display for ProcessError {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            match self {
                ProcessError::InvalidBatchSize =>
                    write!(f, "batch size must be at least 1"),
                ProcessError::UnknownVariables(names) =>
                    write!(f, "prompt variables do not match any dataset column: {}", names.join(", ")),
                ProcessError::NoVariables =>
                    write!(f, "no variables found in the system or user prompt"),
                ProcessError::Invocation(e) =>
                    write!(f, "{}", e),
                ProcessError::OutputLengthMismatch { expected, actual } =>
                    write!(f, "output length mismatch: expected {} outputs, got {}", expected, actual),
            }
        }
    }

    impl Error for ProcessError {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            match self {
                ProcessError::Invocation(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<InvocationError> for ProcessError {
        fn from(e: InvocationError) -> Self {
            ProcessError::Invocation(e)
        }
    }
}

#[cfg(test)]
mod engine_tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::client::{Complete, ModelClient, Provider};
    use crate::client::errors::InvocationError;
    use crate::dataset::{Cell, Dataset};
    use super::*;
    use super::errors::ProcessError;

    /// Backend that echoes the user message, with optional per-call failure
    /// and per-content delay injection.
    struct ScriptedBackend {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
        /// (needle, delay) pairs: a user message containing the needle is
        /// answered only after the delay.
        delays: Vec<(String, Duration)>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on_call: None,
                delays: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Complete for ScriptedBackend {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, InvocationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_call == Some(call) {
                return Err(InvocationError::new(
                    "ollama",
                    "scripted",
                    std::io::Error::new(std::io::ErrorKind::Other, "scripted failure"),
                ));
            }
            for (needle, delay) in &self.delays {
                if user.contains(needle.as_str()) {
                    tokio::time::sleep(*delay).await;
                }
            }
            self.seen.lock().unwrap().push(user.to_string());
            Ok(format!("out:{}", user))
        }
    }

    fn numbered_dataset(rows: usize) -> Dataset {
        let mut dataset = Dataset::new(vec!["item".to_string(), "note".to_string()]).unwrap();
        for i in 0..rows {
            dataset.push_row(vec![Cell::Text(format!("item{}", i)), Cell::Null]).unwrap();
        }
        dataset
    }

    fn job(mode: ExecutionMode, batch_size: usize) -> JobSpec {
        JobSpec {
            system_prompt: "You process rows.".to_string(),
            user_prompt_template: "Handle {item}".to_string(),
            formatting_instructions: "Reply with the result only.".to_string(),
            output_column: "result".to_string(),
            mode,
            batch_size,
        }
    }

    struct Shared(Arc<ScriptedBackend>);

    #[async_trait]
    impl Complete for Shared {
        async fn complete(&self, system: &str, user: &str) -> Result<String, InvocationError> {
            self.0.complete(system, user).await
        }
    }

    fn scripted_processor(backend: ScriptedBackend) -> (Processor, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let client = ModelClient::from_backend(Provider::Ollama, "scripted", Box::new(Shared(backend.clone())));
        (Processor::with_client(client), backend)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("batch".parse::<ExecutionMode>().unwrap(), ExecutionMode::Batch);
        assert_eq!("async_batch".parse::<ExecutionMode>().unwrap(), ExecutionMode::AsyncBatch);
        assert_eq!("sequential".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sequential);
        assert!("Batch".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_variable_union_is_deduplicated() {
        let variables = variable_union("Hi {name}", "{name} is {age}");
        let expected: HashSet<String> = ["name".to_string(), "age".to_string()].into_iter().collect();
        assert_eq!(expected, variables);
    }

    #[test]
    fn test_row_inputs_shape_and_defaults() {
        let mut dataset = Dataset::new(vec!["name".to_string(), "age".to_string()]).unwrap();
        dataset.push_row(vec![Cell::from("alice"), Cell::Int(30)]).unwrap();
        dataset.push_row(vec![Cell::from("bob"), Cell::Null]).unwrap();

        let variables: HashSet<String> =
            ["name".to_string(), "age".to_string(), "city".to_string()].into_iter().collect();
        let inputs = row_inputs(&dataset, &variables);

        assert_eq!(2, inputs.len());
        assert_eq!("alice", inputs[0]["name"]);
        assert_eq!("30", inputs[0]["age"]);
        // null cell coerces to empty string, not a textual null
        assert_eq!("", inputs[1]["age"]);
        // a variable without a matching column maps to empty in every row
        assert_eq!("", inputs[0]["city"]);
        assert_eq!("", inputs[1]["city"]);
    }

    #[test]
    fn test_invalid_variables_sorted() {
        let dataset = numbered_dataset(1);
        let variables: HashSet<String> =
            ["zone".to_string(), "item".to_string(), "city".to_string()].into_iter().collect();
        let invalid = invalid_variables(&variables, &dataset);
        assert_eq!(vec!["city".to_string(), "zone".to_string()], invalid);
    }

    #[tokio::test]
    async fn test_sequential_progress_and_outputs() {
        let (processor, backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(5);

        let mut reports = Vec::new();
        let mut on_progress = |p: Progress| reports.push(p);
        let result = processor
            .process_dataset(&dataset, &job(ExecutionMode::Sequential, 10), Some(&mut on_progress))
            .await
            .unwrap();

        assert_eq!(5, backend.call_count());
        for i in 0..5 {
            assert_eq!(result.get(i, "result"), Some(&Cell::Text(format!("out:Handle item{}", i))));
        }
        let expected: Vec<Progress> = (1..=5)
            .map(|i| Progress { current: i, total: 5, rows_done: i, total_rows: 5 })
            .collect();
        assert_eq!(expected, reports);
    }

    #[tokio::test]
    async fn test_batch_chunking_and_progress() {
        let (processor, _backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(25);

        let mut reports = Vec::new();
        let mut on_progress = |p: Progress| reports.push(p);
        let result = processor
            .process_dataset(&dataset, &job(ExecutionMode::Batch, 10), Some(&mut on_progress))
            .await
            .unwrap();

        assert_eq!(25, result.len());
        assert_eq!(
            vec![
                Progress { current: 1, total: 3, rows_done: 10, total_rows: 25 },
                Progress { current: 2, total: 3, rows_done: 20, total_rows: 25 },
                Progress { current: 3, total: 3, rows_done: 25, total_rows: 25 },
            ],
            reports
        );
    }

    #[tokio::test]
    async fn test_batch_size_larger_than_rows_is_one_chunk() {
        let (processor, _backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(3);

        let mut reports = Vec::new();
        let mut on_progress = |p: Progress| reports.push(p);
        processor
            .process_dataset(&dataset, &job(ExecutionMode::Batch, 100), Some(&mut on_progress))
            .await
            .unwrap();

        assert_eq!(vec![Progress { current: 1, total: 1, rows_done: 3, total_rows: 3 }], reports);
    }

    #[tokio::test]
    async fn test_async_batch_realigns_outputs() {
        let mut backend = ScriptedBackend::new();
        // the middle row of the chunk finishes last
        backend.delays.push(("item1".to_string(), Duration::from_millis(80)));
        let (processor, backend) = scripted_processor(backend);
        let dataset = numbered_dataset(3);

        let result = processor
            .process_dataset(&dataset, &job(ExecutionMode::AsyncBatch, 3), None)
            .await
            .unwrap();

        for i in 0..3 {
            assert_eq!(result.get(i, "result"), Some(&Cell::Text(format!("out:Handle item{}", i))));
        }
        // completion order differed from row order
        let seen = backend.seen.lock().unwrap();
        assert_eq!("Handle item1", seen.last().unwrap().as_str());
    }

    #[tokio::test]
    async fn test_async_batch_progress_matches_batch() {
        let (processor, _backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(25);

        let mut reports = Vec::new();
        let mut on_progress = |p: Progress| reports.push(p);
        processor
            .process_dataset(&dataset, &job(ExecutionMode::AsyncBatch, 10), Some(&mut on_progress))
            .await
            .unwrap();

        assert_eq!(
            vec![
                Progress { current: 1, total: 3, rows_done: 10, total_rows: 25 },
                Progress { current: 2, total: 3, rows_done: 20, total_rows: 25 },
                Progress { current: 3, total: 3, rows_done: 25, total_rows: 25 },
            ],
            reports
        );
    }

    #[tokio::test]
    async fn test_validation_blocks_before_any_call() {
        let (processor, backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(3);

        let mut bad_job = job(ExecutionMode::Sequential, 10);
        bad_job.user_prompt_template = "Handle {city}".to_string();
        let err = processor.process_dataset(&dataset, &bad_job, None).await.unwrap_err();

        match err {
            ProcessError::UnknownVariables(names) => assert_eq!(vec!["city".to_string()], names),
            other => panic!("expected UnknownVariables, got {}", other),
        }
        assert_eq!(0, backend.call_count());
    }

    #[tokio::test]
    async fn test_empty_variable_set_is_rejected() {
        let (processor, backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(3);

        let mut bad_job = job(ExecutionMode::Sequential, 10);
        bad_job.system_prompt = "You process rows.".to_string();
        bad_job.user_prompt_template = "Handle everything".to_string();
        let err = processor.process_dataset(&dataset, &bad_job, None).await.unwrap_err();

        assert!(matches!(err, ProcessError::NoVariables));
        assert_eq!(0, backend.call_count());
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_rejected() {
        let (processor, backend) = scripted_processor(ScriptedBackend::new());
        let dataset = numbered_dataset(3);

        let err = processor
            .process_dataset(&dataset, &job(ExecutionMode::Batch, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidBatchSize));
        assert_eq!(0, backend.call_count());
    }

    #[tokio::test]
    async fn test_failure_mid_run_discards_partial_work() {
        let mut backend = ScriptedBackend::new();
        // first row of the second chunk fails
        backend.fail_on_call = Some(3);
        let (processor, backend) = scripted_processor(backend);
        let dataset = numbered_dataset(5);

        let mut reports = Vec::new();
        let mut on_progress = |p: Progress| reports.push(p);
        let err = processor
            .process_dataset(&dataset, &job(ExecutionMode::Batch, 2), Some(&mut on_progress))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Invocation(_)));
        // only the first chunk ever reported, and no dataset was produced
        assert_eq!(vec![Progress { current: 1, total: 3, rows_done: 2, total_rows: 5 }], reports);
        assert_eq!(3, backend.call_count());
        // the input dataset itself is untouched
        assert!(dataset.column_index("result").is_none());
    }

    #[tokio::test]
    async fn test_formatting_placeholders_pass_through() {
        struct CaptureSystem(Arc<Mutex<Vec<String>>>);
        #[async_trait]
        impl Complete for CaptureSystem {
            async fn complete(&self, system: &str, _user: &str) -> Result<String, InvocationError> {
                self.0.lock().unwrap().push(system.to_string());
                Ok(String::new())
            }
        }
        let captured = Arc::new(Mutex::new(Vec::new()));
        let client = ModelClient::from_backend(
            Provider::Ollama,
            "capture",
            Box::new(CaptureSystem(captured.clone())),
        );
        let processor = Processor::with_client(client);

        let dataset = numbered_dataset(1);
        let mut job_spec = job(ExecutionMode::Sequential, 1);
        job_spec.system_prompt = "Process {item}.".to_string();
        job_spec.formatting_instructions = "Answer as {format}.".to_string();
        processor.process_dataset(&dataset, &job_spec, None).await.unwrap();

        let seen = captured.lock().unwrap();
        // system prompt rendered, formatting instructions verbatim after a blank line
        assert_eq!("Process item0.\n\nAnswer as {format}.", seen[0].as_str());
    }
}
