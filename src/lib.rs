//! # promptsheet
//!
//! Batch LLM enrichment for tabular data: take a dataset, a templated prompt
//! pair, and a model, and produce one derived column, row by row or in
//! batches.
//!
//! ## Concepts and Design
//!
//! The API follows the shape of the data, and every step that turns a dataset
//! into a new column is explicit and individually testable.
//!
//! ### Dataset
//!
//! An ordered, in-memory table: named columns, rows of cells. Datasets are
//! never mutated in place; deriving a column produces a new dataset and the
//! input stays as it was. See [dataset].
//!
//! ### Prompt templates and variables
//!
//! A template references column values with `{column_name}` placeholders, for
//! example
//!
//! ```text
//! Summarize the review by {author}: {review_text}
//! ```
//!
//! Three templates make up a job: a system prompt, a user prompt, and
//! formatting instructions. Variables are collected from the system and user
//! prompts only and validated against the dataset's columns before anything
//! is sent to a model. The formatting instructions are appended to the system
//! message as opaque literal text: a placeholder inside them is passed through
//! to the model unsubstituted. See [prompt] and [chain].
//!
//! ### Model clients
//!
//! One uniform exchange (system message + user message in, text out) over
//! three provider backends: a local inference server, the hosted API, and the
//! enterprise-hosted variant. Construction is a factory keyed by the provider
//! tag and fails closed on anything unrecognized. See [client], and [config]
//! for resolving provider settings from a YAML registry plus environment
//! variables.
//!
//! ### Execution strategies
//!
//! A run drives the prepared row inputs through the chain in one of three
//! modes: sequential (one row at a time), batch (consecutive chunks, rows of
//! a chunk one after another), or async batch (same chunks, rows of a chunk
//! dispatched concurrently and realigned to row order on join). Progress is
//! reported after every completed unit of work. A failed exchange aborts the
//! whole run and discards partial outputs. See [engine].
//!
//! ### Session
//!
//! The engine keeps no state between runs. The dataset being worked on, its
//! pristine original and the history of completed runs belong to the caller,
//! held in a [session::SessionState] and advanced only by committing a fully
//! successful result.
//!
//! ## Example
//!
//! ```no_run
//! use promptsheet::client::{ClientConfig, Provider};
//! use promptsheet::dataset::Dataset;
//! use promptsheet::engine::{ExecutionMode, JobSpec, Processor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dataset = Dataset::from_csv_path("reviews.csv")?;
//! let processor = Processor::new(&ClientConfig {
//!     provider: Provider::Ollama,
//!     model: "llama3.1".to_string(),
//!     api_key: None,
//!     base_url: None,
//!     api_version: None,
//! })?;
//! let job = JobSpec {
//!     system_prompt: "You classify customer reviews.".to_string(),
//!     user_prompt_template: "Classify the sentiment of: {review_text}".to_string(),
//!     formatting_instructions: "Answer with a single word.".to_string(),
//!     output_column: "sentiment".to_string(),
//!     mode: ExecutionMode::AsyncBatch,
//!     batch_size: 10,
//! };
//! let result = processor.process_dataset(&dataset, &job, None).await?;
//! result.to_csv_path("reviews_enriched.csv")?;
//! # Ok(())
//! # }
//! ```

pub mod prompt;
pub mod dataset;
pub mod client;
pub mod chain;
pub mod engine;
pub mod config;
pub mod session;
