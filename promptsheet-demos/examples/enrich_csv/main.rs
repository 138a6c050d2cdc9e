//! Enrich a CSV file with one LLM-derived column.
//!
//! ```text
//! cargo run --example enrich_csv -- input.csv output.csv providers.yaml ollama llama3.1
//! ```
//!
//! Edit the prompts below to match your data. Progress is printed after each
//! completed unit of work, mirroring what a UI progress bar would show.

use std::env;
use anyhow::{bail, Context, Result};
use promptsheet::config::ProviderRegistry;
use promptsheet::dataset::Dataset;
use promptsheet::engine::{variable_union, invalid_variables, ExecutionMode, JobSpec, Processor, Progress};
use promptsheet::session::{HistoryEntry, SessionState};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that processes data.";
const USER_PROMPT: &str = "Process this data: {text}";
const FORMATTING_INSTRUCTIONS: &str = "Return only the processed result without any explanation.";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let [input, output, registry_path, provider_tag, model] = match args.as_slice() {
        [_, a, b, c, d, e] => [a, b, c, d, e],
        _ => bail!("usage: enrich_csv <input.csv> <output.csv> <providers.yaml> <provider> <model>"),
    };

    let registry = ProviderRegistry::from_path(registry_path)
        .with_context(|| format!("loading provider registry from {}", registry_path))?;
    let dataset = Dataset::from_csv_path(input)
        .with_context(|| format!("loading dataset from {}", input))?;
    println!("Loaded {} rows, columns: {}", dataset.len(), dataset.columns().join(", "));

    // Validate up front so a typo does not cost a single model call.
    let variables = variable_union(SYSTEM_PROMPT, USER_PROMPT);
    let invalid = invalid_variables(&variables, &dataset);
    if !invalid.is_empty() {
        bail!("prompt variables not in the dataset: {}", invalid.join(", "));
    }

    let client_config = registry.resolve(provider_tag, model)?;
    let processor = Processor::new(&client_config)?;
    let job = JobSpec {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt_template: USER_PROMPT.to_string(),
        formatting_instructions: FORMATTING_INSTRUCTIONS.to_string(),
        output_column: "llm_output".to_string(),
        mode: ExecutionMode::AsyncBatch,
        batch_size: 10,
    };

    let mut session = SessionState::new(dataset);
    let mut on_progress = |p: Progress| {
        println!("chunk {}/{} done, {}/{} rows", p.current, p.total, p.rows_done, p.total_rows);
    };
    let result = processor
        .process_dataset(session.current(), &job, Some(&mut on_progress))
        .await?;

    session.commit(
        result,
        HistoryEntry::new(job.output_column.as_str(), registry.display_name(provider_tag), model.as_str()),
    );
    session.current().to_csv_path(output)
        .with_context(|| format!("writing result to {}", output))?;

    for (step, entry) in session.history().iter().enumerate() {
        println!("Step {}: added column `{}` using {} ({})",
                 step + 1, entry.column, entry.provider, entry.model);
    }
    println!("Wrote {}", output);
    Ok(())
}
