//! # Chain
//!
//! A [Chain] binds the three job templates (system prompt, user prompt,
//! formatting instructions) to a constructed [ModelClient], ready to accept a
//! row's variable mapping and produce one string output.
//!
//! Message composition: the system message is the rendered system prompt, a
//! blank line, then the formatting instructions appended verbatim. The
//! formatting instructions are opaque literal text: placeholders inside them
//! are never extracted and never substituted, matching how variables are only
//! collected from the system and user prompts in the first place. The user
//! message is the rendered user prompt.

use std::collections::HashMap;
use crate::client::ModelClient;
use crate::client::errors::InvocationError;
use crate::prompt::PromptTemplate;

/// The flattened variable-name to string-value mapping derived from one
/// dataset row.
pub type RowInput = HashMap<String, String>;

/// The bound combination of prompt templates and a model client.
pub struct Chain<'a> {
    client: &'a ModelClient,
    system: PromptTemplate,
    user: PromptTemplate,
    formatting_instructions: String,
}

impl<'a> Chain<'a> {
    pub fn new(
        client: &'a ModelClient,
        system_prompt: &str,
        user_prompt_template: &str,
        formatting_instructions: &str,
    ) -> Self {
        Self {
            client,
            system: PromptTemplate::new(system_prompt),
            user: PromptTemplate::new(user_prompt_template),
            formatting_instructions: formatting_instructions.to_string(),
        }
    }

    pub fn client(&self) -> &ModelClient {
        self.client
    }

    /// The deduplicated union of placeholder names across the system and user
    /// prompts. Formatting instructions contribute nothing by design.
    pub fn variables(&self) -> std::collections::HashSet<String> {
        self.system.placeholders
            .union(&self.user.placeholders)
            .cloned()
            .collect()
    }

    fn system_message(&self, input: &RowInput) -> Result<String, InvocationError> {
        let rendered = self.system.render(input)
            .map_err(|e| self.client.invocation_error(e))?;
        Ok(format!("{}\n\n{}", rendered, self.formatting_instructions))
    }

    /// Run one exchange for one row input.
    pub async fn invoke(&self, input: &RowInput) -> Result<String, InvocationError> {
        let system = self.system_message(input)?;
        let user = self.user.render(input)
            .map_err(|e| self.client.invocation_error(e))?;
        self.client.complete(&system, &user).await
    }

    /// Run one exchange per input, strictly in order, one in flight at a time.
    /// The output list has exactly one entry per input, aligned by position.
    pub async fn invoke_many(&self, inputs: &[RowInput]) -> Result<Vec<String>, InvocationError> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            outputs.push(self.invoke(input).await?);
        }
        Ok(outputs)
    }
}
