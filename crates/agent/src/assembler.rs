//! Prompt assembly from a chat template.
//!
//! The template carries two placeholders. `{prompt}` receives the context
//! section plus the user prompt; `{system_prompt}` receives the system
//! prompt. Substitution is single-pass over the template, so placeholder
//! text inside user input is never re-expanded.

use ragline_config::{PROMPT_PLACEHOLDER, SYSTEM_PROMPT_PLACEHOLDER};
use ragline_core::{ConfigurationError, TemplateError};

/// A template known to contain both placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    raw: String,
}

impl Template {
    /// Validate `raw` once, at startup.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ConfigurationError> {
        let raw = raw.into();
        check_placeholders(&raw).map_err(|e| ConfigurationError::Invalid {
            key: "model.template".into(),
            reason: e.to_string(),
        })?;
        Ok(Self { raw })
    }

    /// Final prompt for one request.
    pub fn assemble(
        &self,
        context: &str,
        user_prompt: &str,
        system_prompt: &str,
    ) -> Result<String, TemplateError> {
        assemble(&self.raw, context, user_prompt, system_prompt)
    }

    /// Substitute the placeholders verbatim, without a context section.
    pub fn render(&self, prompt: &str, system_prompt: &str) -> Result<String, TemplateError> {
        substitute(&self.raw, prompt, system_prompt)
    }
}

/// The `{prompt}` section: context then user prompt.
pub fn prompt_section(context: &str, user_prompt: &str) -> String {
    format!("Context:\n{context}\n\nUser Prompt:\n{user_prompt}")
}

/// Fill `template` for one request.
pub fn assemble(
    template: &str,
    context: &str,
    user_prompt: &str,
    system_prompt: &str,
) -> Result<String, TemplateError> {
    substitute(template, &prompt_section(context, user_prompt), system_prompt)
}

fn check_placeholders(template: &str) -> Result<(), TemplateError> {
    for placeholder in [PROMPT_PLACEHOLDER, SYSTEM_PROMPT_PLACEHOLDER] {
        if !template.contains(placeholder) {
            return Err(TemplateError::MissingPlaceholder(placeholder));
        }
    }
    Ok(())
}

/// Replace the first occurrence of each placeholder, scanning the template
/// once. Substituted values are copied, never rescanned.
fn substitute(template: &str, prompt: &str, system_prompt: &str) -> Result<String, TemplateError> {
    check_placeholders(template)?;

    let mut out = String::with_capacity(template.len() + prompt.len() + system_prompt.len());
    let mut rest = template;
    let mut prompt_done = false;
    let mut system_done = false;

    loop {
        let next_prompt = (!prompt_done)
            .then(|| rest.find(PROMPT_PLACEHOLDER))
            .flatten();
        let next_system = (!system_done)
            .then(|| rest.find(SYSTEM_PROMPT_PLACEHOLDER))
            .flatten();

        let (at, placeholder, value) = match (next_prompt, next_system) {
            (Some(p), Some(s)) if s < p => (s, SYSTEM_PROMPT_PLACEHOLDER, system_prompt),
            (Some(p), _) => (p, PROMPT_PLACEHOLDER, prompt),
            (None, Some(s)) => (s, SYSTEM_PROMPT_PLACEHOLDER, system_prompt),
            (None, None) => break,
        };

        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + placeholder.len()..];
        if placeholder == PROMPT_PLACEHOLDER {
            prompt_done = true;
        } else {
            system_done = true;
        }
    }

    out.push_str(rest);
    Ok(out)
}
