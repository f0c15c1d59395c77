//! # LLM Helpers
//!
//! Provider dispatch for radkit `LlmFunction`s. The provider match lives
//! here once; callers only name the output shape.

/// Run one `LlmFunction` on an already constructed provider client.
#[macro_export]
macro_rules! invoke_llm_function {
    ($llm:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {
        radkit::agent::LlmFunction::<$output_type>::new_with_system_instructions(
            $llm,
            $system_prompt,
        )
        .run($input)
        .await
        .map_err(anyhow::Error::from)
    };
}

/// Run an `LlmFunction` against whichever provider `$config` selects.
///
/// Expands to an `anyhow::Result<$output_type>`; client construction errors
/// are propagated with `?`, so it must be used inside a function returning
/// `anyhow::Result`.
#[macro_export]
macro_rules! run_llm_function {
    ($config:expr, $output_type:ty, $system_prompt:expr, $input:expr) => {{
        use radkit::models::providers::{
            AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
        };
        use $crate::models::LlmProvider;

        let config = $config;
        let result: anyhow::Result<$output_type> = match config.provider {
            LlmProvider::Anthropic => $crate::invoke_llm_function!(
                AnthropicLlm::from_env(&config.model)?,
                $output_type,
                $system_prompt,
                $input
            ),
            LlmProvider::OpenAI => {
                let mut llm = OpenAILlm::from_env(&config.model)?;
                if let Some(base_url) = &config.base_url {
                    llm = llm.with_base_url(base_url);
                }
                $crate::invoke_llm_function!(llm, $output_type, $system_prompt, $input)
            }
            LlmProvider::Gemini => $crate::invoke_llm_function!(
                GeminiLlm::from_env(&config.model)?,
                $output_type,
                $system_prompt,
                $input
            ),
            LlmProvider::OpenRouter => $crate::invoke_llm_function!(
                OpenRouterLlm::from_env(&config.model)?,
                $output_type,
                $system_prompt,
                $input
            ),
            LlmProvider::Grok => $crate::invoke_llm_function!(
                GrokLlm::from_env(&config.model)?,
                $output_type,
                $system_prompt,
                $input
            ),
            LlmProvider::DeepSeek => $crate::invoke_llm_function!(
                DeepSeekLlm::from_env(&config.model)?,
                $output_type,
                $system_prompt,
                $input
            ),
        };
        result
    }};
}

pub use run_llm_function;
