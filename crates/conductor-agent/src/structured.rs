use serde::de::DeserializeOwned;

use crate::executor::{AgentExecutor, ExecutionRequest};
use crate::{AgentError, Result};

// ---------------------------------------------------------------------------
// StructuredCaller
// ---------------------------------------------------------------------------

/// Wraps an executor to force schema-constrained YAML output.
///
/// The response is stripped of markdown code fences and parsed as YAML. On a
/// parse failure the caller re-prompts with the parse error appended, up to
/// `max_repairs` additional attempts, then surfaces
/// [`AgentError::Unparsable`].
///
/// Empty responses deserialise to `T::default()` — the caller constrains
/// shape, not volume.
pub struct StructuredCaller<'a, E: AgentExecutor> {
    executor: &'a E,
    max_repairs: u32,
}

impl<'a, E: AgentExecutor> StructuredCaller<'a, E> {
    pub fn new(executor: &'a E) -> Self {
        Self {
            executor,
            max_repairs: 2,
        }
    }

    pub fn with_max_repairs(mut self, max_repairs: u32) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    /// Run `request` and parse the response as YAML into `T`.
    ///
    /// Returns the parsed value together with the raw (fence-stripped)
    /// response text, which callers typically persist as the artifact.
    pub async fn call_yaml<T>(&self, request: &ExecutionRequest) -> Result<(T, String)>
    where
        T: DeserializeOwned + Default,
    {
        let mut request = request.clone();
        let mut last_error = String::new();

        for _attempt in 0..=self.max_repairs {
            let response = self.executor.execute(&request).await?;
            let body = strip_fences(&response.text);

            if body.trim().is_empty() {
                return Ok((T::default(), body.into_owned()));
            }

            match serde_yaml::from_str::<T>(&body) {
                Ok(value) => return Ok((value, body.into_owned())),
                Err(e) => {
                    last_error = e.to_string();
                    request.prompt = format!(
                        "{}\n\nYour previous response was not valid YAML \
                         ({last_error}). Respond again with only a valid YAML \
                         document, no prose.",
                        request.prompt
                    );
                }
            }
        }

        Err(AgentError::Unparsable {
            attempts: self.max_repairs + 1,
            last_error,
        })
    }
}

/// Strip a single surrounding markdown code fence, if present.
///
/// Handles ```yaml / ```yml / bare ``` openers. Content that is not fenced
/// is returned unchanged.
fn strip_fences(text: &str) -> std::borrow::Cow<'_, str> {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return std::borrow::Cow::Borrowed(trimmed);
    };
    // Drop the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return std::borrow::Cow::Borrowed(trimmed),
    };
    let body = rest.strip_suffix("```").unwrap_or(rest);
    std::borrow::Cow::Owned(body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedExecutor;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Doc {
        #[serde(default)]
        title: String,
        #[serde(default)]
        items: Vec<String>,
    }

    #[tokio::test]
    async fn parses_bare_yaml() {
        let exec = ScriptedExecutor::always("title: hello\nitems: [a, b]");
        let caller = StructuredCaller::new(&exec);
        let (doc, raw): (Doc, _) = caller
            .call_yaml(&ExecutionRequest::new("produce a doc"))
            .await
            .unwrap();
        assert_eq!(doc.title, "hello");
        assert_eq!(doc.items, vec!["a", "b"]);
        assert!(raw.contains("title: hello"));
        assert_eq!(exec.call_count(), 1);
    }

    #[tokio::test]
    async fn strips_yaml_code_fence() {
        let exec = ScriptedExecutor::always("```yaml\ntitle: fenced\n```");
        let caller = StructuredCaller::new(&exec);
        let (doc, _): (Doc, _) = caller
            .call_yaml(&ExecutionRequest::new("p"))
            .await
            .unwrap();
        assert_eq!(doc.title, "fenced");
    }

    #[tokio::test]
    async fn empty_response_yields_default() {
        let exec = ScriptedExecutor::always("");
        let caller = StructuredCaller::new(&exec);
        let (doc, raw): (Doc, _) = caller
            .call_yaml(&ExecutionRequest::new("p"))
            .await
            .unwrap();
        assert_eq!(doc, Doc::default());
        assert!(raw.is_empty());
        assert_eq!(exec.call_count(), 1);
    }

    #[tokio::test]
    async fn repairs_after_parse_failure() {
        let exec = ScriptedExecutor::from_script(vec![
            Ok("{not: [valid".into()),
            Ok("title: repaired".into()),
        ]);
        let caller = StructuredCaller::new(&exec);
        let (doc, _): (Doc, _) = caller
            .call_yaml(&ExecutionRequest::new("p"))
            .await
            .unwrap();
        assert_eq!(doc.title, "repaired");
        assert_eq!(exec.call_count(), 2);
        // The repair prompt carries the parse error back to the agent.
        assert!(exec.prompts()[1].contains("not valid YAML"));
    }

    #[tokio::test]
    async fn gives_up_after_bounded_repairs() {
        let exec = ScriptedExecutor::always("{not: [valid");
        let caller = StructuredCaller::new(&exec).with_max_repairs(2);
        let err = caller
            .call_yaml::<Doc>(&ExecutionRequest::new("p"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unparsable { attempts: 3, .. }));
        assert_eq!(exec.call_count(), 3);
    }
}
