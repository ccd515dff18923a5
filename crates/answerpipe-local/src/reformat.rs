//! Secondary normalization pass through an external text model.

use crate::prompts::REFORMAT_INSTRUCTION;
use answerpipe_core::{Error, Reformatter, Result};

/// Sends `doc` through the reformatter with the fixed instruction.
///
/// A blank document is returned as-is without a collaborator call. An empty reply to non-empty
/// input is treated as a failure rather than an empty answer.
pub async fn reformat(reformatter: &dyn Reformatter, doc: &str) -> Result<String> {
    if doc.trim().is_empty() {
        return Ok(doc.to_string());
    }
    let t0 = std::time::Instant::now();
    let out = reformatter.reformat(REFORMAT_INSTRUCTION, doc).await;
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    match out {
        Ok(text) if text.trim().is_empty() => {
            tracing::warn!(
                target: "answerpipe::reformat",
                backend = reformatter.name(),
                elapsed_ms,
                "reformatter returned empty output"
            );
            Err(Error::Reformat(format!(
                "{} returned empty output",
                reformatter.name()
            )))
        }
        Ok(text) => {
            tracing::debug!(
                target: "answerpipe::reformat",
                backend = reformatter.name(),
                elapsed_ms,
                in_chars = doc.len(),
                out_chars = text.len(),
                "reformatted"
            );
            Ok(text)
        }
        Err(e) => {
            tracing::warn!(
                target: "answerpipe::reformat",
                backend = reformatter.name(),
                elapsed_ms,
                error = %e,
                "reformat failed"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        reply: Option<String>,
    }

    #[async_trait::async_trait]
    impl Reformatter for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn reformat(&self, instruction: &str, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(instruction, REFORMAT_INSTRUCTION);
            Ok(self.reply.clone().unwrap_or_else(|| text.to_string()))
        }
    }

    #[tokio::test]
    async fn blank_documents_skip_the_collaborator() {
        let r = Echo {
            calls: AtomicUsize::new(0),
            reply: None,
        };
        assert_eq!(reformat(&r, "  \n").await.unwrap(), "  \n");
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn passes_text_with_the_fixed_instruction() {
        let r = Echo {
            calls: AtomicUsize::new(0),
            reply: None,
        };
        assert_eq!(reformat(&r, "Hello World").await.unwrap(), "Hello World");
        assert_eq!(r.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_an_error() {
        let r = Echo {
            calls: AtomicUsize::new(0),
            reply: Some(" ".to_string()),
        };
        assert!(matches!(
            reformat(&r, "Hello").await,
            Err(Error::Reformat(_))
        ));
    }
}
