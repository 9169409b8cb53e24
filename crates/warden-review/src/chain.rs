//! Review chains: one model call per review stage.

use std::sync::Arc;

use warden_core::{ChangeBlock, ReviewComment, WardenError};
use warden_difflens::patch::AnnotatedFile;

use crate::github::PullRequestInfo;
use crate::llm::{ChatMessage, ChatModel, ResponseFormat, Role};
use crate::prompt;

/// Stage-specific prompts and parsers around a shared [`ChatModel`].
///
/// Every failure is reported as [`WardenError::Stage`] carrying the stage
/// name.
#[derive(Clone)]
pub struct ReviewChains {
    model: Arc<dyn ChatModel>,
}

impl ReviewChains {
    /// Wrap a chat model.
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    async fn call(
        &self,
        stage: &str,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> Result<String, WardenError> {
        self.model
            .complete(messages, format)
            .await
            .map_err(|e| WardenError::stage(stage, e.to_string()))
    }

    /// Review the changed code, returning line comments.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Stage`] if the call fails or the reply is
    /// not a comment list.
    pub async fn code_review(
        &self,
        changes: &[ChangeBlock],
        context: &[AnnotatedFile],
        static_analysis: Option<&str>,
    ) -> Result<Vec<ReviewComment>, WardenError> {
        let messages = [
            ChatMessage::system(prompt::code_review_system()),
            ChatMessage::user(prompt::code_review_prompt(changes, context, static_analysis)),
        ];
        let reply = self
            .call("code_reviewer", &messages, ResponseFormat::Json)
            .await?;
        prompt::parse_comments("code_reviewer", &reply)
    }

    /// Review the pull request title and description, returning markdown.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Stage`] if the call fails.
    pub async fn title_description(
        &self,
        pr: &PullRequestInfo,
        changes: &[ChangeBlock],
    ) -> Result<String, WardenError> {
        let messages = [
            ChatMessage::system(prompt::TITLE_DESCRIPTION_SYSTEM),
            ChatMessage::user(prompt::title_description_prompt(pr, changes)),
        ];
        self.call("title_description_reviewer", &messages, ResponseFormat::Text)
            .await
    }

    /// The opening message of the cross-reference conversation. No model call.
    pub fn cross_reference_seed(
        &self,
        changes: &[ChangeBlock],
        context: &[AnnotatedFile],
        static_analysis: Option<&str>,
    ) -> ChatMessage {
        ChatMessage::user(prompt::cross_reference_seed(changes, context, static_analysis))
    }

    /// Produce the next cross-reference analysis as an assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Stage`] if the call fails.
    pub async fn cross_reference_generate(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<ChatMessage, WardenError> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(prompt::CROSS_REFERENCE_GENERATOR_SYSTEM));
        messages.extend_from_slice(transcript);
        let reply = self
            .call("cross_reference_generator", &messages, ResponseFormat::Text)
            .await?;
        Ok(ChatMessage::assistant(reply))
    }

    /// Critique the latest analysis; the critique joins the transcript as a
    /// user message.
    ///
    /// The reflector sees the conversation from the other side, so roles
    /// are swapped before the call.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Stage`] if the call fails.
    pub async fn cross_reference_reflect(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<ChatMessage, WardenError> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(prompt::CROSS_REFERENCE_REFLECTOR_SYSTEM));
        messages.extend(transcript.iter().map(swap_role));
        let reply = self
            .call("cross_reference_reflector", &messages, ResponseFormat::Text)
            .await?;
        Ok(ChatMessage::user(reply))
    }

    /// Turn the final cross-reference transcript into review comments.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Stage`] if the call fails or the reply is
    /// not a comment list.
    pub async fn cross_reference_comments(
        &self,
        transcript: &[ChatMessage],
    ) -> Result<Vec<ReviewComment>, WardenError> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(prompt::cross_reference_commenter_system()));
        messages.extend_from_slice(transcript);
        let reply = self
            .call("cross_reference_commenter", &messages, ResponseFormat::Json)
            .await?;
        prompt::parse_comments("cross_reference_commenter", &reply)
    }
}

fn swap_role(message: &ChatMessage) -> ChatMessage {
    let role = match message.role {
        Role::User => Role::Assistant,
        Role::Assistant => Role::User,
        Role::System => Role::System,
    };
    ChatMessage {
        role,
        content: message.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct Recorder {
        reply: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for Recorder {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<String, WardenError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl ChatModel for Failing {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _format: ResponseFormat,
        ) -> Result<String, WardenError> {
            Err(WardenError::Llm("503 Service Unavailable".into()))
        }
    }

    fn recorder(reply: &str) -> Arc<Recorder> {
        Arc::new(Recorder {
            reply: reply.into(),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn reflector_sees_swapped_roles() {
        let model = recorder("the second finding is wrong");
        let chains = ReviewChains::new(model.clone());
        let transcript = vec![ChatMessage::user("seed"), ChatMessage::assistant("findings")];

        let critique = chains.cross_reference_reflect(&transcript).await.unwrap();
        assert_eq!(critique.role, Role::User);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0][0].role, Role::System);
        assert_eq!(seen[0][1].role, Role::Assistant);
        assert_eq!(seen[0][2].role, Role::User);
    }

    #[tokio::test]
    async fn generator_reply_is_assistant_message() {
        let chains = ReviewChains::new(recorder("output `vpc_id` renamed"));
        let reply = chains
            .cross_reference_generate(&[ChatMessage::user("seed")])
            .await
            .unwrap();
        assert_eq!(reply.role, Role::Assistant);
    }

    #[tokio::test]
    async fn model_failure_becomes_stage_error() {
        let chains = ReviewChains::new(Arc::new(Failing));
        let err = chains.code_review(&[], &[], None).await.unwrap_err();
        assert!(matches!(err, WardenError::Stage { ref stage, .. } if stage == "code_reviewer"));
    }

    #[tokio::test]
    async fn malformed_review_output_is_stage_error() {
        let chains = ReviewChains::new(recorder("I found nothing"));
        assert!(chains.code_review(&[], &[], None).await.is_err());
    }
}
