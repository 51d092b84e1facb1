//! Document-aware chat front-end.
//!
//! Wraps the conversation loop with two kinds of query preprocessing served
//! by the document session: `/command doc_id` seeds the history from a named
//! server prompt, and `@doc_id` mentions inline the referenced documents
//! into the user prompt so the model need not fetch them with a tool.

use rust_mcp_schema::Prompt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::chat::Chat;
use crate::api::MessageParam;
use crate::error::AgentError;
use crate::mcp::{CapabilitySession, ResourceContent};

const DOC_LIST_URI: &str = "docs://documents";

pub struct DocChat {
    chat: Chat,
    doc_session: Arc<dyn CapabilitySession>,
}

impl DocChat {
    pub fn new(chat: Chat, doc_session: Arc<dyn CapabilitySession>) -> Self {
        Self { chat, doc_session }
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    /// Commands the document session exposes, for interactive completion.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, AgentError> {
        self.doc_session.list_prompts().await
    }

    pub async fn list_doc_ids(&self) -> Result<Vec<String>, AgentError> {
        let content = self.doc_session.read_resource(DOC_LIST_URI).await?;
        let ids: Vec<String> = match content {
            ResourceContent::Json(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            other => {
                return Err(AgentError::ProtocolError {
                    server: self.doc_session.id().to_string(),
                    message: format!("Document listing is not a JSON array: {:?}", other),
                })
            }
        };
        debug!(count = ids.len(), "Listed available documents");
        Ok(ids)
    }

    pub async fn doc_content(&self, doc_id: &str) -> Result<String, AgentError> {
        let uri = format!("{DOC_LIST_URI}/{doc_id}");
        let content = self.doc_session.read_resource(&uri).await?;
        Ok(content.as_text())
    }

    /// Runs one user turn. `/command doc_id` input seeds the history from
    /// the server prompt of that name; everything else is wrapped with any
    /// `@doc_id` document content and sent as a regular query.
    pub async fn run(&mut self, query: &str) -> Result<String, AgentError> {
        if let Some(rest) = query.strip_prefix('/') {
            return self.run_command(rest).await;
        }

        let context = self.inline_mentions(query).await?;
        self.chat
            .push_message(MessageParam::user_text(wrap_query(query, &context)));
        self.chat.drive().await
    }

    async fn run_command(&mut self, rest: &str) -> Result<String, AgentError> {
        let mut words = rest.split_whitespace();
        let command = words.next().unwrap_or_default();
        let doc_id = words.next().unwrap_or_default();
        info!(command, doc_id, "Seeding conversation from server prompt");

        let mut arguments = HashMap::new();
        arguments.insert("doc_id".to_string(), doc_id.to_string());
        let seeded = self.doc_session.get_prompt(command, arguments).await?;
        for message in seeded {
            self.chat.push_message(message);
        }
        self.chat.drive().await
    }

    /// Fetches each `@doc_id` whose id the document session actually lists,
    /// rendered as `<document>` blocks. Mentions of unknown ids are ignored.
    async fn inline_mentions(&self, query: &str) -> Result<String, AgentError> {
        let mentions: Vec<&str> = query
            .split_whitespace()
            .filter_map(|word| word.strip_prefix('@'))
            .collect();
        if mentions.is_empty() {
            return Ok(String::new());
        }

        let mut context = String::new();
        for doc_id in self.list_doc_ids().await? {
            if mentions.contains(&doc_id.as_str()) {
                debug!(doc_id = %doc_id, "Inlining mentioned document");
                let content = self.doc_content(&doc_id).await?;
                context.push_str(&format!(
                    "\n<document id=\"{doc_id}\">\n{content}\n</document>\n"
                ));
            }
        }
        Ok(context)
    }
}

fn wrap_query(query: &str, context: &str) -> String {
    format!(
        "The user has a question:\n\
         <query>\n{query}\n</query>\n\n\
         The following context may be useful in answering their question:\n\
         <context>\n{context}\n</context>\n\n\
         Note the user's query might contain references to documents like \"@report.docx\". \
         The \"@\" is only included as a way of mentioning the doc. The actual name of the \
         document would be \"report.docx\". If the document content is included in this \
         prompt, you don't need to use an additional tool to read the document. Answer the \
         user's question directly and concisely. Start with the exact information they need. \
         Don't refer to or mention the provided context in any way - just use it to inform \
         your answer."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ContentBlock, MessageParam, ModelResponse, Role, StopReason};
    use crate::mcp::SessionRegistry;
    use crate::test_support::{FakeSession, ScriptedModel};
    use serde_json::json;

    fn answer(text: &str) -> ModelResponse {
        ModelResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Default::default(),
        }
    }

    fn doc_session() -> Arc<FakeSession> {
        Arc::new(
            FakeSession::new("docs")
                .with_resource(DOC_LIST_URI, ResourceContent::Json(json!(["report.pdf"])))
                .with_resource(
                    "docs://documents/report.pdf",
                    ResourceContent::Text("Q3 results".to_string()),
                ),
        )
    }

    fn doc_chat(session: Arc<FakeSession>, responses: Vec<ModelResponse>) -> DocChat {
        let mut registry = SessionRegistry::new();
        registry.register(session.clone());
        let chat = Chat::new(
            Arc::new(ScriptedModel::new(responses)),
            Arc::new(registry),
        );
        DocChat::new(chat, session)
    }

    #[tokio::test]
    async fn doc_listing_resolves_to_string_ids() {
        let chat = doc_chat(doc_session(), vec![]);

        let ids = chat.list_doc_ids().await.expect("listing should succeed");
        assert_eq!(ids, vec!["report.pdf".to_string()]);
    }

    #[tokio::test]
    async fn mentioned_document_is_inlined_into_the_prompt() {
        let mut chat = doc_chat(doc_session(), vec![answer("summary")]);

        let reply = chat
            .run("@report.pdf summarize this")
            .await
            .expect("turn should succeed");
        assert_eq!(reply, "summary");

        let first = &chat.chat().messages()[0];
        assert_eq!(first.role, Role::User);
        match &first.content[0] {
            ContentBlock::Text { text } => {
                assert!(text.contains("<document id=\"report.pdf\">"));
                assert!(text.contains("Q3 results"));
                assert!(text.contains("@report.pdf summarize this"));
            }
            other => panic!("expected text block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_mentions_are_ignored() {
        let mut chat = doc_chat(doc_session(), vec![answer("ok")]);

        chat.run("@nothere hello").await.expect("turn should succeed");
        match &chat.chat().messages()[0].content[0] {
            ContentBlock::Text { text } => {
                assert!(!text.contains("<document"));
            }
            other => panic!("expected text block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_query_skips_document_listing() {
        let session = doc_session();
        let mut chat = doc_chat(session.clone(), vec![answer("hi")]);

        chat.run("hello there").await.expect("turn should succeed");
        assert_eq!(session.resource_reads(), 0);
    }

    #[tokio::test]
    async fn command_seeds_history_from_server_prompt() {
        let session = Arc::new(FakeSession::new("docs").with_prompt_messages(
            "summarize",
            vec![
                MessageParam::user_text("Summarize the doc"),
                MessageParam::assistant_blocks(vec![ContentBlock::Text {
                    text: "Working on it".to_string(),
                }]),
            ],
        ));
        let mut chat = doc_chat(session.clone(), vec![answer("done")]);

        let reply = chat
            .run("/summarize report.pdf")
            .await
            .expect("turn should succeed");
        assert_eq!(reply, "done");

        let messages = chat.chat().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(
            session.last_prompt_request(),
            Some((
                "summarize".to_string(),
                HashMap::from([("doc_id".to_string(), "report.pdf".to_string())])
            ))
        );
    }

    #[tokio::test]
    async fn command_without_doc_id_passes_empty_argument() {
        let session = Arc::new(
            FakeSession::new("docs").with_prompt_messages("help", vec![MessageParam::user_text("?")]),
        );
        let mut chat = doc_chat(session.clone(), vec![answer("ok")]);

        chat.run("/help").await.expect("turn should succeed");
        assert_eq!(
            session.last_prompt_request(),
            Some((
                "help".to_string(),
                HashMap::from([("doc_id".to_string(), String::new())])
            ))
        );
    }
}
