//! Streams a conversational reply for turns routed to the `chat` tool.
//!
//! The `chat` tool itself is a marker — it signals "no task here, just talk"
//! — so the actual reply comes from calling the LLM directly, streamed token
//! by token where the provider supports it. Falls back to one non-streamed
//! call if the streaming attempt fails outright.

use tokio::sync::mpsc;
use tracing::warn;

use meridian_llm::{ChatMessage, PrimaryBackup};

use crate::events::AgentEvent;

pub async fn stream_chat_response(
    llm: &PrimaryBackup,
    system_prompt: &str,
    user_input: &str,
    events: &mpsc::Sender<AgentEvent>,
) {
    let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(user_input)];
    let (tx, mut rx) = mpsc::channel::<String>(32);

    let stream_task = llm.chat_stream(&messages, None, tx);
    let forward_task = async {
        while let Some(chunk) = rx.recv().await {
            if events.send(AgentEvent::Text(chunk)).await.is_err() {
                break;
            }
        }
    };

    let (result, _) = tokio::join!(stream_task, forward_task);

    if let Err(err) = result {
        warn!(error = %err, "chat stream failed, falling back to a single non-streamed call");
        match llm.chat(&messages, None).await {
            Ok(resp) => {
                let _ = events.send(AgentEvent::Text(resp.content)).await;
            }
            Err(err) => {
                let _ = events.send(AgentEvent::Text(format!("(unable to generate a reply: {err})"))).await;
            }
        }
    }
    let _ = events.send(AgentEvent::Text("\n".to_string())).await;
}
