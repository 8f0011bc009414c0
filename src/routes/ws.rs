//! WebSocket upgrade + message loop. Generation requests stream progress
//! events while batches run, then a final questions (or error) message.

use std::sync::Arc;

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::domain::{ContentRequest, GenerateRequest, Progress, Question};
use crate::error::GenerateError;
use crate::orchestrator::ProgressFn;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "quizforge_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "quizforge_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "quizforge_backend", "WS received: {:?}", &incoming);
            if !dispatch(&mut socket, &state, incoming).await {
              break;
            }
          }
          Err(e) => {
            let reply = ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) };
            if send(&mut socket, &reply).await.is_err() {
              break;
            }
          }
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "quizforge_backend", "WebSocket disconnected");
}

/// Handle one client message. Returns false when the socket should close.
async fn dispatch(socket: &mut WebSocket, state: &Arc<AppState>, msg: ClientWsMessage) -> bool {
  match msg {
    ClientWsMessage::Ping => send(socket, &ServerWsMessage::Pong).await.is_ok(),

    ClientWsMessage::Generate { subject, topic, difficulty, total_questions, user_id } => {
      let req = GenerateRequest { subject, topic, difficulty, total_questions, user_id };
      let service = state.service.clone();
      run_streaming(socket, move |cb| async move { service.generate(req, Some(cb)).await }).await
    }

    ClientWsMessage::GenerateFromContent {
      content,
      subject,
      topic,
      difficulty,
      total_questions,
      user_id,
    } => {
      let req = ContentRequest { content, subject, topic, difficulty, total_questions, user_id };
      let service = state.service.clone();
      run_streaming(socket, move |cb| async move {
        service.generate_from_content(req, Some(cb)).await
      })
      .await
    }
  }
}

/// Run a generation future while forwarding its progress events to the
/// socket, then send the final result. Returns false on socket errors.
async fn run_streaming<F, Fut>(socket: &mut WebSocket, start: F) -> bool
where
  F: FnOnce(ProgressFn) -> Fut,
  Fut: std::future::Future<Output = Result<Vec<Question>, GenerateError>> + Send + 'static,
{
  let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();
  let cb: ProgressFn = Arc::new(move |p| {
    let _ = tx.send(p);
  });
  let mut task = tokio::spawn(start(cb));

  let mut result: Option<Result<Vec<Question>, GenerateError>> = None;
  loop {
    tokio::select! {
      joined = &mut task, if result.is_none() => {
        result = Some(joined.unwrap_or_else(|e| Err(GenerateError::Model(e.to_string()))));
      }
      maybe = rx.recv() => {
        match maybe {
          Some(progress) => {
            if send(socket, &ServerWsMessage::Progress { progress }).await.is_err() {
              return false;
            }
          }
          // All senders dropped: the run is over (or finishing now).
          None => break,
        }
      }
    }
  }

  let outcome = match result {
    Some(r) => r,
    None => match task.await {
      Ok(r) => r,
      Err(e) => Err(GenerateError::Model(e.to_string())),
    },
  };

  let reply = match outcome {
    Ok(questions) => {
      let count = questions.len();
      info!(target: "generation", count, "WS generation served");
      ServerWsMessage::Questions { questions, count }
    }
    Err(e) => ServerWsMessage::Error { message: e.to_string() },
  };
  send(socket, &reply).await.is_ok()
}

async fn send(socket: &mut WebSocket, msg: &ServerWsMessage) -> Result<(), axum::Error> {
  let out = serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) })
      .to_string()
  });
  if let Err(e) = socket.send(Message::Text(out)).await {
    error!(target: "quizforge_backend", error = %e, "WS send error");
    return Err(e);
  }
  Ok(())
}
