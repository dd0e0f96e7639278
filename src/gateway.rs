//! Channel gateway: authenticates a WebSocket and binds it to every
//! session in the store.
//!
//! The first inbound message must be `auth`; success replays each
//! session's live buffer (plus any deferred completion) to the new
//! channel, then the command loop runs until the socket closes. On
//! disconnect nothing is torn down — sessions simply lose their bound
//! channel and keep buffering.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::driver::runner;
use crate::files;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::relay::Channel;
use crate::server::AppCtx;

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 256;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppCtx>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Drive one WebSocket connection.
async fn handle_socket(socket: WebSocket, ctx: Arc<AppCtx>) {
    info!("channel connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);

    // All socket writes funnel through this task so buffer replay and
    // live publishes cannot interleave mid-frame.
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(%err, "failed to serialize outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("socket send failed, peer disconnected");
                break;
            }
        }
    });

    if !authenticate(&ctx, &mut ws_rx, &outbound_tx).await {
        // Let the forwarder drain the auth_fail frame before closing.
        drop(outbound_tx);
        let _ = send_task.await;
        info!("channel closed (unauthenticated)");
        return;
    }

    let channel = Channel::new(outbound_tx.clone());
    ctx.store.attach_all(&channel).await;

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("peer sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                debug!(%err, "socket receive error");
                break;
            }
        };
        match serde_json::from_str::<ClientCommand>(&text) {
            Ok(command) => dispatch(&ctx, command, &outbound_tx).await,
            Err(err) => {
                warn!(%err, "unparsable client command");
                send(
                    &outbound_tx,
                    ServerEvent::Error {
                        session_key: String::new(),
                        text: format!("unparsable command: {err}"),
                    },
                )
                .await;
            }
        }
    }

    info!("channel closed");
    send_task.abort();
}

/// Consume frames until the auth handshake resolves. Returns `true` on
/// success.
async fn authenticate(
    ctx: &Arc<AppCtx>,
    ws_rx: &mut SplitStream<WebSocket>,
    outbound_tx: &mpsc::Sender<ServerEvent>,
) -> bool {
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return false,
            Ok(_) => continue,
        };
        return match serde_json::from_str::<ClientCommand>(&text) {
            Ok(ClientCommand::Auth { password }) if password == ctx.config.password => {
                let sessions = ctx.store.summaries().await;
                send(outbound_tx, ServerEvent::AuthOk { sessions }).await;
                true
            }
            _ => {
                warn!("authentication failed");
                send(outbound_tx, ServerEvent::AuthFail).await;
                false
            }
        };
    }
    false
}

/// Handle one authenticated client command.
#[allow(clippy::too_many_lines)]
async fn dispatch(ctx: &Arc<AppCtx>, command: ClientCommand, outbound_tx: &mpsc::Sender<ServerEvent>) {
    match command {
        ClientCommand::Auth { .. } => {
            // Already authenticated; re-auth is a no-op.
        }
        ClientCommand::Ping => {
            send(outbound_tx, ServerEvent::Pong).await;
        }
        ClientCommand::Message {
            session_key,
            text,
            attachments,
        } => {
            let extra = attachments.unwrap_or_default();
            if let Err(err) = runner::submit_job(ctx, &session_key, &text, &extra).await {
                send(
                    outbound_tx,
                    ServerEvent::Error {
                        session_key,
                        text: err.to_string(),
                    },
                )
                .await;
            }
        }
        ClientCommand::NewSession {
            session_key,
            label,
            plan_mode,
            agent_name,
            resume_session_id,
        } => {
            let created = ctx.store.create_if_absent(&session_key, &label).await;
            let _ = ctx
                .store
                .with_session(&session_key, |session| {
                    if let Some(plan) = plan_mode {
                        session.plan_mode = plan;
                    }
                    if let Some(agent) = agent_name {
                        session.agent = Some(agent);
                    }
                    if let Some(resume) = resume_session_id {
                        session.conversation_id = Some(resume);
                    }
                })
                .await;
            ctx.store.save().await;
            let text = if created {
                format!("session created: {label}")
            } else {
                format!("session already exists: {session_key}")
            };
            send(outbound_tx, ServerEvent::SysMsg { session_key, text }).await;
        }
        ClientCommand::Cancel { session_key } => {
            if !runner::cancel_job(ctx, &session_key).await {
                send(
                    outbound_tx,
                    ServerEvent::SysMsg {
                        session_key,
                        text: "no running job to cancel".into(),
                    },
                )
                .await;
            }
        }
        ClientCommand::KillSession { session_key } => {
            if let Some(session) = ctx.store.remove(&session_key).await {
                if let Some(job) = &session.job {
                    job.kill();
                }
                ctx.store.save().await;
                info!(%session_key, "session killed");
                send(outbound_tx, ServerEvent::SessionKilled { session_key }).await;
            } else {
                send(
                    outbound_tx,
                    ServerEvent::Error {
                        session_key: session_key.clone(),
                        text: format!("unknown session: {session_key}"),
                    },
                )
                .await;
            }
        }
        ClientCommand::SetEffort {
            session_key,
            effort,
        } => {
            let updated = ctx
                .store
                .with_session(&session_key, |session| session.effort = effort)
                .await;
            config_changed(ctx, outbound_tx, session_key, updated).await;
        }
        ClientCommand::SetModel { session_key, model } => {
            let updated = ctx
                .store
                .with_session(&session_key, |session| session.model = model)
                .await;
            config_changed(ctx, outbound_tx, session_key, updated).await;
        }
        ClientCommand::SetPlanMode {
            session_key,
            plan_mode,
        } => {
            let updated = ctx
                .store
                .with_session(&session_key, |session| session.plan_mode = plan_mode)
                .await;
            config_changed(ctx, outbound_tx, session_key, updated).await;
        }
        ClientCommand::PlanApprove { session_key } => {
            if let Err(err) = runner::approve_plan(ctx, &session_key).await {
                send(
                    outbound_tx,
                    ServerEvent::Error {
                        session_key,
                        text: err.to_string(),
                    },
                )
                .await;
            }
        }
        ClientCommand::PlanReject { session_key } => {
            // The reject path sleeps through the shutdown grace period;
            // run it off the dispatch loop so other commands keep
            // flowing.
            let ctx = Arc::clone(ctx);
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = runner::reject_plan(&ctx, &session_key).await {
                    send(
                        &outbound_tx,
                        ServerEvent::Error {
                            session_key,
                            text: err.to_string(),
                        },
                    )
                    .await;
                }
            });
        }
        ClientCommand::Attachment {
            session_key,
            name,
            data,
        } => match files::save_attachment(&ctx.config.upload_dir, &name, &data).await {
            Ok(path) => {
                let queued = ctx
                    .store
                    .with_session(&session_key, |session| {
                        session.pending_attachments.push(path.clone());
                    })
                    .await
                    .is_some();
                let text = if queued {
                    format!("attached {name}")
                } else {
                    format!("stored {name}, but session {session_key} does not exist")
                };
                send(outbound_tx, ServerEvent::SysMsg { session_key, text }).await;
            }
            Err(err) => {
                send(
                    outbound_tx,
                    ServerEvent::Error {
                        session_key,
                        text: err.to_string(),
                    },
                )
                .await;
            }
        },
    }
}

/// Persist after a config mutation, or report the unknown session.
async fn config_changed(
    ctx: &Arc<AppCtx>,
    outbound_tx: &mpsc::Sender<ServerEvent>,
    session_key: String,
    updated: Option<()>,
) {
    if updated.is_some() {
        ctx.store.save().await;
    } else {
        send(
            outbound_tx,
            ServerEvent::Error {
                session_key: session_key.clone(),
                text: format!("unknown session: {session_key}"),
            },
        )
        .await;
    }
}

/// Send directly on this connection's outbound queue (not buffered in
/// any session).
async fn send(outbound_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if outbound_tx.send(event).await.is_err() {
        debug!("outbound queue closed");
    }
}
