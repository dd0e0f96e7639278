//! Job lifecycle: submit, decode loop, plan gate, cancel.
//!
//! One runner task per job owns the child process, drives the framed
//! stdout decode loop and the plan-idle timer in a single `select!`,
//! and publishes relay events as they decode. The session's `JobHandle`
//! is the linearization point for termination: whoever removes it from
//! the session owns emitting the terminal event, so a late exit for an
//! already-cleared handle is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents;
use crate::driver::codec::EventStreamCodec;
use crate::driver::command::{self, SpawnSpec};
use crate::driver::stream::{self, LineClass, StreamEvent};
use crate::driver::JobHandle;
use crate::models::session::{HistoryEntry, Role};
use crate::protocol::ServerEvent;
use crate::server::AppCtx;
use crate::{AppError, Result};

/// Submit a job for `session_key`, creating the session if absent and
/// killing any job already running for it.
///
/// # Errors
///
/// Returns `AppError::NotFound` only if the session vanishes between
/// creation and spawn (a concurrent `kill_session`). Spawn failures are
/// not errors at this boundary: they surface as an `error` event on the
/// session's stream.
pub async fn submit_job(
    ctx: &Arc<AppCtx>,
    session_key: &str,
    text: &str,
    extra_attachments: &[String],
) -> Result<()> {
    let store = &ctx.store;
    store.create_if_absent(session_key, session_key).await;

    let upload_dir = ctx.config.upload_dir.clone();
    let prepared = store
        .with_session(session_key, |session| {
            // One live child per session: a running job is cancelled
            // before the new one starts.
            if let Some(old) = session.job.take() {
                old.kill();
                session.relay.publish_terminal(ServerEvent::Done {
                    session_key: session.key.clone(),
                    subtype: "cancelled".into(),
                    error: None,
                    code: None,
                });
            }

            session.history.push(HistoryEntry {
                role: Role::User,
                text: text.to_owned(),
            });

            let mut attachments = std::mem::take(&mut session.pending_attachments);
            attachments.extend(extra_attachments.iter().map(|name| upload_dir.join(name)));

            (
                session.model.clone(),
                session.effort.clone(),
                session.plan_mode,
                session.agent.clone(),
                session.conversation_id.clone(),
                attachments,
            )
        })
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {session_key} not found")))?;
    store.save().await;

    let (model, effort, plan_mode, agent, resume, attachments) = prepared;

    // A missing or unreadable agent file is non-fatal: the directive is
    // omitted and the client sees a warning.
    let agent_directive = match (&agent, &ctx.config.agents_dir) {
        (Some(name), Some(dir)) => match agents::load_agent(dir, name) {
            Ok(definition) => Some(definition.body),
            Err(err) => {
                warn!(session_key, agent = %name, %err, "agent definition unavailable");
                store
                    .publish(
                        session_key,
                        ServerEvent::SysMsg {
                            session_key: session_key.to_owned(),
                            text: format!("agent '{name}' unavailable: {err}"),
                        },
                    )
                    .await;
                None
            }
        },
        (Some(name), None) => {
            warn!(session_key, agent = %name, "no agents_dir configured");
            None
        }
        _ => None,
    };

    let spec = SpawnSpec {
        cli: ctx.config.job.cli.clone(),
        base_args: ctx.config.job.base_args.clone(),
        model,
        effort,
        plan_mode,
        resume,
        upload_dir,
        agent_directive,
        prompt: text.to_owned(),
        attachments,
    };

    let (mut child, pgid) = match command::spawn(&spec) {
        Ok(spawned) => spawned,
        Err(err) => {
            store
                .publish(
                    session_key,
                    ServerEvent::Error {
                        session_key: session_key.to_owned(),
                        text: err.to_string(),
                    },
                )
                .await;
            return Ok(());
        }
    };

    let job_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let plan_latch = Arc::new(AtomicBool::new(false));
    let handle = JobHandle {
        id: job_id,
        pgid,
        stdin: child.stdin.take(),
        cancel: cancel.clone(),
        plan_latch: Arc::clone(&plan_latch),
    };

    store
        .with_session(session_key, |session| {
            if let Some(raced) = session.job.replace(handle) {
                raced.kill();
            }
        })
        .await
        .ok_or_else(|| AppError::NotFound(format!("session {session_key} vanished")))?;

    tokio::spawn(run_job(
        Arc::clone(ctx),
        session_key.to_owned(),
        job_id,
        child,
        cancel,
        plan_latch,
        plan_mode,
    ));
    Ok(())
}

/// Cancel a session's running job. Returns `false` when the session was
/// idle.
pub async fn cancel_job(ctx: &AppCtx, session_key: &str) -> bool {
    let taken = ctx
        .store
        .with_session(session_key, |session| session.job.take())
        .await
        .flatten();
    let Some(handle) = taken else {
        return false;
    };
    handle.kill();
    ctx.store
        .publish_terminal(
            session_key,
            ServerEvent::Done {
                session_key: session_key.to_owned(),
                subtype: "cancelled".into(),
                error: None,
                code: None,
            },
        )
        .await;
    true
}

/// Approve a plan the session is waiting on: write the affirmative
/// token to child stdin and clear the gate latch.
///
/// # Errors
///
/// Returns `AppError::NotFound` when no job is running, or
/// `AppError::Spawn` when stdin is gone.
pub async fn approve_plan(ctx: &AppCtx, session_key: &str) -> Result<()> {
    write_gate_token(ctx, session_key, &ctx.config.plan.approve_token).await?;
    let _ = ctx
        .store
        .with_session(session_key, |session| {
            if let Some(job) = &session.job {
                job.plan_latch.store(false, Ordering::SeqCst);
            }
        })
        .await;
    info!(session_key, "plan approved");
    Ok(())
}

/// Reject a plan: write the negative token, allow the grace period for
/// a clean shutdown, then force-terminate whatever is left.
///
/// # Errors
///
/// Returns `AppError::NotFound` when no job is running.
pub async fn reject_plan(ctx: &AppCtx, session_key: &str) -> Result<()> {
    write_gate_token(ctx, session_key, &ctx.config.plan.reject_token).await?;
    tokio::time::sleep(Duration::from_millis(ctx.config.plan.reject_grace_ms)).await;
    // The child may have exited cleanly during the grace period, in
    // which case its runner already emitted the terminal event.
    if cancel_job(ctx, session_key).await {
        info!(session_key, "plan rejected, job terminated");
    }
    Ok(())
}

/// Write a plan-gate token to the running job's stdin.
async fn write_gate_token(ctx: &AppCtx, session_key: &str, token: &str) -> Result<()> {
    let taken = ctx
        .store
        .with_session(session_key, |session| {
            session
                .job
                .as_mut()
                .map(|job| (job.id, job.stdin.take()))
        })
        .await
        .flatten();
    let Some((job_id, stdin)) = taken else {
        return Err(AppError::NotFound(format!(
            "session {session_key} has no running job"
        )));
    };
    let Some(mut stdin) = stdin else {
        return Err(AppError::Spawn("child stdin is no longer available".into()));
    };

    let line = format!("{token}\n");
    let write_result = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    // Hand stdin back unless the job was replaced while we held it.
    let _ = ctx
        .store
        .with_session(session_key, |session| {
            if let Some(job) = session.job.as_mut() {
                if job.id == job_id {
                    job.stdin = Some(stdin);
                }
            }
        })
        .await;

    write_result.map_err(|err| AppError::Spawn(format!("failed to write gate token: {err}")))
}

/// Runner task: drive the decode loop until the child exits or the job
/// is cancelled, then finalize history and the terminal event.
#[allow(clippy::too_many_lines)]
async fn run_job(
    ctx: Arc<AppCtx>,
    session_key: String,
    job_id: Uuid,
    mut child: Child,
    cancel: CancellationToken,
    plan_latch: Arc<AtomicBool>,
    plan_mode: bool,
) {
    let Some(stdout) = child.stdout.take() else {
        warn!(%session_key, "child stdout was not piped");
        return;
    };
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_stderr(
            Arc::clone(&ctx),
            session_key.clone(),
            stderr,
            cancel.clone(),
        ));
    }

    let mut framed = FramedRead::new(stdout, EventStreamCodec::new());
    let idle_window = Duration::from_secs(ctx.config.plan.idle_seconds.max(1));
    let idle = tokio::time::sleep(idle_window);
    tokio::pin!(idle);

    // Explicit per-job accumulator for the assistant response; handed to
    // the completion transition below.
    let mut response = String::new();
    // Armed only once text has accumulated in the current response
    // cycle; cleared when the gate fires so one cycle emits at most one
    // `plan_waiting`.
    let mut text_this_cycle = false;
    let mut result_info: Option<(String, Option<String>)> = None;
    let mut cancelled = false;

    loop {
        let gate_armed = plan_mode && text_this_cycle && !plan_latch.load(Ordering::SeqCst);
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                cancelled = true;
                break;
            }

            () = &mut idle, if gate_armed => {
                // Idle trigger: first trigger wins, latched until the
                // next cycle.
                if !plan_latch.swap(true, Ordering::SeqCst) {
                    text_this_cycle = false;
                    ctx.store
                        .publish(&session_key, ServerEvent::PlanWaiting {
                            session_key: session_key.clone(),
                        })
                        .await;
                    info!(%session_key, "plan gate fired (idle)");
                }
                idle.as_mut().reset(tokio::time::Instant::now() + idle_window);
            }

            item = framed.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + idle_window);
                match item {
                    None => break,
                    Some(Err(AppError::Decode(msg))) => {
                        warn!(%session_key, error = %msg, "framing error, skipping line");
                    }
                    Some(Err(err)) => {
                        warn!(%session_key, %err, "stdout stream error, stopping");
                        ctx.store
                            .publish(&session_key, ServerEvent::Error {
                                session_key: session_key.clone(),
                                text: format!("stream error: {err}"),
                            })
                            .await;
                        break;
                    }
                    Some(Ok(line)) => {
                        handle_line(
                            &ctx,
                            &session_key,
                            &line,
                            plan_mode,
                            &plan_latch,
                            &mut text_this_cycle,
                            &mut response,
                            &mut result_info,
                        )
                        .await;
                    }
                }
            }
        }
    }

    drop(framed);
    let exit_code = if cancelled {
        // Dropping the child below kills it (`kill_on_drop`); the
        // canceller owns the terminal event.
        None
    } else {
        match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(%session_key, %err, "error reaping child process");
                None
            }
        }
    };
    drop(child);

    let (subtype, error) = match result_info {
        Some((subtype, error)) => (subtype, error),
        None if cancelled => ("cancelled".into(), None),
        None => match exit_code {
            Some(0) => ("done".into(), None),
            code => (
                "error".into(),
                Some(format!("process exited with code {code:?}")),
            ),
        },
    };
    let code = exit_code.filter(|c| *c != 0);

    let emitted = ctx
        .store
        .with_session(&session_key, |session| {
            if !response.is_empty() {
                session.history.push(HistoryEntry {
                    role: Role::Claude,
                    text: response.clone(),
                });
            }
            let mine = session.job.as_ref().is_some_and(|job| job.id == job_id);
            if mine {
                session.job = None;
                session.relay.publish_terminal(ServerEvent::Done {
                    session_key: session_key.clone(),
                    subtype: subtype.clone(),
                    error: error.clone(),
                    code,
                });
            }
            mine
        })
        .await
        .unwrap_or(false);
    ctx.store.save().await;

    debug!(%session_key, %job_id, emitted, ?exit_code, "runner finished");
}

/// Decode one normalized stdout line and publish the resulting events.
#[allow(clippy::too_many_arguments)]
async fn handle_line(
    ctx: &Arc<AppCtx>,
    session_key: &str,
    line: &str,
    plan_mode: bool,
    plan_latch: &Arc<AtomicBool>,
    text_this_cycle: &mut bool,
    response: &mut String,
    result_info: &mut Option<(String, Option<String>)>,
) {
    match stream::classify_line(line) {
        LineClass::Empty => {}
        LineClass::Malformed(err) => {
            warn!(session_key, error = %err, raw_line = %line, "malformed event, dropping");
        }
        LineClass::Text(text) => {
            // Pattern trigger for the plan gate; same latch as the idle
            // trigger so only the first one fires.
            if plan_mode
                && ctx.approval_matches(&text)
                && !plan_latch.swap(true, Ordering::SeqCst)
            {
                *text_this_cycle = false;
                ctx.store
                    .publish(
                        session_key,
                        ServerEvent::PlanWaiting {
                            session_key: session_key.to_owned(),
                        },
                    )
                    .await;
                info!(session_key, "plan gate fired (pattern)");
            } else {
                ctx.store
                    .publish(
                        session_key,
                        ServerEvent::SysMsg {
                            session_key: session_key.to_owned(),
                            text,
                        },
                    )
                    .await;
            }
        }
        LineClass::Event(event) => {
            handle_event(ctx, session_key, &event, text_this_cycle, response, result_info).await;
        }
    }
}

/// React to one structured upstream event.
async fn handle_event(
    ctx: &Arc<AppCtx>,
    session_key: &str,
    event: &StreamEvent,
    text_this_cycle: &mut bool,
    response: &mut String,
    result_info: &mut Option<(String, Option<String>)>,
) {
    match event {
        StreamEvent::System(system) => {
            if system.subtype.as_deref() == Some("init") {
                if let Some(id) = &system.session_id {
                    let _ = ctx
                        .store
                        .with_session(session_key, |session| {
                            session.conversation_id = Some(id.clone());
                        })
                        .await;
                    ctx.store.save().await;
                    ctx.store
                        .publish(
                            session_key,
                            ServerEvent::SessionInit {
                                session_key: session_key.to_owned(),
                                session_id: id.clone(),
                            },
                        )
                        .await;
                }
            }
        }
        StreamEvent::Assistant(_) | StreamEvent::User(_) => {
            for out in stream::message_events(session_key, event, ctx.config.job.tool_result_limit)
            {
                if let ServerEvent::Token { text, .. } = &out {
                    response.push_str(text);
                    *text_this_cycle = true;
                }
                ctx.store.publish(session_key, out).await;
            }
        }
        StreamEvent::Result(result) => {
            if let Some(usage) = &result.usage {
                ctx.store
                    .publish(
                        session_key,
                        ServerEvent::Usage {
                            session_key: session_key.to_owned(),
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                            context_limit: ctx.config.job.context_limit,
                        },
                    )
                    .await;
            }
            let subtype = result.subtype.clone().unwrap_or_else(|| "success".into());
            let error = if result.is_error.unwrap_or(false) {
                Some(result.result.clone().unwrap_or_else(|| subtype.clone()))
            } else {
                None
            };
            *result_info = Some((subtype, error));
        }
        StreamEvent::Other => {}
    }
}

/// Forward non-benign stderr lines as warning events.
async fn pump_stderr(
    ctx: Arc<AppCtx>,
    session_key: String,
    stderr: ChildStderr,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    if stream::is_benign_stderr(&text) {
                        debug!(%session_key, line = %text, "suppressing benign stderr");
                        continue;
                    }
                    ctx.store
                        .publish(&session_key, ServerEvent::Error {
                            session_key: session_key.clone(),
                            text,
                        })
                        .await;
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(%session_key, %err, "stderr read error");
                    break;
                }
            }
        }
    }
}
