//! Per-event relay logic.
//!
//! Each inbound event resolves its session through the connection's
//! [`SessionScope`], mutates state through the repository, and publishes the
//! resulting frames through the room multiplexer. Failures are returned to
//! the transport loop, which logs and counts them; nothing is sent back to
//! the peer.

use std::sync::Arc;

use relay_auth::Capability;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::access::{SessionAccess, SessionScope};
use crate::auth::PeerIdentity;
use crate::chunks::{self, ChunkAction};
use crate::error::{RelayError, RelayResult};
use crate::fanout::{RoomMultiplexer, RoomSubscriptions, SharedFrame};
use crate::models::RoomId;
use crate::repository::RelayRepository;
use crate::status::StatusTrigger;
use crate::stop::StopSignal;

use super::protocol::{ClientEvent, CompletePayload, MessagePayload, OutboundFrame, RoomPayload, TerminatePayload};

/// Author name for backend messages that carry none.
pub const SYSTEM_AUTHOR: &str = "System";

/// Per-connection state shared between the transport loop and the dispatcher.
pub(crate) struct ConnectionContext {
    pub connection_id: String,
    pub identity: PeerIdentity,
    pub scope: SessionScope,
    pub repository: Arc<RelayRepository>,
    pub fanout: Arc<RoomMultiplexer>,
    pub stop_signal: Arc<StopSignal>,
    pub subscriptions: RoomSubscriptions,
    /// Frames addressed to this connection only.
    pub tx: mpsc::Sender<SharedFrame>,
}

impl ConnectionContext {
    pub(crate) fn new(
        connection_id: String,
        identity: PeerIdentity,
        repository: Arc<RelayRepository>,
        fanout: Arc<RoomMultiplexer>,
        stop_signal: Arc<StopSignal>,
        tx: mpsc::Sender<SharedFrame>,
    ) -> Self {
        let scope = SessionScope::for_peer(&repository, &identity);
        let subscriptions = fanout.subscriptions(tx.clone());
        Self {
            connection_id,
            identity,
            scope,
            repository,
            fanout,
            stop_signal,
            subscriptions,
            tx,
        }
    }

    fn require(&self, capability: Capability) -> RelayResult<()> {
        if self.identity.trust.allows(capability) {
            Ok(())
        } else {
            Err(RelayError::Unauthorized(capability))
        }
    }
}

fn parse_room(raw: &str) -> RelayResult<RoomId> {
    RoomId::parse(raw).ok_or_else(|| RelayError::MalformedInput(format!("invalid room {raw:?}")))
}

/// Dispatch one event.
pub(crate) async fn dispatch_client_event(
    ctx: &ConnectionContext,
    event: ClientEvent,
) -> RelayResult<()> {
    match event {
        ClientEvent::JoinRoom(room) => join_room(ctx, &room).await,
        ClientEvent::LeaveRoom(room) => {
            if ctx.subscriptions.leave(&room).await {
                debug!(conn_id = %ctx.connection_id, room = %room, "Left room");
            }
            Ok(())
        }
        ClientEvent::Message(payload) => relay_message(ctx, payload).await,
        ClientEvent::Terminate(payload) => terminate(ctx, payload).await,
        ClientEvent::StopGenerating(payload) => stop_generating(ctx, payload).await,
        ClientEvent::MessageComplete(payload) => complete_message(ctx, payload).await,
    }
}

/// Log a dispatch result at the level its kind calls for.
pub(crate) fn log_outcome(ctx: &ConnectionContext, event: &str, outcome: &RelayResult<()>) {
    match outcome {
        Ok(()) => debug!(conn_id = %ctx.connection_id, event, "Event handled"),
        Err(e @ RelayError::NotFound(_)) => {
            info!(conn_id = %ctx.connection_id, event, reason = e.reason(), "{}", e)
        }
        Err(e) if e.is_silent() => {
            debug!(conn_id = %ctx.connection_id, event, reason = e.reason(), "{}", e)
        }
        Err(e @ RelayError::InvalidJson(_)) => {
            warn!(conn_id = %ctx.connection_id, event, reason = e.reason(), "{}", e)
        }
        Err(e) => error!(conn_id = %ctx.connection_id, event, reason = e.reason(), "{}", e),
    }
}

async fn join_room(ctx: &ConnectionContext, raw: &str) -> RelayResult<()> {
    ctx.require(Capability::JoinRoom)?;

    let session_id = match RoomId::parse_shadow(raw) {
        Some(id) => {
            ctx.require(Capability::JoinShadowRoom)?;
            id
        }
        None => parse_room(raw)?,
    };
    ctx.scope.resolve(&session_id).await?;

    if ctx.subscriptions.join(raw).await {
        debug!(conn_id = %ctx.connection_id, room = %raw, "Joined room");
    }
    if ctx.tx.send(Arc::new(OutboundFrame::joined(raw))).await.is_err() {
        debug!(conn_id = %ctx.connection_id, "Connection closed before joined ack");
    }
    Ok(())
}

async fn relay_message(ctx: &ConnectionContext, payload: MessagePayload) -> RelayResult<()> {
    ctx.require(Capability::Relay)?;
    let room = parse_room(&payload.room)?;

    let default_author = ctx.identity.display_name().unwrap_or(SYSTEM_AUTHOR);
    let relayed = chunks::normalize(
        payload,
        !ctx.identity.is_backend(),
        default_author,
        chrono::Utc::now().timestamp_millis(),
    )?;

    let session = ctx.scope.resolve(&room).await?;
    ctx.repository.touch_session(room.as_str()).await?;

    ChunkAction::plan(&session, &relayed, ctx.identity.account_id())?
        .apply(&ctx.repository, &room)
        .await?;

    // Events may arrive out of order; only an actual change is written and announced
    let trigger = StatusTrigger::Message {
        is_feedback: relayed.is_feedback(),
    };
    let change = session.status.apply(trigger);
    if change.needs_write(trigger) {
        debug!(room = %room, from = %change.from, to = %change.to, "Updating session status");
        ctx.scope.set_status(&room, change.to).await?;
    }
    if change.is_change() {
        ctx.fanout
            .publish(room.as_str(), OutboundFrame::status(change.to))
            .await?;
    }

    ctx.fanout
        .publish(
            room.as_str(),
            OutboundFrame::relay(relayed.event.clone(), relayed.to_value()?),
        )
        .await?;

    if relayed.incoming {
        ctx.fanout
            .publish(
                &room.shadow(),
                OutboundFrame::relay(relayed.event.clone(), relayed.message.text.clone()),
            )
            .await?;
    }
    Ok(())
}

async fn terminate(ctx: &ConnectionContext, payload: TerminatePayload) -> RelayResult<()> {
    ctx.require(Capability::Relay)?;
    let target = parse_room(&payload.message.session_id)?;
    if payload.room != target.as_str() {
        debug!(room = %payload.room, session = %target, "Terminate addressed to a different room");
    }

    let session = ctx.scope.resolve(&target).await?;
    let trigger = StatusTrigger::Terminate;
    let change = session.status.apply(trigger);
    if change.needs_write(trigger) {
        ctx.scope.set_status(&target, change.to).await?;
    }
    info!(conn_id = %ctx.connection_id, session = %target, "Session terminated");

    ctx.fanout
        .publish(target.as_str(), OutboundFrame::terminate())
        .await?;
    Ok(())
}

async fn stop_generating(ctx: &ConnectionContext, payload: RoomPayload) -> RelayResult<()> {
    ctx.require(Capability::Relay)?;
    let room = parse_room(&payload.room)?;
    let session = ctx.scope.resolve(&room).await?;

    ctx.stop_signal.request(&room).await?;

    let trigger = StatusTrigger::StopGenerating;
    let change = session.status.apply(trigger);
    if change.needs_write(trigger) {
        ctx.scope.set_status(&room, change.to).await?;
    }
    info!(conn_id = %ctx.connection_id, session = %room, "Generation stop requested");

    ctx.fanout
        .publish(room.as_str(), OutboundFrame::terminate())
        .await?;
    Ok(())
}

async fn complete_message(ctx: &ConnectionContext, payload: CompletePayload) -> RelayResult<()> {
    ctx.require(Capability::CompleteMessage)?;
    let room = parse_room(&payload.room)?;

    let message = payload.message;
    let Some(text) = message.text.filter(|t| !t.is_empty()) else {
        return Err(RelayError::MalformedInput(
            "message_complete without text".to_string(),
        ));
    };
    let Some(chunk_id) = message.chunk_id else {
        return Err(RelayError::MalformedInput(
            "message_complete without chunkId".to_string(),
        ));
    };

    ctx.scope.resolve(&room).await?;
    let total = ctx
        .repository
        .complete_message(
            room.as_str(),
            &chunk_id,
            &text,
            message.code_blocks.as_ref(),
            message.delta_tokens.unwrap_or(0),
        )
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("{room}/{chunk_id}")))?;

    ctx.fanout
        .publish(room.as_str(), OutboundFrame::tokens(total))
        .await?;
    Ok(())
}
