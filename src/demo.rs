//! Demo application: a small inventory served through the dispatch pipeline.
//!
//! # Routes
//! ```text
//! GET  /items               list (after-hook adds cache-control)
//! GET  /items/:id           show (before-hook normalizes the id)
//! PUT  /items/:id           update (before-hook rejects empty bodies)
//! GET  /changes             server-sent events, one Multicast receiver each
//! GET  /changes/latest      long-poll the newest change (Lastcast)
//! GET  /ticker?count&every  lazily produced text stream, unbounded without count
//! GET  /stats               expensive summary, coalesced per server
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use action_dispatch::action::{BeforeOutcome, HandlerFault, Registry, SetupError};
use action_dispatch::http::{sse_frame, ContextPatch, Reply, RequestContext};
use action_dispatch::resilience::{limit_concurrency, ConcurrencyConfig};
use action_dispatch::streaming::{Sequence, SourceExt};
use action_dispatch::sync::{Lastcast, Multicast, MulticastBuilder};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderValue, StatusCode};
use dashmap::DashMap;
use futures_util::stream;

/// Shared state behind every demo route.
pub struct Inventory {
    items: DashMap<String, String>,
    changes: Multicast<String>,
    latest: Lastcast<String>,
}

impl Inventory {
    pub fn new() -> Self {
        let changes = MulticastBuilder::new()
            .capacity(64)
            .on_active(|| tracing::info!("first change subscriber connected"))
            .on_idle(|| tracing::info!("no change subscribers left"))
            .build();
        Self {
            items: DashMap::new(),
            changes,
            latest: Lastcast::new(),
        }
    }

    fn publish(&self, id: &str, value: &str) {
        let change = format!("{id}={value}");
        let receivers = self.changes.push(change.clone());
        // Nobody may be long-polling; the newest value waits in the slot.
        let _ = self.latest.push(change);
        tracing::debug!(id, receivers, "change published");
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

async fn list(inventory: Arc<Inventory>, _: RequestContext) -> Result<Reply, HandlerFault> {
    let items: BTreeMap<String, String> = inventory
        .items
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();
    Reply::json(&items)
}

async fn show(inventory: Arc<Inventory>, ctx: RequestContext) -> Result<Reply, HandlerFault> {
    let id = ctx.param("id").unwrap_or_default();
    match inventory.items.get(id) {
        Some(value) => Ok(Reply::text(value.clone())),
        None => Err(HandlerFault::not_found(format!("no item {id}"))),
    }
}

async fn update(inventory: Arc<Inventory>, ctx: RequestContext) -> Result<Reply, HandlerFault> {
    let id = ctx.param("id").unwrap_or_default().to_string();
    let value = std::str::from_utf8(ctx.body())
        .map_err(|_| HandlerFault::bad_request("item value must be UTF-8"))?
        .trim()
        .to_string();

    inventory.items.insert(id.clone(), value.clone());
    inventory.publish(&id, &value);
    Ok(Reply::empty().with_status(StatusCode::NO_CONTENT))
}

async fn changes(inventory: Arc<Inventory>, _: RequestContext) -> Result<Reply, HandlerFault> {
    let events = inventory
        .changes
        .subscribe()
        .map(|change: String| sse_frame(Some("change"), &change));
    Ok(Reply::event_stream(events))
}

async fn latest(inventory: Arc<Inventory>, ctx: RequestContext) -> Result<Reply, HandlerFault> {
    tokio::select! {
        step = inventory.latest.pull() => match step.value {
            Some(change) => Ok(Reply::text(change)),
            None => Ok(Reply::empty().with_status(StatusCode::NO_CONTENT)),
        },
        _ = ctx.cancellation().cancelled() => Err(HandlerFault::Cancelled),
    }
}

async fn ticker(_: Arc<Inventory>, ctx: RequestContext) -> Result<Reply, HandlerFault> {
    let count = query_number(&ctx, "count", u64::MAX)?;
    let every = Duration::from_millis(query_number(&ctx, "every", 250)?.max(1));

    let ticks = stream::unfold(0u64, move |n| async move {
        if n >= count {
            return None;
        }
        if n > 0 {
            tokio::time::sleep(every).await;
        }
        Some((format!("tick {}\n", n + 1), n + 1))
    });
    Ok(Reply::stream(Sequence::infallible(ticks)))
}

async fn stats(inventory: Arc<Inventory>, _: RequestContext) -> Result<Reply, HandlerFault> {
    // Stands in for a slow aggregate query.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let total_bytes: usize = inventory.items.iter().map(|entry| entry.value().len()).sum();
    Reply::json(&serde_json::json!({
        "items": inventory.items.len(),
        "bytes": total_bytes,
        "subscribers": inventory.changes.receiver_count(),
    }))
}

fn query_number(ctx: &RequestContext, name: &str, default: u64) -> Result<u64, HandlerFault> {
    match ctx.query_param(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| HandlerFault::bad_request(format!("{name} must be a non-negative integer"))),
        None => Ok(default),
    }
}

/// Register every demo route and hook.
pub fn registry(inventory: Arc<Inventory>) -> Result<Registry, SetupError> {
    let mut registry = Registry::new();
    registry
        .mount(inventory)
        .get("/items", "list", list)
        .get("/items/:id", "show", show)
        .put("/items/:id", "update", update)
        .get("/changes", "changes", changes)
        .get("/changes/latest", "latest", latest)
        .get("/ticker", "ticker", ticker)
        .get("/stats", "stats", stats)
        .finish()?;

    registry.action_for::<Inventory>("show").before(|ctx| {
        let patch = ctx
            .param("id")
            .filter(|id| id.chars().any(char::is_uppercase))
            .map(|id| ContextPatch::new().param("id", id.to_lowercase()));
        async move {
            Ok(match patch {
                Some(patch) => BeforeOutcome::Patch(patch),
                None => BeforeOutcome::Continue,
            })
        }
    });

    registry.action_for::<Inventory>("update").before(|ctx| {
        let empty = ctx.body().iter().all(u8::is_ascii_whitespace);
        async move {
            if empty {
                let reply = Reply::text("item value must not be empty").with_status(StatusCode::BAD_REQUEST);
                Ok(BeforeOutcome::Respond(reply))
            } else {
                Ok(BeforeOutcome::Continue)
            }
        }
    });

    registry
        .action_for::<Inventory>("list")
        .after(|reply| async move { Ok(reply.header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))) });

    registry
        .action_for::<Inventory>("stats")
        .wrap(limit_concurrency(ConcurrencyConfig::default()))?;

    Ok(registry)
}
