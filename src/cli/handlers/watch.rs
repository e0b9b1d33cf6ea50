use std::sync::Arc;

use tracing::info;

use crate::cli::commands::{ListArgs, WatchArgs};
use crate::io::socket::SocketChannel;
use crate::io::sse::SseChannel;
use crate::sync::bus::{ConnectionStatus, SessionEvent, Subscription, Topic};
use crate::sync::connection::{PushChannel, spawn_channels};
use crate::sync::session::Session;

use super::{CmdResult, Context, list_lines, render_lists};

/// Stream push events into the session and reprint whenever the store
/// changes. Ends when every channel has given up.
pub(super) async fn cmd_watch(ctx: &Context, mut session: Session, args: WatchArgs) -> CmdResult {
    let server = &ctx.config.server;
    let mut channels: Vec<Arc<dyn PushChannel>> = Vec::new();
    if ctx.config.realtime.sse {
        channels.push(Arc::new(SseChannel::new(server, ctx.token.clone())?));
    }
    if ctx.config.realtime.socket {
        channels.push(Arc::new(SocketChannel::new(server, ctx.token.clone())));
    }
    if channels.is_empty() {
        return Err("both push channels are disabled in [realtime]".into());
    }

    let view = ListArgs {
        list: args.list,
        filter: "all".to_string(),
        tags: Vec::new(),
        search: None,
        group_by: None,
        collapsed: Vec::new(),
        counts: false,
    };
    let mut status = session.subscribe(Topic::Connection);
    let (mut events, handles) = spawn_channels(channels, &ctx.config.realtime, session.bus());
    info!(channels = handles.len(), "watching");

    print_view(&session, &view, ctx.json)?;
    let mut printed = session.revision();
    while session.pump(&mut events).await {
        report_status(&mut status, ctx.json)?;
        if session.revision() != printed {
            printed = session.revision();
            print_view(&session, &view, ctx.json)?;
        }
    }
    report_status(&mut status, ctx.json)?;

    let mut last_error = None;
    for handle in handles {
        if let Ok(Err(e)) = handle.await {
            last_error = Some(e);
        }
    }
    match last_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_view(session: &Session, view: &ListArgs, json: bool) -> CmdResult {
    let rendered = render_lists(session.store(), view, session.clock().now())?;
    if json {
        let line = serde_json::json!({ "revision": session.revision(), "lists": rendered });
        println!("{}", line);
    } else {
        println!("=== revision {} ===", session.revision());
        for line in list_lines(&rendered) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn report_status(status: &mut Subscription, json: bool) -> CmdResult {
    while let Some(SessionEvent::Connection(s)) = status.try_recv() {
        if json {
            println!("{}", serde_json::to_string(&s)?);
            continue;
        }
        match s {
            ConnectionStatus::Connected { channel } => eprintln!("{channel}: connected"),
            ConnectionStatus::Reconnecting {
                channel,
                attempt,
                delay,
            } => eprintln!(
                "{channel}: reconnecting in {:.1}s (attempt {attempt})",
                delay.as_secs_f64()
            ),
            ConnectionStatus::Failed { channel, error } => eprintln!("{channel}: gave up: {error}"),
        }
    }
    Ok(())
}
