//! Command handlers served by the player and its receive loop.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use atk_wire::{Dispatched, Endpoint, Message, Registry, Transform, Vec3};
use parking_lot::Mutex;

/// State shared by the handlers of one player.
#[derive(Debug, Default)]
pub struct PlayerState {
    pings: AtomicI32,
    delivered: AtomicI32,
    quit: AtomicBool,
    camera: Mutex<(Vec3, Transform)>,
}

impl PlayerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            camera: Mutex::new((Vec3::default(), Transform::identity())),
            ..Self::default()
        })
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// Registry with every command the player understands.
pub fn registry(state: &Arc<PlayerState>) -> Registry {
    let reg = Registry::new();

    reg.register_recv_fn("Echo", |cx, mut msg| {
        let (n,) = msg.decode_all::<(i32,)>()?;
        let reply = cx.new_reply().with(&n);
        cx.send(&reply)?;
        Ok(None)
    });

    let s = state.clone();
    reg.register_recv_fn("Ping", move |_cx, _msg| {
        s.pings.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });

    let s = state.clone();
    reg.register_recv_fn("Stats", move |cx, _msg| {
        let reply = cx
            .new_reply()
            .with(&s.pings.load(Ordering::SeqCst))
            .with(&s.delivered.load(Ordering::SeqCst));
        cx.send(&reply)?;
        Ok(None)
    });

    reg.register_recv_fn("Describe", |cx, _msg| {
        // Ask the tool for its name while it is blocked on this very call.
        let tool = match cx.send_sync(Message::new("ToolName")?)? {
            Some(mut reply) => reply.decode_all::<(String,)>()?.0,
            None => return Ok(None),
        };
        let text = format!("{} attached to {}", cx.name(), tool);
        let reply = cx.new_reply().with(text.as_str());
        cx.send(&reply)?;
        Ok(None)
    });

    let s = state.clone();
    reg.register_recv_fn("SetCamera", move |_cx, mut msg| {
        let (position, xform) = msg.decode_all::<(Vec3, Transform)>()?;
        tracing::debug!(?position, "camera moved");
        *s.camera.lock() = (position, xform);
        Ok(None)
    });

    let s = state.clone();
    reg.register_recv_fn("GetCamera", move |cx, _msg| {
        let (position, xform) = *s.camera.lock();
        let reply = cx.new_reply().with(&position).with(&xform);
        cx.send(&reply)?;
        Ok(None)
    });

    let s = state.clone();
    reg.register_recv_fn("Quit", move |_cx, _msg| {
        s.quit.store(true, Ordering::SeqCst);
        Ok(None)
    });

    reg
}

/// Announce ourselves, then serve commands until the tool quits or disconnects.
pub fn run(ep: &mut Endpoint, state: &PlayerState) -> anyhow::Result<()> {
    ep.send_id()?;
    while !state.quit_requested() {
        match ep.receive_and_dispatch()? {
            Dispatched::Disconnected => {
                tracing::info!("tool disconnected");
                return Ok(());
            }
            Dispatched::Handled { name, .. } => {
                state.delivered.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(%name, "handled");
            }
        }
    }
    tracing::info!(
        pings = state.pings.load(Ordering::SeqCst),
        delivered = state.delivered.load(Ordering::SeqCst),
        "quit requested"
    );
    Ok(())
}
