//! Drives one player through a fixed command script.

use std::sync::Arc;

use anyhow::Context;
use atk_wire::{Dispatched, Endpoint, Message, Registry, SendMode, Transform, Vec3};

const ASYNC_COMMANDS: &[&str] = &["Ping", "SetCamera", "Quit"];
const SYNC_COMMANDS: &[&str] = &["Echo", "GetCamera", "Describe", "Stats"];

/// Handlers and send modes the tool needs.
pub fn registry() -> Registry {
    let reg = Registry::new();
    for name in ASYNC_COMMANDS {
        reg.register_send_mode(name, SendMode::Async);
    }
    for name in SYNC_COMMANDS {
        reg.register_send_mode(name, SendMode::Sync);
    }
    // The player asks for this while we wait on its answer to Describe.
    reg.register_recv_fn("ToolName", |cx, _msg| {
        let reply = cx.new_reply().with(cx.name());
        cx.send(&reply)?;
        Ok(None)
    });
    reg
}

/// What the player reported back.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub echo: i32,
    pub camera: (Vec3, Transform),
    pub description: String,
    pub pings: i32,
    pub delivered: i32,
}

fn call(ep: &mut Endpoint, msg: Message) -> anyhow::Result<Message> {
    let name = msg.name().to_string();
    ep.send_named(msg)?
        .with_context(|| format!("player disconnected before answering {}", name))
}

/// Run the script against a connected player, ending with `Quit`.
pub fn run(ep: &mut Endpoint) -> anyhow::Result<Report> {
    ep.send_id()?;

    for _ in 0..3 {
        ep.send_named(Message::new("Ping")?)?;
    }

    let (echo,) = call(ep, Message::new("Echo")?.with(&42i32))?.decode_all::<(i32,)>()?;
    tracing::info!(echo, "echo answered");

    let mut xform = Transform::identity();
    xform.0[3] = [0.0, 1.5, -4.0];
    ep.send_named(Message::new("SetCamera")?.with(&Vec3([0.0, 1.5, -4.0])).with(&xform))?;
    let camera = call(ep, Message::new("GetCamera")?)?.decode_all::<(Vec3, Transform)>()?;
    tracing::info!(position = ?camera.0, "camera read back");

    let (description,) = call(ep, Message::new("Describe")?)?.decode_all::<(String,)>()?;
    tracing::info!(%description, "player described itself");

    let (pings, delivered) = call(ep, Message::new("Stats")?)?.decode_all::<(i32, i32)>()?;
    tracing::info!(pings, delivered, "player stats");

    // Asynchronous traffic set aside while we were blocked, such as the player's ID.
    while ep.pending() > 0 {
        if let Dispatched::Handled { name, .. } = ep.receive_and_dispatch()? {
            tracing::debug!(%name, "drained");
        }
    }
    tracing::debug!(
        peer = %ep.peer(),
        send = ?ep.wire_func_names(atk_wire::Role::Send),
        recv = ?ep.wire_func_names(atk_wire::Role::Recv),
        "session handlers"
    );

    ep.send_named(Message::new("Quit")?)?;
    Ok(Report {
        echo,
        camera,
        description,
        pings,
        delivered,
    })
}

/// Shared registry for the lifetime of the process.
pub fn shared_registry() -> Arc<Registry> {
    Arc::new(registry())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atk_wire::{decode_frame, encode_frame, Handle, Transport, ID_NAME};
    use std::io::{Cursor, Write};
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn reply() -> Message {
        Message::reply(Handle::NULL)
    }

    #[test]
    fn script_against_recorded_player() {
        let player = Handle(0x99);
        let mut xform = Transform::identity();
        xform.0[3] = [0.0, 1.5, -4.0];
        let recorded: Vec<u8> = [
            Message::new(ID_NAME).unwrap().with(&player),
            reply().with(&42i32),
            reply().with(&Vec3([0.0, 1.5, -4.0])).with(&xform),
            Message::new("ToolName").unwrap().with_wait_for_reply(true),
            reply().with("atk-player attached to atk-tool"),
            reply().with(&3i32).with(&9i32),
        ]
        .iter()
        .flat_map(|m| encode_frame(m).unwrap())
        .collect();

        let out = Captured::default();
        let mut ep = Endpoint::new(
            "atk-tool",
            Transport::new(Cursor::new(recorded), out.clone()),
            shared_registry(),
        );
        let report = run(&mut ep).unwrap();
        assert_eq!(report.echo, 42);
        assert_eq!(report.camera, (Vec3([0.0, 1.5, -4.0]), xform));
        assert_eq!(report.description, "atk-player attached to atk-tool");
        assert_eq!((report.pings, report.delivered), (3, 9));
        assert_eq!(ep.peer(), player);
        assert_eq!(ep.pending(), 0);

        let bytes = out.0.lock().clone();
        let mut names = Vec::new();
        let mut at = 0;
        while at < bytes.len() {
            let (mut msg, used) = decode_frame(&bytes[at..]).unwrap();
            if msg.is_reply() {
                assert_eq!(msg.decode_all::<(String,)>().unwrap().0, "atk-tool");
            }
            names.push(msg.name().to_string());
            at += used;
        }
        assert_eq!(
            names,
            [
                "ID", "Ping", "Ping", "Ping", "Echo", "SetCamera", "GetCamera", "Describe",
                "Reply", "Stats", "Quit"
            ]
        );
    }
}
