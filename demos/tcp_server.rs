//! Line-oriented TCP server controlled from the console.
//!
//! Run with: `cargo run --example tcp_server -- --port 5000`
//!
//! Commands:
//! - `clients` - List connected clients
//! - `send <id> "<msg>"` - Send a line to a client
//! - `quit` - Exit

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use appfw::net::{DEFAULT_QUEUE_DEPTH, ListenerCallbacks, TcpListener};
use appfw::prelude::*;

struct ClientId(u32);

type Server = Arc<Mutex<TcpListener<ListenerCallbacks>>>;

fn callbacks() -> ListenerCallbacks {
    let mut next_id = 1;

    ListenerCallbacks::new()
        .on_accepted(move |_, socket| {
            let id = next_id;
            next_id += 1;
            socket.set_user_data(ClientId(id));
            con_info!(console(), "Client {id} connected from {}", socket.peer_addr());
        })
        .on_closed(|_, socket, reason| {
            let id = socket.user_data::<ClientId>().map_or(0, |c| c.0);
            con_info!(console(), "Client {id} disconnected: {reason}");
        })
        .on_ready_read(|_, socket| {
            let mut buf = [0u8; 1024];
            match socket.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    let id = socket.user_data::<ClientId>().map_or(0, |c| c.0);
                    let text = String::from_utf8_lossy(&buf[..n]);
                    con_info!(console(), "[{id}] {}", text.trim_end());
                }
                Err(e) => con_error!(console(), "Read failed: {e}"),
            }
        })
}

fn register_commands(server: &Server) -> Vec<Arc<ConCommand>> {
    let clients = {
        let server = server.clone();
        ConCommand::no_args("clients", "Lists connected clients", move |hub| {
            let Ok(server) = server.lock() else { return };
            for idx in 0..server.connected_clients() {
                if let Some(socket) = server.socket(idx) {
                    let id = socket.user_data::<ClientId>().map_or(0, |c| c.0);
                    con_info!(hub, "{}. {}, id = {id}", idx + 1, socket.peer_addr());
                }
            }
            con_info!(hub, "Total: {}", server.connected_clients());
        })
    };

    let send = {
        let server = server.clone();
        ConCommand::new("send", "Sends a line to a client", move |args, hub| {
            let (Some(id), Some(text)) = (args.parse::<u32>(0), args.get(1)) else {
                con_info!(hub, "Usage: send <id> \"<msg>\"");
                return;
            };

            let Ok(server) = server.lock() else { return };
            let target = (0..server.connected_clients())
                .filter_map(|idx| server.socket(idx))
                .find(|s| s.user_data::<ClientId>().is_some_and(|c| c.0 == id));

            match target {
                Some(socket) => match socket.write_all(format!("{text}\n").as_bytes()) {
                    Ok(()) => con_info!(hub, "Message sent"),
                    Err(e) => con_error!(hub, "Send failed: {e}"),
                },
                None => con_error!(hub, "Client {id} not found"),
            }
        })
    };

    vec![clients, send]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let run_app = ConVar::declare("run_app", true, "Whether the app keeps running");
    let _quit = {
        let run_app = run_app.clone();
        ConCommand::declare("quit", "Quits the app", move |_, _| {
            run_app.set(false);
        })
    };

    let _appfw = init(InitOptions::new().args(std::env::args()))?;
    let port = match appfw::parsed_command_line() {
        Some(cl) => u16::try_from(cl.arg_int("port", 5000)?)?,
        None => 5000,
    };

    let server: Server = Arc::new(Mutex::new(TcpListener::new(callbacks())));
    server
        .lock()
        .map_err(|_| "server lock poisoned")?
        .start_listening(Ipv4Addr::UNSPECIFIED, port, DEFAULT_QUEUE_DEPTH)?;
    con_notice!(console(), "Listening on port {port}");

    let commands = register_commands(&server);
    for cmd in &commands {
        console().registry().register_cmd(cmd);
    }

    while run_app.get() {
        main_loop_tick();
        if let Ok(mut server) = server.lock() {
            if let Err(e) = server.poll(0) {
                con_error!(console(), "Server error: {e}");
                break;
            }
        }
        thread::sleep(Duration::from_millis(1000 / 60));
    }

    Ok(())
}
