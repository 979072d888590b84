//! Minimal main loop driven by the console.
//!
//! Run with: `cargo run --example hello_world -- +list`
//!
//! Type `list` for the available commands and `quit` to exit.

use std::thread;
use std::time::Duration;

use appfw::prelude::*;

fn main() -> Result<(), appfw::CommandLineError> {
    let run_app = ConVar::declare("run_app", true, "Whether the app keeps running");
    let _quit = {
        let run_app = run_app.clone();
        ConCommand::declare("quit", "Quits the app", move |_, _| {
            run_app.set(false);
        })
    };

    let _appfw = init(InitOptions::new().args(std::env::args()))?;
    let console = console();
    con_notice!(console, "Hello, world!");
    con_info!(console, "Type 'list' for the list of commands");
    con_info!(console, "Type 'quit' to exit");

    let _late = ConVar::declare("rt_cvar", String::from("yes"), "Variable created after init");

    while run_app.get() {
        main_loop_tick();
        thread::sleep(Duration::from_millis(1000 / 60));
    }

    con_notice!(console, "Goodbye!");
    Ok(())
}
