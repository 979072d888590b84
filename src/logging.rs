//! `tracing` integration.
//!
//! [`ConsoleLayer`] prints every `tracing` event to a console hub, so that
//! log output from the program and its dependencies shows up on every
//! receiver (terminal, remote console).
//!
//! ```no_run
//! use tracing_subscriber::prelude::*;
//!
//! tracing_subscriber::registry()
//!     .with(appfw::logging::ConsoleLayer::global())
//!     .init();
//!
//! let _appfw = appfw::init(appfw::InitOptions::default())?;
//! tracing::info!("visible in the console");
//! # Ok::<(), appfw::CommandLineError>(())
//! ```

use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Weak};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::core::{ConsoleHub, MessageInfo, Severity};

thread_local! {
    static IN_LAYER: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone)]
enum Target {
    /// The hub created by [`crate::init`], looked up per event.
    Global,
    Hub(Weak<ConsoleHub>),
}

/// A [`Layer`] that prints events to a console hub.
///
/// The event target becomes the message tag. Events emitted while the
/// layer is already printing on the same thread (for example from inside a
/// receiver) are dropped.
#[derive(Debug, Clone)]
pub struct ConsoleLayer {
    target: Target,
}

impl ConsoleLayer {
    /// Print to the framework's hub while it is initialized.
    pub fn global() -> Self {
        Self { target: Target::Global }
    }

    /// Print to `hub` for as long as it lives.
    pub fn for_hub(hub: &Arc<ConsoleHub>) -> Self {
        Self {
            target: Target::Hub(Arc::downgrade(hub)),
        }
    }

    fn hub(&self) -> Option<Arc<ConsoleHub>> {
        match &self.target {
            Target::Global => crate::init::try_console(),
            Target::Hub(hub) => hub.upgrade(),
        }
    }
}

/// Console severity for a `tracing` level.
pub fn severity_for(level: &Level) -> Severity {
    match *level {
        Level::ERROR => Severity::Error,
        Level::WARN => Severity::Warn,
        Level::INFO => Severity::Info,
        _ => Severity::Debug,
    }
}

impl<S> Layer<S> for ConsoleLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if IN_LAYER.with(|f| f.replace(true)) {
            return;
        }

        if let Some(hub) = self.hub() {
            let mut text = String::new();
            event.record(&mut EventVisitor(&mut text));

            let metadata = event.metadata();
            let info = MessageInfo::new(severity_for(metadata.level())).tag(metadata.target());
            hub.print(info, text);
        }

        IN_LAYER.with(|f| f.set(false));
    }
}

/// Writes the message followed by ` key=value` for the other fields.
struct EventVisitor<'a>(&'a mut String);

impl Visit for EventVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0.insert_str(0, value);
        } else {
            let _ = write!(self.0, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0.insert_str(0, &format!("{value:?}"));
        } else {
            let _ = write!(self.0, " {}={value:?}", field.name());
        }
    }
}

/// Hook for [`LogPlugin::custom_layer`](bevy::log::LogPlugin::custom_layer)
/// that routes Bevy's log output to the console.
#[cfg(feature = "bevy")]
pub fn custom_log_layer(_app: &mut bevy::app::App) -> Option<bevy::log::BoxedLayer> {
    Some(Box::new(ConsoleLayer::global()))
}
