//! Bevy integration.

#[cfg(unix)]
use std::sync::Arc;

use bevy::prelude::*;

#[cfg(unix)]
use crate::extcon::{ExtconConfig, ExtconHost};
use crate::init::{InitGuard, InitOptions};

/// Initializes the framework for the lifetime of the app and runs
/// [`main_loop_tick`](crate::main_loop_tick) every frame.
///
/// ```ignore
/// use bevy::prelude::*;
/// use appfw::prelude::*;
///
/// App::new()
///     .add_plugins(MinimalPlugins)
///     .add_plugins(AppFwPlugin::default().with_extcon(ExtconConfig::default()))
///     .run();
/// ```
#[derive(Default)]
pub struct AppFwPlugin {
    pub options: InitOptions,
    /// Serve the remote console.
    #[cfg(unix)]
    pub extcon: Option<ExtconConfig>,
}

impl AppFwPlugin {
    pub fn with_options(mut self, options: InitOptions) -> Self {
        self.options = options;
        self
    }

    #[cfg(unix)]
    pub fn with_extcon(mut self, config: ExtconConfig) -> Self {
        self.extcon = Some(config);
        self
    }
}

/// Keeps the framework initialized. Non-send so that the tick system runs
/// on the main thread.
struct AppFwGuard {
    _guard: InitGuard,
}

/// The remote console host, when enabled.
#[cfg(unix)]
#[derive(Resource, Clone)]
pub struct ExtconResource(pub Arc<ExtconHost>);

impl Plugin for AppFwPlugin {
    fn build(&self, app: &mut App) {
        let guard = match crate::init::init(self.options.clone()) {
            Ok(guard) => guard,
            Err(e) => {
                error!("appfw initialization failed: {e}");
                return;
            }
        };
        app.insert_non_send_resource(AppFwGuard { _guard: guard });

        #[cfg(unix)]
        if let Some(config) = &self.extcon {
            let host = ExtconHost::new();
            match host.enable(config) {
                Ok(addr) => {
                    info!("extcon listening on {addr}");
                    crate::init::console().add_receiver(host.clone());
                    app.insert_resource(ExtconResource(host));
                }
                Err(e) => error!("extcon failed to start: {e}"),
            }
        }

        app.add_systems(PreUpdate, tick_main_loop);
    }
}

#[cfg(unix)]
fn tick_main_loop(_guard: NonSend<AppFwGuard>, extcon: Option<Res<ExtconResource>>) {
    if let Some(extcon) = extcon {
        extcon.0.tick();
    }
    crate::init::main_loop_tick();
}

#[cfg(not(unix))]
fn tick_main_loop(_guard: NonSend<AppFwGuard>) {
    crate::init::main_loop_tick();
}
