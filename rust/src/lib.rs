mod actions;
mod core;
mod logging;
mod state;
mod tls;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use state::*;
pub use updates::AppUpdate;

use updates::{CoreMsg, InternalEvent};

// Not exposed over UniFFI; used by binaries/tests to avoid rustls provider
// ambiguity when multiple crypto backends are enabled in the dependency graph.
pub fn init_rustls_crypto_provider() {
    tls::init_rustls_crypto_provider();
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        // Must run before any rustls users (reqwest, tungstenite) initialize.
        tls::init_rustls_crypto_provider();
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core =
                crate::core::AppCore::new(update_tx, core_tx_for_core, data_dir, shared_for_core);
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl FfiApp {
    /// Feed a raw gateway frame into the open chat as if it had arrived on
    /// the live channel. Lets tests drive the full reconciliation path
    /// without a socket.
    pub fn inject_gateway_payload_for_tests(&self, raw: String) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::InjectedGatewayPayload { raw },
        )));
    }
}
