use std::sync::Once;

static INIT: Once = Once::new();

/// Install the ring CryptoProvider as the rustls process default.
///
/// Both reqwest and tokio-tungstenite link rustls; if the dependency graph
/// ever enables more than one crypto backend, rustls refuses to pick one at
/// runtime. Pinning ring here keeps TLS setup deterministic.
pub(crate) fn init_rustls_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
