pub mod api;
pub mod cors;
pub mod webhook;

use crate::cli::Args;
use std::error::Error;
use std::net::SocketAddr;
use log::{ info, warn };

pub struct Server {
    addr: String,
    args: Args,
}

impl Server {
    pub fn new(addr: String, args: Args) -> Self {
        Self { addr, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = api::router(api::AppState::new(self.args.clone()));

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_path,
                    key_path
                ).await?;
                info!("Server running on https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            (enable_tls, _, _) => {
                if enable_tls {
                    warn!("TLS enabled but certificate or key path missing, serving plain HTTP");
                }
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                    format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
                })?;
                info!("Server running on http://{}", addr);
                info!("Test page available at http://{}/test", addr);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }

        Ok(())
    }
}
