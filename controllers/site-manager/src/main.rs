//! Site Manager
//!
//! Routing control plane for a multi-tenant cluster: materialises tenant
//! route schemes into the cluster through paas-mediation, reconciles against
//! the actual routes on watch events and a timer, and publishes the
//! resulting redirect URI set to the identity provider.

mod api;
mod composite;
mod config;
mod dao;
mod domain;
mod error;
mod mailer;
mod synchronizer;

use crate::api::AppState;
use crate::composite::{BaselineSmApi, HttpBaselineSm};
use crate::config::Config;
use crate::dao::{InMemoryDao, TenantDao};
use crate::mailer::{LoggingMailTransport, MailSender};
use crate::synchronizer::{Synchronizer, SynchronizerParts};
use idp_client::{HttpIdpApi, IdpFacade, RetryingIdpClient};
use paas_client::{HttpPaasApi, HttpWatchConnector, PaasClient, PaasApi, WatchConnector};
use std::sync::Arc;
use std::time::Duration;
use tenant_client::{
    HttpTenantManagerApi, HttpTenantWatchConnector, TenantManagerApi, TenantManagerClient,
    TenantWatchConnector,
};
use tracing::info;

const TENANT_WATCH_RETRY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting site-manager");
    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Service: {}", config.microservice_name);
    info!("  Namespace: {}", config.namespace);
    info!("  Gateway: {}", config.gateway_url);
    info!("  Composite satellite: {}", config.composite_satellite);

    let paas_api: Arc<dyn PaasApi> = Arc::new(HttpPaasApi::new(config.gateway_url.clone())?);
    let watch_connector: Arc<dyn WatchConnector> =
        Arc::new(HttpWatchConnector::new(config.gateway_url.clone())?);
    let paas = PaasClient::new(paas_api, watch_connector, config.namespace.clone());
    info!("Initializing cluster resource caches...");
    paas.start().await?;

    let tm_api: Arc<dyn TenantManagerApi> =
        Arc::new(HttpTenantManagerApi::new(config.tenant_manager_url())?);
    let tm_connector: Arc<dyn TenantWatchConnector> =
        Arc::new(HttpTenantWatchConnector::new(config.tenant_manager_url())?);
    let tenant_client = TenantManagerClient::new(tm_api, tm_connector, TENANT_WATCH_RETRY);

    let idp_client = RetryingIdpClient::new(Arc::new(HttpIdpApi::new(config.idp_url.clone())?));
    let idp = Arc::new(IdpFacade::new(
        config.namespace.clone(),
        Arc::clone(&idp_client),
    ));
    if !config.idp_url.is_empty() {
        let supported = idp.check_post_uri_feature().await?;
        info!("Identity provider URL registration supported: {supported}");
    }

    let mailer = Arc::new(MailSender::new(
        config.mail.clone(),
        Arc::new(LoggingMailTransport),
    ));

    let baseline: Option<Arc<dyn BaselineSmApi>> = if config.composite_satellite {
        info!(
            "Composite platform satellite mode enabled, baseline: {}",
            config.baseline_namespace
        );
        Some(Arc::new(HttpBaselineSm::new(config.baseline_sm_url())?))
    } else {
        None
    };

    let dao: Arc<dyn TenantDao> = Arc::new(InMemoryDao::new());

    info!("Start routes synchronizer...");
    let synchronizer = Synchronizer::new(SynchronizerParts {
        dao,
        paas,
        tenant_client,
        mailer,
        idp,
        auto_sync_interval: config.sync_interval,
        platform_hostname: config.platform_hostname.clone(),
        default_protocol: config.default_protocol.clone(),
        default_domain_zone: config.default_domain_zone.clone(),
        idp_url: config.idp_url.clone(),
        composite_satellite: config.composite_satellite,
        baseline,
    });
    Arc::clone(&synchronizer).start().await?;

    info!("Force initial route sync...");
    synchronizer.sync();

    let router = api::router(AppState { synchronizer });
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Serving REST API on {}", config.bind_address);
    axum::serve(listener, router).await?;
    Ok(())
}
