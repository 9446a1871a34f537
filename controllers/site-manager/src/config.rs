//! Environment configuration.
//!
//! Every knob is an environment variable; the only required one is
//! `MICROSERVICE_NAMESPACE`, the master namespace this instance manages.

use std::env;
use std::time::Duration;

const DEFAULT_GATEWAY_URL: &str = "http://internal-gateway-service:8080";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// `MAIL_FROM_EMAIL`
    pub from_email: String,
    /// `MAIL_SERVER_USER`
    pub user: String,
    /// `MAIL_SERVER_PASSWORD`
    pub password: String,
    /// `MAIL_SERVER_HOST`
    pub server: String,
    /// `MAIL_SERVER_PORT`
    pub port: String,
    /// `MAIL_MESSAGE_CONTENT`; placeholders `{from}`, `{to}`, `{tenant}`,
    /// `{body}` are substituted at send time.
    pub message_content: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `CLOUD_PUBLIC_HOST`: the platform hostname used for generated routes.
    pub platform_hostname: String,
    /// `APIGATEWAY_INTERNAL_URL`: internal gateway fronting paas-mediation
    /// and tenant-manager.
    pub gateway_url: String,
    /// `MICROSERVICE_NAMESPACE`: the master namespace (required).
    pub namespace: String,
    /// `MICROSERVICE_NAME`
    pub microservice_name: String,
    /// `SYNCHRONIZER_INTERVAL`: auto-sync period in seconds.
    pub sync_interval: Duration,
    /// `SERVICE_URL_DEFAULT_PROTO`: `http` or `https`; anything else falls
    /// back to `https`.
    pub default_protocol: String,
    /// `TENANT_DEFAULT_DOMAIN_ZONE`
    pub default_domain_zone: String,
    /// `IDENTITY_PROVIDER_URL`
    pub idp_url: String,
    /// `HTTP_BIND_ADDRESS`
    pub bind_address: String,
    /// `COMPOSITE_PLATFORM=true` selects satellite mode.
    pub composite_satellite: bool,
    /// `BASELINE_PROJ`: the baseline namespace; required in satellite mode.
    pub baseline_namespace: String,
    pub mail: MailConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let namespace = env::var("MICROSERVICE_NAMESPACE")
            .map_err(|_| anyhow::anyhow!("MICROSERVICE_NAMESPACE environment variable is required"))?;

        let composite_satellite = env::var("COMPOSITE_PLATFORM").as_deref() == Ok("true");
        let baseline_namespace = env::var("BASELINE_PROJ").unwrap_or_default();
        if composite_satellite && baseline_namespace.is_empty() {
            anyhow::bail!("BASELINE_PROJ is required when COMPOSITE_PLATFORM=true");
        }

        let sync_interval = env::var("SYNCHRONIZER_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .map_or(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS), Duration::from_secs);

        let default_protocol = match env::var("SERVICE_URL_DEFAULT_PROTO").as_deref() {
            Ok("http") => "http".to_string(),
            _ => "https".to_string(),
        };

        Ok(Self {
            platform_hostname: env::var("CLOUD_PUBLIC_HOST").unwrap_or_default(),
            gateway_url: env::var("APIGATEWAY_INTERNAL_URL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),
            namespace,
            microservice_name: env::var("MICROSERVICE_NAME")
                .unwrap_or_else(|_| "site-management".to_string()),
            sync_interval,
            default_protocol,
            default_domain_zone: env::var("TENANT_DEFAULT_DOMAIN_ZONE").unwrap_or_default(),
            idp_url: env::var("IDENTITY_PROVIDER_URL").unwrap_or_default(),
            bind_address: env::var("HTTP_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            composite_satellite,
            baseline_namespace,
            mail: MailConfig {
                from_email: env::var("MAIL_FROM_EMAIL").unwrap_or_default(),
                user: env::var("MAIL_SERVER_USER").unwrap_or_default(),
                password: env::var("MAIL_SERVER_PASSWORD").unwrap_or_default(),
                server: env::var("MAIL_SERVER_HOST").unwrap_or_default(),
                port: env::var("MAIL_SERVER_PORT").unwrap_or_default(),
                message_content: env::var("MAIL_MESSAGE_CONTENT").unwrap_or_else(|_| {
                    "From: {from}\nTo: {to}\nSubject: Routes for tenant {tenant} were updated\n\n{body}"
                        .to_string()
                }),
            },
        })
    }

    /// The tenant-manager API root behind the internal gateway.
    pub fn tenant_manager_url(&self) -> String {
        format!("{}/api/v4/tenant-manager", self.gateway_url.trim_end_matches('/'))
    }

    /// The baseline site-manager address in satellite mode.
    pub fn baseline_sm_url(&self) -> String {
        format!("http://site-management.{}:8080", self.baseline_namespace)
    }
}
