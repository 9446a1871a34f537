//! Tenant update notifications.
//!
//! Composes the "your routes changed" text and hands it to a transport. The
//! SMTP transport itself is a collaborator; the shipped implementation logs
//! the hand-off so the reconciliation flow is complete without a relay.

use crate::config::MailConfig;
use crate::domain::TenantDns;
use async_trait::async_trait;
use paas_client::Route;
use std::sync::Arc;
use tracing::info;

/// Delivery backend for notification mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, config: &MailConfig, recipient: &str, content: &str);
}

/// Logs the would-be delivery; stands in where no relay is configured.
#[derive(Debug, Default)]
pub struct LoggingMailTransport;

#[async_trait]
impl MailTransport for LoggingMailTransport {
    async fn send(&self, config: &MailConfig, recipient: &str, content: &str) {
        if !config.password.is_empty() {
            tracing::debug!(
                "Relay {}:{} with authenticated user {}",
                config.server,
                config.port,
                config.user
            );
        }
        info!(
            "Notification message from {} to {recipient} ({} bytes) handed off",
            config.from_email,
            content.len()
        );
    }
}

pub struct MailSender {
    config: MailConfig,
    transport: Arc<dyn MailTransport>,
}

impl std::fmt::Debug for MailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSender")
            .field("server", &self.config.server)
            .finish_non_exhaustive()
    }
}

impl MailSender {
    pub fn new(config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }

    /// Render the notification body: the tenant's own routes per site, then
    /// the remaining common routes.
    pub fn generate_text_for_tenant_update(
        &self,
        tenant: &TenantDns,
        common_routes: &[Route],
    ) -> String {
        let mut body = String::from("Following routes are available:");
        let mut remaining_common: Vec<&Route> = common_routes.iter().collect();

        for (site, services) in &tenant.sites {
            body.push_str(&format!("\nSite: {site}"));
            for (service, addresses) in services {
                body.push_str(&format!("\n* {service}: "));
                for address in addresses {
                    body.push_str(&format!("http://{address} "));
                }
                remaining_common.retain(|route| route.spec.service.name != *service);
            }
        }
        for route in remaining_common {
            body.push_str(&format!(
                "\n* {}: http://{}",
                route.spec.service.name, route.spec.host
            ));
        }

        self.config
            .message_content
            .replace("{from}", &self.config.from_email)
            .replace("{to}", &tenant.tenant_admin)
            .replace("{tenant}", &tenant.tenant_id)
            .replace("{body}", &body)
            .replace("{date}", &chrono::Utc::now().to_rfc2822())
    }

    pub async fn send_notification(&self, recipient: &str, content: &str) {
        info!(
            "Send notification message about routes sync. From {} to {recipient}",
            self.config.from_email
        );
        self.transport.send(&self.config, recipient, content).await;
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Captures deliveries for assertions.
    #[derive(Debug, Default)]
    pub struct CapturingMailTransport {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MailTransport for CapturingMailTransport {
        async fn send(&self, _config: &MailConfig, recipient: &str, content: &str) {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((recipient.to_string(), content.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Services, DEFAULT_SITE};
    use paas_client::{Metadata, RouteSpec, Target};

    fn mail_config() -> MailConfig {
        MailConfig {
            from_email: "noreply@cloud.example.org".to_string(),
            user: String::new(),
            password: String::new(),
            server: String::new(),
            port: String::new(),
            message_content: "From: {from}\nTo: {to}\nTenant: {tenant}\n\n{body}".to_string(),
        }
    }

    fn common_route(service: &str, host: &str) -> Route {
        Route {
            metadata: Metadata::default(),
            spec: RouteSpec {
                host: host.to_string(),
                service: Target {
                    name: service.to_string(),
                },
                ..RouteSpec::default()
            },
        }
    }

    #[test]
    fn body_lists_tenant_routes_and_leftover_common_routes() {
        let sender = MailSender::new(mail_config(), Arc::new(LoggingMailTransport));
        let mut tenant = TenantDns {
            tenant_id: "t1".to_string(),
            tenant_admin: "admin@acme.example.org".to_string(),
            ..TenantDns::default()
        };
        tenant.sites.insert(
            DEFAULT_SITE.to_string(),
            Services::from([("shop".to_string(), vec![Address::new("shop.acme.org")])]),
        );

        let text = sender.generate_text_for_tenant_update(
            &tenant,
            &[
                common_route("shop", "old-shop.cloud.org"),
                common_route("gateway", "gw.cloud.org"),
            ],
        );

        assert!(text.contains("To: admin@acme.example.org"));
        assert!(text.contains("* shop: http://shop.acme.org"));
        // the common route of a service the tenant already lists is dropped
        assert!(!text.contains("old-shop.cloud.org"));
        assert!(text.contains("* gateway: http://gw.cloud.org"));
    }
}
