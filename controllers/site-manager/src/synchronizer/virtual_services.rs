//! Virtual-service registration.
//!
//! Creates a matched Service + Route pair on behalf of a registration and
//! tracks the resulting host in every active tenant's default site. Only
//! services this system created (annotated `virtual`) may be updated or
//! deleted through these paths.

use super::Synchronizer;
use crate::domain::ServiceRegistration;
use crate::error::SiteError;
use paas_client::annotations::is_virtual;
use tracing::{debug, error, info};

impl Synchronizer {
    pub async fn create_virtual_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), SiteError> {
        let namespace = self.paas.namespace.clone();
        let route = registration.to_route(&self.platform_hostname, &namespace, &self.mapper);
        registration
            .validate_route(&route, &namespace)
            .map_err(SiteError::BadRequest)?;

        self.paas
            .create_service(&registration.to_service(&self.mapper), &namespace)
            .await?;
        self.paas.create_route(&route, &namespace).await?;
        self.force_update_idp_route_cache().await?;
        self.dao
            .add_route_to_tenants(&route.spec.host, &registration.virtual_service)
            .await
    }

    pub async fn update_or_create_virtual_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), SiteError> {
        let namespace = self.paas.namespace.clone();
        let service_name = registration.virtual_service.clone();
        let route = registration.to_route(&self.platform_hostname, &namespace, &self.mapper);
        registration
            .validate_route(&route, &namespace)
            .map_err(SiteError::BadRequest)?;

        let mapper = self.mapper.clone();
        let name = service_name.clone();
        let conflicting = self
            .paas
            .get_services_filtered(&namespace, move |service| {
                !is_virtual(&service.metadata, &mapper) && service.metadata.name == name
            })
            .await?;
        if !conflicting.is_empty() {
            error!("Service {service_name} exists but is not virtual");
            return Err(SiteError::Forbidden(format!(
                "Service {service_name} found, but service is not virtual"
            )));
        }

        self.paas
            .update_or_create_service(&registration.to_service(&self.mapper), &namespace)
            .await?;

        let name = service_name.clone();
        let routes_to_update = self
            .paas
            .get_routes_filtered(&namespace, move |route| route.spec.service.name == name)
            .await?;

        if routes_to_update.is_empty() {
            self.paas.update_or_create_route(&route, &namespace).await?;
            self.force_update_idp_route_cache().await?;
            return self
                .dao
                .add_route_to_tenants(&route.spec.host, &registration.virtual_service)
                .await;
        }

        if route.spec.host != routes_to_update[0].spec.host {
            return Err(SiteError::Forbidden(
                "Can't update host field. Host field is immutable".to_string(),
            ));
        }
        for mut existing in routes_to_update {
            existing.merge_port(&route);
            debug!("Try to update route {}", existing.metadata.name);
            self.paas.update_or_create_route(&existing, &namespace).await?;
        }
        Ok(())
    }

    pub async fn delete_virtual_service(&self, service_name: &str) -> Result<(), SiteError> {
        let namespace = self.paas.namespace.clone();

        let mapper = self.mapper.clone();
        let name = service_name.to_string();
        let services = self
            .paas
            .get_services_filtered(&namespace, move |service| {
                is_virtual(&service.metadata, &mapper) && service.metadata.name == name
            })
            .await?;
        if services.is_empty() {
            return Err(SiteError::NotFound(format!(
                "Virtual service {service_name} not found"
            )));
        }

        self.paas.delete_service(service_name, &namespace).await?;

        let name = service_name.to_string();
        let routes = self
            .paas
            .get_routes_filtered(&namespace, move |route| route.spec.service.name == name)
            .await?;
        for route in routes {
            debug!("Try to delete route {}", route.metadata.name);
            self.paas
                .delete_route(&namespace, &route.metadata.name)
                .await?;
        }

        self.dao.delete_route_from_tenants(service_name).await
    }

    /// The identity provider caches frontend routes; force a rebuild after a
    /// virtual service changed them.
    async fn force_update_idp_route_cache(&self) -> Result<(), SiteError> {
        if self.idp_url.is_empty() {
            debug!("Identity provider url is not configured, skip route cache refresh");
            return Ok(());
        }
        info!("Sending request to update idp route cache");
        idp_client::force_frontend_cache_refresh(&self.idp_url)
            .await
            .map_err(|err| {
                error!("Can't refresh route cache in IDP: {err}");
                SiteError::Idp(err)
            })
    }
}
