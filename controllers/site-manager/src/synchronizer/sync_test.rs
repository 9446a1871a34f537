//! Reconciliation and query tests over the mock transports.
//!
//! The paas cache hydrates from the mock store when the client starts, so
//! every test seeds its routes/services/configmaps first and builds the
//! harness afterwards.

use super::{Synchronizer, SynchronizerParts};
use crate::composite::test_support::MockBaselineSm;
use crate::dao::{InMemoryDao, TenantDao};
use crate::domain::{
    Address, ServiceRegistration, Services, TenantData, TenantDns, DEFAULT_SITE, SHOPPING_FRONTEND,
};
use crate::error::SiteError;
use crate::mailer::test_support::CapturingMailTransport;
use crate::mailer::{MailSender, MailTransport};
use idp_client::{IdpFacade, MockIdpApi, RetryingIdpClient};
use paas_client::{
    ChannelWatchConnector, ConfigMap, Metadata, MockPaasApi, PaasApi, PaasClient, Route, RouteSpec,
    Service, Target, WatchConnector,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tenant_client::{
    ChannelTenantWatchConnector, MockTenantManagerApi, Tenant, TenantManagerApi,
    TenantManagerClient, TenantWatchConnector, TenantWatchEvent, TenantWatchEventType,
    STATUS_ACTIVE, STATUS_SUSPENDED,
};

const MASTER: &str = "cloud-core";

struct Harness {
    sync: Arc<Synchronizer>,
    paas_api: Arc<MockPaasApi>,
    tm_api: Arc<MockTenantManagerApi>,
    idp_api: Arc<MockIdpApi>,
    dao: Arc<InMemoryDao>,
    mail: Arc<CapturingMailTransport>,
    tenant_client: Arc<TenantManagerClient>,
}

fn annotated(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (format!("qubership.cloud/{k}"), (*v).to_string()))
        .collect()
}

fn route(name: &str, host: &str, service: &str, annots: &[(&str, &str)]) -> Route {
    Route {
        metadata: Metadata {
            name: name.to_string(),
            namespace: MASTER.to_string(),
            annotations: annotated(annots),
        },
        spec: RouteSpec {
            host: host.to_string(),
            service: Target {
                name: service.to_string(),
            },
            ..RouteSpec::default()
        },
    }
}

fn cluster_service(name: &str, annots: &[(&str, &str)]) -> Service {
    Service {
        metadata: Metadata {
            name: name.to_string(),
            namespace: MASTER.to_string(),
            annotations: annotated(annots),
        },
        ..Service::default()
    }
}

fn project_config_map(namespace: &str, parent: &str) -> ConfigMap {
    let mut cm = ConfigMap::default();
    cm.metadata.name = paas_client::PROJECT_TYPE_CONFIG_MAP.to_string();
    cm.metadata.namespace = namespace.to_string();
    cm.data.parent = parent.to_string();
    cm
}

fn stored_tenant(id: &str, service: &str, host: &str) -> TenantDns {
    let mut tenant = TenantDns {
        tenant_id: id.to_string(),
        tenant_admin: format!("admin@{id}.example.org"),
        active: true,
        ..TenantDns::default()
    };
    tenant.sites.insert(
        DEFAULT_SITE.to_string(),
        Services::from([(service.to_string(), vec![Address::new(host)])]),
    );
    tenant
}

fn tm_tenant(object_id: &str, external_id: &str, status: &str) -> Tenant {
    Tenant {
        object_id: object_id.to_string(),
        external_id: external_id.to_string(),
        tenant_name: external_id.to_string(),
        status: status.to_string(),
        ..Tenant::default()
    }
}

async fn build_harness(
    paas_api: Arc<MockPaasApi>,
    tm_api: Arc<MockTenantManagerApi>,
    satellite: Option<Arc<MockBaselineSm>>,
) -> Harness {
    let paas = PaasClient::new(
        Arc::clone(&paas_api) as Arc<dyn PaasApi>,
        Arc::new(ChannelWatchConnector::new()) as Arc<dyn WatchConnector>,
        MASTER.to_string(),
    );
    paas.start().await.unwrap();

    let tenant_client = TenantManagerClient::new(
        Arc::clone(&tm_api) as Arc<dyn TenantManagerApi>,
        Arc::new(ChannelTenantWatchConnector::new()) as Arc<dyn TenantWatchConnector>,
        Duration::from_millis(50),
    );

    let idp_api = Arc::new(MockIdpApi::new());
    let idp = Arc::new(IdpFacade::new(
        MASTER.to_string(),
        RetryingIdpClient::new(Arc::clone(&idp_api) as _),
    ));

    let mail = Arc::new(CapturingMailTransport::default());
    let mailer = Arc::new(MailSender::new(
        crate::config::MailConfig {
            from_email: "noreply@cloud.example.org".to_string(),
            user: String::new(),
            password: String::new(),
            server: String::new(),
            port: String::new(),
            message_content: "{body}".to_string(),
        },
        Arc::clone(&mail) as Arc<dyn MailTransport>,
    ));

    let dao = Arc::new(InMemoryDao::new());
    let sync = Synchronizer::new(SynchronizerParts {
        dao: Arc::clone(&dao) as Arc<dyn TenantDao>,
        paas,
        tenant_client: Arc::clone(&tenant_client),
        mailer,
        idp,
        auto_sync_interval: Duration::from_secs(3600),
        platform_hostname: "cloud.example.org".to_string(),
        default_protocol: "https".to_string(),
        default_domain_zone: String::new(),
        idp_url: String::new(),
        composite_satellite: satellite.is_some(),
        baseline: satellite.map(|sm| sm as Arc<dyn crate::composite::BaselineSmApi>),
    });

    Harness {
        sync,
        paas_api,
        tm_api,
        idp_api,
        dao,
        mail,
        tenant_client,
    }
}

async fn harness() -> Harness {
    build_harness(
        Arc::new(MockPaasApi::new()),
        Arc::new(MockTenantManagerApi::new()),
        None,
    )
    .await
}

async fn harness_with_paas(paas_api: Arc<MockPaasApi>) -> Harness {
    build_harness(paas_api, Arc::new(MockTenantManagerApi::new()), None).await
}

#[tokio::test]
async fn first_boot_projects_annotated_routes_into_the_store() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route("a", "a.example.org", "foo", &[("tenant.service.tenant.id", "GENERAL")]),
    );
    paas_api.put_route(
        MASTER,
        route(
            "b",
            "b.example.org",
            "bar",
            &[
                ("tenant.service.tenant.id", "T1"),
                ("tenant.service.url.suffix", "welcome"),
            ],
        ),
    );
    paas_api.put_route(
        MASTER,
        route(
            "c",
            "www.b.example.org",
            "bar",
            &[
                ("tenant.service.tenant.id", "T1"),
                ("tenant.service.url.suffix", "welcome"),
            ],
        ),
    );
    let h = harness_with_paas(paas_api).await;

    Arc::clone(&h.sync).start().await.unwrap();

    let all = h.dao.find_all().await.unwrap();
    assert_eq!(all.len(), 2);

    let general = h.dao.find_by_tenant_id("GENERAL").await.unwrap();
    assert!(general.active);
    assert_eq!(
        general.sites[DEFAULT_SITE]["foo"],
        vec![Address::new("a.example.org")]
    );

    let t1 = h.dao.find_by_tenant_id("T1").await.unwrap();
    assert!(t1.active);
    assert_eq!(
        t1.sites[DEFAULT_SITE]["bar"],
        vec![
            Address::new("b.example.org/welcome"),
            Address::new("www.b.example.org/welcome"),
        ]
    );

    assert!(h.dao.find_init_information().await.unwrap().initialized);
}

#[tokio::test]
async fn reconciliation_deletes_stale_and_creates_missing_routes() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_service(MASTER, cluster_service("shop", &[]));
    paas_api.put_route(
        MASTER,
        route(
            "stale",
            "stale.example.org",
            "shop",
            &[("tenant.service.tenant.id", "ghost")],
        ),
    );
    let h = harness_with_paas(paas_api).await;
    h.dao
        .upsert(&stored_tenant("T1", "shop", "shop.t1.example.org"))
        .await
        .unwrap();

    h.sync.process_synchronization().await.unwrap();

    let deleted = h.paas_api.deleted_routes();
    assert_eq!(deleted, vec![(MASTER.to_string(), "stale".to_string())]);

    let created = h.paas_api.created_routes();
    assert_eq!(created.len(), 1);
    let (namespace, created_route) = &created[0];
    assert_eq!(namespace, MASTER);
    assert_eq!(created_route.spec.host, "shop.t1.example.org");
    assert_eq!(created_route.spec.service.name, "shop");
    assert_eq!(
        created_route.metadata.annotations["qubership.cloud/tenant.service.tenant.id"],
        "T1"
    );
    assert!(created_route.metadata.name.starts_with("shop-T1-"));
}

#[tokio::test]
async fn second_pass_over_unchanged_store_is_a_no_op() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_service(MASTER, cluster_service("shop", &[]));
    let h = harness_with_paas(paas_api).await;
    h.dao
        .upsert(&stored_tenant("T1", "shop", "shop.t1.example.org"))
        .await
        .unwrap();

    h.sync.process_synchronization().await.unwrap();
    h.paas_api.clear_recorded();

    h.sync.process_synchronization().await.unwrap();
    assert!(h.paas_api.created_routes().is_empty());
    assert!(h.paas_api.deleted_routes().is_empty());
}

#[tokio::test]
async fn reconciliation_skips_inactive_tenants_and_deletes_their_routes() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "shop-T1-0",
            "shop.t1.example.org",
            "shop",
            &[("tenant.service.tenant.id", "T1")],
        ),
    );
    let h = harness_with_paas(paas_api).await;
    let mut tenant = stored_tenant("T1", "shop", "shop.t1.example.org");
    tenant.active = false;
    h.dao.upsert(&tenant).await.unwrap();

    h.sync.process_synchronization().await.unwrap();

    assert!(h.paas_api.created_routes().is_empty());
    assert_eq!(h.paas_api.deleted_routes().len(), 1);
}

#[tokio::test]
async fn tombstoned_rows_are_removed_by_the_next_pass() {
    let h = harness().await;
    h.dao
        .upsert(&stored_tenant("T1", "shop", "shop.t1.example.org"))
        .await
        .unwrap();
    h.sync.delete_tenant("T1").await.unwrap();
    assert!(h.dao.find_by_tenant_id("T1").await.unwrap().removed);

    h.sync.process_synchronization().await.unwrap();
    assert!(matches!(
        h.dao.find_by_tenant_id("T1").await,
        Err(SiteError::TenantNotFound(_))
    ));
}

#[tokio::test]
async fn changed_tenants_get_a_notification_mail() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_service(MASTER, cluster_service("shop", &[]));
    let h = harness_with_paas(paas_api).await;
    h.dao
        .upsert(&stored_tenant("T1", "shop", "shop.t1.example.org"))
        .await
        .unwrap();

    h.sync.process_synchronization().await.unwrap();
    // delivery happens on a spawned task
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = h.mail.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "admin@T1.example.org");
    assert!(sent[0].1.contains("shop.t1.example.org"));
}

#[tokio::test]
async fn upsert_rejected_by_cross_tenant_collision() {
    let h = harness().await;
    h.dao
        .upsert(&stored_tenant("T1", "svcX", "h.example.org"))
        .await
        .unwrap();

    let candidate = stored_tenant("T2", "svcY", "h.example.org");
    let err = h.sync.upsert(candidate).await.unwrap_err();
    match err {
        SiteError::BadRequest(reason) => {
            assert!(reason.contains("Matches with url for service svcX in tenant T1"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(
        h.dao.find_by_tenant_id("T2").await,
        Err(SiteError::TenantNotFound(_))
    ));
}

#[tokio::test]
async fn upsert_assigns_service_name_and_renames_shopping_frontend() {
    let h = harness().await;
    let mut candidate = TenantDns {
        tenant_id: "T3".to_string(),
        tenant_name: "acme".to_string(),
        active: true,
        ..TenantDns::default()
    };
    candidate.sites.insert(
        DEFAULT_SITE.to_string(),
        Services::from([(
            SHOPPING_FRONTEND.to_string(),
            vec![Address::new("acme.example.org")],
        )]),
    );

    h.sync.upsert(candidate).await.unwrap();

    let stored = h.dao.find_by_tenant_id("T3").await.unwrap();
    assert_eq!(stored.service_name, "tenant-acme");
    let services = &stored.sites[DEFAULT_SITE];
    assert!(!services.contains_key(SHOPPING_FRONTEND));
    assert_eq!(
        services["tenant-acme"],
        vec![Address::new("acme.example.org")]
    );
}

#[tokio::test]
async fn unique_service_name_gets_a_suffix_when_taken() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_service(MASTER, cluster_service("tenant-acme", &[]));
    let h = harness_with_paas(paas_api).await;

    let name = h.sync.generate_unique_service_name("acme").await.unwrap();
    assert_eq!(name, "tenant-acme1");
}

#[tokio::test]
async fn upsert_strips_addresses_colliding_with_general_routes() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "common",
            "common.example.org",
            "gateway",
            &[("tenant.service.tenant.id", "GENERAL")],
        ),
    );
    let h = harness_with_paas(paas_api).await;

    let mut candidate = stored_tenant("T1", "own", "own.example.org");
    candidate.sites.get_mut(DEFAULT_SITE).unwrap().insert(
        "gateway".to_string(),
        vec![Address::new("common.example.org")],
    );
    h.sync.upsert(candidate).await.unwrap();

    let stored = h.dao.find_by_tenant_id("T1").await.unwrap();
    let services = &stored.sites[DEFAULT_SITE];
    assert!(services.contains_key("own"));
    assert!(!services.contains_key("gateway"));
}

#[tokio::test]
async fn get_site_prefers_the_default_site() {
    let h = harness().await;
    h.tm_api.put_tenant(tm_tenant("obj-3", "acme", STATUS_ACTIVE));
    let mut tenant = TenantDns {
        tenant_id: "obj-3".to_string(),
        active: true,
        ..TenantDns::default()
    };
    tenant.sites.insert(
        "brand-3".to_string(),
        Services::from([("s".to_string(), vec![Address::new("s.acme")])]),
    );
    tenant.sites.insert(
        DEFAULT_SITE.to_string(),
        Services::from([("s".to_string(), vec![Address::new("s.acme")])]),
    );
    h.dao.upsert(&tenant).await.unwrap();

    let site = h.sync.get_site("acme", "s.acme", false, false).await.unwrap();
    assert_eq!(site, DEFAULT_SITE);

    let missing = h.sync.get_site("acme", "nope.acme", false, false).await.unwrap();
    assert_eq!(missing, "");
}

#[tokio::test]
async fn realms_partition_tenant_and_common_hosts() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "common",
            "common.example.org",
            "gateway",
            &[("tenant.service.tenant.id", "GENERAL")],
        ),
    );
    paas_api.put_route(
        MASTER,
        route(
            "t1",
            "t1.example.org",
            "shop",
            &[("tenant.service.tenant.id", "obj-1")],
        ),
    );
    let tm_api = Arc::new(MockTenantManagerApi::new());
    tm_api.put_tenant(tm_tenant("obj-1", "acme", STATUS_ACTIVE));
    let h = build_harness(paas_api, tm_api, None).await;
    h.tenant_client
        .update_active_tenants_cache(&[tm_tenant("obj-1", "acme", STATUS_ACTIVE)]);

    let realms = h.sync.get_realms(false).await.unwrap();
    assert_eq!(realms.common_routes, vec!["common.example.org"]);
    assert_eq!(realms.tenants.len(), 1);
    assert_eq!(realms.tenants[0].realm_id, "acme");
    assert_eq!(realms.tenants[0].routes, vec!["t1.example.org"]);
}

#[tokio::test]
async fn external_routes_from_the_configmap_join_the_common_set() {
    let paas_api = Arc::new(MockPaasApi::new());
    let mut cm = ConfigMap::default();
    cm.metadata.name = paas_client::TM_CONFIGS_CONFIG_MAP.to_string();
    cm.metadata.namespace = MASTER.to_string();
    cm.data.external_routes = r#"["ext.example.org"]"#.to_string();
    paas_api.put_config_map(MASTER, cm);
    let h = harness_with_paas(paas_api).await;

    let realms = h.sync.get_realms(false).await.unwrap();
    assert_eq!(realms.common_routes, vec!["ext.example.org"]);
}

#[tokio::test]
async fn idp_publication_sends_realm_uri_sets() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "common",
            "common.example.org",
            "gateway",
            &[("tenant.service.tenant.id", "GENERAL")],
        ),
    );
    let h = harness_with_paas(paas_api).await;
    h.tenant_client
        .update_active_tenants_cache(&[tm_tenant("obj-1", "acme", STATUS_ACTIVE)]);

    h.sync.send_routes_to_idp().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.idp_api.post_count(), 1);
    let request = h.idp_api.last_request().unwrap();
    assert_eq!(request.namespace, MASTER);
    assert_eq!(request.cloud_common.urls, vec!["common.example.org"]);
    assert_eq!(request.tenants.len(), 1);
    assert_eq!(request.tenants[0].id, "acme");

    // an unchanged realm set publishes nothing new
    h.sync.send_routes_to_idp().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.idp_api.post_count(), 1);
}

#[tokio::test]
async fn tenant_scheme_route_wins_over_the_general_route_of_the_same_service() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "portal-general",
            "low.example.org",
            "portal",
            &[("tenant.service.tenant.id", "GENERAL")],
        ),
    );
    let h = harness_with_paas(paas_api).await;
    h.dao
        .upsert(&stored_tenant("T1", "portal", "high.example.org"))
        .await
        .unwrap();

    let data = TenantData {
        tenant_id: Some("T1".to_string()),
        site: DEFAULT_SITE.to_string(),
        ..TenantData::default()
    };
    let services = h.sync.get_annotated_routes_for_tenant(&data).await.unwrap();

    let portal: Vec<_> = services.iter().filter(|s| s.id == "portal").collect();
    assert_eq!(portal.len(), 1);
    // GENERAL counts as priority -1, the tenant's own route wins the group
    assert!(portal[0].url.contains("high.example.org"));
}

#[tokio::test]
async fn shopping_frontend_gets_its_display_name() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "shop",
            "shop.example.org",
            SHOPPING_FRONTEND,
            &[("tenant.service.tenant.id", "GENERAL")],
        ),
    );
    let h = harness_with_paas(paas_api).await;

    let data = TenantData {
        tenant_id: Some("missing".to_string()),
        site: DEFAULT_SITE.to_string(),
        ignore_missing: true,
        ..TenantData::default()
    };
    let services = h.sync.get_annotated_routes_for_tenant(&data).await.unwrap();
    let shop = services
        .iter()
        .find(|s| s.id == SHOPPING_FRONTEND)
        .unwrap();
    assert_eq!(shop.name, "Shopping Catalogue");
    assert_eq!(shop.description, "Market for your customers");
}

#[tokio::test]
async fn missing_tenant_fails_unless_ignored() {
    let h = harness().await;
    let data = TenantData {
        tenant_id: Some("ghost".to_string()),
        site: DEFAULT_SITE.to_string(),
        ..TenantData::default()
    };
    let err = h.sync.get_annotated_routes_for_tenant(&data).await.unwrap_err();
    assert!(err.is_tenant_not_found());
}

#[tokio::test]
async fn inactive_tenant_fails_unless_ignored() {
    let h = harness().await;
    let mut tenant = stored_tenant("T1", "svc", "svc.example.org");
    tenant.active = false;
    h.dao.upsert(&tenant).await.unwrap();

    let data = TenantData {
        tenant_id: Some("T1".to_string()),
        site: DEFAULT_SITE.to_string(),
        ..TenantData::default()
    };
    let err = h.sync.get_annotated_routes_for_tenant(&data).await.unwrap_err();
    assert!(matches!(err, SiteError::TenantNotActive(_)));
}

#[tokio::test]
async fn idp_route_defaults_to_the_public_gateway_url() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_route(
        MASTER,
        route(
            "pgw",
            "gateway.example.org",
            "public-gateway",
            &[
                ("tenant.service.tenant.id", "GENERAL"),
                ("tenant.service.id", "public-gateway-service"),
            ],
        ),
    );
    let h = harness_with_paas(paas_api).await;

    let data = TenantData {
        tenant_id: Some("anything".to_string()),
        site: DEFAULT_SITE.to_string(),
        ignore_missing: true,
        ..TenantData::default()
    };
    let services = h.sync.get_idp_route_for_tenant(&data).await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].id, "identity-provider");
    assert!(services[0].url.contains("gateway.example.org"));
}

#[tokio::test]
async fn satellite_delegates_idp_route_to_the_baseline() {
    let baseline = Arc::new(MockBaselineSm::default());
    baseline
        .response
        .lock()
        .unwrap()
        .push(paas_client::CustomService {
            id: "identity-provider".to_string(),
            name: "Identity Provider".to_string(),
            url: "https://idp.baseline.example.org".to_string(),
            description: String::new(),
        });
    let h = build_harness(
        Arc::new(MockPaasApi::new()),
        Arc::new(MockTenantManagerApi::new()),
        Some(Arc::clone(&baseline)),
    )
    .await;

    let data = TenantData {
        tenant_id: Some("acme".to_string()),
        protocol: "https".to_string(),
        site: DEFAULT_SITE.to_string(),
        ignore_missing: true,
        ..TenantData::default()
    };
    let services = h.sync.get_idp_route_for_tenant(&data).await.unwrap();
    assert_eq!(services[0].url, "https://idp.baseline.example.org");

    let calls = baseline.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![(
            "acme".to_string(),
            "https".to_string(),
            DEFAULT_SITE.to_string(),
            true,
        )]
    );
}

#[tokio::test]
async fn satellite_mirrors_tenant_watch_events() {
    let h = build_harness(
        Arc::new(MockPaasApi::new()),
        Arc::new(MockTenantManagerApi::new()),
        Some(Arc::new(MockBaselineSm::default())),
    )
    .await;

    let mut created = tm_tenant("obj-9", "niners", STATUS_ACTIVE);
    created.user.email = "admin@niners.example.org".to_string();
    h.sync
        .sync_tenants_with_tm(TenantWatchEvent {
            event_type: TenantWatchEventType::Created,
            tenants: vec![created.clone()],
        })
        .await
        .unwrap();

    let stored = h.dao.find_by_tenant_id("obj-9").await.unwrap();
    assert!(stored.active);
    assert_eq!(stored.tenant_admin, "admin@niners.example.org");
    assert!(stored.sites.contains_key(DEFAULT_SITE));

    h.sync
        .sync_tenants_with_tm(TenantWatchEvent {
            event_type: TenantWatchEventType::Deleted,
            tenants: vec![created],
        })
        .await
        .unwrap();
    assert!(h.dao.find_by_tenant_id("obj-9").await.unwrap().removed);
}

#[tokio::test]
async fn satellite_import_drops_rows_absent_upstream() {
    let tm_api = Arc::new(MockTenantManagerApi::new());
    tm_api.put_tenant(tm_tenant("obj-1", "acme", STATUS_ACTIVE));
    let h = build_harness(
        Arc::new(MockPaasApi::new()),
        tm_api,
        Some(Arc::new(MockBaselineSm::default())),
    )
    .await;
    h.dao
        .upsert(&stored_tenant("obj-gone", "svc", "gone.example.org"))
        .await
        .unwrap();

    h.sync.sync_all_tenants_from_tm().await;

    assert!(h.dao.find_by_tenant_id("obj-1").await.is_ok());
    assert!(h.dao.find_by_tenant_id("obj-gone").await.unwrap().removed);
}

#[tokio::test]
async fn active_tenant_index_follows_watch_events() {
    let h = harness().await;
    h.sync.actualize_active_tenants_cache(TenantWatchEvent {
        event_type: TenantWatchEventType::Created,
        tenants: vec![tm_tenant("obj-1", "acme", STATUS_ACTIVE)],
    });
    assert_eq!(h.tenant_client.get_active_tenants_cache().len(), 1);

    h.sync.actualize_active_tenants_cache(TenantWatchEvent {
        event_type: TenantWatchEventType::Modified,
        tenants: vec![tm_tenant("obj-1", "acme", STATUS_SUSPENDED)],
    });
    assert!(h.tenant_client.get_active_tenants_cache().is_empty());
}

#[tokio::test]
async fn composite_chain_is_built_from_configmap_parents() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_config_map("ns-a", project_config_map("ns-a", MASTER));
    paas_api.put_config_map("ns-b", project_config_map("ns-b", "ns-a"));
    let h = harness_with_paas(paas_api).await;

    let tenant = TenantDns {
        tenant_id: "T1".to_string(),
        namespaces: vec!["ns-b".to_string(), "ns-a".to_string()],
        ..TenantDns::default()
    };
    let chain = h.sync.composite_namespace_for_tenant(&tenant).await.unwrap();
    assert_eq!(chain.flatten(), vec![MASTER, "ns-a", "ns-b"]);
}

#[tokio::test]
async fn broken_hierarchy_is_reported() {
    let paas_api = Arc::new(MockPaasApi::new());
    // both namespaces claim an unrelated parent
    paas_api.put_config_map("ns-a", project_config_map("ns-a", "elsewhere"));
    paas_api.put_config_map("ns-b", project_config_map("ns-b", "elsewhere"));
    let h = harness_with_paas(paas_api).await;

    let tenant = TenantDns {
        tenant_id: "T1".to_string(),
        namespaces: vec!["ns-a".to_string(), "ns-b".to_string()],
        ..TenantDns::default()
    };
    let err = h.sync.composite_namespace_for_tenant(&tenant).await.unwrap_err();
    assert!(err.to_string().contains("Cannot build hierarchy"));
}

#[tokio::test]
async fn service_namespace_resolution_is_child_first() {
    let paas_api = Arc::new(MockPaasApi::new());
    let mut child_service = cluster_service("shop", &[]);
    child_service.metadata.namespace = "ns-a".to_string();
    paas_api.put_service("ns-a", child_service);
    paas_api.put_service(MASTER, cluster_service("shop", &[]));
    let h = harness_with_paas(paas_api).await;

    let chain = super::CompositeNamespace {
        namespace: MASTER.to_string(),
        child: Some(Box::new(super::CompositeNamespace {
            namespace: "ns-a".to_string(),
            child: None,
        })),
    };
    let namespace = h
        .sync
        .resolve_namespace_for_service("shop", &chain)
        .await
        .unwrap();
    assert_eq!(namespace, "ns-a");
}

#[tokio::test]
async fn await_action_completes_once_the_cache_advances() {
    let h = harness().await;
    let paas = Arc::clone(&h.sync.paas);
    h.sync
        .await_action(true, || async move {
            paas.create_route(
                &route("r", "x.example.org", "svc", &[("tenant.service.tenant.id", "T1")]),
                MASTER,
            )
            .await
            .map(|_| ())
            .map_err(SiteError::from)
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn await_action_skips_waiting_in_async_mode() {
    let h = harness().await;
    h.sync.await_action(false, || async { Ok(()) }).await.unwrap();
}

#[tokio::test]
async fn search_matches_hosts_case_insensitively() {
    let h = harness().await;
    h.dao
        .upsert(&stored_tenant("T1", "svc", "Shop.Example.Org"))
        .await
        .unwrap();
    h.dao
        .upsert(&stored_tenant("T2", "svc", "other.example.org"))
        .await
        .unwrap();

    let found = h.sync.search("shop.example.org").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].tenant_id, "T1");

    assert!(matches!(
        h.sync.search("").await,
        Err(SiteError::BadRequest(_))
    ));
}

#[tokio::test]
async fn virtual_service_registration_creates_the_pair_and_tracks_tenants() {
    let h = harness().await;
    h.dao
        .upsert(&stored_tenant("T1", "svc", "svc.t1.example.org"))
        .await
        .unwrap();

    let registration = ServiceRegistration {
        original_service: "shop".to_string(),
        virtual_service: "my-shop".to_string(),
        ..ServiceRegistration::default()
    };
    h.sync.create_virtual_service(&registration).await.unwrap();

    let created_services = h.paas_api.created_services();
    assert_eq!(created_services.len(), 1);
    assert_eq!(created_services[0].1.metadata.name, "my-shop");

    let created_routes = h.paas_api.created_routes();
    assert_eq!(created_routes.len(), 1);
    assert_eq!(
        created_routes[0].1.spec.host,
        "my-shop-cloud-core.cloud.example.org"
    );

    let stored = h.dao.find_by_tenant_id("T1").await.unwrap();
    assert_eq!(
        stored.sites[DEFAULT_SITE]["my-shop"],
        vec![Address::new("my-shop-cloud-core.cloud.example.org")]
    );
}

#[tokio::test]
async fn virtual_service_update_refuses_non_virtual_namesake() {
    let paas_api = Arc::new(MockPaasApi::new());
    paas_api.put_service(MASTER, cluster_service("my-shop", &[]));
    let h = harness_with_paas(paas_api).await;

    let registration = ServiceRegistration {
        original_service: "shop".to_string(),
        virtual_service: "my-shop".to_string(),
        ..ServiceRegistration::default()
    };
    let err = h
        .sync
        .update_or_create_virtual_service(&registration)
        .await
        .unwrap_err();
    assert!(matches!(err, SiteError::Forbidden(_)));
}

#[tokio::test]
async fn virtual_service_delete_removes_routes_and_scheme_entries() {
    let h = harness().await;
    h.dao
        .upsert(&stored_tenant("T1", "svc", "svc.t1.example.org"))
        .await
        .unwrap();
    let registration = ServiceRegistration {
        original_service: "shop".to_string(),
        virtual_service: "my-shop".to_string(),
        ..ServiceRegistration::default()
    };
    h.sync.create_virtual_service(&registration).await.unwrap();

    h.sync.delete_virtual_service("my-shop").await.unwrap();

    assert_eq!(h.paas_api.deleted_services().len(), 1);
    assert_eq!(h.paas_api.deleted_routes().len(), 1);
    let stored = h.dao.find_by_tenant_id("T1").await.unwrap();
    assert!(!stored.sites[DEFAULT_SITE].contains_key("my-shop"));
}

#[tokio::test]
async fn delete_virtual_service_requires_a_virtual_namesake() {
    let h = harness().await;
    let err = h.sync.delete_virtual_service("ghost").await.unwrap_err();
    assert!(matches!(err, SiteError::NotFound(_)));
}
