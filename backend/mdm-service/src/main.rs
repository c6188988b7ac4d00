use std::io;
use std::sync::Arc;

use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use event_bus::PubSub;
use kv_store::KvStore;
use mdm_apns::{ApnsClient, MdmPusher};
use mdm_service::config::Config;
use mdm_service::handlers;
use mdm_service::handlers::scep::ScepState;
use mdm_service::middleware::ApiAuthMiddleware;
use mdm_service::services::blueprint_engine::BlueprintEngine;
use mdm_service::services::checkin::CheckinService;
use mdm_service::services::command::CommandService;
use mdm_service::services::connect::ConnectService;
use mdm_service::services::dep_sync::DepSyncer;
use mdm_service::services::enroll::EnrollService;
use mdm_service::services::push::PushService;
use mdm_service::services::{blueprint_engine, push as push_service, webhook};
use mdm_service::store::apps::FileRepo;
use mdm_service::store::block::BlockStore;
use mdm_service::store::blueprints::BlueprintStore;
use mdm_service::store::config::ConfigStore;
use mdm_service::store::devices::DeviceStore;
use mdm_service::store::profiles::ProfileStore;
use mdm_service::store::push_info::PushInfoStore;
use mdm_service::store::queue::CommandQueue;
use mdm_service::store::scep_depot::ScepDepot;
use mdm_service::store::users::UserStore;
use mdm_service::store::{devices as device_listener, push_info as push_info_listener};
use mdm_service::store::{queue as queue_listener, users as user_listener};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting mdm service");

    let config = Config::from_env().map_err(io::Error::other)?;
    std::fs::create_dir_all(&config.config_path)?;

    let kv = KvStore::open(&config.database_path)
        .await
        .map_err(io::Error::other)?;
    let bus = PubSub::new();

    // Stores and projections. Listeners subscribe before anything publishes.
    let config_store = ConfigStore::new(kv.clone(), bus.clone())
        .await
        .map_err(io::Error::other)?;
    let depot = ScepDepot::new(kv.clone()).await.map_err(io::Error::other)?;
    depot.create_or_load_ca().await.map_err(io::Error::other)?;
    let ca_cert_pem = depot.ca_certificate_pem().await.map_err(io::Error::other)?;

    let device_store = DeviceStore::new(kv.clone()).await.map_err(io::Error::other)?;
    device_listener::start_listener(device_store.clone(), bus.clone());

    let user_store = UserStore::new(kv.clone()).await.map_err(io::Error::other)?;
    user_listener::start_listener(user_store.clone(), bus.clone());

    let push_info_store = PushInfoStore::new(kv.clone()).await.map_err(io::Error::other)?;
    push_info_listener::start_listener(push_info_store.clone(), bus.clone());

    let profile_store = ProfileStore::new(kv.clone()).await.map_err(io::Error::other)?;
    let blueprint_store = BlueprintStore::new(kv.clone(), profile_store.clone())
        .await
        .map_err(io::Error::other)?;
    let block_store = BlockStore::new(kv.clone()).await.map_err(io::Error::other)?;

    // Protocol services.
    let checkin_service = CheckinService::new(kv.clone(), bus.clone())
        .await
        .map_err(io::Error::other)?;
    let command_service = CommandService::new(kv.clone(), bus.clone())
        .await
        .map_err(io::Error::other)?;
    let command_queue = CommandQueue::new(kv.clone(), bus.clone())
        .await
        .map_err(io::Error::other)?;
    queue_listener::start_listener(command_queue.clone(), bus.clone());
    let connect_service =
        ConnectService::new(command_queue.clone(), bus.clone(), block_store.clone());

    // APNs. A certificate supplied at boot seeds the client and the config
    // store; otherwise the push service parks until one is uploaded.
    let initial_pusher = load_apns_client(&config, &config_store).await;
    let push_service_handle = PushService::new(push_info_store.clone(), initial_pusher);
    push_service::start_config_listener(push_service_handle.clone(), config_store.clone(), &bus);
    push_service::start_queued_listener(push_service_handle.clone(), &bus);

    // Enrollment profile builder.
    let tls_cert_pem = match &config.tls_cert_path {
        Some(path) => std::fs::read(path)?,
        None => Vec::new(),
    };
    let enroll_service = EnrollService::new(
        config_store.clone(),
        &bus,
        &config.server_url,
        &format!("{}/scep", config.server_url),
        &config.scep_challenge,
        "",
        ca_cert_pem,
        tls_cert_pem,
        profile_store.clone(),
    )
    .await
    .map_err(io::Error::other)?;

    // Blueprint engine.
    let engine = BlueprintEngine::new(
        blueprint_store.clone(),
        profile_store.clone(),
        user_store.clone(),
        command_service.clone(),
    );
    blueprint_engine::start_listener(engine, &bus);

    // Outbound webhook.
    if let Some(url) = config.command_webhook_url.clone() {
        webhook::start(&bus, url);
    }

    // DEP sync: seeded from a stored token or a depsim override, otherwise
    // parked until a token is applied through the API.
    let dep_client = initial_dep_client(&config, &config_store).await;
    let dep_syncer = DepSyncer::start(
        kv.clone(),
        bus.clone(),
        dep_client,
        config.dep_server_url.clone(),
    )
    .await
    .map_err(io::Error::other)?;

    let scep_state = ScepState { handler: None };
    let file_repo = config.file_repo_path.as_ref().map(|path| FileRepo::new(path));
    let api_key = config.api_key.clone();
    let addr = format!("0.0.0.0:{}", config.http_port);
    tracing::info!(%addr, "starting HTTP server");

    HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(checkin_service.clone()))
            .app_data(web::Data::new(connect_service.clone()))
            .app_data(web::Data::new(command_service.clone()))
            .app_data(web::Data::new(enroll_service.clone()))
            .app_data(web::Data::new(push_service_handle.clone()))
            .app_data(web::Data::new(depot.clone()))
            .app_data(web::Data::new(device_store.clone()))
            .app_data(web::Data::new(user_store.clone()))
            .app_data(web::Data::new(profile_store.clone()))
            .app_data(web::Data::new(blueprint_store.clone()))
            .app_data(web::Data::new(block_store.clone()))
            .app_data(web::Data::new(config_store.clone()))
            .app_data(web::Data::new(dep_syncer.clone()))
            .app_data(web::Data::new(scep_state.clone()))
            .wrap(actix_middleware::Logger::default())
            .configure(handlers::register_root)
            .configure(handlers::checkin::register_routes)
            .configure(handlers::connect::register_routes)
            .configure(handlers::enroll::register_routes)
            .configure(handlers::scep::register_routes);

        if let Some(repo) = file_repo.clone() {
            app = app
                .app_data(web::Data::new(repo))
                .configure(handlers::apps::register_repo_routes);
        }

        // Admin routes only exist when an API key is configured.
        if let Some(token) = api_key.clone() {
            let mut v1 = web::scope("/v1")
                .wrap(ApiAuthMiddleware::new(&token))
                .configure(handlers::profiles::register_routes)
                .configure(handlers::blueprints::register_routes)
                .configure(handlers::users::register_routes)
                .configure(handlers::devices::register_routes)
                .configure(handlers::dep::register_routes)
                .configure(handlers::config::register_routes)
                .configure(handlers::commands::register_routes)
                .configure(handlers::push::register_routes);
            if file_repo.is_some() {
                v1 = v1.configure(handlers::apps::register_admin_routes);
            }
            app = app.service(v1).service(
                web::scope("")
                    .wrap(ApiAuthMiddleware::new(&token))
                    .configure(handlers::push::register_routes),
            );
        }
        app
    })
    .bind(&addr)?
    .run()
    .await
}

/// Build an APNs client from certificate files supplied at boot. A PEM
/// cert/key pair is also written into the config store so the push topic and
/// enrollment profile come up without an upload step.
async fn load_apns_client(
    config: &Config,
    config_store: &ConfigStore,
) -> Option<Arc<dyn MdmPusher>> {
    let cert_path = config.apns_certificate_path.as_ref()?;
    let cert_bytes = match std::fs::read(cert_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %cert_path.display(), error = %e, "read APNs certificate");
            return None;
        }
    };

    if let Some(key_path) = &config.apns_private_key_path {
        let key_bytes = match std::fs::read(key_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %key_path.display(), error = %e, "read APNs key");
                return None;
            }
        };
        if let Err(e) = config_store
            .save_push_certificate(&cert_bytes, &key_bytes)
            .await
        {
            tracing::warn!(error = %e, "store push certificate from files");
        }
        match ApnsClient::from_pem_parts(&cert_bytes, &key_bytes) {
            Ok(client) => return Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "build APNs client from PEM pair");
                return None;
            }
        }
    }

    match ApnsClient::from_pkcs12(&cert_bytes, &config.apns_certificate_password) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "build APNs client from p12");
            None
        }
    }
}

async fn initial_dep_client(
    config: &Config,
    config_store: &ConfigStore,
) -> Option<Arc<dep_client::DepClient>> {
    let dep_config = if let Some(url) = &config.dep_server_url {
        Some(dep_client::Config::depsim(url))
    } else {
        match config_store.dep_tokens().await {
            Ok(tokens) => tokens
                .first()
                .map(|token| dep_client::Config::new(token.credentials())),
            Err(e) => {
                tracing::warn!(error = %e, "load DEP tokens");
                None
            }
        }
    }?;
    match dep_client::DepClient::new(dep_config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "build DEP client");
            None
        }
    }
}
