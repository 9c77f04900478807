use crate::{
    config::{NetworkConfig, PathConfig},
    network_probe::NetworkProbe,
    response::{StatusResponse, bad_request, error_response, handle_service_result},
    services::{
        interface::{InterfaceService, SaveHardwareRequest},
        machine::{MachineService, SaveMachineRequest},
        wifi::{ConnectWifiRequest, WifiService},
    },
};
use actix_files::NamedFile;
use actix_web::{HttpResponse, Responder, web};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

const INDEX_PAGE: &str = "index.html";
const MACHINES_PAGE: &str = "machine_list.html";

#[derive(Deserialize)]
pub struct ListHardwareQuery {
    iface: Option<String>,
}

#[derive(Deserialize)]
pub struct MachineLimitQuery {
    count: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CurrentWifiResponse {
    ssid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MachineLimitResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    max_allowed: u32,
}

pub struct Api<Probe>
where
    Probe: NetworkProbe,
{
    pub probe: Probe,
    pub paths: PathConfig,
    pub network: NetworkConfig,
    /// Serializes every edit of configuration files and records
    file_lock: Mutex<()>,
}

impl<Probe> Api<Probe>
where
    Probe: NetworkProbe + 'static,
{
    pub fn new(probe: Probe, paths: PathConfig, network: NetworkConfig) -> Self {
        Api {
            probe,
            paths,
            network,
            file_lock: Mutex::new(()),
        }
    }

    /// Register all API routes. Expects `web::Data<Self>` as app data.
    pub fn routes(cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::JsonConfig::default().error_handler(|err, _| bad_request(err)))
            .app_data(web::QueryConfig::default().error_handler(|err, _| bad_request(err)))
            .route("/", web::get().to(Self::index))
            .route("/machines", web::get().to(Self::machines))
            .route("/version", web::get().to(Self::version))
            .route("/wifi-scan", web::get().to(Self::wifi_scan))
            .route("/current-wifi", web::get().to(Self::current_wifi))
            .route("/connect-wifi", web::post().to(Self::connect_wifi))
            .route("/list-hardware", web::get().to(Self::list_hardware))
            .route("/save-hardware", web::post().to(Self::save_hardware))
            .route("/save-backend", web::post().to(Self::save_backend))
            .route("/reboot", web::get().to(Self::reboot))
            .route(
                "/check-machine-limit",
                web::get().to(Self::check_machine_limit),
            )
            .route("/save-machine", web::post().to(Self::save_machine))
            .route("/reset-machines", web::get().to(Self::reset_machines));
    }

    pub async fn index(api: web::Data<Self>) -> actix_web::Result<NamedFile> {
        debug!("index() called");
        Ok(NamedFile::open(api.paths.static_dir.join(INDEX_PAGE))?)
    }

    pub async fn machines(api: web::Data<Self>) -> actix_web::Result<NamedFile> {
        debug!("machines() called");
        Ok(NamedFile::open(api.paths.static_dir.join(MACHINES_PAGE))?)
    }

    pub async fn version() -> impl Responder {
        debug!("version() called");

        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    pub async fn wifi_scan(api: web::Data<Self>) -> impl Responder {
        debug!("wifi_scan() called");
        HttpResponse::Ok().json(WifiService::scan(&api.probe).await)
    }

    pub async fn current_wifi(api: web::Data<Self>) -> impl Responder {
        debug!("current_wifi() called");

        let response = match WifiService::current_ssid(&api.probe).await {
            Ok(ssid) => CurrentWifiResponse { ssid, error: None },
            Err(e) => {
                error!("current_wifi failed: {e:#}");
                CurrentWifiResponse {
                    ssid: "Unknown".to_string(),
                    error: Some(format!("{e:#}")),
                }
            }
        };

        HttpResponse::Ok().json(response)
    }

    pub async fn connect_wifi(
        body: web::Json<ConnectWifiRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("connect_wifi() called");

        let _guard = api.file_lock.lock().await;

        handle_service_result(
            WifiService::connect(
                &api.probe,
                &api.paths.wpa_supplicant_conf,
                &api.network.wifi_country,
                &body,
            )
            .await
            .map(|()| StatusResponse::new("connected")),
            "connect_wifi",
        )
    }

    pub async fn list_hardware(
        query: web::Query<ListHardwareQuery>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("list_hardware() called: {:?}", query.iface);

        handle_service_result(
            InterfaceService::status(
                &api.probe,
                &api.paths,
                query.iface.as_deref().unwrap_or_default(),
            )
            .await,
            "list_hardware",
        )
    }

    pub async fn save_hardware(
        body: web::Json<SaveHardwareRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("save_hardware() called: {body:?}");

        let _guard = api.file_lock.lock().await;

        handle_service_result(
            InterfaceService::save_static(
                &api.paths,
                &api.network.default_ethernet_interface,
                &body,
            )
            .map(StatusResponse::new),
            "save_hardware",
        )
    }

    pub async fn save_backend(
        body: web::Json<Map<String, Value>>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("save_backend() called: {body:?}");

        let _guard = api.file_lock.lock().await;

        handle_service_result(
            MachineService::save_backend(&api.paths.backend_data_file, &body)
                .map(|()| StatusResponse::new("saved")),
            "save_backend",
        )
    }

    /// Restarts the host right away.
    pub async fn reboot(api: web::Data<Self>) -> impl Responder {
        warn!("reboot() called");

        match api.probe.reboot().await {
            Ok(()) => HttpResponse::Ok().body("Rebooting system..."),
            Err(e) => error_response(&e, "reboot"),
        }
    }

    pub async fn check_machine_limit(
        query: web::Query<MachineLimitQuery>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("check_machine_limit() called: {:?}", query.count);

        let count = query.count.unwrap_or_default();

        handle_service_result(
            MachineService::check_limit(&api.paths.device_id_file, count).map(|check| {
                if check.allowed {
                    MachineLimitResponse {
                        status: "ok",
                        message: None,
                        max_allowed: check.max_allowed,
                    }
                } else {
                    MachineLimitResponse {
                        status: "error",
                        message: Some(format!(
                            "Limit exceeded! Max allowed: {}.",
                            check.max_allowed
                        )),
                        max_allowed: check.max_allowed,
                    }
                }
            }),
            "check_machine_limit",
        )
    }

    pub async fn save_machine(
        body: web::Json<SaveMachineRequest>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("save_machine() called: {body:?}");

        let request = body.into_inner();
        let machine_name = request.machine_name.clone().unwrap_or_default();

        let _guard = api.file_lock.lock().await;

        handle_service_result(
            MachineService::save(&api.paths.machines_dir, request).map(|path| {
                StatusResponse::ok(format!("{machine_name} saved in {}", path.display()))
            }),
            "save_machine",
        )
    }

    pub async fn reset_machines(api: web::Data<Self>) -> impl Responder {
        debug!("reset_machines() called");

        let _guard = api.file_lock.lock().await;

        handle_service_result(
            MachineService::reset(&api.paths.machines_dir)
                .map(|_| StatusResponse::ok("All machine files deleted")),
            "reset_machines",
        )
    }
}
