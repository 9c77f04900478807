use actix_files::Files;
use actix_server::ServerHandle;
use actix_web::{App, HttpServer, web::Data};
use anyhow::{Context, Result};
use edge_config_ui::{
    api::Api,
    config::{AppConfig, CertificateConfig},
    network_probe::SystemProbe,
};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::io::Write;
use tokio::{
    signal::unix::{SignalKind, signal},
    task::JoinHandle,
};

type UiApi = Api<SystemProbe>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    debug!("configuration: {config:?}");

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let (server_handle, server_task) = run_server(&config)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    };

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

fn run_server(
    config: &AppConfig,
) -> Result<(ServerHandle, JoinHandle<Result<(), std::io::Error>>)> {
    let probe = SystemProbe::new(
        config.network.wifi_interface.as_str(),
        config.network.command_timeout,
    );
    let api = Data::new(UiApi::new(
        probe,
        config.paths.clone(),
        config.network.clone(),
    ));
    let static_dir = config.paths.static_dir.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(api.clone())
            .configure(UiApi::routes)
            .service(Files::new("/static", static_dir.clone()))
    });

    let address = (config.server.bind_address, config.server.port);

    let server = match &config.server.certificate {
        Some(certificate) => {
            let tls_config = load_tls_config(certificate).context("failed to load tls config")?;
            info!("serving https on {}:{}", address.0, address.1);
            server
                .bind_rustls_0_23(address, tls_config)
                .context("failed to bind server")?
        }
        None => {
            info!("serving http on {}:{}", address.0, address.1);
            server.bind(address).context("failed to bind server")?
        }
    }
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}

fn load_tls_config(paths: &CertificateConfig) -> Result<rustls::ServerConfig> {
    // fails only if a provider is installed already
    let _ = CryptoProvider::install_default(default_provider());

    let mut tls_certs = std::io::BufReader::new(
        std::fs::File::open(&paths.cert_path).context("failed to open certificate file")?,
    );

    let mut tls_key = std::io::BufReader::new(
        std::fs::File::open(&paths.key_path).context("failed to open key file")?,
    );

    let tls_certs = rustls_pemfile::certs(&mut tls_certs)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate pem")?;

    let key_item = rustls_pemfile::read_one(&mut tls_key)
        .context("failed to read key pem file")?
        .context("no valid key found in pem file")?;

    let key = match key_item {
        rustls_pemfile::Item::Pkcs1Key(key) => rustls::pki_types::PrivateKeyDer::Pkcs1(key),
        rustls_pemfile::Item::Pkcs8Key(key) => rustls::pki_types::PrivateKeyDer::Pkcs8(key),
        rustls_pemfile::Item::Sec1Key(key) => rustls::pki_types::PrivateKeyDer::Sec1(key),
        _ => anyhow::bail!("unexpected key type in pem file"),
    };

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(tls_certs, key)
        .context("failed to create tls config")
}
