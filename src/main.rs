use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use gymly::{
    BoxResult,
    api::router,
    cli::init,
    config::{Level, string_to_ip},
    state::AppState,
};
use std::{
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};
use tower::ServiceBuilder;
use tower_http::{
    CompressionLevel,
    compression::{
        CompressionLayer, Predicate,
        predicate::{NotForContentType, SizeAbove},
    },
    cors::{Any, CorsLayer},
    decompression::RequestDecompressionLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    field::MakeExt,
    fmt::{Subscriber, format::debug_fn},
};

use axum_server::tls_rustls::RustlsConfig;

mod gymly;

static APP_START: once_cell::sync::Lazy<u64> = once_cell::sync::Lazy::new(|| {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs())
        .unwrap_or_default()
});

#[tokio::main]
async fn main() -> BoxResult<()> {
    let formatter =
        debug_fn(|writer, field, value| write!(writer, "{field}: {value:?}")).delimited(",");

    let config = init()?;
    let level: Level = config.logging().level.parse()?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    Subscriber::builder()
        .with_max_level(level.0)
        .fmt_fields(formatter)
        .with_ansi(true)
        .init();

    once_cell::sync::Lazy::force(&APP_START);

    let state = AppState::new(&config).await?;

    let compression_predicate = SizeAbove::new(256).and(NotForContentType::IMAGES);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http().make_span_with(
                    DefaultMakeSpan::new()
                        .level(tracing::Level::INFO)
                        .include_headers(false),
                ),
            )
            .layer(cors)
            .layer(RequestDecompressionLayer::new())
            .layer(
                CompressionLayer::new()
                    .no_br()
                    .no_deflate()
                    .gzip(true)
                    .zstd(true)
                    .quality(CompressionLevel::Fastest)
                    .compress_when(compression_predicate),
            ),
    );
    //
    // This adds compression and decompression to the request and response
    // body streams, don't remove it!
    //

    let ip = string_to_ip(&config.network().ip)?;
    let addr = SocketAddr::from((ip, config.network().port));

    if config.tls().enable {
        let cert_path = config.tls().cert.clone().ok_or("tls enabled without a cert path")?;
        let key_path = config.tls().key.clone().ok_or("tls enabled without a key path")?;

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
        info!("serving https on {addr}");
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    } else {
        info!("serving http on {addr}");
        axum_server::bind(addr)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
    }

    Ok(())
}
