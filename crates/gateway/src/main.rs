/// Socket Gateway Service - Main Entry Point
use actix_web::web;
use socket_gateway::{init_tracing, start_server, GatewayState, NullRoomPolicy, RedisPubSub};
use socket_gateway_core::config::{load_dotenv, ConfigLoader, GatewayConfig, RedisConfig, ServiceConfig};
use socket_gateway_core::error::GatewayError;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    load_dotenv();

    let service_config = load_config::<ServiceConfig>()?;
    let redis_config = load_config::<RedisConfig>()?;
    let gateway_config = load_config::<GatewayConfig>()?;

    init_tracing(&service_config.log_level);

    let broker = RedisPubSub::connect(&redis_config)
        .await
        .map_err(into_io_error)?;

    let state = GatewayState::build(
        Arc::new(broker),
        Arc::new(NullRoomPolicy),
        gateway_config,
    )
    .await
    .map_err(into_io_error)?;

    start_server(&service_config, web::Data::new(state)).await
}

fn load_config<T: ConfigLoader>() -> std::io::Result<T> {
    let config = T::from_env().map_err(into_io_error)?;
    config.validate().map_err(into_io_error)?;
    Ok(config)
}

fn into_io_error(e: GatewayError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
