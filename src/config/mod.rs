mod settings;

pub use settings::{
    ApiConfig, GatewayConfig, JwtConfig, OtelConfig, RedisConfig, ServerConfig, Settings,
};
