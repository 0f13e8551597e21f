//! Per-source flag groups. Every source has `--<name>-enabled` and
//! `--<name>-freq` plus its own settings, each backed by an environment
//! variable of the same name in upper snake case.

use std::time::Duration;

use clap::Args;

use crate::core::SourceSchedule;
use crate::ingestors::{
    AmbientWeatherSettings, AwairSettings, FlumeSettings, ParticleSettings, PurpleAirSettings,
    AMBIENT_WEATHER_API, AWAIR_API, DEFAULT_EVENT_TYPE, FLUME_API, PARTICLE_STREAM,
};
use crate::utils::parse_duration;

#[derive(Args, Debug, Clone)]
pub struct AwairArgs {
    #[clap(id = "awair-enabled", long = "awair-enabled", env = "AWAIR_ENABLED", help = "Enable polling.")]
    pub enabled: bool,

    #[clap(id = "awair-freq", long = "awair-freq", env = "AWAIR_FREQ", default_value = "5m", value_parser = parse_duration, help = "Polling frequency.")]
    pub freq: Duration,

    #[clap(id = "awair-token", long = "awair-token", env = "AWAIR_TOKEN", default_value = "", hide_env_values = true, help = "Access token.")]
    pub token: String,

    #[clap(id = "awair-devices", long = "awair-devices", env = "AWAIR_DEVICES", value_delimiter = ',', help = "Devices as 'name:type:id', comma separated.")]
    pub devices: Vec<String>,

    #[clap(id = "awair-api", long = "awair-api", env = "AWAIR_API", default_value = AWAIR_API, help = "API base URL.")]
    pub api: String,
}

impl AwairArgs {
    pub fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            enabled: self.enabled,
            freq: self.freq,
        }
    }

    pub fn settings(&self) -> AwairSettings {
        AwairSettings {
            token: self.token.clone(),
            devices: self.devices.clone(),
            api_base: self.api.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AmbientWeatherArgs {
    #[clap(id = "ambientweather-enabled", long = "ambientweather-enabled", env = "AMBIENTWEATHER_ENABLED", help = "Enable polling.")]
    pub enabled: bool,

    #[clap(id = "ambientweather-freq", long = "ambientweather-freq", env = "AMBIENTWEATHER_FREQ", default_value = "1m", value_parser = parse_duration, help = "Polling frequency.")]
    pub freq: Duration,

    #[clap(id = "ambientweather-mac", long = "ambientweather-mac", env = "AMBIENTWEATHER_MAC", default_value = "", help = "Weather station MAC.")]
    pub mac: String,

    #[clap(id = "ambientweather-api-key", long = "ambientweather-api-key", env = "AMBIENTWEATHER_API_KEY", default_value = "", hide_env_values = true, help = "Ambient Weather API key.")]
    pub api_key: String,

    #[clap(id = "ambientweather-app-key", long = "ambientweather-app-key", env = "AMBIENTWEATHER_APP_KEY", default_value = "", hide_env_values = true, help = "Ambient Weather application key.")]
    pub app_key: String,

    #[clap(id = "ambientweather-api", long = "ambientweather-api", env = "AMBIENTWEATHER_API", default_value = AMBIENT_WEATHER_API, help = "API base URL.")]
    pub api: String,
}

impl AmbientWeatherArgs {
    pub fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            enabled: self.enabled,
            freq: self.freq,
        }
    }

    pub fn settings(&self) -> AmbientWeatherSettings {
        AmbientWeatherSettings {
            mac: self.mac.clone(),
            api_key: self.api_key.clone(),
            app_key: self.app_key.clone(),
            api_base: self.api.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FlumeArgs {
    #[clap(id = "flume-enabled", long = "flume-enabled", env = "FLUME_ENABLED", help = "Enable polling.")]
    pub enabled: bool,

    #[clap(id = "flume-freq", long = "flume-freq", env = "FLUME_FREQ", default_value = "1m", value_parser = parse_duration, help = "Polling frequency.")]
    pub freq: Duration,

    #[clap(id = "flume-client-id", long = "flume-client-id", env = "FLUME_CLIENT_ID", default_value = "", help = "OAuth client ID.")]
    pub client_id: String,

    #[clap(id = "flume-client-secret", long = "flume-client-secret", env = "FLUME_CLIENT_SECRET", default_value = "", hide_env_values = true, help = "OAuth client secret.")]
    pub client_secret: String,

    #[clap(id = "flume-username", long = "flume-username", env = "FLUME_USERNAME", default_value = "", help = "Account username.")]
    pub username: String,

    #[clap(id = "flume-password", long = "flume-password", env = "FLUME_PASSWORD", default_value = "", hide_env_values = true, help = "Account password.")]
    pub password: String,

    #[clap(id = "flume-user-id", long = "flume-user-id", env = "FLUME_USER_ID", default_value = "", help = "User ID.")]
    pub user_id: String,

    #[clap(id = "flume-device-id", long = "flume-device-id", env = "FLUME_DEVICE_ID", default_value = "", help = "Device ID.")]
    pub device_id: String,

    #[clap(id = "flume-api", long = "flume-api", env = "FLUME_API", default_value = FLUME_API, help = "API base URL.")]
    pub api: String,
}

impl FlumeArgs {
    pub fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            enabled: self.enabled,
            freq: self.freq,
        }
    }

    pub fn settings(&self) -> FlumeSettings {
        FlumeSettings {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            api_base: self.api.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PurpleAirArgs {
    #[clap(id = "purpleair-enabled", long = "purpleair-enabled", env = "PURPLEAIR_ENABLED", help = "Enable polling.")]
    pub enabled: bool,

    #[clap(id = "purpleair-freq", long = "purpleair-freq", env = "PURPLEAIR_FREQ", default_value = "10s", value_parser = parse_duration, help = "Polling frequency.")]
    pub freq: Duration,

    #[clap(id = "purpleair-host", long = "purpleair-host", env = "PURPLEAIR_HOST", default_value = "", help = "Local device host.")]
    pub host: String,
}

impl PurpleAirArgs {
    pub fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            enabled: self.enabled,
            freq: self.freq,
        }
    }

    pub fn settings(&self) -> PurpleAirSettings {
        PurpleAirSettings {
            host: self.host.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ParticleArgs {
    #[clap(id = "particle-enabled", long = "particle-enabled", env = "PARTICLE_ENABLED", help = "Enable polling.")]
    pub enabled: bool,

    #[clap(id = "particle-freq", long = "particle-freq", env = "PARTICLE_FREQ", default_value = "1m", value_parser = parse_duration, help = "Polling frequency.")]
    pub freq: Duration,

    #[clap(id = "particle-stream", long = "particle-stream", env = "PARTICLE_STREAM", default_value = PARTICLE_STREAM, help = "Stream URL.")]
    pub stream: String,

    #[clap(id = "particle-auth", long = "particle-auth", env = "PARTICLE_AUTH", default_value = "", hide_env_values = true, help = "Auth code.")]
    pub auth: String,

    #[clap(id = "particle-event-types", long = "particle-event-types", env = "PARTICLE_EVENT_TYPES", value_delimiter = ',', default_value = DEFAULT_EVENT_TYPE, help = "Event types to record, comma separated.")]
    pub event_types: Vec<String>,
}

impl ParticleArgs {
    pub fn schedule(&self) -> SourceSchedule {
        SourceSchedule {
            enabled: self.enabled,
            freq: self.freq,
        }
    }

    pub fn settings(&self) -> ParticleSettings {
        ParticleSettings {
            stream_url: self.stream.clone(),
            auth: self.auth.clone(),
            event_types: self.event_types.clone(),
        }
    }
}
